use thiserror::Error;

use crate::audio::AudioError;

#[derive(Debug, Error)]
pub enum RecordingError {
    #[error(transparent)]
    Audio(#[from] AudioError),
    #[error("cannot {trigger} while {state}")]
    IllegalTransition {
        state: &'static str,
        trigger: &'static str,
    },
}
