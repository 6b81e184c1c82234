use thiserror::Error;

#[derive(Debug, Error)]
pub enum AudioError {
    #[error("No microphone found. Please check your system audio settings.")]
    NoMicrophoneFound,

    #[error("Microphone access was denied: {0}")]
    PermissionDenied(String),

    #[error("Failed to initialize audio device: {0}")]
    DeviceInitFailed(String),

    #[error("Failed to start audio stream: {0}")]
    StreamStartFailed(String),

    #[error("No audio output device available")]
    NoOutputDevice,

    #[error("Failed to resample audio: {0}")]
    ResampleFailed(String),

    #[error("Audio format error: {0}")]
    FormatError(String),
}

impl AudioError {
    /// Errors that mean the microphone can never be opened without user action.
    pub fn is_permission(&self) -> bool {
        matches!(
            self,
            AudioError::NoMicrophoneFound | AudioError::PermissionDenied(_)
        )
    }
}
