//! Voice conversation controller: microphone capture with silence detection,
//! streaming or buffered transcription, spoken replies and hands-free
//! multi-turn conversation.

pub mod controller;
pub mod conversation;
pub mod level;
pub mod playback;
pub mod recording;
pub mod timers;
pub mod transcription;

use std::sync::Arc;

/// Callback used by background tasks to post signals back to the controller loop.
pub type Notify<T> = Arc<dyn Fn(T) + Send + Sync>;
