pub mod api;
pub mod realtime;

use async_trait::async_trait;

use crate::audio::AudioFormat;
use crate::error::api::ApiError;
use crate::types::wire::AskResponse;
use crate::types::thread::ThreadItem;

/// Parameters shared by both buffered transcription calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscribeOptions {
    pub format: AudioFormat,
    pub language_code: String,
}

/// Question-answering collaborator.
#[async_trait]
pub trait AssistantApi: Send + Sync {
    async fn ask(
        &self,
        question: &str,
        session_id: Option<&str>,
        history: &[ThreadItem],
    ) -> Result<AskResponse, ApiError>;
}

/// Request/response speech-to-text collaborator.
#[async_trait]
pub trait SpeechToText: Send + Sync {
    /// Synchronous recognition for short recordings.
    async fn transcribe(
        &self,
        audio_base64: &str,
        options: &TranscribeOptions,
    ) -> Result<String, ApiError>;

    /// Long-running recognition for recordings past the synchronous ceiling.
    async fn transcribe_long(
        &self,
        audio_base64: &str,
        options: &TranscribeOptions,
    ) -> Result<String, ApiError>;
}

/// Text-to-speech collaborator. Returns encoded audio bytes.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>, ApiError>;
}
