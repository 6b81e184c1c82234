use serde::{Deserialize, Serialize};

use crate::types::thread::{Citation, Sender, ThreadItem};

/// Envelope for POST {base}/{function}
#[derive(Debug, Clone, Serialize)]
pub struct CallableRequest<T> {
    pub data: T,
}

/// Envelope returned by a callable function
#[derive(Debug, Clone, Deserialize)]
pub struct CallableResponse<T> {
    pub result: Option<T>,
    pub error: Option<CallableError>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CallableError {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HistoryEntry {
    pub from: Sender,
    pub text: String,
}

impl From<&ThreadItem> for HistoryEntry {
    fn from(item: &ThreadItem) -> Self {
        Self {
            from: item.sender,
            text: item.text.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AskRequest {
    pub question: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub history: Vec<HistoryEntry>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AskResponse {
    pub answer: String,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub citations: Vec<Citation>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscribeRequest {
    pub audio_content: String,
    pub encoding: String,
    pub sample_rate_hertz: u32,
    pub language_code: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TranscribeResponse {
    #[serde(default)]
    pub transcript: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SynthesizeRequest {
    pub text: String,
    pub language_code: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SynthesizeResponse {
    pub audio_content: String,
}

/// Message emitted by the realtime transcription channel
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StreamMessage {
    Partial { text: String },
    Final { text: String },
}

/// Sentinel sent to the realtime channel once audio is complete
#[derive(Debug, Clone, Serialize)]
pub struct StreamControl {
    pub event: &'static str,
}

impl StreamControl {
    pub fn end() -> Self {
        Self { event: "end" }
    }
}
