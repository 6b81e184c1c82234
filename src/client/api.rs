use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use reqwest::Url;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::client::{AssistantApi, SpeechSynthesizer, SpeechToText, TranscribeOptions};
use crate::config::{FunctionNames, ServerConfig};
use crate::error::api::ApiError;
use crate::types::thread::ThreadItem;
use crate::types::wire::{
    AskRequest, AskResponse, CallableRequest, CallableResponse, HistoryEntry, SynthesizeRequest,
    SynthesizeResponse, TranscribeRequest, TranscribeResponse,
};

/// Client for the assistant's callable functions.
#[derive(Clone)]
pub struct FunctionsClient {
    base: Url,
    http: reqwest::Client,
    functions: FunctionNames,
    language_code: String,
    pub id_token: Option<String>,
}

impl FunctionsClient {
    pub fn new(server: &ServerConfig, language_code: &str) -> Result<Self, ApiError> {
        // Url::join replaces the last segment unless the base ends with '/'
        let mut base_url = server.functions_base_url.clone();
        if !base_url.ends_with('/') {
            base_url.push('/');
        }
        let base = Url::parse(&base_url).map_err(|e| ApiError::Url(e.to_string()))?;
        Ok(Self {
            base,
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(server.request_timeout_secs))
                .build()
                .map_err(|e| ApiError::Http(e.to_string()))?,
            functions: server.functions.clone(),
            language_code: language_code.to_string(),
            id_token: None,
        })
    }

    pub fn set_id_token(&mut self, token: String) {
        self.id_token = Some(token);
    }

    fn prepare_request(&self, mut req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if let Some(token) = &self.id_token {
            req = req.header("Authorization", format!("Bearer {}", token));
        }
        req
    }

    async fn call<Req, Resp>(&self, function: &str, data: Req) -> Result<Resp, ApiError>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        let url = self
            .base
            .join(function)
            .map_err(|e| ApiError::Url(e.to_string()))?;
        let body = CallableRequest { data };

        let resp = self
            .prepare_request(self.http.post(url).json(&body))
            .send()
            .await
            .map_err(|e| ApiError::Http(e.to_string()))?;
        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| ApiError::Decode(e.to_string()))?;

        if !status.is_success() {
            if let Ok(parsed) = serde_json::from_str::<CallableResponse<serde_json::Value>>(&text) {
                if let Some(err) = parsed.error {
                    return Err(ApiError::Remote(err.message));
                }
            }
            return Err(ApiError::Status {
                status: status.as_u16(),
                body: text,
            });
        }

        let parsed: CallableResponse<Resp> =
            serde_json::from_str(&text).map_err(|e| ApiError::Decode(e.to_string()))?;
        if let Some(err) = parsed.error {
            return Err(ApiError::Remote(err.message));
        }
        parsed
            .result
            .ok_or_else(|| ApiError::Decode(format!("{function}: missing result")))
    }

    async fn transcribe_with(
        &self,
        function: &str,
        audio_base64: &str,
        options: &TranscribeOptions,
    ) -> Result<String, ApiError> {
        let request = TranscribeRequest {
            audio_content: audio_base64.to_string(),
            encoding: options.format.encoding.as_str().to_string(),
            sample_rate_hertz: options.format.sample_rate_hz,
            language_code: options.language_code.clone(),
        };
        let resp: TranscribeResponse = self.call(function, request).await?;
        Ok(resp.transcript.trim().to_string())
    }
}

#[async_trait]
impl AssistantApi for FunctionsClient {
    async fn ask(
        &self,
        question: &str,
        session_id: Option<&str>,
        history: &[ThreadItem],
    ) -> Result<AskResponse, ApiError> {
        let request = AskRequest {
            question: question.to_string(),
            session_id: session_id.map(str::to_string),
            history: history.iter().map(HistoryEntry::from).collect(),
        };
        self.call(&self.functions.ask, request).await
    }
}

#[async_trait]
impl SpeechToText for FunctionsClient {
    async fn transcribe(
        &self,
        audio_base64: &str,
        options: &TranscribeOptions,
    ) -> Result<String, ApiError> {
        self.transcribe_with(&self.functions.transcribe, audio_base64, options)
            .await
    }

    async fn transcribe_long(
        &self,
        audio_base64: &str,
        options: &TranscribeOptions,
    ) -> Result<String, ApiError> {
        self.transcribe_with(&self.functions.transcribe_long, audio_base64, options)
            .await
    }
}

#[async_trait]
impl SpeechSynthesizer for FunctionsClient {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>, ApiError> {
        let request = SynthesizeRequest {
            text: text.to_string(),
            language_code: self.language_code.clone(),
        };
        let resp: SynthesizeResponse = self.call(&self.functions.synthesize, request).await?;
        BASE64
            .decode(resp.audio_content.as_bytes())
            .map_err(|e| ApiError::Decode(e.to_string()))
    }
}
