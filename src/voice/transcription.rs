use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::audio::AudioFormat;
use crate::client::realtime::{RealtimeConnector, RealtimeStream, StreamInput};
use crate::client::{SpeechToText, TranscribeOptions};
use crate::config::VoiceTimings;
use crate::error::channel::ChannelError;
use crate::types::wire::StreamMessage;
use crate::voice::Notify;

/// Accumulated realtime transcript for one recording.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamTranscript {
    pub partial: String,
    pub finals: String,
}

impl StreamTranscript {
    pub fn apply(&mut self, message: StreamMessage) {
        match message {
            StreamMessage::Partial { text } => self.partial = text.trim().to_string(),
            StreamMessage::Final { text } => {
                let text = text.trim();
                if !text.is_empty() {
                    if !self.finals.is_empty() {
                        self.finals.push(' ');
                    }
                    self.finals.push_str(text);
                }
                self.partial.clear();
            }
        }
    }

    pub fn has_final(&self) -> bool {
        !self.finals.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        self.finals.is_empty() && self.partial.is_empty()
    }

    /// Confirmed text followed by the unstable tail, for live preview.
    pub fn display(&self) -> String {
        match (self.finals.is_empty(), self.partial.is_empty()) {
            (true, _) => self.partial.clone(),
            (false, true) => self.finals.clone(),
            (false, false) => format!("{} {}", self.finals, self.partial),
        }
    }
}

/// Session-side view of an open realtime channel.
pub struct StreamSide {
    pub input: mpsc::UnboundedSender<StreamInput>,
    pub transcript: watch::Receiver<StreamTranscript>,
}

/// Try the realtime channel; `None` means the caller falls back to buffered transcription.
pub async fn open_channel(
    connector: Option<&dyn RealtimeConnector>,
    language_code: &str,
    format: AudioFormat,
    connect_timeout: Duration,
) -> Option<RealtimeStream> {
    let connector = connector?;
    match tokio::time::timeout(connect_timeout, connector.connect(language_code, format)).await {
        Ok(Ok(stream)) => {
            tracing::debug!("realtime channel open");
            Some(stream)
        }
        Ok(Err(e)) => {
            tracing::warn!("{e}; using buffered transcription");
            None
        }
        Err(_) => {
            let e = ChannelError::Timeout(connect_timeout.as_millis() as u64);
            tracing::warn!("{e}; using buffered transcription");
            None
        }
    }
}

/// Fold realtime messages into a watch channel in receipt order, notifying on each change.
pub fn spawn_transcript_reader(
    mut messages: mpsc::UnboundedReceiver<StreamMessage>,
    transcript: watch::Sender<StreamTranscript>,
    notify: Notify<StreamTranscript>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(message) = messages.recv().await {
            transcript.send_modify(|t| t.apply(message));
            let snapshot = transcript.borrow().clone();
            notify(snapshot);
        }
    })
}

/// Wait at most `wait` for a final transcript. Resolves to `None` on timeout or
/// when the channel closes without one.
pub async fn await_final(
    transcript: &mut watch::Receiver<StreamTranscript>,
    wait: Duration,
) -> Option<String> {
    match tokio::time::timeout(wait, transcript.wait_for(|t| t.has_final())).await {
        Ok(Ok(t)) => Some(t.finals.clone()),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranscriptionPath {
    Short,
    Long,
}

/// Size of `len` bytes once base64 encoded.
pub fn base64_len(len: usize) -> usize {
    len.div_ceil(3) * 4
}

/// Synchronous recognition has a one-minute ceiling; anything near it goes long-form.
pub fn select_path(audio_len: usize, duration: Duration, timings: &VoiceTimings) -> TranscriptionPath {
    if base64_len(audio_len) < timings.short_form_max_bytes && duration < timings.short_form_max() {
        TranscriptionPath::Short
    } else {
        TranscriptionPath::Long
    }
}

/// Request/response transcription. Failures come back as an empty transcript.
pub async fn transcribe_buffered(
    stt: &dyn SpeechToText,
    audio: &[u8],
    duration: Duration,
    options: &TranscribeOptions,
    timings: &VoiceTimings,
) -> String {
    if audio.is_empty() {
        return String::new();
    }
    let encoded = BASE64.encode(audio);
    let path = select_path(audio.len(), duration, timings);
    tracing::debug!(
        "buffered transcription: {:?} path, {} bytes, {} ms",
        path,
        audio.len(),
        duration.as_millis()
    );
    let result = match path {
        TranscriptionPath::Short => stt.transcribe(&encoded, options).await,
        TranscriptionPath::Long => stt.transcribe_long(&encoded, options).await,
    };
    match result {
        Ok(text) => text.trim().to_string(),
        Err(e) => {
            tracing::warn!("transcription failed: {e}");
            String::new()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranscriptSource {
    Streamed,
    Buffered,
    Empty,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub text: String,
    pub source: TranscriptSource,
}

impl Resolution {
    pub fn empty() -> Self {
        Self {
            text: String::new(),
            source: TranscriptSource::Empty,
        }
    }

    fn of(text: String, source: TranscriptSource) -> Self {
        if text.is_empty() {
            Self::empty()
        } else {
            Self { text, source }
        }
    }
}

/// Everything needed to turn a stopped recording into text.
pub struct ResolveRequest {
    pub audio: Vec<u8>,
    pub duration: Duration,
    pub options: TranscribeOptions,
    pub stream: Option<StreamSide>,
    /// `Some(false)` when a level analyzer ran and never heard sound.
    pub speech_heard: Option<bool>,
}

/// Resolve the final transcript: a realtime final wins if it is already present or
/// arrives within the bounded wait after end-of-audio; otherwise the same audio is
/// transcribed through the buffered path.
pub async fn resolve_transcript(
    request: ResolveRequest,
    stt: Arc<dyn SpeechToText>,
    timings: &VoiceTimings,
) -> Resolution {
    if let Some(mut side) = request.stream {
        let _ = side.input.send(StreamInput::End);
        let ready = side.transcript.borrow().has_final();
        let streamed = if ready {
            Some(side.transcript.borrow().finals.clone())
        } else {
            await_final(&mut side.transcript, timings.stream_final_wait()).await
        };
        if let Some(text) = streamed {
            return Resolution::of(text, TranscriptSource::Streamed);
        }
        tracing::debug!("no final from realtime channel, falling back");
    }

    if request.speech_heard == Some(false) {
        tracing::debug!("no speech detected, skipping transcription");
        return Resolution::empty();
    }

    let text = transcribe_buffered(
        stt.as_ref(),
        &request.audio,
        request.duration,
        &request.options,
        timings,
    )
    .await;
    Resolution::of(text, TranscriptSource::Buffered)
}
