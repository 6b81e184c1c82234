use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use reqwest::Url;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use crate::audio::AudioFormat;
use crate::error::channel::ChannelError;
use crate::types::wire::{StreamControl, StreamMessage};

/// Frames pushed toward the realtime transcription endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamInput {
    Audio(Vec<u8>),
    End,
}

/// An open realtime channel: audio goes in, transcript messages come out in receipt order.
pub struct RealtimeStream {
    pub input: mpsc::UnboundedSender<StreamInput>,
    pub messages: mpsc::UnboundedReceiver<StreamMessage>,
}

#[async_trait]
pub trait RealtimeConnector: Send + Sync {
    async fn connect(
        &self,
        language_code: &str,
        format: AudioFormat,
    ) -> Result<RealtimeStream, ChannelError>;
}

/// WebSocket transcription endpoint.
pub struct WsConnector {
    url: String,
}

impl WsConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    fn endpoint(&self, language_code: &str, format: AudioFormat) -> Result<Url, ChannelError> {
        let mut url = Url::parse(&self.url).map_err(|e| ChannelError::Connect(e.to_string()))?;
        url.query_pairs_mut()
            .append_pair("lang", language_code)
            .append_pair("encoding", format.encoding.as_str())
            .append_pair("sampleRate", &format.sample_rate_hz.to_string());
        Ok(url)
    }
}

#[async_trait]
impl RealtimeConnector for WsConnector {
    async fn connect(
        &self,
        language_code: &str,
        format: AudioFormat,
    ) -> Result<RealtimeStream, ChannelError> {
        let url = self.endpoint(language_code, format)?;
        let (socket, _) = connect_async(url.as_str())
            .await
            .map_err(|e| ChannelError::Connect(e.to_string()))?;
        let (mut sink, mut source) = socket.split();

        let (input_tx, mut input_rx) = mpsc::unbounded_channel::<StreamInput>();
        let (message_tx, message_rx) = mpsc::unbounded_channel::<StreamMessage>();

        tokio::spawn(async move {
            while let Some(input) = input_rx.recv().await {
                let frame = match input {
                    StreamInput::Audio(bytes) => Message::Binary(bytes.into()),
                    StreamInput::End => {
                        let Ok(json) = serde_json::to_string(&StreamControl::end()) else {
                            break;
                        };
                        Message::Text(json.into())
                    }
                };
                if let Err(e) = sink.send(frame).await {
                    tracing::debug!("realtime channel send failed: {e}");
                    break;
                }
            }
            // Input closed: the session is done with this channel
            let _ = sink.close().await;
        });

        tokio::spawn(async move {
            while let Some(frame) = source.next().await {
                match frame {
                    Ok(Message::Text(text)) => match serde_json::from_str::<StreamMessage>(&text) {
                        Ok(message) => {
                            if message_tx.send(message).is_err() {
                                break;
                            }
                        }
                        Err(e) => tracing::debug!("ignoring realtime frame: {e}"),
                    },
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        tracing::debug!("realtime channel closed: {}", ChannelError::Protocol(e.to_string()));
                        break;
                    }
                }
            }
        });

        Ok(RealtimeStream {
            input: input_tx,
            messages: message_rx,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn given_base_url_when_building_endpoint_then_format_is_in_query() {
        let connector = WsConnector::new("wss://stt.example.com/stream?key=abc");

        let url = connector
            .endpoint("en-US", AudioFormat::linear16(16_000))
            .unwrap();

        assert_eq!(
            url.as_str(),
            "wss://stt.example.com/stream?key=abc&lang=en-US&encoding=LINEAR16&sampleRate=16000"
        );
    }

    #[test]
    fn given_invalid_url_then_connect_error() {
        let connector = WsConnector::new("not a url");

        let result = connector.endpoint("en-US", AudioFormat::linear16(16_000));

        assert!(matches!(result, Err(ChannelError::Connect(_))));
    }
}
