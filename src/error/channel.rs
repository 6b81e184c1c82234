use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("failed to connect realtime channel: {0}")]
    Connect(String),
    #[error("realtime channel did not open within {0} ms")]
    Timeout(u64),
    #[error("realtime channel protocol error: {0}")]
    Protocol(String),
}
