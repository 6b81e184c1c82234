use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no platform config directory available")]
    NoConfigDir,
    #[error("failed to write config: {0}")]
    Write(String),
    #[error("failed to serialize config: {0}")]
    Serialize(String),
}
