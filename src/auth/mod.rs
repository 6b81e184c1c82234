use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

const TOKEN_VAR: &str = "MOJO_ID_TOKEN";
const EXPIRES_VAR: &str = "MOJO_ID_TOKEN_EXPIRES";

/// Bearer token for the callable functions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdToken {
    pub token: String,
    /// Expiry in unix milliseconds, when known
    pub expires: Option<u64>,
}

impl IdToken {
    pub fn is_expired(&self) -> bool {
        match self.expires {
            Some(expires) => expires <= now_millis(),
            None => false,
        }
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// `.env` next to the executable, falling back to the working directory.
pub fn env_path() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(Path::to_path_buf))
        .or_else(|| std::env::current_dir().ok())
        .unwrap_or_default()
        .join(".env")
}

/// Load `.env` files into the process environment. Existing variables win.
pub fn load_env() {
    let path = env_path();
    if path.exists() {
        if let Err(e) = dotenvy::from_path(&path) {
            tracing::warn!("failed to load {}: {e}", path.display());
        }
    }
    let _ = dotenvy::dotenv();
}

/// Read the token from the environment; expired tokens are dropped with a warning.
pub fn id_token() -> Option<IdToken> {
    let token = std::env::var(TOKEN_VAR).ok().filter(|t| !t.trim().is_empty())?;
    let expires = std::env::var(EXPIRES_VAR)
        .ok()
        .and_then(|s| s.trim().parse::<u64>().ok());
    let id_token = IdToken {
        token: token.trim().to_string(),
        expires,
    };
    if id_token.is_expired() {
        tracing::warn!("{TOKEN_VAR} has expired; calling functions unauthenticated");
        return None;
    }
    Some(id_token)
}
