use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::config::ConfigError;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FunctionNames {
    #[serde(default = "default_ask_fn")]
    pub ask: String,
    #[serde(default = "default_transcribe_fn")]
    pub transcribe: String,
    #[serde(default = "default_transcribe_long_fn")]
    pub transcribe_long: String,
    #[serde(default = "default_synthesize_fn")]
    pub synthesize: String,
}

fn default_ask_fn() -> String {
    "chatAsk".to_string()
}

fn default_transcribe_fn() -> String {
    "transcribeAudio".to_string()
}

fn default_transcribe_long_fn() -> String {
    "transcribeLongAudio".to_string()
}

fn default_synthesize_fn() -> String {
    "synthesizeSpeech".to_string()
}

impl Default for FunctionNames {
    fn default() -> Self {
        Self {
            ask: default_ask_fn(),
            transcribe: default_transcribe_fn(),
            transcribe_long: default_transcribe_long_fn(),
            synthesize: default_synthesize_fn(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_functions_base_url")]
    pub functions_base_url: String,
    /// WebSocket endpoint for streaming transcription; buffered only when unset
    #[serde(default)]
    pub realtime_url: Option<String>,
    #[serde(default)]
    pub functions: FunctionNames,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_functions_base_url() -> String {
    "http://127.0.0.1:5001/momsfitnessmojo/us-central1".to_string()
}

fn default_request_timeout_secs() -> u64 {
    90
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            functions_base_url: default_functions_base_url(),
            realtime_url: None,
            functions: FunctionNames::default(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceConfig {
    #[serde(default = "default_auto_speak")]
    pub auto_speak: bool,
    #[serde(default = "default_language_code")]
    pub language_code: String,
    #[serde(default = "default_turn_cap")]
    pub turn_cap: u32,
}

fn default_auto_speak() -> bool {
    true
}

fn default_language_code() -> String {
    "en-US".to_string()
}

fn default_turn_cap() -> u32 {
    10
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            auto_speak: default_auto_speak(),
            language_code: default_language_code(),
            turn_cap: default_turn_cap(),
        }
    }
}

/// Timing and threshold constants for the voice controller.
///
/// Durations are stored in milliseconds so the JSON file stays hand-editable.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VoiceTimings {
    #[serde(default = "default_level_sample_ms")]
    pub level_sample_ms: u64,
    #[serde(default = "default_sound_threshold")]
    pub sound_threshold: f32,
    #[serde(default = "default_silence_ms")]
    pub silence_ms: u64,
    #[serde(default = "default_max_recording_ms")]
    pub max_recording_ms: u64,
    #[serde(default = "default_stream_connect_ms")]
    pub stream_connect_ms: u64,
    #[serde(default = "default_stream_final_wait_ms")]
    pub stream_final_wait_ms: u64,
    #[serde(default = "default_stream_timeslice_ms")]
    pub stream_timeslice_ms: u64,
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,
    #[serde(default = "default_conversation_idle_ms")]
    pub conversation_idle_ms: u64,
    #[serde(default = "default_short_form_max_bytes")]
    pub short_form_max_bytes: usize,
    #[serde(default = "default_short_form_max_ms")]
    pub short_form_max_ms: u64,
}

fn default_level_sample_ms() -> u64 {
    200
}

fn default_sound_threshold() -> f32 {
    0.05
}

fn default_silence_ms() -> u64 {
    1200
}

fn default_max_recording_ms() -> u64 {
    45_000
}

fn default_stream_connect_ms() -> u64 {
    2000
}

fn default_stream_final_wait_ms() -> u64 {
    1500
}

fn default_stream_timeslice_ms() -> u64 {
    100
}

fn default_settle_ms() -> u64 {
    600
}

fn default_conversation_idle_ms() -> u64 {
    15_000
}

fn default_short_form_max_bytes() -> usize {
    3_000_000
}

fn default_short_form_max_ms() -> u64 {
    55_000
}

impl Default for VoiceTimings {
    fn default() -> Self {
        Self {
            level_sample_ms: default_level_sample_ms(),
            sound_threshold: default_sound_threshold(),
            silence_ms: default_silence_ms(),
            max_recording_ms: default_max_recording_ms(),
            stream_connect_ms: default_stream_connect_ms(),
            stream_final_wait_ms: default_stream_final_wait_ms(),
            stream_timeslice_ms: default_stream_timeslice_ms(),
            settle_ms: default_settle_ms(),
            conversation_idle_ms: default_conversation_idle_ms(),
            short_form_max_bytes: default_short_form_max_bytes(),
            short_form_max_ms: default_short_form_max_ms(),
        }
    }
}

impl VoiceTimings {
    pub fn level_sample(&self) -> Duration {
        Duration::from_millis(self.level_sample_ms)
    }

    pub fn silence(&self) -> Duration {
        Duration::from_millis(self.silence_ms)
    }

    pub fn max_recording(&self) -> Duration {
        Duration::from_millis(self.max_recording_ms)
    }

    pub fn stream_connect(&self) -> Duration {
        Duration::from_millis(self.stream_connect_ms)
    }

    pub fn stream_final_wait(&self) -> Duration {
        Duration::from_millis(self.stream_final_wait_ms)
    }

    pub fn stream_timeslice(&self) -> Duration {
        Duration::from_millis(self.stream_timeslice_ms)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    pub fn conversation_idle(&self) -> Duration {
        Duration::from_millis(self.conversation_idle_ms)
    }

    pub fn short_form_max(&self) -> Duration {
        Duration::from_millis(self.short_form_max_ms)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub voice: VoiceConfig,
    #[serde(default)]
    pub timings: VoiceTimings,
}

impl AppConfig {
    fn config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "mojo-voice")
            .map(|dirs| dirs.config_dir().join("config.json"))
    }

    pub fn load() -> Self {
        match Self::config_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => Self::default(),
        }
    }

    /// Read a config file, falling back to defaults when it is missing or malformed.
    pub fn load_from(path: &std::path::Path) -> Self {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(_) => return Self::default(),
        };
        match serde_json::from_str(&contents) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("ignoring malformed config at {}: {e}", path.display());
                Self::default()
            }
        }
    }

    pub fn save(&self) -> Result<(), ConfigError> {
        let path = Self::config_path().ok_or(ConfigError::NoConfigDir)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Write(e.to_string()))?;
        }
        let json =
            serde_json::to_string_pretty(self).map_err(|e| ConfigError::Serialize(e.to_string()))?;
        std::fs::write(&path, json).map_err(|e| ConfigError::Write(e.to_string()))
    }
}
