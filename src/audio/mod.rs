pub mod capture;
pub mod error;
pub mod output;
pub mod resampler;

pub use error::AudioError;

use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

/// Wire encoding of captured audio, named the way the speech backend expects it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Linear16,
}

impl Encoding {
    pub fn as_str(&self) -> &'static str {
        match self {
            Encoding::Linear16 => "LINEAR16",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    pub encoding: Encoding,
    pub sample_rate_hz: u32,
}

impl AudioFormat {
    pub const fn linear16(sample_rate_hz: u32) -> Self {
        Self {
            encoding: Encoding::Linear16,
            sample_rate_hz,
        }
    }
}

/// How the capture device hands audio to the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkDelivery {
    /// Emit a chunk every slice; used while a realtime channel is open.
    Sliced(Duration),
    /// Emit everything as one chunk when the capture stops.
    OnStop,
}

/// Microphone capability. Exactly one capture may be active at a time.
pub trait AudioCaptureDevice: Send {
    /// Request microphone access and report the format chunks will be encoded in.
    fn acquire(&mut self) -> Result<AudioFormat, AudioError>;

    /// Begin delivering encoded chunks. The sender is dropped once the capture stops.
    fn start(
        &mut self,
        delivery: ChunkDelivery,
        chunks: mpsc::UnboundedSender<Vec<u8>>,
    ) -> Result<(), AudioError>;

    /// Live level source for silence detection, if the device can provide one.
    fn level_analyzer(&mut self) -> Option<Box<dyn LevelAnalyzer>>;

    /// Flush pending audio and release the device. Idempotent.
    fn stop(&mut self);

    fn is_active(&self) -> bool;
}

/// Samples the current input level on a 0-1 scale.
pub trait LevelAnalyzer: Send {
    fn sample_level(&mut self) -> f32;
}

/// Speaker capability. Starting a new playback replaces the previous one.
pub trait AudioOutput: Send {
    /// Play encoded audio. The receiver resolves only when playback ends naturally;
    /// it errors if playback is stopped or replaced.
    fn play(&mut self, audio: Vec<u8>) -> Result<oneshot::Receiver<()>, AudioError>;

    /// Stop the current playback immediately. Idempotent.
    fn stop(&mut self);

    fn is_playing(&self) -> bool;
}

/// Run a blocking device handshake. On a multi-threaded runtime the worker is
/// handed off first so other tasks keep running.
pub fn wait_blocking<T>(wait: impl FnOnce() -> T) -> T {
    match tokio::runtime::Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == tokio::runtime::RuntimeFlavor::MultiThread => {
            tokio::task::block_in_place(wait)
        }
        _ => wait(),
    }
}

/// Mean of 0-255 byte magnitudes, normalized to 0-1.
pub fn byte_level(magnitudes: &[u8]) -> f32 {
    if magnitudes.is_empty() {
        return 0.0;
    }
    let sum: u64 = magnitudes.iter().map(|&m| m as u64).sum();
    sum as f32 / magnitudes.len() as f32 / 255.0
}

/// Map float samples to 0-255 magnitudes.
pub fn magnitudes(samples: &[f32]) -> Vec<u8> {
    samples
        .iter()
        .map(|s| (s.abs().min(1.0) * 255.0).round() as u8)
        .collect()
}

/// Encode mono float samples as little-endian signed 16-bit PCM.
pub fn encode_linear16(samples: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for s in samples {
        let v = (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}
