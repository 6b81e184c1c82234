use crate::audio::resampler::Resampler;
use crate::audio::{
    AudioCaptureDevice, AudioError, AudioFormat, ChunkDelivery, LevelAnalyzer, byte_level,
    encode_linear16, magnitudes, wait_blocking,
};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::sync::{Arc, Mutex, mpsc as std_mpsc};
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::mpsc;

/// Rate the speech backend receives LINEAR16 audio at.
pub const TARGET_SAMPLE_RATE: u32 = 16_000;

/// Samples kept for level analysis (roughly the last 40 ms at 48 kHz).
const LEVEL_WINDOW: usize = 2048;

struct Shared {
    pending: Vec<f32>,
    level_window: Vec<u8>,
}

/// Default-input-device microphone backed by cpal.
///
/// cpal streams are not `Send`, so each capture runs its stream on a dedicated
/// thread; this handle only holds the control channel.
pub struct MicrophoneCapture {
    shared: Arc<Mutex<Shared>>,
    stop_tx: Option<std_mpsc::Sender<()>>,
    worker: Option<JoinHandle<()>>,
}

impl MicrophoneCapture {
    pub fn new() -> Self {
        MicrophoneCapture {
            shared: Arc::new(Mutex::new(Shared {
                pending: Vec::new(),
                level_window: Vec::new(),
            })),
            stop_tx: None,
            worker: None,
        }
    }

    fn input_device() -> Result<(cpal::Device, cpal::StreamConfig), AudioError> {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or(AudioError::NoMicrophoneFound)?;
        let config: cpal::StreamConfig = device
            .default_input_config()
            .map_err(|e| AudioError::PermissionDenied(e.to_string()))?
            .into();
        Ok((device, config))
    }
}

impl Default for MicrophoneCapture {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioCaptureDevice for MicrophoneCapture {
    fn acquire(&mut self) -> Result<AudioFormat, AudioError> {
        Self::input_device()?;
        Ok(AudioFormat::linear16(TARGET_SAMPLE_RATE))
    }

    fn start(
        &mut self,
        delivery: ChunkDelivery,
        chunks: mpsc::UnboundedSender<Vec<u8>>,
    ) -> Result<(), AudioError> {
        self.stop();

        if let Ok(mut shared) = self.shared.lock() {
            shared.pending.clear();
            shared.level_window.clear();
        }

        let shared = Arc::clone(&self.shared);
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();
        let (ready_tx, ready_rx) = std_mpsc::channel::<Result<(), AudioError>>();

        let worker = std::thread::spawn(move || {
            run_capture_thread(shared, delivery, chunks, stop_rx, ready_tx);
        });

        match wait_blocking(|| ready_rx.recv()) {
            Ok(Ok(())) => {
                self.stop_tx = Some(stop_tx);
                self.worker = Some(worker);
                Ok(())
            }
            Ok(Err(e)) => {
                let _ = wait_blocking(|| worker.join());
                Err(e)
            }
            Err(_) => {
                let _ = wait_blocking(|| worker.join());
                Err(AudioError::StreamStartFailed(
                    "capture thread exited".to_string(),
                ))
            }
        }
    }

    fn level_analyzer(&mut self) -> Option<Box<dyn LevelAnalyzer>> {
        Some(Box::new(WindowLevelAnalyzer {
            shared: Arc::clone(&self.shared),
        }))
    }

    fn stop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        if let Some(worker) = self.worker.take() {
            let _ = wait_blocking(|| worker.join());
        }
    }

    fn is_active(&self) -> bool {
        self.worker.is_some()
    }
}

impl Drop for MicrophoneCapture {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_capture_thread(
    shared: Arc<Mutex<Shared>>,
    delivery: ChunkDelivery,
    chunks: mpsc::UnboundedSender<Vec<u8>>,
    stop_rx: std_mpsc::Receiver<()>,
    ready_tx: std_mpsc::Sender<Result<(), AudioError>>,
) {
    let (device, config) = match MicrophoneCapture::input_device() {
        Ok(found) => found,
        Err(e) => {
            let _ = ready_tx.send(Err(e));
            return;
        }
    };
    let mut resampler = match Resampler::new(config.sample_rate.0, TARGET_SAMPLE_RATE) {
        Ok(r) => r,
        Err(e) => {
            let _ = ready_tx.send(Err(e));
            return;
        }
    };

    let channels = config.channels as usize;
    let callback_shared = Arc::clone(&shared);
    let stream = device.build_input_stream(
        &config,
        move |data: &[f32], _: &cpal::InputCallbackInfo| {
            if let Ok(mut buffer) = callback_shared.lock() {
                let mono: Vec<f32> = if channels == 1 {
                    data.to_vec()
                } else {
                    // Down-mix to mono by averaging
                    data.chunks(channels)
                        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
                        .collect()
                };
                let mags = magnitudes(&mono);
                buffer.level_window.extend_from_slice(&mags);
                let excess = buffer.level_window.len().saturating_sub(LEVEL_WINDOW);
                buffer.level_window.drain(..excess);
                buffer.pending.extend_from_slice(&mono);
            }
        },
        |err| tracing::warn!("input stream error: {err}"),
        None,
    );
    let stream = match stream {
        Ok(s) => s,
        Err(e) => {
            let _ = ready_tx.send(Err(AudioError::StreamStartFailed(e.to_string())));
            return;
        }
    };
    if let Err(e) = stream.play() {
        let _ = ready_tx.send(Err(AudioError::StreamStartFailed(e.to_string())));
        return;
    }
    let _ = ready_tx.send(Ok(()));

    let slice = match delivery {
        ChunkDelivery::Sliced(slice) => slice,
        ChunkDelivery::OnStop => Duration::from_millis(250),
    };
    let mut held: Vec<u8> = Vec::new();

    loop {
        let stopping = match stop_rx.recv_timeout(slice) {
            Ok(()) | Err(std_mpsc::RecvTimeoutError::Disconnected) => true,
            Err(std_mpsc::RecvTimeoutError::Timeout) => false,
        };

        if stopping {
            // Let in-flight callbacks land before the final drain
            drop(stream);
            let mut encoded = drain_encoded(&shared, &mut resampler);
            if let Ok(tail) = resampler.flush() {
                encoded.extend(encode_linear16(&tail));
            }
            held.extend(encoded);
            if !held.is_empty() {
                let _ = chunks.send(held);
            }
            break;
        }

        let encoded = drain_encoded(&shared, &mut resampler);
        match delivery {
            ChunkDelivery::Sliced(_) => {
                if !encoded.is_empty() && chunks.send(encoded).is_err() {
                    break;
                }
            }
            ChunkDelivery::OnStop => held.extend(encoded),
        }
    }
}

fn drain_encoded(shared: &Arc<Mutex<Shared>>, resampler: &mut Resampler) -> Vec<u8> {
    let pending = match shared.lock() {
        Ok(mut buffer) => std::mem::take(&mut buffer.pending),
        Err(_) => return Vec::new(),
    };
    match resampler.push(&pending) {
        Ok(resampled) => encode_linear16(&resampled),
        Err(e) => {
            tracing::warn!("dropping audio slice: {e}");
            Vec::new()
        }
    }
}

struct WindowLevelAnalyzer {
    shared: Arc<Mutex<Shared>>,
}

impl LevelAnalyzer for WindowLevelAnalyzer {
    fn sample_level(&mut self) -> f32 {
        self.shared
            .lock()
            .map(|buffer| byte_level(&buffer.level_window))
            .unwrap_or(0.0)
    }
}
