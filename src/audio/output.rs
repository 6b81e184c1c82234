use crate::audio::resampler::resample_all;
use crate::audio::{AudioError, AudioOutput, wait_blocking};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::io::Cursor;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, mpsc as std_mpsc};
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::oneshot;

/// Decoded mono clip ready for playback.
#[derive(Debug, Clone)]
pub struct Clip {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

/// Decode a RIFF/WAV payload into mono float samples.
pub fn decode_wav(bytes: &[u8]) -> Result<Clip, AudioError> {
    let reader =
        hound::WavReader::new(Cursor::new(bytes)).map_err(|e| AudioError::FormatError(e.to_string()))?;
    let spec = reader.spec();
    let channels = spec.channels.max(1) as usize;

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .into_samples::<f32>()
            .collect::<Result<_, _>>()
            .map_err(|e| AudioError::FormatError(e.to_string()))?,
        hound::SampleFormat::Int => {
            let scale = (1i64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<Result<_, _>>()
                .map_err(|e| AudioError::FormatError(e.to_string()))?
        }
    };

    let samples = if channels == 1 {
        interleaved
    } else {
        interleaved
            .chunks(channels)
            .map(|frame| frame.iter().sum::<f32>() / channels as f32)
            .collect()
    };

    Ok(Clip {
        samples,
        sample_rate: spec.sample_rate,
    })
}

/// Default-output-device speaker backed by cpal. One clip plays at a time.
pub struct SpeakerOutput {
    stop_tx: Option<std_mpsc::Sender<()>>,
    worker: Option<JoinHandle<()>>,
    playing: Arc<AtomicBool>,
}

impl SpeakerOutput {
    pub fn new() -> Self {
        SpeakerOutput {
            stop_tx: None,
            worker: None,
            playing: Arc::new(AtomicBool::new(false)),
        }
    }
}

impl Default for SpeakerOutput {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioOutput for SpeakerOutput {
    fn play(&mut self, audio: Vec<u8>) -> Result<oneshot::Receiver<()>, AudioError> {
        self.stop();

        let clip = decode_wav(&audio)?;
        let (ended_tx, ended_rx) = oneshot::channel();
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();
        let (ready_tx, ready_rx) = std_mpsc::channel::<Result<(), AudioError>>();
        let playing = Arc::clone(&self.playing);
        playing.store(true, Ordering::SeqCst);

        let worker = std::thread::spawn(move || {
            run_playback_thread(clip, ended_tx, stop_rx, ready_tx, playing);
        });

        match wait_blocking(|| ready_rx.recv()) {
            Ok(Ok(())) => {
                self.stop_tx = Some(stop_tx);
                self.worker = Some(worker);
                Ok(ended_rx)
            }
            Ok(Err(e)) => {
                let _ = wait_blocking(|| worker.join());
                self.playing.store(false, Ordering::SeqCst);
                Err(e)
            }
            Err(_) => {
                let _ = wait_blocking(|| worker.join());
                self.playing.store(false, Ordering::SeqCst);
                Err(AudioError::StreamStartFailed(
                    "playback thread exited".to_string(),
                ))
            }
        }
    }

    fn stop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        if let Some(worker) = self.worker.take() {
            let _ = wait_blocking(|| worker.join());
        }
        self.playing.store(false, Ordering::SeqCst);
    }

    fn is_playing(&self) -> bool {
        self.playing.load(Ordering::SeqCst)
    }
}

impl Drop for SpeakerOutput {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Clip samples at the output device's rate.
pub fn to_device_rate(clip: Clip, device_rate: u32) -> Result<Vec<f32>, AudioError> {
    if clip.sample_rate == device_rate {
        return Ok(clip.samples);
    }
    resample_all(&clip.samples, clip.sample_rate, device_rate)
}

fn run_playback_thread(
    clip: Clip,
    ended_tx: oneshot::Sender<()>,
    stop_rx: std_mpsc::Receiver<()>,
    ready_tx: std_mpsc::Sender<Result<(), AudioError>>,
    playing: Arc<AtomicBool>,
) {
    let host = cpal::default_host();
    let Some(device) = host.default_output_device() else {
        let _ = ready_tx.send(Err(AudioError::NoOutputDevice));
        return;
    };
    let config: cpal::StreamConfig = match device.default_output_config() {
        Ok(c) => c.into(),
        Err(e) => {
            let _ = ready_tx.send(Err(AudioError::DeviceInitFailed(e.to_string())));
            return;
        }
    };

    let samples = match to_device_rate(clip, config.sample_rate.0) {
        Ok(samples) => samples,
        Err(e) => {
            let _ = ready_tx.send(Err(e));
            return;
        }
    };

    let channels = config.channels as usize;
    let finished = Arc::new(AtomicBool::new(false));
    let callback_finished = Arc::clone(&finished);
    let mut pos = 0usize;
    let stream = device.build_output_stream(
        &config,
        move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
            for frame in data.chunks_mut(channels) {
                let value = match samples.get(pos) {
                    Some(sample) => {
                        pos += 1;
                        *sample
                    }
                    None => {
                        callback_finished.store(true, Ordering::SeqCst);
                        0.0
                    }
                };
                frame.fill(value);
            }
        },
        |err| tracing::warn!("output stream error: {err}"),
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

    loop {
        match stop_rx.recv_timeout(Duration::from_millis(50)) {
            Ok(()) | Err(std_mpsc::RecvTimeoutError::Disconnected) => {
                // Stopped: ended_tx is dropped without firing
                break;
            }
            Err(std_mpsc::RecvTimeoutError::Timeout) => {
                if finished.load(Ordering::SeqCst) {
                    drop(stream);
                    playing.store(false, Ordering::SeqCst);
                    let _ = ended_tx.send(());
                    return;
                }
            }
        }
    }
    playing.store(false, Ordering::SeqCst);
}
