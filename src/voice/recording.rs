use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::audio::{AudioCaptureDevice, AudioFormat, ChunkDelivery};
use crate::client::realtime::{RealtimeStream, StreamInput};
use crate::client::{SpeechToText, TranscribeOptions};
use crate::config::VoiceTimings;
use crate::error::recording::RecordingError;
use crate::voice::Notify;
use crate::voice::level::{LevelSettings, MonitorSignal, spawn_monitor};
use crate::voice::timers::{TimerKind, TimerSet};
use crate::voice::transcription::{
    Resolution, ResolveRequest, StreamSide, StreamTranscript, resolve_transcript,
    spawn_transcript_reader,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordingState {
    Idle,
    Starting,
    Recording,
    Stopping,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    User,
    Silence,
    MaxDuration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordingTrigger {
    Start,
    Ready,
    Failed,
    Stop(StopReason),
    Resolved,
    Abandon,
}

impl RecordingState {
    pub fn name(&self) -> &'static str {
        match self {
            RecordingState::Idle => "idle",
            RecordingState::Starting => "starting",
            RecordingState::Recording => "recording",
            RecordingState::Stopping => "stopping",
        }
    }

    /// Transition table. `None` marks an illegal transition.
    pub fn next(self, trigger: RecordingTrigger) -> Option<RecordingState> {
        use RecordingState::*;
        use RecordingTrigger as T;
        match (self, trigger) {
            (Idle, T::Start) => Some(Starting),
            (Starting, T::Ready) => Some(Recording),
            (Starting, T::Failed) => Some(Idle),
            (Recording, T::Stop(_)) => Some(Stopping),
            (Stopping, T::Resolved) => Some(Idle),
            (Starting | Recording | Stopping, T::Abandon) => Some(Idle),
            _ => None,
        }
    }
}

impl RecordingTrigger {
    fn name(&self) -> &'static str {
        match self {
            RecordingTrigger::Start => "start",
            RecordingTrigger::Ready => "begin recording",
            RecordingTrigger::Failed => "fail",
            RecordingTrigger::Stop(_) => "stop",
            RecordingTrigger::Resolved => "resolve",
            RecordingTrigger::Abandon => "abandon",
        }
    }
}

/// Signals a live recording posts back to the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionSignal {
    FirstSound,
    SilenceTimeout,
    MaxDuration,
    Transcript(StreamTranscript),
}

/// What a session needs to go live once its realtime channel is settled.
pub struct StartContext<'a> {
    pub device: &'a mut dyn AudioCaptureDevice,
    pub timings: &'a VoiceTimings,
    pub signals: Notify<SessionSignal>,
}

/// One microphone capture from start to resolved transcript.
pub struct RecordingSession {
    id: u64,
    state: RecordingState,
    format: Option<AudioFormat>,
    started_at: Instant,
    activity: Arc<AtomicBool>,
    analyzer_present: bool,
    stream: Option<StreamSide>,
    pump: Option<JoinHandle<Vec<u8>>>,
    reader: Option<JoinHandle<()>>,
    timers: TimerSet,
}

impl RecordingSession {
    pub fn new(id: u64) -> Self {
        Self {
            id,
            state: RecordingState::Idle,
            format: None,
            started_at: Instant::now(),
            activity: Arc::new(AtomicBool::new(false)),
            analyzer_present: false,
            stream: None,
            pump: None,
            reader: None,
            timers: TimerSet::new(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> RecordingState {
        self.state
    }

    pub fn is_streaming(&self) -> bool {
        self.stream.is_some()
    }

    /// True once the level monitor heard sound or the realtime channel produced text.
    pub fn heard_activity(&self) -> bool {
        self.activity.load(Ordering::SeqCst)
            || self
                .stream
                .as_ref()
                .map(|s| !s.transcript.borrow().is_empty())
                .unwrap_or(false)
    }

    fn transition(&mut self, trigger: RecordingTrigger) -> Result<(), RecordingError> {
        match self.state.next(trigger) {
            Some(next) => {
                tracing::debug!(
                    "recording {}: {} -> {}",
                    self.id,
                    self.state.name(),
                    next.name()
                );
                self.state = next;
                Ok(())
            }
            None => Err(self.illegal(trigger)),
        }
    }

    fn illegal(&self, trigger: RecordingTrigger) -> RecordingError {
        RecordingError::IllegalTransition {
            state: self.state.name(),
            trigger: trigger.name(),
        }
    }

    /// Idle -> Starting: claim the microphone. On failure the session is back in Idle.
    pub fn begin(
        &mut self,
        device: &mut dyn AudioCaptureDevice,
    ) -> Result<AudioFormat, RecordingError> {
        self.transition(RecordingTrigger::Start)?;
        match device.acquire() {
            Ok(format) => {
                self.format = Some(format);
                Ok(format)
            }
            Err(e) => {
                self.transition(RecordingTrigger::Failed)?;
                Err(e.into())
            }
        }
    }

    /// Starting -> Recording with the realtime channel, if one opened in time.
    /// On failure the session is back in Idle and the device has been released.
    pub fn activate(
        &mut self,
        ctx: StartContext<'_>,
        realtime: Option<RealtimeStream>,
    ) -> Result<(), RecordingError> {
        if self.state.next(RecordingTrigger::Ready).is_none() {
            return Err(self.illegal(RecordingTrigger::Ready));
        }

        // Small slices keep partial transcripts responsive; buffered-only gets one chunk
        let delivery = if realtime.is_some() {
            ChunkDelivery::Sliced(ctx.timings.stream_timeslice())
        } else {
            ChunkDelivery::OnStop
        };

        let (chunk_tx, chunk_rx) = mpsc::unbounded_channel::<Vec<u8>>();
        if let Err(e) = ctx.device.start(delivery, chunk_tx) {
            ctx.device.stop();
            self.transition(RecordingTrigger::Failed)?;
            return Err(e.into());
        }

        let mut forward = None;
        if let Some(realtime) = realtime {
            let (transcript_tx, transcript_rx) = watch::channel(StreamTranscript::default());
            let signals = Arc::clone(&ctx.signals);
            self.reader = Some(spawn_transcript_reader(
                realtime.messages,
                transcript_tx,
                Arc::new(move |t: StreamTranscript| signals(SessionSignal::Transcript(t))),
            ));
            forward = Some(realtime.input.clone());
            self.stream = Some(StreamSide {
                input: realtime.input,
                transcript: transcript_rx,
            });
        }
        self.pump = Some(tokio::spawn(pump_chunks(chunk_rx, forward)));

        match ctx.device.level_analyzer() {
            Some(analyzer) => {
                self.analyzer_present = true;
                let signals = Arc::clone(&ctx.signals);
                let handle = spawn_monitor(
                    analyzer,
                    LevelSettings::from(ctx.timings),
                    self.stream.as_ref().map(|s| s.transcript.clone()),
                    Arc::clone(&self.activity),
                    Arc::new(move |signal: MonitorSignal| match signal {
                        MonitorSignal::FirstSound => signals(SessionSignal::FirstSound),
                        MonitorSignal::SilenceTimeout => signals(SessionSignal::SilenceTimeout),
                    }),
                );
                self.timers.insert(TimerKind::LevelSampler, handle);
            }
            None => tracing::debug!("no level analyzer; recording runs until stopped"),
        }

        let signals = Arc::clone(&ctx.signals);
        self.timers
            .schedule(TimerKind::MaxDuration, ctx.timings.max_recording(), move || {
                signals(SessionSignal::MaxDuration)
            });

        self.started_at = Instant::now();
        self.transition(RecordingTrigger::Ready)?;
        tracing::info!(
            "recording {} started ({})",
            self.id,
            if self.stream.is_some() {
                "streaming"
            } else {
                "buffered"
            }
        );
        Ok(())
    }

    /// Recording -> Stopping. Returns `None` when not recording, so repeated stops are no-ops.
    pub fn stop(
        &mut self,
        device: &mut dyn AudioCaptureDevice,
        reason: StopReason,
        language_code: &str,
    ) -> Option<PendingTranscript> {
        if self.transition(RecordingTrigger::Stop(reason)).is_err() {
            return None;
        }
        tracing::info!("recording {} stopping: {:?}", self.id, reason);
        self.timers.clear();
        device.stop();

        let speech_heard = if self.analyzer_present {
            Some(self.heard_activity())
        } else {
            None
        };
        let format = self.format?;
        Some(PendingTranscript {
            pump: self.pump.take()?,
            stream: self.stream.take(),
            duration: self.started_at.elapsed(),
            options: TranscribeOptions {
                format,
                language_code: language_code.to_string(),
            },
            speech_heard,
        })
    }

    /// Stopping -> Idle once the transcript has been handed over.
    pub fn finish(&mut self) -> Result<(), RecordingError> {
        self.transition(RecordingTrigger::Resolved)?;
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        Ok(())
    }

    /// Tear down without producing a transcript.
    pub fn abandon(&mut self, device: &mut dyn AudioCaptureDevice) {
        if self.transition(RecordingTrigger::Abandon).is_err() {
            return;
        }
        tracing::debug!("recording {} abandoned", self.id);
        self.timers.clear();
        device.stop();
        self.teardown_tasks();
    }

    fn teardown_tasks(&mut self) {
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        self.stream = None;
    }
}

impl Drop for RecordingSession {
    fn drop(&mut self) {
        self.teardown_tasks();
    }
}

/// Collect every chunk, mirroring each one to the realtime channel when open.
async fn pump_chunks(
    mut chunks: mpsc::UnboundedReceiver<Vec<u8>>,
    forward: Option<mpsc::UnboundedSender<StreamInput>>,
) -> Vec<u8> {
    let mut audio = Vec::new();
    while let Some(chunk) = chunks.recv().await {
        if let Some(tx) = &forward {
            let _ = tx.send(StreamInput::Audio(chunk.clone()));
        }
        audio.extend_from_slice(&chunk);
    }
    audio
}

/// A stopped recording whose transcript has not been resolved yet.
pub struct PendingTranscript {
    pump: JoinHandle<Vec<u8>>,
    stream: Option<StreamSide>,
    duration: Duration,
    options: TranscribeOptions,
    speech_heard: Option<bool>,
}

impl PendingTranscript {
    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Wait for the last audio to drain, then resolve streamed-or-buffered text.
    pub async fn resolve(self, stt: Arc<dyn SpeechToText>, timings: VoiceTimings) -> Resolution {
        let audio = match self.pump.await {
            Ok(audio) => audio,
            Err(e) => {
                tracing::warn!("audio pump ended abnormally: {e}");
                Vec::new()
            }
        };
        resolve_transcript(
            ResolveRequest {
                audio,
                duration: self.duration,
                options: self.options,
                stream: self.stream,
                speech_heard: self.speech_heard,
            },
            stt,
            &timings,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn given_idle_when_walking_the_happy_path_then_returns_to_idle() {
        let mut state = RecordingState::Idle;
        for trigger in [
            RecordingTrigger::Start,
            RecordingTrigger::Ready,
            RecordingTrigger::Stop(StopReason::Silence),
            RecordingTrigger::Resolved,
        ] {
            state = state.next(trigger).unwrap();
        }
        assert_eq!(state, RecordingState::Idle);
    }

    #[test]
    fn given_recording_when_started_again_then_transition_is_illegal() {
        assert_eq!(RecordingState::Recording.next(RecordingTrigger::Start), None);
        assert_eq!(RecordingState::Starting.next(RecordingTrigger::Start), None);
    }

    #[test]
    fn given_stopping_when_stopped_again_then_transition_is_illegal() {
        assert_eq!(
            RecordingState::Stopping.next(RecordingTrigger::Stop(StopReason::User)),
            None
        );
    }

    #[test]
    fn given_any_live_state_when_abandoned_then_idle() {
        for state in [
            RecordingState::Starting,
            RecordingState::Recording,
            RecordingState::Stopping,
        ] {
            assert_eq!(
                state.next(RecordingTrigger::Abandon),
                Some(RecordingState::Idle)
            );
        }
        assert_eq!(RecordingState::Idle.next(RecordingTrigger::Abandon), None);
    }

    #[test]
    fn given_new_session_when_finished_without_stopping_then_error_names_states() {
        // Given
        let mut session = RecordingSession::new(1);

        // When
        let err = session.finish().unwrap_err();

        // Then
        assert_eq!(
            err.to_string(),
            RecordingError::IllegalTransition {
                state: "idle",
                trigger: "resolve",
            }
            .to_string()
        );
        assert_eq!(session.state(), RecordingState::Idle);
    }
}
