use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::audio::{AudioCaptureDevice, AudioOutput};
use crate::client::realtime::{RealtimeConnector, RealtimeStream};
use crate::client::{AssistantApi, SpeechSynthesizer, SpeechToText};
use crate::config::{AppConfig, VoiceTimings};
use crate::error::api::ApiError;
use crate::error::recording::RecordingError;
use crate::types::thread::{Thread, ThreadItem};
use crate::types::wire::AskResponse;
use crate::voice::Notify;
use crate::voice::conversation::{ConversationState, ExitReason, TurnDecision};
use crate::voice::playback::{PlaybackController, PlaybackSignal};
use crate::voice::recording::{
    RecordingSession, RecordingState, SessionSignal, StartContext, StopReason,
};
use crate::voice::transcription::{Resolution, open_channel};

/// User intents accepted by the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// The mic button: stop when recording, start otherwise.
    ToggleRecording,
    StartRecording,
    /// Stop recording and leave conversation mode.
    StopRecording,
    SendText(String),
    StopPlayback,
    SetAutoSpeak(bool),
    Shutdown,
}

/// Soft, dismissible messages for the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    PermissionDenied(String),
    RecordingFailed(String),
    CouldNotUnderstand,
    RequestFailed(String),
    SpeechFailed(String),
    ConversationEnded(ExitReason),
}

/// State changes published to whatever renders the widget.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UiUpdate {
    ThreadAppended(ThreadItem),
    ThreadRemoved(Uuid),
    Recording(bool),
    Transcript { partial: String },
    Speaking(bool),
    ConversationMode(bool),
    Notice(Notice),
}

enum ControllerEvent {
    Command(Command),
    ChannelReady {
        id: u64,
        stream: Option<RealtimeStream>,
    },
    Session { id: u64, signal: SessionSignal },
    TranscriptResolved { id: u64, resolution: Resolution },
    Answer {
        item_id: Uuid,
        result: Result<AskResponse, ApiError>,
    },
    Playback(PlaybackSignal),
    SettleElapsed { turn: u32 },
    ConversationIdle { id: u64 },
}

/// Remote collaborators. `realtime` is optional; without it every recording is buffered.
#[derive(Clone)]
pub struct Collaborators {
    pub assistant: Arc<dyn AssistantApi>,
    pub stt: Arc<dyn SpeechToText>,
    pub tts: Arc<dyn SpeechSynthesizer>,
    pub realtime: Option<Arc<dyn RealtimeConnector>>,
}

pub struct Devices {
    pub capture: Box<dyn AudioCaptureDevice>,
    pub output: Box<dyn AudioOutput>,
}

#[derive(Debug, Clone)]
pub struct ControllerSettings {
    pub auto_speak: bool,
    pub language_code: String,
    pub turn_cap: u32,
    pub timings: VoiceTimings,
}

impl From<&AppConfig> for ControllerSettings {
    fn from(config: &AppConfig) -> Self {
        Self {
            auto_speak: config.voice.auto_speak,
            language_code: config.voice.language_code.clone(),
            turn_cap: config.voice.turn_cap,
            timings: config.timings.clone(),
        }
    }
}

/// Cloneable front door to a running controller.
#[derive(Clone)]
pub struct ControllerHandle {
    tx: mpsc::UnboundedSender<ControllerEvent>,
}

impl ControllerHandle {
    /// Returns false once the controller has shut down.
    pub fn send(&self, command: Command) -> bool {
        self.tx.send(ControllerEvent::Command(command)).is_ok()
    }

    pub fn toggle_recording(&self) -> bool {
        self.send(Command::ToggleRecording)
    }

    pub fn start_recording(&self) -> bool {
        self.send(Command::StartRecording)
    }

    pub fn stop_recording(&self) -> bool {
        self.send(Command::StopRecording)
    }

    pub fn send_text(&self, text: impl Into<String>) -> bool {
        self.send(Command::SendText(text.into()))
    }

    pub fn stop_playback(&self) -> bool {
        self.send(Command::StopPlayback)
    }

    pub fn set_auto_speak(&self, enabled: bool) -> bool {
        self.send(Command::SetAutoSpeak(enabled))
    }

    pub fn shutdown(&self) -> bool {
        self.send(Command::Shutdown)
    }
}

/// Owns every piece of voice-session state and serializes all changes through one
/// event loop: commands, timer fires and remote-call results.
pub struct VoiceController {
    events_tx: mpsc::UnboundedSender<ControllerEvent>,
    events_rx: mpsc::UnboundedReceiver<ControllerEvent>,
    ui: mpsc::UnboundedSender<UiUpdate>,
    collaborators: Collaborators,
    capture: Box<dyn AudioCaptureDevice>,
    playback: PlaybackController,
    settings: ControllerSettings,
    recording: Option<RecordingSession>,
    next_session_id: u64,
    conversation: ConversationState,
    thread: Thread,
    assistant_session: Option<String>,
    speaking: bool,
}

impl VoiceController {
    pub fn new(
        collaborators: Collaborators,
        devices: Devices,
        settings: ControllerSettings,
    ) -> (Self, ControllerHandle, mpsc::UnboundedReceiver<UiUpdate>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (ui_tx, ui_rx) = mpsc::unbounded_channel();
        let playback = PlaybackController::new(devices.output, Arc::clone(&collaborators.tts));
        let controller = Self {
            events_tx: events_tx.clone(),
            events_rx,
            ui: ui_tx,
            collaborators,
            capture: devices.capture,
            playback,
            conversation: ConversationState::new(settings.turn_cap),
            settings,
            recording: None,
            next_session_id: 0,
            thread: Thread::default(),
            assistant_session: None,
            speaking: false,
        };
        (controller, ControllerHandle { tx: events_tx }, ui_rx)
    }

    /// Build a controller and run it on the current runtime.
    pub fn spawn(
        collaborators: Collaborators,
        devices: Devices,
        settings: ControllerSettings,
    ) -> (
        ControllerHandle,
        mpsc::UnboundedReceiver<UiUpdate>,
        JoinHandle<()>,
    ) {
        let (controller, handle, ui) = Self::new(collaborators, devices, settings);
        let task = tokio::spawn(controller.run());
        (handle, ui, task)
    }

    pub async fn run(mut self) {
        while let Some(event) = self.events_rx.recv().await {
            if !self.handle(event) {
                break;
            }
        }
        self.dispose();
        tracing::info!("voice controller stopped");
    }

    fn handle(&mut self, event: ControllerEvent) -> bool {
        match event {
            ControllerEvent::Command(command) => return self.handle_command(command),
            ControllerEvent::ChannelReady { id, stream } => self.on_channel_ready(id, stream),
            ControllerEvent::Session { id, signal } => self.on_session_signal(id, signal),
            ControllerEvent::TranscriptResolved { id, resolution } => {
                self.on_transcript(id, resolution)
            }
            ControllerEvent::Answer { item_id, result } => self.on_answer(item_id, result),
            ControllerEvent::Playback(signal) => self.on_playback(signal),
            ControllerEvent::SettleElapsed { turn } => self.on_settle(turn),
            ControllerEvent::ConversationIdle { id } => self.on_conversation_idle(id),
        }
        true
    }

    fn handle_command(&mut self, command: Command) -> bool {
        tracing::debug!("command: {:?}", command);
        match command {
            Command::ToggleRecording => match self.recording_state() {
                RecordingState::Starting | RecordingState::Recording => {
                    self.exit_conversation(ExitReason::Manual);
                    self.stop_recording(StopReason::User);
                }
                RecordingState::Stopping => {
                    tracing::debug!("mic toggle ignored while stopping");
                }
                RecordingState::Idle => self.start_voice_turn(),
            },
            Command::StartRecording => self.start_voice_turn(),
            Command::StopRecording => {
                self.exit_conversation(ExitReason::Manual);
                self.stop_recording(StopReason::User);
            }
            Command::SendText(text) => {
                let text = text.trim().to_string();
                if !text.is_empty() {
                    self.stop_playback();
                    self.exit_conversation(ExitReason::Manual);
                    self.abandon_recording();
                    self.ask(text);
                }
            }
            Command::StopPlayback => {
                self.stop_playback();
                self.exit_conversation(ExitReason::Manual);
            }
            Command::SetAutoSpeak(enabled) => {
                self.settings.auto_speak = enabled;
                if !enabled {
                    self.stop_playback();
                    self.exit_conversation(ExitReason::AutoSpeakDisabled);
                }
            }
            Command::Shutdown => return false,
        }
        true
    }

    fn recording_state(&self) -> RecordingState {
        self.recording
            .as_ref()
            .map(|s| s.state())
            .unwrap_or(RecordingState::Idle)
    }

    fn emit(&self, update: UiUpdate) {
        let _ = self.ui.send(update);
    }

    fn notify<T, F>(&self, wrap: F) -> Notify<T>
    where
        T: 'static,
        F: Fn(T) -> ControllerEvent + Send + Sync + 'static,
    {
        let tx = self.events_tx.clone();
        Arc::new(move |value: T| {
            let _ = tx.send(wrap(value));
        })
    }

    /// A user-initiated voice turn: enters conversation mode when auto-speak is on.
    fn start_voice_turn(&mut self) {
        self.stop_playback();
        if self.settings.auto_speak && self.conversation.enter() {
            self.emit(UiUpdate::ConversationMode(true));
        }
        self.begin_recording();
    }

    /// Claim the microphone, then go live once the realtime channel is open or
    /// given up on. The connect runs off the loop and reports back as `ChannelReady`.
    fn begin_recording(&mut self) {
        self.abandon_recording();
        if self.capture.is_active() {
            self.capture.stop();
        }

        self.next_session_id += 1;
        let id = self.next_session_id;
        let mut session = RecordingSession::new(id);
        let format = match session.begin(self.capture.as_mut()) {
            Ok(format) => format,
            Err(e) => {
                self.start_failed(e);
                return;
            }
        };
        self.recording = Some(session);

        let Some(connector) = self.collaborators.realtime.clone() else {
            self.activate_recording(id, None);
            return;
        };
        let language_code = self.settings.language_code.clone();
        let connect_timeout = self.settings.timings.stream_connect();
        let tx = self.events_tx.clone();
        tokio::spawn(async move {
            let stream = open_channel(
                Some(&*connector),
                &language_code,
                format,
                connect_timeout,
            )
            .await;
            let _ = tx.send(ControllerEvent::ChannelReady { id, stream });
        });
    }

    fn on_channel_ready(&mut self, id: u64, stream: Option<RealtimeStream>) {
        if !self.is_current_session(id) || self.recording_state() != RecordingState::Starting {
            tracing::debug!("dropping realtime channel for recording {id}");
            return;
        }
        self.activate_recording(id, stream);
    }

    fn activate_recording(&mut self, id: u64, stream: Option<RealtimeStream>) {
        let signals =
            self.notify(move |signal: SessionSignal| ControllerEvent::Session { id, signal });
        let Some(session) = self.recording.as_mut() else {
            return;
        };
        let result = session.activate(
            StartContext {
                device: self.capture.as_mut(),
                timings: &self.settings.timings,
                signals,
            },
            stream,
        );

        match result {
            Ok(()) => {
                self.emit(UiUpdate::Recording(true));
                if self.conversation.is_active() {
                    let tx = self.events_tx.clone();
                    self.conversation
                        .arm_idle_timer(self.settings.timings.conversation_idle(), move || {
                            let _ = tx.send(ControllerEvent::ConversationIdle { id });
                        });
                }
            }
            Err(e) => {
                self.recording = None;
                self.start_failed(e);
            }
        }
    }

    fn start_failed(&mut self, e: RecordingError) {
        tracing::warn!("could not start recording: {e}");
        let notice = match &e {
            RecordingError::Audio(audio) if audio.is_permission() => {
                Notice::PermissionDenied(e.to_string())
            }
            _ => Notice::RecordingFailed(e.to_string()),
        };
        self.emit(UiUpdate::Notice(notice));
        self.exit_conversation(ExitReason::Failure);
    }

    fn stop_recording(&mut self, reason: StopReason) {
        if self.recording_state() == RecordingState::Starting {
            // Nothing captured yet; the pending connect result is dropped as stale
            self.abandon_recording();
            return;
        }
        let language_code = self.settings.language_code.clone();
        let Some(session) = self.recording.as_mut() else {
            return;
        };
        let Some(pending) = session.stop(self.capture.as_mut(), reason, &language_code) else {
            return;
        };
        let id = session.id();
        tracing::debug!("recording {id} captured {:?}", pending.duration());
        self.conversation.disarm_idle_timer();
        self.emit(UiUpdate::Recording(false));

        let stt = Arc::clone(&self.collaborators.stt);
        let timings = self.settings.timings.clone();
        let tx = self.events_tx.clone();
        tokio::spawn(async move {
            let resolution = pending.resolve(stt, timings).await;
            let _ = tx.send(ControllerEvent::TranscriptResolved { id, resolution });
        });
    }

    fn abandon_recording(&mut self) {
        if let Some(mut session) = self.recording.take() {
            let was_recording = session.state() == RecordingState::Recording;
            session.abandon(self.capture.as_mut());
            self.conversation.disarm_idle_timer();
            if was_recording {
                self.emit(UiUpdate::Recording(false));
            }
        }
    }

    fn stop_playback(&mut self) {
        self.playback.stop();
        if self.speaking {
            self.speaking = false;
            self.emit(UiUpdate::Speaking(false));
        }
    }

    fn exit_conversation(&mut self, reason: ExitReason) {
        if self.conversation.exit() {
            tracing::info!("conversation mode ended: {reason}");
            self.emit(UiUpdate::ConversationMode(false));
            if reason != ExitReason::Manual {
                self.emit(UiUpdate::Notice(Notice::ConversationEnded(reason)));
            }
        }
    }

    fn is_current_session(&self, id: u64) -> bool {
        self.recording.as_ref().map(|s| s.id() == id).unwrap_or(false)
    }

    fn on_session_signal(&mut self, id: u64, signal: SessionSignal) {
        if !self.is_current_session(id) {
            tracing::debug!("dropping stale signal from recording {id}");
            return;
        }
        match signal {
            SessionSignal::FirstSound => self.conversation.disarm_idle_timer(),
            SessionSignal::SilenceTimeout => self.stop_recording(StopReason::Silence),
            SessionSignal::MaxDuration => self.stop_recording(StopReason::MaxDuration),
            SessionSignal::Transcript(transcript) => {
                if !transcript.is_empty() {
                    self.conversation.disarm_idle_timer();
                }
                self.emit(UiUpdate::Transcript {
                    partial: transcript.display(),
                });
            }
        }
    }

    fn on_transcript(&mut self, id: u64, resolution: Resolution) {
        if !self.is_current_session(id) {
            return;
        }
        if let Some(mut session) = self.recording.take() {
            if let Err(e) = session.finish() {
                tracing::warn!("{e}");
            }
        }

        if resolution.text.is_empty() {
            self.emit(UiUpdate::Notice(Notice::CouldNotUnderstand));
            self.exit_conversation(ExitReason::NoSpeech);
            return;
        }
        tracing::debug!("transcript via {:?}", resolution.source);
        self.ask(resolution.text);
    }

    fn ask(&mut self, question: String) {
        let history = self.thread.items().to_vec();
        let item = ThreadItem::user(question.clone());
        let item_id = item.id;
        self.thread.push(item.clone());
        self.emit(UiUpdate::ThreadAppended(item));

        let assistant = Arc::clone(&self.collaborators.assistant);
        let session_id = self.assistant_session.clone();
        let tx = self.events_tx.clone();
        tokio::spawn(async move {
            let result = assistant
                .ask(&question, session_id.as_deref(), &history)
                .await;
            let _ = tx.send(ControllerEvent::Answer { item_id, result });
        });
    }

    fn on_answer(&mut self, item_id: Uuid, result: Result<AskResponse, ApiError>) {
        match result {
            Ok(response) => {
                if let Some(session_id) = response.session_id {
                    self.assistant_session = Some(session_id);
                }
                let item = ThreadItem::assistant(response.answer.clone(), response.citations);
                self.thread.push(item.clone());
                self.emit(UiUpdate::ThreadAppended(item));

                if self.settings.auto_speak {
                    self.stop_playback();
                    let notify = self.notify(ControllerEvent::Playback);
                    if !self.playback.speak(&response.answer, notify) {
                        // Nothing speakable; treat as an instantly finished reply
                        self.after_reply();
                    }
                }
            }
            Err(e) => {
                tracing::warn!("ask failed: {e}");
                // Never leave an orphaned question in the thread
                if self.thread.remove(item_id).is_some() {
                    self.emit(UiUpdate::ThreadRemoved(item_id));
                }
                self.emit(UiUpdate::Notice(Notice::RequestFailed(e.to_string())));
                self.exit_conversation(ExitReason::Failure);
            }
        }
    }

    fn on_playback(&mut self, signal: PlaybackSignal) {
        match signal {
            PlaybackSignal::Synthesized { generation, audio } => {
                if !self.playback.is_current(generation) {
                    return;
                }
                let played = audio.map_err(|e| e.to_string()).and_then(|bytes| {
                    let notify = self.notify(ControllerEvent::Playback);
                    self.playback
                        .play(generation, bytes, notify)
                        .map_err(|e| e.to_string())
                });
                match played {
                    Ok(true) => {
                        self.speaking = true;
                        self.emit(UiUpdate::Speaking(true));
                    }
                    Ok(false) => {}
                    Err(message) => {
                        tracing::warn!("speech failed: {message}");
                        self.stop_playback();
                        self.emit(UiUpdate::Notice(Notice::SpeechFailed(message)));
                        self.exit_conversation(ExitReason::Failure);
                    }
                }
            }
            PlaybackSignal::Ended { generation } => {
                if !self.playback.finished(generation) {
                    return;
                }
                if self.speaking {
                    self.speaking = false;
                    self.emit(UiUpdate::Speaking(false));
                }
                self.after_reply();
            }
        }
    }

    fn after_reply(&mut self) {
        match self.conversation.on_playback_ended() {
            TurnDecision::Inactive => {}
            TurnDecision::Restart { turn } => {
                tracing::debug!(
                    "conversation turn {turn}/{}",
                    self.conversation.turn_cap()
                );
                let tx = self.events_tx.clone();
                self.conversation
                    .schedule_restart(self.settings.timings.settle(), move || {
                        let _ = tx.send(ControllerEvent::SettleElapsed { turn });
                    });
            }
            TurnDecision::CapReached => {
                tracing::info!("conversation mode ended: {}", ExitReason::TurnCapReached);
                self.emit(UiUpdate::ConversationMode(false));
                self.emit(UiUpdate::Notice(Notice::ConversationEnded(
                    ExitReason::TurnCapReached,
                )));
            }
        }
    }

    fn on_settle(&mut self, turn: u32) {
        if !self.conversation.is_active() || self.conversation.turn_count() != turn {
            return;
        }
        if self.recording.is_some() || self.playback.is_busy() {
            tracing::debug!("skipping auto-restart: controller busy");
            return;
        }
        self.begin_recording();
    }

    fn on_conversation_idle(&mut self, id: u64) {
        if !self.conversation.is_active() || !self.is_current_session(id) {
            return;
        }
        let silent = self
            .recording
            .as_ref()
            .map(|s| s.state() == RecordingState::Recording && !s.heard_activity())
            .unwrap_or(false);
        if silent {
            self.abandon_recording();
            self.exit_conversation(ExitReason::Inactivity);
        }
    }

    /// Clear every timer, release the microphone and speaker.
    fn dispose(&mut self) {
        self.abandon_recording();
        self.stop_playback();
        self.conversation.exit();
        self.capture.stop();
    }
}
