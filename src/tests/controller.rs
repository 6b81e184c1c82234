use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::audio::ChunkDelivery;
use crate::client::realtime::{RealtimeConnector, StreamInput};
use crate::config::VoiceTimings;
use crate::tests::fakes::{
    FakeAssistant, FakeCapture, FakeConnector, FakeOutput, FakeStt, FakeTts, constant_speech,
    silent, speech_for,
};
use crate::types::thread::Sender;
use crate::types::wire::StreamMessage;
use crate::voice::controller::{
    Collaborators, ControllerHandle, ControllerSettings, Devices, Notice, UiUpdate,
    VoiceController,
};
use crate::voice::conversation::ExitReason;

const TRANSCRIPT: &str = "when is the next walk";
const ANSWER: &str = "The next walk is Saturday at 9 [1].";

struct Harness {
    handle: ControllerHandle,
    ui: mpsc::UnboundedReceiver<UiUpdate>,
    capture: FakeCapture,
    output: FakeOutput,
    stt: Arc<FakeStt>,
    assistant: Arc<FakeAssistant>,
    connector: Option<Arc<FakeConnector>>,
    task: JoinHandle<()>,
}

struct Setup {
    capture: FakeCapture,
    connector: Option<Arc<FakeConnector>>,
    assistant: FakeAssistant,
    auto_speak: bool,
    turn_cap: u32,
}

impl Setup {
    fn new(capture: FakeCapture) -> Self {
        Self {
            capture,
            connector: None,
            assistant: FakeAssistant::answering(ANSWER),
            auto_speak: false,
            turn_cap: 10,
        }
    }

    fn auto_speak(mut self) -> Self {
        self.auto_speak = true;
        self
    }

    fn turn_cap(mut self, cap: u32) -> Self {
        self.turn_cap = cap;
        self
    }

    fn connector(mut self, connector: FakeConnector) -> Self {
        self.connector = Some(Arc::new(connector));
        self
    }

    fn assistant(mut self, assistant: FakeAssistant) -> Self {
        self.assistant = assistant;
        self
    }

    fn spawn(self) -> Harness {
        let output = FakeOutput::default();
        let stt = Arc::new(FakeStt::new(TRANSCRIPT));
        let assistant = Arc::new(self.assistant);
        let collaborators = Collaborators {
            assistant: assistant.clone(),
            stt: stt.clone(),
            tts: Arc::new(FakeTts),
            realtime: self
                .connector
                .clone()
                .map(|c| c as Arc<dyn RealtimeConnector>),
        };
        let devices = Devices {
            capture: Box::new(self.capture.clone()),
            output: Box::new(output.clone()),
        };
        let settings = ControllerSettings {
            auto_speak: self.auto_speak,
            language_code: "en-US".to_string(),
            turn_cap: self.turn_cap,
            timings: VoiceTimings::default(),
        };
        let (handle, ui, task) = VoiceController::spawn(collaborators, devices, settings);
        Harness {
            handle,
            ui,
            capture: self.capture,
            output,
            stt,
            assistant,
            connector: self.connector,
            task,
        }
    }
}

impl Harness {
    async fn next(&mut self) -> UiUpdate {
        match tokio::time::timeout(Duration::from_secs(300), self.ui.recv()).await {
            Ok(Some(update)) => update,
            Ok(None) => panic!("controller closed its update channel"),
            Err(_) => panic!("no update within 300s"),
        }
    }

    async fn wait_for(&mut self, wanted: impl Fn(&UiUpdate) -> bool) -> UiUpdate {
        loop {
            let update = self.next().await;
            if wanted(&update) {
                return update;
            }
        }
    }

    /// Everything published during the next `window`.
    async fn collect_for(&mut self, window: Duration) -> Vec<UiUpdate> {
        let deadline = Instant::now() + window;
        let mut updates = Vec::new();
        while let Ok(Some(update)) = tokio::time::timeout_at(deadline, self.ui.recv()).await {
            updates.push(update);
        }
        updates
    }

    async fn shutdown(self) -> FakeCapture {
        self.handle.shutdown();
        self.task.await.unwrap();
        self.capture
    }
}

fn is_recording(on: bool) -> impl Fn(&UiUpdate) -> bool {
    move |u| *u == UiUpdate::Recording(on)
}

fn is_speaking(on: bool) -> impl Fn(&UiUpdate) -> bool {
    move |u| *u == UiUpdate::Speaking(on)
}

fn is_user_item(u: &UiUpdate) -> bool {
    matches!(u, UiUpdate::ThreadAppended(item) if item.sender == Sender::User)
}

fn is_assistant_item(u: &UiUpdate) -> bool {
    matches!(u, UiUpdate::ThreadAppended(item) if item.sender == Sender::Assistant)
}

#[tokio::test(start_paused = true)]
async fn given_silent_recording_when_user_stops_then_could_not_understand_without_remote_calls() {
    // Given
    let mut h = Setup::new(FakeCapture::new(silent())).spawn();
    h.handle.toggle_recording();
    h.wait_for(is_recording(true)).await;

    // When
    tokio::time::sleep(Duration::from_secs(2)).await;
    h.handle.toggle_recording();

    // Then
    h.wait_for(is_recording(false)).await;
    let notice = h.wait_for(|u| matches!(u, UiUpdate::Notice(_))).await;
    assert_eq!(notice, UiUpdate::Notice(Notice::CouldNotUnderstand));
    assert_eq!(h.stt.calls(), 0);
    assert!(h.assistant.questions().is_empty());
}

#[tokio::test(start_paused = true)]
async fn given_speech_then_quiet_when_silence_elapses_then_recording_stops_once() {
    // Given
    let mut h = Setup::new(FakeCapture::new(speech_for(Duration::from_millis(500)))).spawn();
    h.handle.toggle_recording();
    h.wait_for(is_recording(true)).await;
    let started = Instant::now();

    // When
    h.wait_for(is_recording(false)).await;

    // Then
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(1200), "stopped after {elapsed:?}");
    assert!(elapsed <= Duration::from_millis(2000), "stopped after {elapsed:?}");

    let user = h.wait_for(is_user_item).await;
    match user {
        UiUpdate::ThreadAppended(item) => assert_eq!(item.text, TRANSCRIPT),
        other => panic!("unexpected update {other:?}"),
    }
    h.wait_for(is_assistant_item).await;

    let later = h.collect_for(Duration::from_secs(5)).await;
    assert!(!later.iter().any(|u| matches!(u, UiUpdate::Recording(_))));
    assert_eq!(h.stt.short_calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.stt.long_calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.assistant.questions(), vec![TRANSCRIPT.to_string()]);
}

#[tokio::test(start_paused = true)]
async fn given_continuous_sound_when_max_duration_elapses_then_recording_stops() {
    // Given
    let mut h = Setup::new(FakeCapture::new(constant_speech())).spawn();
    h.handle.toggle_recording();
    h.wait_for(is_recording(true)).await;
    let started = Instant::now();

    // When
    h.wait_for(is_recording(false)).await;

    // Then
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_secs(45), "stopped after {elapsed:?}");
    assert!(elapsed < Duration::from_secs(46), "stopped after {elapsed:?}");
    h.wait_for(is_user_item).await;
    assert_eq!(h.stt.short_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn given_no_level_analyzer_when_user_stops_then_buffered_transcription_runs() {
    // Given
    let mut h = Setup::new(FakeCapture::without_analyzer()).spawn();
    h.handle.toggle_recording();
    h.wait_for(is_recording(true)).await;

    // When
    tokio::time::sleep(Duration::from_secs(3)).await;
    h.handle.stop_recording();

    // Then
    h.wait_for(is_user_item).await;
    assert_eq!(h.stt.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn given_streamed_final_when_recording_stops_then_buffered_transcription_is_skipped() {
    // Given
    let mut h = Setup::new(FakeCapture::new(speech_for(Duration::from_millis(500))))
        .connector(FakeConnector::open())
        .spawn();
    h.handle.toggle_recording();
    h.wait_for(is_recording(true)).await;
    let mut ends = h.connector.as_ref().unwrap().take_ends().unwrap();

    // When
    ends.messages
        .send(StreamMessage::Partial {
            text: "how do".to_string(),
        })
        .unwrap();
    let preview = h.wait_for(|u| matches!(u, UiUpdate::Transcript { .. })).await;
    assert_eq!(
        preview,
        UiUpdate::Transcript {
            partial: "how do".to_string()
        }
    );
    ends.messages
        .send(StreamMessage::Final {
            text: "How do I join?".to_string(),
        })
        .unwrap();

    // Then
    let user = h.wait_for(is_user_item).await;
    match user {
        UiUpdate::ThreadAppended(item) => assert_eq!(item.text, "How do I join?"),
        other => panic!("unexpected update {other:?}"),
    }
    assert_eq!(h.stt.calls(), 0);
    assert_eq!(
        h.capture.state.lock().unwrap().deliveries,
        vec![ChunkDelivery::Sliced(Duration::from_millis(100))]
    );

    let mut frames = Vec::new();
    while let Ok(frame) = ends.input.try_recv() {
        frames.push(frame);
    }
    assert!(matches!(frames.first(), Some(StreamInput::Audio(_))));
    assert_eq!(frames.last(), Some(&StreamInput::End));
}

#[tokio::test(start_paused = true)]
async fn given_stream_without_final_when_wait_expires_then_falls_back_to_buffered() {
    // Given
    let mut h = Setup::new(FakeCapture::new(speech_for(Duration::from_millis(500))))
        .connector(FakeConnector::open())
        .spawn();
    h.handle.toggle_recording();
    h.wait_for(is_recording(true)).await;
    let ends = h.connector.as_ref().unwrap().take_ends().unwrap();
    ends.messages
        .send(StreamMessage::Partial {
            text: "when is".to_string(),
        })
        .unwrap();

    // When
    h.wait_for(is_recording(false)).await;
    let stopped = Instant::now();
    let user = h.wait_for(is_user_item).await;

    // Then
    assert!(stopped.elapsed() >= Duration::from_millis(1500));
    match user {
        UiUpdate::ThreadAppended(item) => assert_eq!(item.text, TRANSCRIPT),
        other => panic!("unexpected update {other:?}"),
    }
    assert_eq!(h.stt.short_calls.load(Ordering::SeqCst), 1);
    drop(ends);
}

#[tokio::test(start_paused = true)]
async fn given_unreachable_stream_when_connect_times_out_then_recording_is_buffered() {
    // Given
    let mut h = Setup::new(FakeCapture::new(speech_for(Duration::from_millis(500))))
        .connector(FakeConnector::hanging())
        .spawn();
    let requested = Instant::now();

    // When
    h.handle.toggle_recording();
    h.wait_for(is_recording(true)).await;

    // Then
    assert!(requested.elapsed() >= Duration::from_secs(2));
    assert_eq!(
        h.capture.state.lock().unwrap().deliveries,
        vec![ChunkDelivery::OnStop]
    );
    h.wait_for(is_user_item).await;
    assert_eq!(h.stt.short_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn given_stream_still_connecting_when_question_is_typed_then_it_is_sent_immediately() {
    // Given
    let mut h = Setup::new(FakeCapture::new(speech_for(Duration::from_millis(500))))
        .connector(FakeConnector::hanging())
        .spawn();
    h.handle.toggle_recording();
    tokio::time::sleep(Duration::from_millis(100)).await;

    // When
    let typed = Instant::now();
    h.handle.send_text("typed while connecting");
    let user = h.wait_for(is_user_item).await;

    // Then
    assert!(typed.elapsed() < Duration::from_millis(500), "sent after {:?}", typed.elapsed());
    match user {
        UiUpdate::ThreadAppended(item) => assert_eq!(item.text, "typed while connecting"),
        other => panic!("unexpected update {other:?}"),
    }
    let later = h.collect_for(Duration::from_secs(5)).await;
    assert!(!later.contains(&UiUpdate::Recording(true)));
    assert_eq!(h.capture.starts(), 0);
    assert_eq!(h.capture.state.lock().unwrap().acquires, 1);
}

#[tokio::test(start_paused = true)]
async fn given_stream_still_connecting_when_user_stops_then_start_is_cancelled_at_once() {
    // Given
    let mut h = Setup::new(FakeCapture::new(speech_for(Duration::from_millis(500))))
        .connector(FakeConnector::hanging())
        .auto_speak()
        .spawn();
    h.handle.toggle_recording();
    assert_eq!(h.next().await, UiUpdate::ConversationMode(true));
    tokio::time::sleep(Duration::from_millis(100)).await;

    // When
    let stopped = Instant::now();
    h.handle.stop_recording();

    // Then
    assert_eq!(h.next().await, UiUpdate::ConversationMode(false));
    assert!(stopped.elapsed() < Duration::from_millis(500));
    let later = h.collect_for(Duration::from_secs(5)).await;
    assert!(!later.iter().any(|u| matches!(u, UiUpdate::Recording(_))));
    assert_eq!(h.capture.starts(), 0);
    assert_eq!(h.stt.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn given_conversation_mode_when_reply_finishes_then_recording_restarts_after_settle() {
    // Given
    let mut h = Setup::new(FakeCapture::new(speech_for(Duration::from_millis(500))))
        .auto_speak()
        .spawn();
    h.handle.toggle_recording();
    assert_eq!(h.next().await, UiUpdate::ConversationMode(true));
    h.wait_for(is_recording(true)).await;

    // When
    h.wait_for(is_speaking(true)).await;
    assert!(h.output.finish());
    h.wait_for(is_speaking(false)).await;
    let ended = Instant::now();

    // Then
    h.wait_for(is_recording(true)).await;
    let settle = ended.elapsed();
    assert!(settle >= Duration::from_millis(600), "restarted after {settle:?}");
    assert!(settle < Duration::from_millis(700), "restarted after {settle:?}");
    assert_eq!(h.capture.starts(), 2);
}

#[tokio::test(start_paused = true)]
async fn given_conversation_mode_when_playback_is_stopped_then_no_restart() {
    // Given
    let mut h = Setup::new(FakeCapture::new(speech_for(Duration::from_millis(500))))
        .auto_speak()
        .spawn();
    h.handle.toggle_recording();
    h.wait_for(is_speaking(true)).await;

    // When
    h.handle.stop_playback();

    // Then
    h.wait_for(is_speaking(false)).await;
    h.wait_for(|u| *u == UiUpdate::ConversationMode(false)).await;
    assert!(!h.output.finish());
    let later = h.collect_for(Duration::from_secs(5)).await;
    assert!(!later.contains(&UiUpdate::Recording(true)));
    assert_eq!(h.capture.starts(), 1);
}

#[tokio::test(start_paused = true)]
async fn given_reply_just_finished_when_user_stops_during_settle_then_no_restart() {
    // Given
    let mut h = Setup::new(FakeCapture::new(speech_for(Duration::from_millis(500))))
        .auto_speak()
        .spawn();
    h.handle.toggle_recording();
    h.wait_for(is_speaking(true)).await;
    assert!(h.output.finish());
    h.wait_for(is_speaking(false)).await;

    // When
    tokio::time::sleep(Duration::from_millis(300)).await;
    h.handle.stop_recording();

    // Then
    assert_eq!(h.next().await, UiUpdate::ConversationMode(false));
    let later = h.collect_for(Duration::from_secs(5)).await;
    assert!(!later.contains(&UiUpdate::Recording(true)));
    assert_eq!(h.capture.starts(), 1);
}

#[tokio::test(start_paused = true)]
async fn given_turn_cap_when_replies_keep_finishing_then_conversation_ends_at_cap() {
    // Given
    let mut h = Setup::new(FakeCapture::new(speech_for(Duration::from_millis(500))))
        .auto_speak()
        .turn_cap(2)
        .spawn();
    h.handle.toggle_recording();

    // When
    let mut recordings = 0;
    loop {
        match h.next().await {
            UiUpdate::Recording(true) => recordings += 1,
            UiUpdate::Speaking(true) => {
                h.output.finish();
            }
            UiUpdate::ConversationMode(false) => break,
            _ => {}
        }
    }

    // Then
    assert_eq!(recordings, 3);
    assert_eq!(
        h.next().await,
        UiUpdate::Notice(Notice::ConversationEnded(ExitReason::TurnCapReached))
    );
    let later = h.collect_for(Duration::from_secs(5)).await;
    assert!(!later.contains(&UiUpdate::Recording(true)));
}

#[tokio::test(start_paused = true)]
async fn given_conversation_mode_when_nothing_is_heard_then_conversation_ends_after_idle() {
    // Given
    let mut h = Setup::new(FakeCapture::new(silent())).auto_speak().spawn();
    h.handle.toggle_recording();
    h.wait_for(is_recording(true)).await;
    let started = Instant::now();

    // When
    h.wait_for(is_recording(false)).await;

    // Then
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_secs(15), "ended after {elapsed:?}");
    assert!(elapsed < Duration::from_secs(16), "ended after {elapsed:?}");
    assert_eq!(h.next().await, UiUpdate::ConversationMode(false));
    assert_eq!(
        h.next().await,
        UiUpdate::Notice(Notice::ConversationEnded(ExitReason::Inactivity))
    );
    assert_eq!(h.stt.calls(), 0);
    assert!(!h.capture.state.lock().unwrap().active);
}

#[tokio::test(start_paused = true)]
async fn given_repeated_start_requests_then_only_one_capture_is_active() {
    // Given
    let mut h = Setup::new(FakeCapture::new(silent())).spawn();

    // When
    h.handle.start_recording();
    h.handle.start_recording();
    h.handle.start_recording();
    let updates = h.collect_for(Duration::from_secs(1)).await;

    // Then
    let starts = updates
        .iter()
        .filter(|u| **u == UiUpdate::Recording(true))
        .count();
    assert_eq!(starts, 3);
    {
        let state = h.capture.state.lock().unwrap();
        assert_eq!(state.starts, 3);
        assert_eq!(state.overlapping_starts, 0);
        assert_eq!(state.stops, 2);
        assert!(state.active);
    }

    let capture = h.shutdown().await;
    assert!(!capture.state.lock().unwrap().active);
}

#[tokio::test(start_paused = true)]
async fn given_failing_assistant_when_question_sent_then_user_item_is_rolled_back() {
    // Given
    let mut h = Setup::new(FakeCapture::new(silent()))
        .assistant(FakeAssistant::failing())
        .spawn();

    // When
    h.handle.send_text("  what should I bring?  ");

    // Then
    let appended = match h.next().await {
        UiUpdate::ThreadAppended(item) => item,
        other => panic!("unexpected update {other:?}"),
    };
    assert_eq!(appended.text, "what should I bring?");
    assert_eq!(h.next().await, UiUpdate::ThreadRemoved(appended.id));
    assert!(matches!(
        h.next().await,
        UiUpdate::Notice(Notice::RequestFailed(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn given_prior_exchange_when_next_question_sent_then_history_is_included() {
    // Given
    let mut h = Setup::new(FakeCapture::new(silent())).spawn();
    h.handle.send_text("first");
    h.wait_for(is_assistant_item).await;

    // When
    h.handle.send_text("second");
    h.wait_for(is_assistant_item).await;

    // Then
    assert_eq!(*h.assistant.history_lens.lock().unwrap(), vec![0, 2]);
}

#[tokio::test(start_paused = true)]
async fn given_typed_question_with_auto_speak_when_reply_ends_then_no_recording_starts() {
    // Given
    let mut h = Setup::new(FakeCapture::new(silent())).auto_speak().spawn();

    // When
    h.handle.send_text("are kids welcome?");
    h.wait_for(is_speaking(true)).await;
    h.output.finish();
    h.wait_for(is_speaking(false)).await;

    // Then
    let later = h.collect_for(Duration::from_secs(3)).await;
    assert!(!later.contains(&UiUpdate::Recording(true)));
    assert_eq!(h.capture.starts(), 0);
    assert_eq!(h.output.plays(), 1);
}

#[tokio::test(start_paused = true)]
async fn given_denied_microphone_when_recording_requested_then_permission_notice() {
    // Given
    let mut h = Setup::new(FakeCapture::denied()).auto_speak().spawn();

    // When
    h.handle.toggle_recording();

    // Then
    assert_eq!(h.next().await, UiUpdate::ConversationMode(true));
    assert!(matches!(
        h.next().await,
        UiUpdate::Notice(Notice::PermissionDenied(_))
    ));
    assert_eq!(h.next().await, UiUpdate::ConversationMode(false));
    assert_eq!(
        h.next().await,
        UiUpdate::Notice(Notice::ConversationEnded(ExitReason::Failure))
    );
    assert_eq!(h.capture.starts(), 0);
}
