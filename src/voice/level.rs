use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::audio::LevelAnalyzer;
use crate::config::VoiceTimings;
use crate::voice::Notify;
use crate::voice::transcription::StreamTranscript;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LevelSettings {
    pub interval: Duration,
    pub threshold: f32,
    pub silence: Duration,
}

impl From<&VoiceTimings> for LevelSettings {
    fn from(timings: &VoiceTimings) -> Self {
        Self {
            interval: timings.level_sample(),
            threshold: timings.sound_threshold,
            silence: timings.silence(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LevelVerdict {
    Sound,
    Quiet,
    /// Emitted exactly once; every later observation returns `Finished`.
    SilenceTimeout,
    Finished,
}

/// Classifies level samples and decides when the speaker has gone quiet.
#[derive(Debug)]
pub struct AudioLevelMonitor {
    settings: LevelSettings,
    last_sound: Instant,
    has_had_activity: bool,
    fired: bool,
}

impl AudioLevelMonitor {
    pub fn new(settings: LevelSettings, started_at: Instant) -> Self {
        Self {
            settings,
            last_sound: started_at,
            has_had_activity: false,
            fired: false,
        }
    }

    /// A final transcript counts as evidence of speech even if no sample crossed
    /// the threshold.
    pub fn observe(&mut self, level: f32, now: Instant, has_final_transcript: bool) -> LevelVerdict {
        if self.fired {
            return LevelVerdict::Finished;
        }
        if level > self.settings.threshold {
            self.last_sound = now;
            self.has_had_activity = true;
            return LevelVerdict::Sound;
        }
        let quiet_for = now.saturating_duration_since(self.last_sound);
        if quiet_for >= self.settings.silence && (has_final_transcript || self.has_had_activity) {
            self.fired = true;
            return LevelVerdict::SilenceTimeout;
        }
        LevelVerdict::Quiet
    }

    pub fn has_had_activity(&self) -> bool {
        self.has_had_activity
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorSignal {
    FirstSound,
    SilenceTimeout,
}

/// Sample `analyzer` on a fixed cadence until silence is detected.
///
/// `activity` is raised on the first sound so the session can read it without a
/// round trip through the controller.
pub fn spawn_monitor(
    mut analyzer: Box<dyn LevelAnalyzer>,
    settings: LevelSettings,
    transcript: Option<watch::Receiver<StreamTranscript>>,
    activity: Arc<AtomicBool>,
    notify: Notify<MonitorSignal>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let started = Instant::now();
        let mut monitor = AudioLevelMonitor::new(settings, started);
        let mut ticker = tokio::time::interval_at(started + settings.interval, settings.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let now = ticker.tick().await;
            let has_final = transcript
                .as_ref()
                .map(|rx| rx.borrow().has_final())
                .unwrap_or(false);
            let was_active = monitor.has_had_activity();

            match monitor.observe(analyzer.sample_level(), now, has_final) {
                LevelVerdict::Sound if !was_active => {
                    activity.store(true, Ordering::SeqCst);
                    notify(MonitorSignal::FirstSound);
                }
                LevelVerdict::SilenceTimeout => {
                    tracing::debug!("silence detected, stopping sampler");
                    notify(MonitorSignal::SilenceTimeout);
                    break;
                }
                LevelVerdict::Finished => break,
                _ => {}
            }
        }
    })
}
