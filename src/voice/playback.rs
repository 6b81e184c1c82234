use std::sync::{Arc, LazyLock};

use regex::Regex;
use tokio::task::JoinHandle;

use crate::audio::{AudioError, AudioOutput};
use crate::client::SpeechSynthesizer;
use crate::error::api::ApiError;
use crate::voice::Notify;

static SOURCES_SECTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)^[ \t]*(?:[#>*_-]+[ \t]*)*sources?[ \t]*(?:\*\*|__)?[ \t]*:").expect("valid regex")
});
static CITATION_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[#?\d+(?:\s*,\s*#?\d+)*\]").expect("valid regex"));
static MARKDOWN_LINK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[([^\]]+)\]\([^)]*\)").expect("valid regex"));
static EMPHASIS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\*+|__+|~~|`+").expect("valid regex"));
static LINE_PREFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^[ \t]*(?:#{1,6}|[-*+>]|\d+\.)[ \t]+").expect("valid regex"));
static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));
static SPACE_BEFORE_PUNCT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+([.,!?;:])").expect("valid regex"));

/// Reduce an assistant answer to plain sentences for speech synthesis.
///
/// Drops a trailing "Sources:" section, citation markers, links and markdown
/// emphasis, then makes sure the text ends on terminal punctuation.
pub fn clean_for_speech(text: &str) -> String {
    let body = match SOURCES_SECTION.find(text) {
        Some(m) => &text[..m.start()],
        None => text,
    };

    let cleaned = CITATION_MARKER.replace_all(body, "");
    let cleaned = MARKDOWN_LINK.replace_all(&cleaned, "$1");
    let cleaned = LINE_PREFIX.replace_all(&cleaned, "");
    let cleaned = EMPHASIS.replace_all(&cleaned, "");
    let cleaned = WHITESPACE.replace_all(&cleaned, " ");
    let cleaned = SPACE_BEFORE_PUNCT.replace_all(&cleaned, "$1");

    let mut out = cleaned
        .trim()
        .trim_end_matches([',', ';', ':', '-'])
        .trim_end()
        .to_string();
    if out.is_empty() {
        return out;
    }
    if !out.ends_with(['.', '!', '?']) {
        out.push('.');
    }
    out
}

#[derive(Debug)]
pub enum PlaybackSignal {
    Synthesized {
        generation: u64,
        audio: Result<Vec<u8>, ApiError>,
    },
    Ended {
        generation: u64,
    },
}

/// Speaks assistant replies through a single shared output.
///
/// Every `speak` or `stop` bumps the generation; synthesis results and end events
/// from older generations are ignored, so at most one playback is ever live.
pub struct PlaybackController {
    output: Box<dyn AudioOutput>,
    synthesizer: Arc<dyn SpeechSynthesizer>,
    generation: u64,
    synthesis: Option<JoinHandle<()>>,
    watcher: Option<JoinHandle<()>>,
}

impl PlaybackController {
    pub fn new(output: Box<dyn AudioOutput>, synthesizer: Arc<dyn SpeechSynthesizer>) -> Self {
        Self {
            output,
            synthesizer,
            generation: 0,
            synthesis: None,
            watcher: None,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_current(&self, generation: u64) -> bool {
        generation == self.generation
    }

    /// Playing, or waiting on synthesis for something that will play.
    pub fn is_busy(&self) -> bool {
        self.synthesis.is_some() || self.output.is_playing()
    }

    /// Start speaking `text`. Returns false when nothing is left to say after cleaning.
    pub fn speak(&mut self, text: &str, notify: Notify<PlaybackSignal>) -> bool {
        let cleaned = clean_for_speech(text);
        if cleaned.is_empty() {
            return false;
        }
        self.stop();

        let generation = self.generation;
        let synthesizer = Arc::clone(&self.synthesizer);
        self.synthesis = Some(tokio::spawn(async move {
            let audio = synthesizer.synthesize(&cleaned).await;
            notify(PlaybackSignal::Synthesized { generation, audio });
        }));
        true
    }

    /// Hand synthesized audio to the output. Stale generations are dropped (`Ok(false)`).
    pub fn play(
        &mut self,
        generation: u64,
        audio: Vec<u8>,
        notify: Notify<PlaybackSignal>,
    ) -> Result<bool, AudioError> {
        if !self.is_current(generation) {
            return Ok(false);
        }
        self.synthesis = None;
        self.output.stop();
        if let Some(watcher) = self.watcher.take() {
            watcher.abort();
        }

        let ended = self.output.play(audio)?;
        self.watcher = Some(tokio::spawn(async move {
            // Err means the playback was stopped or replaced
            if ended.await.is_ok() {
                notify(PlaybackSignal::Ended { generation });
            }
        }));
        Ok(true)
    }

    /// Accept an end event. Returns false for stale generations.
    pub fn finished(&mut self, generation: u64) -> bool {
        if !self.is_current(generation) {
            return false;
        }
        self.watcher = None;
        self.synthesis = None;
        true
    }

    /// Stop any pending synthesis and current playback. Idempotent.
    pub fn stop(&mut self) {
        self.generation += 1;
        if let Some(task) = self.synthesis.take() {
            task.abort();
        }
        if let Some(watcher) = self.watcher.take() {
            watcher.abort();
        }
        self.output.stop();
    }
}

impl Drop for PlaybackController {
    fn drop(&mut self) {
        self.stop();
    }
}
