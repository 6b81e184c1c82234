use std::collections::HashMap;
use std::time::Duration;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    LevelSampler,
    MaxDuration,
    Settle,
    ConversationIdle,
}

/// Owned set of background timers. Every timer is aborted on `clear` and on drop,
/// so nothing fires against state that has already been torn down.
#[derive(Default)]
pub struct TimerSet {
    handles: HashMap<TimerKind, JoinHandle<()>>,
}

impl TimerSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `fire` once after `delay`, replacing any timer of the same kind.
    pub fn schedule<F>(&mut self, kind: TimerKind, delay: Duration, fire: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            fire();
        });
        self.insert(kind, handle);
    }

    /// Track an already spawned task, aborting the one it replaces.
    pub fn insert(&mut self, kind: TimerKind, handle: JoinHandle<()>) {
        if let Some(old) = self.handles.insert(kind, handle) {
            old.abort();
        }
    }

    pub fn cancel(&mut self, kind: TimerKind) {
        if let Some(handle) = self.handles.remove(&kind) {
            handle.abort();
        }
    }

    pub fn is_armed(&self, kind: TimerKind) -> bool {
        self.handles
            .get(&kind)
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }

    pub fn clear(&mut self) {
        for (_, handle) in self.handles.drain() {
            handle.abort();
        }
    }
}

impl Drop for TimerSet {
    fn drop(&mut self) {
        self.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn given_rescheduled_timer_then_only_latest_fires() {
        // Given
        let fired = Arc::new(AtomicUsize::new(0));
        let mut timers = TimerSet::new();
        for _ in 0..3 {
            let fired = Arc::clone(&fired);
            timers.schedule(TimerKind::Settle, Duration::from_millis(100), move || {
                fired.fetch_add(1, Ordering::SeqCst);
            });
        }

        // When
        tokio::time::sleep(Duration::from_millis(150)).await;

        // Then
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(!timers.is_armed(TimerKind::Settle));
    }

    #[tokio::test(start_paused = true)]
    async fn given_dropped_set_then_no_timer_fires() {
        let fired = Arc::new(AtomicUsize::new(0));
        {
            let mut timers = TimerSet::new();
            let counter = Arc::clone(&fired);
            timers.schedule(TimerKind::MaxDuration, Duration::from_secs(45), move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }

        tokio::time::sleep(Duration::from_secs(60)).await;

        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }
}
