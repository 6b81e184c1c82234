use std::fmt;
use std::time::Duration;

use crate::voice::timers::{TimerKind, TimerSet};

/// Why hands-free conversation mode ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    Manual,
    TurnCapReached,
    Inactivity,
    NoSpeech,
    Failure,
    AutoSpeakDisabled,
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ExitReason::Manual => "stopped",
            ExitReason::TurnCapReached => "turn limit reached",
            ExitReason::Inactivity => "no speech heard",
            ExitReason::NoSpeech => "could not understand",
            ExitReason::Failure => "request failed",
            ExitReason::AutoSpeakDisabled => "auto-speak turned off",
        };
        f.write_str(text)
    }
}

/// What to do after a spoken reply finishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnDecision {
    /// Conversation mode is off; nothing to do.
    Inactive,
    /// Record again after the settle delay.
    Restart { turn: u32 },
    /// The cap was already reached; conversation mode has been exited.
    CapReached,
}

/// Hands-free multi-turn state. `turn_count` never exceeds `turn_cap`.
pub struct ConversationState {
    active: bool,
    turn_count: u32,
    turn_cap: u32,
    timers: TimerSet,
}

impl ConversationState {
    pub fn new(turn_cap: u32) -> Self {
        Self {
            active: false,
            turn_count: 0,
            turn_cap,
            timers: TimerSet::new(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn turn_count(&self) -> u32 {
        self.turn_count
    }

    pub fn turn_cap(&self) -> u32 {
        self.turn_cap
    }

    /// Returns true when this call switched conversation mode on.
    pub fn enter(&mut self) -> bool {
        let entered = !self.active;
        self.timers.clear();
        self.active = true;
        self.turn_count = 0;
        entered
    }

    /// Returns true when conversation mode was active.
    pub fn exit(&mut self) -> bool {
        self.timers.clear();
        let was_active = self.active;
        self.active = false;
        was_active
    }

    pub fn on_playback_ended(&mut self) -> TurnDecision {
        if !self.active {
            return TurnDecision::Inactive;
        }
        if self.turn_count < self.turn_cap {
            self.turn_count += 1;
            TurnDecision::Restart {
                turn: self.turn_count,
            }
        } else {
            self.exit();
            TurnDecision::CapReached
        }
    }

    pub fn schedule_restart<F>(&mut self, delay: Duration, fire: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.timers.schedule(TimerKind::Settle, delay, fire);
    }

    pub fn restart_pending(&self) -> bool {
        self.timers.is_armed(TimerKind::Settle)
    }

    /// Arm the safety timer that ends the conversation if a recording hears nothing.
    pub fn arm_idle_timer<F>(&mut self, delay: Duration, fire: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.timers.schedule(TimerKind::ConversationIdle, delay, fire);
    }

    pub fn disarm_idle_timer(&mut self) {
        self.timers.cancel(TimerKind::ConversationIdle);
    }
}
