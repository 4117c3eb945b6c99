//! Bilateral termination detection.
//!
//! A session is finished when BOTH directions have signalled completion:
//! the local synchronizer has stayed `Idle` for a settle delay (debounced,
//! because negotiation rounds produce transient idle blips), and the peer
//! has half-closed its write side (observed as stream end).
//!
//! The detector is a pure state machine: the session layer feeds it
//! events and executes the effects it returns.  Timers are represented by
//! tokens so a timer armed before a cancellation can fire late and be
//! recognised as stale.

use std::time::Duration;

use crate::engine::SyncStatus;

/// Reference settle delay.  A heuristic, not a contract — constructor
/// takes any value, and tests shrink it.
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_millis(1000);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectorEvent {
    Status(SyncStatus),
    /// The settle timer armed with this token elapsed.
    SettleElapsed(u64),
    /// The peer half-closed; no more remote data will arrive.
    RemoteEnded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    None,
    /// Start a settle timer carrying this token.
    ArmSettle(u64),
    /// The local side is done: half-close the write side now.
    /// `session_complete` is set when the remote side had already finished.
    LocalFinished { session_complete: bool },
    /// Both sides finished; commit the session.  Emitted at most once.
    Complete,
}

#[derive(Debug)]
pub struct CompletionDetector {
    settle_delay: Duration,
    local_finished: bool,
    remote_finished: bool,
    completed: bool,
    timer_token: u64,
    timer_armed: bool,
}

impl CompletionDetector {
    pub fn new(settle_delay: Duration) -> Self {
        Self {
            settle_delay,
            local_finished: false,
            remote_finished: false,
            completed: false,
            timer_token: 0,
            timer_armed: false,
        }
    }

    pub fn settle_delay(&self) -> Duration {
        self.settle_delay
    }

    /// Feed one event; returns the effect the caller must execute.
    pub fn handle(&mut self, event: DetectorEvent) -> Effect {
        match event {
            DetectorEvent::Status(SyncStatus::Idle) => {
                if self.local_finished || self.timer_armed {
                    return Effect::None;
                }
                self.timer_token += 1;
                self.timer_armed = true;
                Effect::ArmSettle(self.timer_token)
            }
            DetectorEvent::Status(SyncStatus::Active) => {
                // Debounce: an idle blip mid-exchange cancels the timer.
                self.timer_armed = false;
                Effect::None
            }
            DetectorEvent::SettleElapsed(token) => {
                if !self.timer_armed || token != self.timer_token || self.local_finished {
                    return Effect::None; // stale or already finished
                }
                self.timer_armed = false;
                self.local_finished = true;
                let session_complete = self.remote_finished && !self.completed;
                if session_complete {
                    self.completed = true;
                }
                Effect::LocalFinished { session_complete }
            }
            DetectorEvent::RemoteEnded => {
                self.remote_finished = true;
                if self.local_finished && !self.completed {
                    self.completed = true;
                    Effect::Complete
                } else {
                    Effect::None
                }
            }
        }
    }
}
