//! Stabilization state machine.
//!
//! The scale reports a settled flag with every frame, but the flag flickers
//! and a load often settles several times while it is being placed. The
//! tracker turns the stream of [`Reading`]s into at most one [`StableEvent`]
//! per settlement, following one of two policies:
//!
//! * [`StabilityMode::RunLength`]: `required_stable` consecutive settled
//!   readings emit `STABLE`; any unsettled reading re-arms the tracker.
//! * [`StabilityMode::Locking`]: a confirmed weight above `lock_threshold`
//!   emits `LOCKED` and latches until the weight falls below
//!   `unlock_threshold`, which emits `RESET`. Unsettled readings do not
//!   release the latch.

use std::fmt;

use serde::Serialize;

use super::frame::Reading;
use crate::config::stability::{StabilityConfig, StabilityMode};

/// The transition that produced an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventAction {
    Stable,
    Locked,
    Reset,
}

impl EventAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventAction::Stable => "STABLE",
            EventAction::Locked => "LOCKED",
            EventAction::Reset => "RESET",
        }
    }
}

impl fmt::Display for EventAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Published body: the weight as a string with two fractional digits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WeightPayload {
    pub weight: String,
}

/// A confirmed weight, ready to publish.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StableEvent {
    pub action: EventAction,
    pub weight: f64,
    /// Settled counter at emission. Only logged.
    pub count: u32,
}

impl StableEvent {
    pub fn formatted_weight(&self) -> String {
        format!("{:.2}", self.weight)
    }

    pub fn payload(&self) -> WeightPayload {
        WeightPayload {
            weight: self.formatted_weight(),
        }
    }
}

/// Snapshot of the tracker counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrackerState {
    pub consecutive_settled: u32,
    /// An event was emitted for the current settlement (or the latch is held).
    pub emitted: bool,
    pub locked: bool,
}

#[derive(Debug, Clone)]
pub struct StabilityTracker {
    mode: StabilityMode,
    required: u32,
    lock_threshold: f64,
    unlock_threshold: f64,
    state: TrackerState,
}

impl StabilityTracker {
    pub fn new(config: &StabilityConfig) -> Self {
        Self {
            mode: config.mode,
            required: config.required_stable.max(1),
            lock_threshold: config.lock_threshold,
            unlock_threshold: config.unlock_threshold,
            state: TrackerState::default(),
        }
    }

    pub fn mode(&self) -> StabilityMode {
        self.mode
    }

    pub fn state(&self) -> TrackerState {
        self.state
    }

    /// Back to the initial state.
    pub fn reset(&mut self) {
        self.state = TrackerState::default();
    }

    /// Feeds one reading; returns the event it completes, if any.
    pub fn observe(&mut self, reading: &Reading) -> Option<StableEvent> {
        match self.mode {
            StabilityMode::RunLength => self.observe_run_length(reading),
            StabilityMode::Locking => self.observe_locking(reading),
        }
    }

    fn observe_run_length(&mut self, reading: &Reading) -> Option<StableEvent> {
        let state = &mut self.state;
        if !reading.is_settled() {
            state.consecutive_settled = 0;
            state.emitted = false;
            return None;
        }

        state.consecutive_settled = state.consecutive_settled.saturating_add(1);
        if state.consecutive_settled >= self.required && !state.emitted {
            state.emitted = true;
            return Some(self.event(EventAction::Stable, reading.weight));
        }
        None
    }

    fn observe_locking(&mut self, reading: &Reading) -> Option<StableEvent> {
        let mut action = None;
        let state = &mut self.state;

        if reading.is_settled() {
            if !state.locked {
                state.consecutive_settled = state.consecutive_settled.saturating_add(1);
            }
            if state.consecutive_settled >= self.required
                && !state.locked
                && reading.weight > self.lock_threshold
            {
                state.locked = true;
                state.emitted = true;
                action = Some(EventAction::Locked);
            }
        } else if !state.locked {
            state.consecutive_settled = 0;
        }

        // Applies whatever the status flag says.
        if reading.weight < self.unlock_threshold && state.locked {
            state.locked = false;
            state.emitted = false;
            state.consecutive_settled = 0;
            action = Some(EventAction::Reset);
        }

        action.map(|action| self.event(action, reading.weight))
    }

    fn event(&self, action: EventAction, weight: f64) -> StableEvent {
        StableEvent {
            action,
            weight,
            count: self.state.consecutive_settled,
        }
    }
}
