//! Upgrade lifecycle state machine.
//!
//! A tiny, pure state machine with an explicit legality matrix. Terminal
//! states are sticky: once an attempt has succeeded or failed, nothing
//! moves it again and a fresh attempt means a fresh tracker.

use std::fmt;

use log::{error, info};

/// Lifecycle states of one upgrade attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpgradeStatus {
    /// Request built, pipeline not started yet.
    Initializing,
    /// Pipeline executing.
    Running,
    /// Firmware flashed and verified.
    Succeeded,
    /// Pipeline aborted with an error.
    Failed,
}

impl UpgradeStatus {
    /// Whether this state ends the attempt.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }

    /// Whether moving from `self` to `next` is a legal transition.
    pub fn can_transition(self, next: Self) -> bool {
        use UpgradeStatus::*;
        matches!(
            (self, next),
            (Initializing, Running) | (Running, Succeeded) | (Initializing | Running, Failed)
        )
    }

    /// Uppercase name used in status log lines.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Initializing => "INITIALIZING",
            Self::Running => "RUNNING",
            Self::Succeeded => "SUCCEEDED",
            Self::Failed => "FAILED",
        }
    }
}

impl fmt::Display for UpgradeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tracks the status of one attempt and records every state it visited.
#[derive(Debug, Clone)]
pub struct StatusTracker {
    current: UpgradeStatus,
    history: Vec<UpgradeStatus>,
}

impl StatusTracker {
    /// Start a fresh attempt in [`UpgradeStatus::Initializing`].
    pub fn new() -> Self {
        Self {
            current: UpgradeStatus::Initializing,
            history: vec![UpgradeStatus::Initializing],
        }
    }

    /// Current state.
    pub fn current(&self) -> UpgradeStatus {
        self.current
    }

    /// Every state visited so far, in order, starting with
    /// [`UpgradeStatus::Initializing`].
    pub fn history(&self) -> &[UpgradeStatus] {
        &self.history
    }

    /// Consume the tracker, yielding every state visited, in order.
    pub fn into_history(self) -> Vec<UpgradeStatus> {
        self.history
    }

    /// Attempt a transition.
    ///
    /// A legal transition is applied, logged and recorded; an illegal one
    /// is refused and leaves both the state and the history untouched.
    pub fn transition(&mut self, next: UpgradeStatus) -> bool {
        if !self.current.can_transition(next) {
            error!(
                "refusing illegal status transition [{}] -> [{}]",
                self.current, next
            );
            return false;
        }
        info!("App status changed [{}] -> [{}]", self.current, next);
        self.current = next;
        self.history.push(next);
        true
    }
}

impl Default for StatusTracker {
    fn default() -> Self {
        Self::new()
    }
}
