//! Command Status State Machine
//!
//! Defines the lifecycle of a command instance and the valid transitions
//! between its statuses.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Execution status of a command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CommandStatus {
    Queued,
    InProgress,
    Paused,
    Error,
    Done,
    Cancelled,
    Aborted,
    Expired,
}

impl CommandStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            CommandStatus::Queued => "queued",
            CommandStatus::InProgress => "inProgress",
            CommandStatus::Paused => "paused",
            CommandStatus::Error => "error",
            CommandStatus::Done => "done",
            CommandStatus::Cancelled => "cancelled",
            CommandStatus::Aborted => "aborted",
            CommandStatus::Expired => "expired",
        }
    }

    /// Terminal statuses never change again
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            CommandStatus::Error
                | CommandStatus::Done
                | CommandStatus::Cancelled
                | CommandStatus::Aborted
                | CommandStatus::Expired
        )
    }
}

impl fmt::Display for CommandStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CommandStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(CommandStatus::Queued),
            "inProgress" => Ok(CommandStatus::InProgress),
            "paused" => Ok(CommandStatus::Paused),
            "error" => Ok(CommandStatus::Error),
            "done" => Ok(CommandStatus::Done),
            "cancelled" => Ok(CommandStatus::Cancelled),
            "aborted" => Ok(CommandStatus::Aborted),
            "expired" => Ok(CommandStatus::Expired),
            other => Err(format!("Unknown command status '{other}'")),
        }
    }
}

/// Where a command was submitted from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandOrigin {
    Local,
    Cloud,
}

impl fmt::Display for CommandOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandOrigin::Local => f.write_str("local"),
            CommandOrigin::Cloud => f.write_str("cloud"),
        }
    }
}

/// Events that can trigger status transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// Handler reported progress
    ProgressReported,
    /// Handler suspended execution
    Paused,
    /// Handler finished successfully
    Completed,
    /// Handler failed
    Failed,
    /// Caller withdrew the command
    Cancelled,
    /// Command was aborted by the device
    Aborted,
    /// Command outlived its deadline
    Expired,
}

/// Result of a status transition attempt
#[derive(Debug, Clone, PartialEq)]
pub enum TransitionResult {
    /// Transition was valid and the status changed
    Changed {
        from: CommandStatus,
        to: CommandStatus,
    },
    /// Transition was valid but the status stayed the same
    Unchanged(CommandStatus),
    /// Transition is not allowed from the current status
    Invalid {
        from: CommandStatus,
        event: LifecycleEvent,
    },
}

/// Lifecycle state machine of one command instance
#[derive(Debug, Clone)]
pub struct CommandLifecycle {
    current: CommandStatus,
}

impl Default for CommandLifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandLifecycle {
    /// Create a state machine in the `queued` status
    pub fn new() -> Self {
        Self {
            current: CommandStatus::Queued,
        }
    }

    pub fn status(&self) -> CommandStatus {
        self.current
    }

    /// Process an event and return the transition result
    pub fn process_event(&mut self, event: LifecycleEvent) -> TransitionResult {
        match self.get_next_status(event) {
            Some(next) if next == self.current => TransitionResult::Unchanged(next),
            Some(next) => {
                let from = self.current;
                self.current = next;
                TransitionResult::Changed { from, to: next }
            }
            None => TransitionResult::Invalid {
                from: self.current,
                event,
            },
        }
    }

    fn get_next_status(&self, event: LifecycleEvent) -> Option<CommandStatus> {
        use CommandStatus::*;
        use LifecycleEvent as E;

        if self.current.is_terminal() {
            return None;
        }

        match (self.current, event) {
            (_, E::ProgressReported) => Some(InProgress),
            (Queued | InProgress | Paused, E::Paused) => Some(Paused),
            (_, E::Completed) => Some(Done),
            (_, E::Failed) => Some(Error),
            (_, E::Cancelled) => Some(Cancelled),
            (_, E::Aborted) => Some(Aborted),
            (_, E::Expired) => Some(Expired),
            _ => None,
        }
    }
}

/// Check if a transition from one status to another is generally valid
pub fn is_valid_transition(from: CommandStatus, to: CommandStatus) -> bool {
    use CommandStatus::*;

    match (from, to) {
        (a, _) if a.is_terminal() => false,
        (a, b) if a == b => true,
        (_, b) if b.is_terminal() => true,
        (Queued | Paused, InProgress) => true,
        (Queued | InProgress, Paused) => true,
        _ => false,
    }
}
