//! Device Agent Shared Types
//!
//! This crate provides the pieces of the command protocol that are shared
//! between the device agent and anything that talks to it:
//! - the typed schema/constraint engine used to validate command documents
//! - the command status state machine
//! - the command patch document sent to the cloud
//! - the length-prefixed frame codec

pub mod codec;
pub mod error;
pub mod patch;
pub mod schema;
pub mod state_machine;

use std::time::{SystemTime, UNIX_EPOCH};

pub use error::{CommandError, ErrorCode, Result, ERROR_DOMAIN};
pub use patch::CommandPatch;
pub use schema::{ObjectSchema, PropType, PropValue, ValueMap, ValueType};
pub use state_machine::{CommandLifecycle, CommandOrigin, CommandStatus, LifecycleEvent};

/// Get current timestamp in milliseconds since Unix epoch
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Protocol-wide limits and defaults
pub mod limits {
    /// How long a finished command stays readable in the queue (15 minutes)
    pub const COMMAND_RETENTION_MS: u64 = 15 * 60 * 1000;

    /// Custom (vendor) command names must start with this character
    pub const CUSTOM_COMMAND_PREFIX: char = '_';

    /// Initial retry delay for failed command updates
    pub const BACKOFF_INITIAL_DELAY_MS: u64 = 1000;

    /// Factor applied to the retry delay after each consecutive failure
    pub const BACKOFF_MULTIPLY_FACTOR: f64 = 2.0;

    /// Random fraction shaved off each retry delay
    pub const BACKOFF_JITTER_FACTOR: f64 = 0.1;

    /// Upper bound for the retry delay
    pub const BACKOFF_MAX_DELAY_MS: u64 = 30_000;

    /// Recorded device state changes kept before the oldest are merged
    pub const STATE_QUEUE_MAX_SIZE: usize = 100;
}
