//! Command registry and lifecycle
//!
//! This module handles:
//! - Loading command definitions into dictionaries
//! - Parsing and validating command instances
//! - Tracking live commands in the queue with delayed removal

pub mod definition;
pub mod dictionary;
pub mod instance;
pub mod manager;
pub mod queue;

pub use definition::{CommandDefinition, UserRole, Visibility};
pub use dictionary::CommandDictionary;
pub use instance::{CommandEvent, CommandInstance, ErrorInfo, StateWatermark};
pub use manager::{CommandManager, DefinitionsCallback, Submission};
pub use queue::{Clock, CommandCallback, CommandQueue, QueueError, SystemClock};
