//! Cloud replication of command state
//!
//! This module handles:
//! - Retry delays for failed updates (exponential backoff)
//! - Recording device state changes and tracking server acknowledgements
//! - Turning command changes into ordered, coalesced update patches
//! - Publishing commands received from the cloud

pub mod backoff;
pub mod link;
pub mod proxy;
pub mod sender;
pub mod session;
pub mod state_queue;

pub use backoff::{BackoffEntry, BackoffPolicy};
pub use link::{CloudLink, LinkConfig};
pub use proxy::{CloudCommandProxy, UpdateQueue};
pub use sender::{CloudError, CommandUpdateSender};
pub use session::{CloudSession, RegistrationStatus};
pub use state_queue::{DeviceStateNotifier, StateChange, StateChangeQueue, UpdateId};
