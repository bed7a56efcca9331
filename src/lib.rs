//! Device Agent
//!
//! Command and state synchronization core of the device agent:
//! - `command`: definitions, dictionary, instances and the command queue
//! - `cloud`: replication of command changes to the cloud with retry
//! - `config`: agent configuration

pub mod cloud;
pub mod command;
pub mod config;

pub use config::AgentConfig;
