//! Network sender seam for command updates

use async_trait::async_trait;
use device_agent_shared::codec::CodecError;
use device_agent_shared::CommandPatch;
use thiserror::Error;

/// Errors from delivering an update to the cloud
#[derive(Error, Debug)]
pub enum CloudError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Request timed out")]
    Timeout,

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Update rejected: {0}")]
    Rejected(String),

    #[error("Device credentials are no longer valid")]
    InvalidCredentials,

    #[error("Connection closed")]
    Closed,
}

impl CloudError {
    /// Errors that need a new registration rather than a retry
    pub fn is_credentials_error(&self) -> bool {
        matches!(self, CloudError::InvalidCredentials)
    }
}

/// Delivers command patches to the cloud
#[async_trait]
pub trait CommandUpdateSender: Send + Sync {
    async fn update_command(&self, command_id: &str, patch: &CommandPatch)
        -> Result<(), CloudError>;
}
