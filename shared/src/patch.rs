//! Command patch documents
//!
//! A patch carries only the fields of a command that changed. Patches queued
//! for the same command are coalesced field by field, later fields replacing
//! earlier ones.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::CommandStatus;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<CommandStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub results: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl CommandPatch {
    pub fn with_state(state: CommandStatus) -> Self {
        Self {
            state: Some(state),
            ..Default::default()
        }
    }

    pub fn with_progress(progress: Value) -> Self {
        Self {
            progress: Some(progress),
            ..Default::default()
        }
    }

    pub fn with_results(results: Value) -> Self {
        Self {
            results: Some(results),
            ..Default::default()
        }
    }

    /// An `aborted` patch carrying an error report
    pub fn aborted(error_code: impl Into<String>, error_message: impl Into<String>) -> Self {
        Self {
            state: Some(CommandStatus::Aborted),
            error_code: Some(error_code.into()),
            error_message: Some(error_message.into()),
            ..Default::default()
        }
    }

    /// Fold a later patch into this one. `progress` and `results` are
    /// replaced as whole documents.
    pub fn merge(&mut self, later: CommandPatch) {
        if later.state.is_some() {
            self.state = later.state;
        }
        if later.progress.is_some() {
            self.progress = later.progress;
        }
        if later.results.is_some() {
            self.results = later.results;
        }
        if later.error_code.is_some() {
            self.error_code = later.error_code;
        }
        if later.error_message.is_some() {
            self.error_message = later.error_message;
        }
    }

    pub fn is_empty(&self) -> bool {
        self.state.is_none()
            && self.progress.is_none()
            && self.results.is_none()
            && self.error_code.is_none()
            && self.error_message.is_none()
    }
}
