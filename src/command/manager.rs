//! Command manager
//!
//! Entry point for everything command related: definition loading, local
//! submission and the queue of live commands.

use std::sync::Arc;
use std::time::Duration;

use device_agent_shared::{CommandError, CommandOrigin, CommandStatus, ErrorCode, Result};
use serde_json::Value;
use tracing::{info, warn};

use super::definition::{UserRole, Visibility};
use super::dictionary::CommandDictionary;
use super::instance::CommandInstance;
use super::queue::{Clock, CommandCallback, CommandQueue};

/// Answer to a local command submission
#[derive(Debug, Clone, PartialEq)]
pub struct Submission {
    pub id: String,
    pub status: CommandStatus,
}

pub type DefinitionsCallback = Box<dyn Fn(&CommandDictionary) + Send + Sync>;

pub struct CommandManager {
    base_dictionary: CommandDictionary,
    dictionary: CommandDictionary,
    queue: CommandQueue,
    on_definitions_changed: Vec<DefinitionsCallback>,
}

impl CommandManager {
    pub fn new(clock: Arc<dyn Clock>, retention: Duration) -> Self {
        Self {
            base_dictionary: CommandDictionary::new(),
            dictionary: CommandDictionary::new(),
            queue: CommandQueue::new(clock, retention),
            on_definitions_changed: Vec::new(),
        }
    }

    /// Load the standard definitions every device command is checked against
    pub fn load_base_commands(&mut self, doc: &Value) -> Result<()> {
        self.base_dictionary.load_commands(doc, "", None)
    }

    /// Load the device's own definitions for `category`
    pub fn load_commands(&mut self, doc: &Value, category: &str) -> Result<()> {
        self.dictionary
            .load_commands(doc, category, Some(&self.base_dictionary))?;
        self.notify_definitions_changed();
        Ok(())
    }

    /// Submit a command from a local client acting with `role`
    pub fn add_command_json(&mut self, doc: &Value, role: UserRole) -> Result<Submission> {
        let mut instance = CommandInstance::from_json(doc, CommandOrigin::Local, &self.dictionary)?;

        let definition = instance.definition();
        if !definition.visibility().local {
            return Err(CommandError::new(
                ErrorCode::AccessDenied,
                format!("Command '{}' is not available to local clients", instance.name()),
            ));
        }
        if role < definition.minimal_role() {
            return Err(CommandError::new(
                ErrorCode::AccessDenied,
                format!(
                    "User role '{}' less than minimal: '{}'",
                    role,
                    definition.minimal_role()
                ),
            ));
        }

        // Local callers never choose the id
        instance.set_id(String::new());
        let id = self.add_command(instance)?;
        Ok(Submission {
            id,
            status: CommandStatus::Queued,
        })
    }

    /// Hand a parsed command to the queue
    pub fn add_command(&mut self, instance: CommandInstance) -> Result<String> {
        self.queue.add(instance).map_err(|err| {
            warn!("Rejected command: {}", err);
            CommandError::new(ErrorCode::DuplicateCommandId, err.to_string())
        })
    }

    pub fn find_command(&self, id: &str) -> Option<&CommandInstance> {
        self.queue.find(id)
    }

    pub fn find_command_mut(&mut self, id: &str) -> Option<&mut CommandInstance> {
        self.queue.find_mut(id)
    }

    /// Change the visibility of the named commands, all or nothing
    pub fn set_command_visibility(&mut self, names: &[&str], visibility: Visibility) -> Result<()> {
        self.dictionary.set_command_visibility(names, visibility)?;
        info!("Visibility of {:?} set to '{}'", names, visibility);
        self.notify_definitions_changed();
        Ok(())
    }

    /// Register a definitions observer. It is called right away with the
    /// current definitions.
    pub fn add_on_definitions_changed(&mut self, callback: DefinitionsCallback) {
        callback(&self.dictionary);
        self.on_definitions_changed.push(callback);
    }

    pub fn add_on_command_added(&mut self, callback: CommandCallback) {
        self.queue.add_on_command_added(callback);
    }

    pub fn add_on_command_removed(&mut self, callback: CommandCallback) {
        self.queue.add_on_command_removed(callback);
    }

    /// Drop finished commands whose retention window has passed
    pub fn cleanup(&mut self) {
        self.queue.cleanup();
    }

    pub fn dictionary(&self) -> &CommandDictionary {
        &self.dictionary
    }

    pub fn base_dictionary(&self) -> &CommandDictionary {
        &self.base_dictionary
    }

    pub fn queue(&self) -> &CommandQueue {
        &self.queue
    }

    fn notify_definitions_changed(&self) {
        for callback in &self.on_definitions_changed {
            callback(&self.dictionary);
        }
    }
}
