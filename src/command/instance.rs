//! Command instances
//!
//! One validated invocation of a command definition. The instance owns its
//! lifecycle state machine and reports every change to its subscribers as a
//! [`CommandEvent`].

use std::fmt;
use std::sync::Arc;

use device_agent_shared::schema::values_to_json;
use device_agent_shared::state_machine::{is_valid_transition, TransitionResult};
use device_agent_shared::{
    CommandError, CommandLifecycle, CommandOrigin, CommandStatus, ErrorCode, LifecycleEvent,
    Result, ValueMap,
};
use serde_json::{json, Map, Value};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::definition::CommandDefinition;
use super::dictionary::CommandDictionary;

/// Error reported by a command that finished in the `error` status
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
}

/// Change notifications emitted by a command instance
#[derive(Debug, Clone, PartialEq)]
pub enum CommandEvent {
    StatusChanged {
        status: CommandStatus,
        error: Option<ErrorInfo>,
    },
    ProgressChanged(Value),
    ResultsChanged(Value),
    /// The instance was dropped; no further events follow
    Destroyed,
}

/// Reads the id of the latest local device state change
pub type StateWatermark = Arc<dyn Fn() -> u64 + Send + Sync>;

/// Observer whose events carry the state watermark read as they happen
struct StampedObserver {
    tx: mpsc::UnboundedSender<(u64, CommandEvent)>,
    watermark: StateWatermark,
}

impl fmt::Debug for StampedObserver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StampedObserver").finish_non_exhaustive()
    }
}

#[derive(Debug)]
pub struct CommandInstance {
    id: String,
    name: String,
    origin: CommandOrigin,
    definition: Arc<CommandDefinition>,
    parameters: ValueMap,
    progress: ValueMap,
    results: ValueMap,
    lifecycle: CommandLifecycle,
    error: Option<ErrorInfo>,
    observers: Vec<mpsc::UnboundedSender<CommandEvent>>,
    stamped: Vec<StampedObserver>,
    /// Set by the owning queue; finished commands post their id here
    removal_tx: Option<mpsc::UnboundedSender<String>>,
}

impl CommandInstance {
    pub fn new(
        name: impl Into<String>,
        origin: CommandOrigin,
        definition: Arc<CommandDefinition>,
        parameters: ValueMap,
    ) -> Self {
        Self {
            id: String::new(),
            name: name.into(),
            origin,
            definition,
            parameters,
            progress: ValueMap::new(),
            results: ValueMap::new(),
            lifecycle: CommandLifecycle::new(),
            error: None,
            observers: Vec::new(),
            stamped: Vec::new(),
            removal_tx: None,
        }
    }

    /// Parse a `{"name", "id"?, "parameters"?}` document against the
    /// definitions in `dictionary`
    pub fn from_json(
        doc: &Value,
        origin: CommandOrigin,
        dictionary: &CommandDictionary,
    ) -> Result<Self> {
        let doc = doc.as_object().ok_or_else(|| {
            CommandError::new(
                ErrorCode::JsonObjectExpected,
                "Command instance is not a JSON object",
            )
        })?;

        let name = doc.get("name").and_then(Value::as_str).ok_or_else(|| {
            CommandError::new(ErrorCode::PropertyMissing, "Command name is missing")
        })?;

        let definition = dictionary.find_command(name).ok_or_else(|| {
            CommandError::new(
                ErrorCode::InvalidCommandName,
                format!("Unknown command received: {name}"),
            )
        })?;

        let empty = Map::new();
        let raw_params = match doc.get("parameters") {
            None => &empty,
            Some(Value::Object(map)) => map,
            Some(other) => {
                return Err(CommandError::new(
                    ErrorCode::TypeMismatch,
                    format!("Property 'parameters' must be a JSON object, got {other}"),
                ))
            }
        };

        let parameters = definition
            .parameters()
            .values_from_json(raw_params)
            .map_err(|err| {
                err.wrap(
                    ErrorCode::CommandFailed,
                    format!("Failed to validate command '{name}'"),
                )
            })?;

        let mut instance = Self::new(name, origin, Arc::clone(definition), parameters);
        if let Some(id) = doc.get("id").and_then(Value::as_str) {
            instance.id = id.to_owned();
        }
        Ok(instance)
    }

    /// The `id` of a command document, even when the rest of it is invalid
    pub fn id_from_json(doc: &Value) -> Option<String> {
        doc.get("id").and_then(Value::as_str).map(str::to_owned)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn set_id(&mut self, id: impl Into<String>) {
        self.id = id.into();
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn origin(&self) -> CommandOrigin {
        self.origin
    }

    pub fn definition(&self) -> &Arc<CommandDefinition> {
        &self.definition
    }

    pub fn status(&self) -> CommandStatus {
        self.lifecycle.status()
    }

    pub fn parameters(&self) -> &ValueMap {
        &self.parameters
    }

    pub fn progress(&self) -> &ValueMap {
        &self.progress
    }

    pub fn results(&self) -> &ValueMap {
        &self.results
    }

    pub fn error(&self) -> Option<&ErrorInfo> {
        self.error.as_ref()
    }

    /// Register a new observer. Events are delivered in the order the
    /// changes happened.
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<CommandEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.observers.push(tx);
        rx
    }

    /// Like [`subscribe`](Self::subscribe), but every event is paired with
    /// the value `watermark` returns at the moment of the change.
    pub fn subscribe_stamped(
        &mut self,
        watermark: StateWatermark,
    ) -> mpsc::UnboundedReceiver<(u64, CommandEvent)> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.stamped.push(StampedObserver { tx, watermark });
        rx
    }

    /// Merge reported progress fields into the current progress.
    ///
    /// Always moves the command to `inProgress`; progress observers only
    /// hear about it when the merged value actually changed.
    pub fn set_progress(&mut self, progress: &Value) -> Result<()> {
        self.ensure_active()?;
        let map = expect_object(progress, "progress")?;
        let values = self.definition.progress().partial_values_from_json(map)?;

        let mut merged = self.progress.clone();
        merged.extend(values);

        self.transition(LifecycleEvent::ProgressReported)?;

        if merged != self.progress {
            self.progress = merged;
            self.notify(CommandEvent::ProgressChanged(values_to_json(&self.progress)));
        }
        Ok(())
    }

    /// Replace the results. The status is left alone.
    pub fn set_results(&mut self, results: &Value) -> Result<()> {
        self.ensure_active()?;
        let map = expect_object(results, "results")?;
        let values = self.definition.results().values_from_json(map)?;

        if values != self.results {
            self.results = values;
            self.notify(CommandEvent::ResultsChanged(values_to_json(&self.results)));
        }
        Ok(())
    }

    pub fn pause(&mut self) -> Result<()> {
        self.transition(LifecycleEvent::Paused)
    }

    pub fn done(&mut self) -> Result<()> {
        self.transition(LifecycleEvent::Completed)
    }

    pub fn cancel(&mut self) -> Result<()> {
        self.transition(LifecycleEvent::Cancelled)
    }

    pub fn abort(&mut self) -> Result<()> {
        self.transition(LifecycleEvent::Aborted)
    }

    pub fn expire(&mut self) -> Result<()> {
        self.transition(LifecycleEvent::Expired)
    }

    /// Finish the command in the `error` status with the given report
    pub fn set_error(&mut self, code: impl Into<String>, message: impl Into<String>) -> Result<()> {
        self.ensure_active()?;
        self.error = Some(ErrorInfo {
            code: code.into(),
            message: message.into(),
        });
        self.transition(LifecycleEvent::Failed)
    }

    pub fn to_json(&self) -> Value {
        let mut doc = json!({
            "id": self.id,
            "name": self.name,
            "parameters": values_to_json(&self.parameters),
            "progress": values_to_json(&self.progress),
            "results": values_to_json(&self.results),
            "state": self.status().as_str(),
        });
        if let (Some(error), Value::Object(map)) = (&self.error, &mut doc) {
            map.insert(
                "error".into(),
                json!({"code": error.code, "message": error.message}),
            );
        }
        doc
    }

    pub(crate) fn attach_to_queue(&mut self, removal_tx: mpsc::UnboundedSender<String>) {
        self.removal_tx = Some(removal_tx);
    }

    fn ensure_active(&self) -> Result<()> {
        let status = self.status();
        if status.is_terminal() {
            return Err(CommandError::new(
                ErrorCode::InvalidState,
                format!("Command '{}' is already {}", self.id, status),
            ));
        }
        Ok(())
    }

    fn transition(&mut self, event: LifecycleEvent) -> Result<()> {
        match self.lifecycle.process_event(event) {
            TransitionResult::Changed { from, to } => {
                debug_assert!(is_valid_transition(from, to));
                info!("Command {} ({}): {} -> {}", self.id, self.name, from, to);
                self.notify(CommandEvent::StatusChanged {
                    status: to,
                    error: self.error.clone(),
                });
                if to.is_terminal() {
                    self.request_removal();
                }
                Ok(())
            }
            TransitionResult::Unchanged(_) => Ok(()),
            TransitionResult::Invalid { from, event } => {
                warn!("Command {} rejected {:?} in state {}", self.id, event, from);
                Err(CommandError::new(
                    ErrorCode::InvalidState,
                    format!("Command '{}' cannot handle {:?} while {}", self.id, event, from),
                ))
            }
        }
    }

    fn request_removal(&self) {
        if let Some(tx) = &self.removal_tx {
            if tx.send(self.id.clone()).is_err() {
                debug!("Queue is gone, command {} not scheduled for removal", self.id);
            }
        }
    }

    /// Send `Destroyed` to every observer and forget them
    pub(crate) fn detach_observers(&mut self) {
        self.notify(CommandEvent::Destroyed);
        self.observers.clear();
        self.stamped.clear();
    }

    fn notify(&mut self, event: CommandEvent) {
        self.observers.retain(|tx| tx.send(event.clone()).is_ok());
        self.stamped.retain(|observer| {
            let watermark = (observer.watermark)();
            observer.tx.send((watermark, event.clone())).is_ok()
        });
    }
}

impl Drop for CommandInstance {
    fn drop(&mut self) {
        self.detach_observers();
    }
}

fn expect_object<'a>(value: &'a Value, what: &str) -> Result<&'a Map<String, Value>> {
    value.as_object().ok_or_else(|| {
        CommandError::new(
            ErrorCode::TypeMismatch,
            format!("Command {what} must be a JSON object, got {value}"),
        )
    })
}
