//! Cloud session
//!
//! Publishes commands received from the cloud into the local queue and
//! attaches a [`CloudCommandProxy`] to each of them.

use std::collections::HashMap;
use std::sync::Arc;

use device_agent_shared::{
    CommandError, CommandOrigin, CommandPatch, CommandStatus, ErrorCode, Result,
};
use futures::future::join_all;
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::backoff::BackoffPolicy;
use super::proxy::CloudCommandProxy;
use super::sender::CommandUpdateSender;
use super::state_queue::DeviceStateNotifier;
use crate::command::{CommandInstance, CommandManager};

/// Device-wide registration state as seen by the cloud link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationStatus {
    Connecting,
    Connected,
    /// The server rejected the device credentials
    InvalidCredentials,
}

pub struct CloudSession {
    notifier: Arc<dyn DeviceStateNotifier>,
    sender: Arc<dyn CommandUpdateSender>,
    policy: BackoffPolicy,
    registration: Arc<watch::Sender<RegistrationStatus>>,
    proxies: HashMap<String, JoinHandle<()>>,
}

impl CloudSession {
    pub fn new(
        notifier: Arc<dyn DeviceStateNotifier>,
        sender: Arc<dyn CommandUpdateSender>,
        policy: BackoffPolicy,
    ) -> Self {
        let (registration, _) = watch::channel(RegistrationStatus::Connecting);
        Self {
            notifier,
            sender,
            policy,
            registration: Arc::new(registration),
            proxies: HashMap::new(),
        }
    }

    pub fn registration_status(&self) -> RegistrationStatus {
        *self.registration.borrow()
    }

    pub fn subscribe_registration(&self) -> watch::Receiver<RegistrationStatus> {
        self.registration.subscribe()
    }

    /// Publish one command document fetched from the cloud.
    ///
    /// Returns the id of the newly queued command, or `None` when a command
    /// with that id is already known. A document that fails validation is
    /// reported back to the cloud as aborted if it carries an id.
    pub fn publish_command(
        &mut self,
        manager: &mut CommandManager,
        doc: &Value,
    ) -> Result<Option<String>> {
        let mut instance =
            match CommandInstance::from_json(doc, CommandOrigin::Cloud, manager.dictionary()) {
                Ok(instance) => instance,
                Err(err) => {
                    if let Some(id) = CommandInstance::id_from_json(doc) {
                        self.report_aborted(id, &err);
                    }
                    return Err(err);
                }
            };

        let id = instance.id().to_owned();
        if id.is_empty() {
            return Err(CommandError::new(
                ErrorCode::PropertyMissing,
                "Cloud command id is missing",
            ));
        }
        if manager.find_command(&id).is_some() {
            debug!("Command {} already published", id);
            return Ok(None);
        }
        if !instance.definition().visibility().cloud {
            let err = CommandError::new(
                ErrorCode::AccessDenied,
                format!("Command '{}' is not available to cloud clients", instance.name()),
            );
            self.report_aborted(id, &err);
            return Err(err);
        }

        let handle = CloudCommandProxy::spawn(
            &mut instance,
            self.notifier.clone(),
            self.sender.clone(),
            self.policy.clone(),
            self.registration.clone(),
        );
        manager.add_command(instance)?;
        self.proxies.insert(id.clone(), handle);
        info!("Published cloud command {}", id);
        Ok(Some(id))
    }

    /// Handle the command list the cloud returns after (re)connecting.
    ///
    /// Commands the cloud still shows as running were started by a previous
    /// run of the agent and are aborted; the others are published.
    pub async fn process_initial_command_list(
        &mut self,
        manager: &mut CommandManager,
        commands: &[Value],
    ) {
        self.registration.send_replace(RegistrationStatus::Connected);

        let mut stale = Vec::new();
        for doc in commands {
            let state = doc
                .get("state")
                .and_then(Value::as_str)
                .and_then(|s| s.parse::<CommandStatus>().ok());
            let id = CommandInstance::id_from_json(doc);

            match (state, id) {
                (
                    Some(CommandStatus::Error | CommandStatus::InProgress | CommandStatus::Paused),
                    Some(id),
                ) if manager.find_command(&id).is_none() => stale.push(id),
                _ => {
                    if let Err(err) = self.publish_command(manager, doc) {
                        warn!("Failed to publish cloud command: {}", err.chain_message());
                    }
                }
            }
        }

        let aborts = stale.into_iter().map(|id| {
            let sender = self.sender.clone();
            async move {
                let patch = CommandPatch::with_state(CommandStatus::Aborted);
                let result = sender.update_command(&id, &patch).await;
                (id, result)
            }
        });
        for (id, result) in join_all(aborts).await {
            match result {
                Ok(()) => info!("Aborted stale command {}", id),
                Err(err) => warn!("Failed to abort stale command {}: {}", id, err),
            }
        }
    }

    /// Forget proxies whose command has been dropped
    pub fn prune_finished(&mut self) {
        self.proxies.retain(|_, handle| !handle.is_finished());
    }

    pub fn active_proxies(&self) -> usize {
        self.proxies.len()
    }

    fn report_aborted(&self, id: String, err: &CommandError) {
        warn!("Rejected cloud command {}: {}", id, err.chain_message());
        let patch = CommandPatch::aborted(err.qualified_code(), err.chain_message());
        let sender = self.sender.clone();
        tokio::spawn(async move {
            if let Err(err) = sender.update_command(&id, &patch).await {
                warn!("Failed to report aborted command {}: {}", id, err);
            }
        });
    }
}

impl Drop for CloudSession {
    fn drop(&mut self) {
        for handle in self.proxies.values() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::{CloudError, StateChangeQueue};
    use crate::command::{SystemClock, UserRole};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::time::Duration;

    #[derive(Default)]
    struct RecordingSender {
        sent: Mutex<Vec<(String, CommandPatch)>>,
    }

    #[async_trait]
    impl CommandUpdateSender for RecordingSender {
        async fn update_command(
            &self,
            command_id: &str,
            patch: &CommandPatch,
        ) -> std::result::Result<(), CloudError> {
            self.sent.lock().push((command_id.to_owned(), patch.clone()));
            Ok(())
        }
    }

    fn setup() -> (CommandManager, CloudSession, Arc<RecordingSender>) {
        let mut manager = CommandManager::new(Arc::new(SystemClock), Duration::from_secs(900));
        manager
            .load_commands(
                &json!({
                    "robot": {
                        "_jump": {"parameters": {"height": {"minimum": 0, "maximum": 10}}},
                        "_calibrate": {"visibility": "local"}
                    }
                }),
                "robotd",
            )
            .expect("definitions");
        let sender = Arc::new(RecordingSender::default());
        let session = CloudSession::new(
            Arc::new(StateChangeQueue::new(100)),
            sender.clone(),
            BackoffPolicy::default(),
        );
        (manager, session, sender)
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_publish_new_command() {
        let (mut manager, mut session, sender) = setup();
        let doc = json!({"id": "c1", "name": "robot._jump", "parameters": {"height": 5}});

        assert_eq!(
            session.publish_command(&mut manager, &doc),
            Ok(Some("c1".into()))
        );
        assert_eq!(session.publish_command(&mut manager, &doc), Ok(None));
        assert_eq!(session.active_proxies(), 1);

        let instance = manager.find_command_mut("c1").expect("queued");
        assert_eq!(instance.origin(), CommandOrigin::Cloud);
        instance.done().expect("done");
        settle().await;

        assert_eq!(
            sender.sent.lock().clone(),
            vec![("c1".to_owned(), CommandPatch::with_state(CommandStatus::Done))]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_command_reported_aborted() {
        let (mut manager, mut session, sender) = setup();
        let doc = json!({"id": "c2", "name": "robot._jump", "parameters": {"height": 11}});

        let err = session
            .publish_command(&mut manager, &doc)
            .expect_err("out of range");
        assert_eq!(err.code(), ErrorCode::CommandFailed);
        settle().await;

        let sent = sender.sent.lock().clone();
        assert_eq!(sent.len(), 1);
        let (id, patch) = &sent[0];
        assert_eq!(id, "c2");
        assert_eq!(patch.state, Some(CommandStatus::Aborted));
        assert_eq!(patch.error_code.as_deref(), Some("command_schema:command_failed"));
        assert_eq!(
            patch.error_message.as_deref(),
            Some(
                "Failed to validate command 'robot._jump';\
                 Invalid value for property 'height';\
                 Value 11 is out of range. It must not be greater than 10"
            )
        );
        assert!(manager.find_command("c2").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_command_without_id_not_reported() {
        let (mut manager, mut session, sender) = setup();
        let err = session
            .publish_command(&mut manager, &json!({"name": "robot._fly"}))
            .expect_err("unknown command");
        assert_eq!(err.code(), ErrorCode::InvalidCommandName);
        settle().await;
        assert!(sender.sent.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_local_only_command_rejected_from_cloud() {
        let (mut manager, mut session, sender) = setup();
        let err = session
            .publish_command(&mut manager, &json!({"id": "c3", "name": "robot._calibrate"}))
            .expect_err("local only");
        assert_eq!(err.code(), ErrorCode::AccessDenied);
        settle().await;
        assert_eq!(sender.sent.lock().len(), 1);

        manager
            .add_command_json(&json!({"name": "robot._calibrate"}), UserRole::User)
            .expect("local clients may run it");
    }

    #[tokio::test(start_paused = true)]
    async fn test_initial_list_aborts_stale_commands() {
        let (mut manager, mut session, sender) = setup();
        assert_eq!(session.registration_status(), RegistrationStatus::Connecting);

        session
            .process_initial_command_list(
                &mut manager,
                &[
                    json!({"id": "s1", "name": "robot._jump", "state": "inProgress"}),
                    json!({"id": "s2", "name": "robot._jump", "state": "paused"}),
                    json!({"id": "s3", "name": "robot._jump", "state": "error"}),
                    json!({"id": "n1", "name": "robot._jump", "state": "queued"}),
                ],
            )
            .await;

        assert_eq!(session.registration_status(), RegistrationStatus::Connected);
        assert!(manager.find_command("n1").is_some());
        assert!(manager.find_command("s1").is_none());

        let mut aborted: Vec<String> = sender
            .sent
            .lock()
            .iter()
            .filter(|(_, patch)| patch.state == Some(CommandStatus::Aborted))
            .map(|(id, _)| id.clone())
            .collect();
        aborted.sort();
        assert_eq!(aborted, vec!["s1", "s2", "s3"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_prune_finished_proxies() {
        let (mut manager, mut session, _) = setup();
        session
            .publish_command(&mut manager, &json!({"id": "c4", "name": "robot._jump"}))
            .expect("published");

        manager.find_command_mut("c4").expect("queued").done().expect("done");
        drop(manager);
        settle().await;

        session.prune_finished();
        assert_eq!(session.active_proxies(), 0);
    }
}
