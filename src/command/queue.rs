//! Command queue
//!
//! Owns every live command instance. Finished commands stay readable for a
//! retention window before they are dropped by [`CommandQueue::cleanup`].

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use super::instance::CommandInstance;

/// Source of the current time in milliseconds
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> u64;
}

/// Wall clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        device_agent_shared::now_ms()
    }
}

pub type CommandCallback = Box<dyn Fn(&CommandInstance) + Send + Sync>;

/// Violations of the queue's id invariants
#[derive(Error, Debug, Clone, PartialEq)]
pub enum QueueError {
    #[error("Command with id '{0}' is already in the queue")]
    DuplicateId(String),

    #[error("Command with id '{0}' is not in the queue")]
    UnknownId(String),
}

pub struct CommandQueue {
    map: HashMap<String, CommandInstance>,
    /// `(deadline_ms, id)` in scheduling order
    remove_queue: VecDeque<(u64, String)>,
    retention_ms: u64,
    clock: Arc<dyn Clock>,
    next_id: u64,
    on_added: Vec<CommandCallback>,
    on_removed: Vec<CommandCallback>,
    removal_tx: mpsc::UnboundedSender<String>,
    removal_rx: mpsc::UnboundedReceiver<String>,
}

impl CommandQueue {
    pub fn new(clock: Arc<dyn Clock>, retention: Duration) -> Self {
        let (removal_tx, removal_rx) = mpsc::unbounded_channel();
        Self {
            map: HashMap::new(),
            remove_queue: VecDeque::new(),
            retention_ms: retention.as_millis() as u64,
            clock,
            next_id: 1,
            on_added: Vec::new(),
            on_removed: Vec::new(),
            removal_tx,
            removal_rx,
        }
    }

    pub fn add_on_command_added(&mut self, callback: CommandCallback) {
        self.on_added.push(callback);
    }

    pub fn add_on_command_removed(&mut self, callback: CommandCallback) {
        self.on_removed.push(callback);
    }

    /// Smallest sequential id not used by a command in the queue
    pub fn next_free_id(&mut self) -> String {
        loop {
            let id = self.next_id.to_string();
            self.next_id += 1;
            if !self.map.contains_key(&id) {
                return id;
            }
        }
    }

    /// Take ownership of `instance`. A command without an id gets a fresh
    /// one. Returns the id the command is stored under.
    pub fn add(&mut self, mut instance: CommandInstance) -> Result<String, QueueError> {
        self.process_removal_requests();

        if instance.id().is_empty() {
            let id = self.next_free_id();
            instance.set_id(id);
        }
        let id = instance.id().to_owned();

        if self.map.contains_key(&id) {
            error!("Duplicate command id {}", id);
            return Err(QueueError::DuplicateId(id));
        }

        instance.attach_to_queue(self.removal_tx.clone());
        for callback in &self.on_added {
            callback(&instance);
        }
        info!("Command {} ({}) added to queue", id, instance.name());
        self.map.insert(id.clone(), instance);
        Ok(id)
    }

    /// Schedule `id` for removal once the retention window has passed
    pub fn delayed_remove(&mut self, id: &str) -> Result<(), QueueError> {
        if !self.map.contains_key(id) {
            error!("Cannot remove unknown command {}", id);
            return Err(QueueError::UnknownId(id.to_owned()));
        }
        let deadline = self.clock.now_ms() + self.retention_ms;
        debug!("Command {} will be removed at {}", id, deadline);
        self.remove_queue.push_back((deadline, id.to_owned()));
        Ok(())
    }

    /// Drop every command whose removal deadline has passed
    pub fn cleanup(&mut self) {
        self.process_removal_requests();

        let now = self.clock.now_ms();
        while let Some((deadline, _)) = self.remove_queue.front() {
            if *deadline > now {
                break;
            }
            let Some((_, id)) = self.remove_queue.pop_front() else {
                break;
            };
            if let Some(mut instance) = self.map.remove(&id) {
                instance.detach_observers();
                for callback in &self.on_removed {
                    callback(&instance);
                }
                info!("Command {} removed from queue", id);
            }
        }
    }

    pub fn find(&self, id: &str) -> Option<&CommandInstance> {
        self.map.get(id)
    }

    pub fn find_mut(&mut self, id: &str) -> Option<&mut CommandInstance> {
        self.map.get_mut(id)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Turn removal requests posted by finished commands into scheduled
    /// removals
    fn process_removal_requests(&mut self) {
        while let Ok(id) = self.removal_rx.try_recv() {
            // Already logged; a command may finish after being replaced
            let _ = self.delayed_remove(&id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{CommandDictionary, CommandEvent};
    use device_agent_shared::CommandOrigin;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

    #[derive(Default)]
    struct TestClock(AtomicU64);

    impl TestClock {
        fn advance(&self, ms: u64) {
            self.0.fetch_add(ms, Ordering::SeqCst);
        }
    }

    impl Clock for TestClock {
        fn now_ms(&self) -> u64 {
            self.0.load(Ordering::SeqCst)
        }
    }

    const RETENTION: Duration = Duration::from_secs(15 * 60);

    fn dictionary() -> CommandDictionary {
        let mut dict = CommandDictionary::new();
        dict.load_commands(&json!({"base": {"reboot": {}}}), "", None)
            .expect("definitions");
        dict
    }

    fn command(dict: &CommandDictionary, id: Option<&str>) -> CommandInstance {
        let mut doc = json!({"name": "base.reboot"});
        if let Some(id) = id {
            doc["id"] = json!(id);
        }
        CommandInstance::from_json(&doc, CommandOrigin::Local, dict).expect("command")
    }

    fn queue() -> (CommandQueue, Arc<TestClock>) {
        let clock = Arc::new(TestClock::default());
        (CommandQueue::new(clock.clone(), RETENTION), clock)
    }

    #[test]
    fn test_add_assigns_ids() {
        let dict = dictionary();
        let (mut queue, _) = queue();

        assert_eq!(queue.add(command(&dict, Some("1"))), Ok("1".into()));
        assert_eq!(queue.add(command(&dict, None)), Ok("2".into()));
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.find("2").map(CommandInstance::name), Some("base.reboot"));
        assert!(queue.find("3").is_none());
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let dict = dictionary();
        let (mut queue, _) = queue();
        queue.add(command(&dict, Some("abc"))).expect("first");
        assert_eq!(
            queue.add(command(&dict, Some("abc"))),
            Err(QueueError::DuplicateId("abc".into()))
        );
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_delayed_remove_unknown_id() {
        let (mut queue, _) = queue();
        assert_eq!(
            queue.delayed_remove("missing"),
            Err(QueueError::UnknownId("missing".into()))
        );
    }

    #[test]
    fn test_callbacks_fire() {
        let dict = dictionary();
        let (mut queue, clock) = queue();
        let added = Arc::new(AtomicUsize::new(0));
        let removed = Arc::new(AtomicUsize::new(0));

        let counter = added.clone();
        queue.add_on_command_added(Box::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        let counter = removed.clone();
        queue.add_on_command_removed(Box::new(move |instance| {
            assert_eq!(instance.id(), "1");
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        queue.add(command(&dict, None)).expect("add");
        queue.delayed_remove("1").expect("known id");
        clock.advance(RETENTION.as_millis() as u64);
        queue.cleanup();

        assert_eq!(added.load(Ordering::SeqCst), 1);
        assert_eq!(removed.load(Ordering::SeqCst), 1);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_finished_command_kept_for_retention_window() {
        let dict = dictionary();
        let (mut queue, clock) = queue();
        let id = queue.add(command(&dict, None)).expect("add");
        let mut events = queue.find_mut(&id).expect("present").subscribe();

        queue.find_mut(&id).expect("present").done().expect("done");
        queue.cleanup();
        assert!(queue.find(&id).is_some());

        clock.advance(RETENTION.as_millis() as u64 - 1);
        queue.cleanup();
        assert!(queue.find(&id).is_some());

        clock.advance(1);
        queue.cleanup();
        assert!(queue.find(&id).is_none());

        let mut seen = Vec::new();
        while let Ok(event) = events.try_recv() {
            seen.push(event);
        }
        assert_eq!(seen.last(), Some(&CommandEvent::Destroyed));
    }

    #[test]
    fn test_observers_detached_before_removed_callbacks() {
        let dict = dictionary();
        let (mut queue, clock) = queue();
        let id = queue.add(command(&dict, None)).expect("add");
        let events = Arc::new(Mutex::new(
            queue.find_mut(&id).expect("present").subscribe(),
        ));

        let seen_destroyed = Arc::new(AtomicUsize::new(0));
        let (rx, counter) = (events.clone(), seen_destroyed.clone());
        queue.add_on_command_removed(Box::new(move |_| {
            let mut rx = rx.lock();
            while let Ok(event) = rx.try_recv() {
                if event == CommandEvent::Destroyed {
                    counter.fetch_add(1, Ordering::SeqCst);
                }
            }
        }));

        queue.find_mut(&id).expect("present").abort().expect("abort");
        queue.cleanup();
        clock.advance(RETENTION.as_millis() as u64);
        queue.cleanup();

        assert!(queue.is_empty());
        assert_eq!(seen_destroyed.load(Ordering::SeqCst), 1);
        // Dropping the instance afterwards sends nothing more
        assert!(events.lock().try_recv().is_err());
    }

    #[test]
    fn test_dropping_queue_releases_instances() {
        let dict = dictionary();
        let (mut queue, _) = queue();
        let id = queue.add(command(&dict, None)).expect("add");
        let mut events = queue.find_mut(&id).expect("present").subscribe();
        drop(queue);
        assert_eq!(events.try_recv().ok(), Some(CommandEvent::Destroyed));
    }
}
