//! Cloud command proxy
//!
//! Replicates one command instance to the cloud. Every change becomes a
//! patch tagged with the device state watermark read when the change
//! happened. A
//! patch is only sent once the server has acknowledged its watermark, so a
//! command update never overtakes the device state it depends on.
//!
//! At most one update is on the wire per command. A failed update is
//! retried unchanged after a backoff delay; changes made meanwhile wait for
//! the next flush.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use device_agent_shared::CommandPatch;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

use super::backoff::{BackoffEntry, BackoffPolicy};
use super::sender::{CloudError, CommandUpdateSender};
use super::session::RegistrationStatus;
use super::state_queue::{DeviceStateNotifier, UpdateId};
use crate::command::{CommandEvent, CommandInstance};

/// Ordering and coalescing state of a proxy, independent of any I/O
#[derive(Debug)]
pub struct UpdateQueue {
    pending: VecDeque<(UpdateId, CommandPatch)>,
    in_flight: Option<CommandPatch>,
    last_ack: UpdateId,
    backoff: BackoffEntry,
}

impl UpdateQueue {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            pending: VecDeque::new(),
            in_flight: None,
            last_ack: 0,
            backoff: BackoffEntry::new(policy),
        }
    }

    /// Queue a patch captured at `watermark`
    pub fn queue_update(&mut self, watermark: UpdateId, patch: CommandPatch) {
        match self.pending.back_mut() {
            Some((last, queued)) if *last == watermark => queued.merge(patch),
            _ => self.pending.push_back((watermark, patch)),
        }
    }

    pub fn on_acknowledged(&mut self, id: UpdateId) {
        self.last_ack = self.last_ack.max(id);
    }

    /// Merge every acknowledged patch into one update and mark it in flight.
    /// Nothing is returned while another update is in flight.
    pub fn take_ready(&mut self) -> Option<CommandPatch> {
        if self.in_flight.is_some() {
            return None;
        }

        let mut merged: Option<CommandPatch> = None;
        while let Some((watermark, _)) = self.pending.front() {
            if *watermark > self.last_ack {
                break;
            }
            let Some((_, patch)) = self.pending.pop_front() else {
                break;
            };
            match merged.as_mut() {
                Some(combined) => combined.merge(patch),
                None => merged = Some(patch),
            }
        }

        self.in_flight = merged.clone();
        merged
    }

    /// Record the outcome of the in-flight update. A failure keeps it in
    /// flight and returns the delay before it is sent again.
    pub fn on_send_finished(&mut self, success: bool) -> Option<Duration> {
        self.backoff.inform_of_request(success);
        if success {
            self.in_flight = None;
            None
        } else {
            Some(self.backoff.next_delay())
        }
    }

    pub fn in_flight(&self) -> Option<&CommandPatch> {
        self.in_flight.as_ref()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

fn patch_for(event: CommandEvent) -> Option<CommandPatch> {
    match event {
        CommandEvent::StatusChanged { status, error } => {
            let mut patch = CommandPatch::with_state(status);
            if let Some(error) = error {
                patch.error_code = Some(error.code);
                patch.error_message = Some(error.message);
            }
            Some(patch)
        }
        CommandEvent::ProgressChanged(progress) => Some(CommandPatch::with_progress(progress)),
        CommandEvent::ResultsChanged(results) => Some(CommandPatch::with_results(results)),
        CommandEvent::Destroyed => None,
    }
}

pub struct CloudCommandProxy {
    command_id: String,
    events: mpsc::UnboundedReceiver<(UpdateId, CommandEvent)>,
    notifier: Arc<dyn DeviceStateNotifier>,
    sender: Arc<dyn CommandUpdateSender>,
    registration: Arc<watch::Sender<RegistrationStatus>>,
    queue: UpdateQueue,
    done_tx: mpsc::UnboundedSender<Result<(), CloudError>>,
    send_task: Option<JoinHandle<()>>,
}

impl CloudCommandProxy {
    /// Start replicating `instance`. The task ends when the instance is
    /// dropped.
    pub fn spawn(
        instance: &mut CommandInstance,
        notifier: Arc<dyn DeviceStateNotifier>,
        sender: Arc<dyn CommandUpdateSender>,
        policy: BackoffPolicy,
        registration: Arc<watch::Sender<RegistrationStatus>>,
    ) -> JoinHandle<()> {
        let source = notifier.clone();
        let events = instance
            .subscribe_stamped(Arc::new(move || source.last_local_state_change_id()));
        let (done_tx, done_rx) = mpsc::unbounded_channel();
        let proxy = Self {
            command_id: instance.id().to_owned(),
            events,
            notifier,
            sender,
            registration,
            queue: UpdateQueue::new(policy),
            done_tx,
            send_task: None,
        };
        tokio::spawn(proxy.run(done_rx))
    }

    async fn run(mut self, mut done_rx: mpsc::UnboundedReceiver<Result<(), CloudError>>) {
        let mut ack_rx = self.notifier.subscribe();
        self.queue.on_acknowledged(*ack_rx.borrow_and_update());
        let mut ack_open = true;
        let mut retry_at: Option<Instant> = None;

        debug!("Cloud proxy for command {} started", self.command_id);

        loop {
            tokio::select! {
                event = self.events.recv() => {
                    if !self.queue_event(event) {
                        break;
                    }
                    // Changes already waiting belong to the same burst
                    let mut alive = true;
                    while let Ok(event) = self.events.try_recv() {
                        if !self.queue_event(Some(event)) {
                            alive = false;
                            break;
                        }
                    }
                    if !alive {
                        break;
                    }
                    self.flush();
                }

                changed = ack_rx.changed(), if ack_open => {
                    if changed.is_err() {
                        warn!("Device state notifier closed, command {} updates are held", self.command_id);
                        ack_open = false;
                        continue;
                    }
                    self.queue.on_acknowledged(*ack_rx.borrow_and_update());
                    self.flush();
                }

                Some(result) = done_rx.recv() => {
                    self.send_task = None;
                    match result {
                        Ok(()) => {
                            self.queue.on_send_finished(true);
                            debug!("Command {} update delivered", self.command_id);
                            self.flush();
                        }
                        Err(err) => {
                            if err.is_credentials_error() {
                                self.registration.send_replace(RegistrationStatus::InvalidCredentials);
                            }
                            let delay = self.queue.on_send_finished(false).unwrap_or_default();
                            warn!(
                                "Command {} update failed: {}, retrying in {:?}",
                                self.command_id, err, delay
                            );
                            retry_at = Some(Instant::now() + delay);
                        }
                    }
                }

                _ = sleep_until(retry_at.unwrap_or_else(Instant::now)), if retry_at.is_some() => {
                    retry_at = None;
                    if let Some(patch) = self.queue.in_flight().cloned() {
                        self.start_send(patch);
                    }
                }
            }
        }

        if let Some(task) = self.send_task.take() {
            task.abort();
        }
        info!(
            "Cloud proxy for command {} stopped, {} updates discarded",
            self.command_id,
            self.queue.pending_len()
        );
    }

    /// Queue the patch for `event`. Returns false once the instance is gone.
    fn queue_event(&mut self, event: Option<(UpdateId, CommandEvent)>) -> bool {
        let Some((watermark, patch)) =
            event.and_then(|(watermark, event)| Some((watermark, patch_for(event)?)))
        else {
            return false;
        };
        self.queue.queue_update(watermark, patch);
        true
    }

    fn flush(&mut self) {
        if let Some(patch) = self.queue.take_ready() {
            self.start_send(patch);
        }
    }

    fn start_send(&mut self, patch: CommandPatch) {
        let sender = self.sender.clone();
        let command_id = self.command_id.clone();
        let done_tx = self.done_tx.clone();
        debug!("Sending update for command {}: {:?}", command_id, patch);
        self.send_task = Some(tokio::spawn(async move {
            let result = sender.update_command(&command_id, &patch).await;
            let _ = done_tx.send(result);
        }));
    }
}
