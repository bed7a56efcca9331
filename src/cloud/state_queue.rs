//! Device state change queue
//!
//! Records local state changes until they are published, and tracks which
//! of them the server has acknowledged. Every recorded change gets the next
//! [`UpdateId`]; proxies use those ids as watermarks.

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::watch;
use tracing::debug;

/// Monotonic id of a local state change
pub type UpdateId = u64;

/// Device-wide view of state changes shared by all command proxies
pub trait DeviceStateNotifier: Send + Sync {
    /// Id of the most recent local state change, published or not
    fn last_local_state_change_id(&self) -> UpdateId;

    /// Stream of update ids acknowledged by the server. The receiver starts
    /// at the currently acknowledged id.
    fn subscribe(&self) -> watch::Receiver<UpdateId>;
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StateChange {
    pub timestamp_ms: u64,
    pub changed_properties: Map<String, Value>,
}

impl StateChange {
    fn absorb(&mut self, later: StateChange) {
        self.timestamp_ms = later.timestamp_ms;
        self.changed_properties.extend(later.changed_properties);
    }
}

#[derive(Debug)]
struct Inner {
    last_change_id: UpdateId,
    changes: Vec<StateChange>,
    max_size: usize,
}

pub struct StateChangeQueue {
    inner: Mutex<Inner>,
    acked_tx: watch::Sender<UpdateId>,
}

impl StateChangeQueue {
    pub fn new(max_size: usize) -> Self {
        let (acked_tx, _) = watch::channel(0);
        Self {
            inner: Mutex::new(Inner {
                last_change_id: 0,
                changes: Vec::new(),
                max_size: max_size.max(1),
            }),
            acked_tx,
        }
    }

    /// Record changed properties and return the id of the change. Changes
    /// with the same timestamp as the previous record are folded into it.
    pub fn record_state_change(
        &self,
        timestamp_ms: u64,
        changed_properties: Map<String, Value>,
    ) -> UpdateId {
        let mut inner = self.inner.lock();
        let change = StateChange {
            timestamp_ms,
            changed_properties,
        };

        match inner.changes.last_mut() {
            Some(last) if last.timestamp_ms == timestamp_ms => last.absorb(change),
            _ => inner.changes.push(change),
        }

        while inner.changes.len() > inner.max_size {
            let oldest = inner.changes.remove(0);
            if let Some(next) = inner.changes.first_mut() {
                let newer = std::mem::replace(next, oldest);
                next.absorb(newer);
            }
        }

        inner.last_change_id += 1;
        debug!("Recorded state change {}", inner.last_change_id);
        inner.last_change_id
    }

    /// Hand out every recorded change for publication, together with the id
    /// the server should acknowledge once they are stored
    pub fn get_and_clear_recorded_state_changes(&self) -> (UpdateId, Vec<StateChange>) {
        let mut inner = self.inner.lock();
        let changes = std::mem::take(&mut inner.changes);
        (inner.last_change_id, changes)
    }

    /// The server stored every change up to `id`. Older ids are ignored.
    pub fn notify_state_updated_on_server(&self, id: UpdateId) {
        let advanced = self.acked_tx.send_if_modified(|acked| {
            if id > *acked {
                *acked = id;
                true
            } else {
                false
            }
        });
        if advanced {
            debug!("Server acknowledged state change {}", id);
        }
    }

    pub fn last_acknowledged_id(&self) -> UpdateId {
        *self.acked_tx.borrow()
    }
}

impl DeviceStateNotifier for StateChangeQueue {
    fn last_local_state_change_id(&self) -> UpdateId {
        self.inner.lock().last_change_id
    }

    fn subscribe(&self) -> watch::Receiver<UpdateId> {
        self.acked_tx.subscribe()
    }
}
