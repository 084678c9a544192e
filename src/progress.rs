//! C5: Progress hub — per-client channels, batch<->client subscription
//! index, heartbeat and stale-pruning. Adapted from the connection-manager
//! shape used for the bidirectional-channel surface: a `DashMap` of
//! per-client handles plus a reverse index from batch to subscribers.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::model::ProgressEvent;

const CLIENT_QUEUE_DEPTH: usize = 256;

struct ClientHandle {
    sender: mpsc::Sender<ProgressEvent>,
    last_seen: parking_lot::Mutex<DateTime<Utc>>,
    batch_ids: parking_lot::Mutex<Vec<String>>,
}

/// Process-wide registry: `client_id -> handle` and the reverse
/// `batch_id -> set<client_id>`.
pub struct ProgressHub {
    clients: DashMap<String, Arc<ClientHandle>>,
    subscriptions: DashMap<String, Vec<String>>,
    stale_window: Duration,
}

impl ProgressHub {
    pub fn new(stale_window: Duration) -> Self {
        Self {
            clients: DashMap::new(),
            subscriptions: DashMap::new(),
            stale_window,
        }
    }

    /// Registers a listener. If the client already has a handle, the
    /// previous one is dropped (its channel closes on drop, which the
    /// owning transport task observes as a clean close).
    pub fn attach(&self, client_id: &str) -> mpsc::Receiver<ProgressEvent> {
        let (tx, rx) = mpsc::channel(CLIENT_QUEUE_DEPTH);
        let handle = Arc::new(ClientHandle {
            sender: tx,
            last_seen: parking_lot::Mutex::new(Utc::now()),
            batch_ids: parking_lot::Mutex::new(Vec::new()),
        });
        self.clients.insert(client_id.to_string(), handle);
        rx
    }

    /// Associates batch updates with a client. Idempotent.
    pub fn bind(&self, batch_id: &str, client_id: &str) {
        if let Some(handle) = self.clients.get(client_id) {
            let mut ids = handle.batch_ids.lock();
            if !ids.iter().any(|b| b == batch_id) {
                ids.push(batch_id.to_string());
            }
        }
        let mut subs = self.subscriptions.entry(batch_id.to_string()).or_default();
        if !subs.iter().any(|c| c == client_id) {
            subs.push(client_id.to_string());
        }
    }

    /// Enqueues `event` to every client bound to `batch_id`. Delivery is
    /// best-effort ordered per client: a full queue or a dead channel marks
    /// the client for pruning rather than blocking the caller (the tracker
    /// must never block on publication).
    pub fn publish(&self, batch_id: &str, event: ProgressEvent) {
        let Some(subs) = self.subscriptions.get(batch_id) else { return };
        let mut dead = Vec::new();
        for client_id in subs.iter() {
            let Some(handle) = self.clients.get(client_id) else {
                dead.push(client_id.clone());
                continue;
            };
            match handle.sender.try_send(event.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(%client_id, %batch_id, "progress queue full, pruning client");
                    dead.push(client_id.clone());
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    dead.push(client_id.clone());
                }
            }
        }
        drop(subs);
        for client_id in dead {
            self.drop_client(&client_id);
        }
    }

    /// Sends an event directly to one client, bypassing the batch
    /// subscription index. Used for `heartbeat_ack`, which replies to the
    /// sender rather than broadcasting to every subscriber of a batch.
    pub fn send_direct(&self, client_id: &str, event: ProgressEvent) {
        if let Some(handle) = self.clients.get(client_id) {
            if handle.sender.try_send(event).is_err() {
                drop(handle);
                self.drop_client(client_id);
            }
        }
    }

    /// Refreshes `last_seen` on inbound activity (heartbeat or ack).
    pub fn touch(&self, client_id: &str) {
        if let Some(handle) = self.clients.get(client_id) {
            *handle.last_seen.lock() = Utc::now();
        }
    }

    /// Closes and drops clients whose `last_seen` exceeds the configured
    /// inactivity window.
    pub fn prune(&self) {
        let now = Utc::now();
        let stale: Vec<String> = self
            .clients
            .iter()
            .filter(|entry| {
                let last_seen = *entry.value().last_seen.lock();
                now.signed_duration_since(last_seen).to_std().unwrap_or_default() > self.stale_window
            })
            .map(|entry| entry.key().clone())
            .collect();
        for client_id in stale {
            debug!(%client_id, "pruning stale progress subscriber");
            self.drop_client(&client_id);
        }
    }

    fn drop_client(&self, client_id: &str) {
        if let Some((_, handle)) = self.clients.remove(client_id) {
            for batch_id in handle.batch_ids.lock().iter() {
                if let Some(mut subs) = self.subscriptions.get_mut(batch_id) {
                    subs.retain(|c| c != client_id);
                }
            }
        }
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }
}
