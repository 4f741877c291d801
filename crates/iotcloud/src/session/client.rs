//! Client session state.

use std::collections::HashSet;
use std::sync::Mutex;

use iotcloud_protocol::Envelope;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

/// One connected web client.
///
/// Subscriptions are exact `(hub uuid, device id)` pairs; a client only ever
/// receives value updates for pairs it subscribed to.
pub struct ClientSession {
    pub conn_id: u64,
    outbound: mpsc::Sender<String>,
    username: Mutex<Option<String>>,
    subscriptions: Mutex<HashSet<(String, String)>>,
}

impl ClientSession {
    pub fn new(conn_id: u64, outbound: mpsc::Sender<String>) -> Self {
        Self {
            conn_id,
            outbound,
            username: Mutex::new(None),
            subscriptions: Mutex::new(HashSet::new()),
        }
    }

    pub fn authorize(&self, username: String) {
        let mut guard = self.username.lock().unwrap_or_else(|e| e.into_inner());
        *guard = Some(username);
    }

    pub fn username(&self) -> Option<String> {
        self.username
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn is_authorized(&self) -> bool {
        self.username
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    /// Returns false when the pair was already subscribed.
    pub fn subscribe(&self, hub_uuid: &str, device_id: &str) -> bool {
        let mut subs = self.subscriptions.lock().unwrap_or_else(|e| e.into_inner());
        subs.insert((hub_uuid.to_string(), device_id.to_string()))
    }

    pub fn unsubscribe(&self, hub_uuid: &str, device_id: &str) -> bool {
        let mut subs = self.subscriptions.lock().unwrap_or_else(|e| e.into_inner());
        subs.remove(&(hub_uuid.to_string(), device_id.to_string()))
    }

    pub fn is_subscribed(&self, hub_uuid: &str, device_id: &str) -> bool {
        let subs = self.subscriptions.lock().unwrap_or_else(|e| e.into_inner());
        subs.contains(&(hub_uuid.to_string(), device_id.to_string()))
    }

    pub async fn send(&self, envelope: Envelope) {
        if self.outbound.send(envelope.encode()).await.is_err() {
            debug!(conn_id = self.conn_id, "client outbound channel closed, frame dropped");
        }
    }

    /// Non-blocking send for fan-out paths. A client that stopped draining
    /// its socket loses the event instead of stalling the sender.
    pub fn try_send(&self, envelope: Envelope) {
        match self.outbound.try_send(envelope.encode()) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                warn!(conn_id = self.conn_id, "client outbound buffer full, event dropped");
            }
            Err(TrySendError::Closed(_)) => {
                debug!(conn_id = self.conn_id, "client outbound channel closed, frame dropped");
            }
        }
    }
}
