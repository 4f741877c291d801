//! Hub session state and device-tree synchronization.

use std::sync::Mutex;

use iotcloud_protocol::messages::{DeviceDescriptor, DeviceView, HubSubscribe};
use iotcloud_protocol::{Envelope, names};
use serde_json::{Value, json};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use super::correlation::{CORRELATION_TIMEOUT, CorrelationTable};
use crate::device::{Device, Variable};

/// Identity a hub acquires when its `RequestAuthorize` succeeds.
#[derive(Debug, Clone)]
pub struct HubInfo {
    pub username: String,
    pub uuid: String,
    pub name: String,
}

/// What a synchronization pass changed.
#[derive(Debug, Default, PartialEq)]
pub struct SyncOutcome {
    pub added: Vec<String>,
    pub removed: Vec<String>,
}

impl SyncOutcome {
    pub fn changed(&self) -> bool {
        !self.added.is_empty() || !self.removed.is_empty()
    }
}

/// One connected hub.
///
/// Holds the mirrored device tree and the correlation table for requests the
/// relay sends to this hub. All mutation happens under short-lived std
/// mutexes; nothing is awaited while a lock is held.
pub struct HubSession {
    pub conn_id: u64,
    outbound: mpsc::Sender<String>,
    pub correlations: CorrelationTable,
    info: Mutex<Option<HubInfo>>,
    devices: Mutex<Vec<Device>>,
}

impl HubSession {
    pub fn new(conn_id: u64, outbound: mpsc::Sender<String>) -> Self {
        Self {
            conn_id,
            outbound,
            correlations: CorrelationTable::new(),
            info: Mutex::new(None),
            devices: Mutex::new(Vec::new()),
        }
    }

    pub fn authorize(&self, info: HubInfo) {
        let mut guard = self.info.lock().unwrap_or_else(|e| e.into_inner());
        *guard = Some(info);
    }

    pub fn info(&self) -> Option<HubInfo> {
        self.info
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn is_authorized(&self) -> bool {
        self.info
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    /// Queue one frame for the writer task. Failure means the connection is
    /// already closing; the frame is dropped and logged.
    pub async fn send(&self, envelope: Envelope) {
        if self.outbound.send(envelope.encode()).await.is_err() {
            debug!(conn_id = self.conn_id, "hub outbound channel closed, frame dropped");
        }
    }

    /// Send a correlated request without waiting for the reply.
    pub async fn send_request(&self, name: &str, payload: Value) -> i64 {
        let mid = self.correlations.next_id();
        self.send(Envelope::request(mid, name, payload)).await;
        mid
    }

    /// Send a correlated request and hand back the receiver for its reply.
    /// The waiter is registered before the frame leaves, so even an
    /// immediate reply finds it.
    pub async fn send_correlated(
        &self,
        name: &str,
        payload: Value,
    ) -> (i64, oneshot::Receiver<Envelope>) {
        let (mid, rx) = self.correlations.begin();
        self.send(Envelope::request(mid, name, payload)).await;
        (mid, rx)
    }

    /// Wait for the reply to `mid`, bounded by [`CORRELATION_TIMEOUT`].
    pub async fn await_reply(&self, mid: i64, rx: oneshot::Receiver<Envelope>) -> Option<Envelope> {
        match tokio::time::timeout(CORRELATION_TIMEOUT, rx).await {
            Ok(Ok(envelope)) => Some(envelope),
            Ok(Err(_)) => None,
            Err(_) => {
                warn!(conn_id = self.conn_id, mid, "hub reply timed out, discarding correlation");
                self.correlations.discard(mid);
                None
            }
        }
    }

    /// Reconcile the mirrored tree against a full snapshot from the hub.
    ///
    /// Two passes: devices in the snapshot but not the mirror are added and
    /// subscribed to; devices in the mirror but not the snapshot are removed
    /// and unsubscribed from. Existing devices keep their mirrored values.
    /// Subscription traffic is sent after the tree lock is released.
    pub async fn synchronize(&self, snapshot: Vec<DeviceDescriptor>) -> SyncOutcome {
        let mut outcome = SyncOutcome::default();
        {
            let mut devices = self.devices.lock().unwrap_or_else(|e| e.into_inner());
            for desc in snapshot.iter() {
                if !devices.iter().any(|d| d.id == desc.id) {
                    devices.push(Device::from_descriptor(desc.clone()));
                    outcome.added.push(desc.id.clone());
                }
            }
            devices.retain(|d| {
                let keep = snapshot.iter().any(|desc| desc.id == d.id);
                if !keep {
                    outcome.removed.push(d.id.clone());
                }
                keep
            });
        }

        for id in &outcome.added {
            let payload = json!(HubSubscribe { uuid: id.clone() });
            self.send_request(names::REQUEST_SUBSCRIBE_DEVICE, payload)
                .await;
        }
        for id in &outcome.removed {
            let payload = json!(HubSubscribe { uuid: id.clone() });
            self.send_request(names::REQUEST_UNSUBSCRIBE_DEVICE, payload)
                .await;
        }
        outcome
    }

    /// Record a resource value in the mirror. Returns false when the device
    /// or resource is not mirrored; stale updates are dropped silently.
    pub fn apply_value_update(&self, device_id: &str, href: &str, value: &Value) -> bool {
        let mut devices = self.devices.lock().unwrap_or_else(|e| e.into_inner());
        let Some(device) = devices.iter_mut().find(|d| d.id == device_id) else {
            return false;
        };
        let Some(variable) = device.variable_mut(href) else {
            return false;
        };
        variable.value = value.to_string();
        true
    }

    pub fn device_views(&self, hub_uuid: &str) -> Vec<DeviceView> {
        let devices = self.devices.lock().unwrap_or_else(|e| e.into_inner());
        devices.iter().map(|d| d.view(hub_uuid)).collect()
    }

    pub fn device_view(&self, device_id: &str, hub_uuid: &str) -> Option<DeviceView> {
        let devices = self.devices.lock().unwrap_or_else(|e| e.into_inner());
        devices
            .iter()
            .find(|d| d.id == device_id)
            .map(|d| d.view(hub_uuid))
    }

    pub fn has_device(&self, device_id: &str) -> bool {
        let devices = self.devices.lock().unwrap_or_else(|e| e.into_inner());
        devices.iter().any(|d| d.id == device_id)
    }

    pub fn find_variable(&self, device_id: &str, href: &str) -> Option<Variable> {
        let devices = self.devices.lock().unwrap_or_else(|e| e.into_inner());
        devices
            .iter()
            .find(|d| d.id == device_id)
            .and_then(|d| d.variable(href))
            .cloned()
    }
}
