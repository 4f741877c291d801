//! Fan-out of hub state changes to client sessions.

use std::sync::Arc;

use iotcloud_protocol::messages::{ClientValueUpdate, HubDevices, HubList};
use iotcloud_protocol::{Envelope, names};
use serde_json::Value;
use tracing::debug;

use crate::session::{ClientSession, SessionRegistry};

/// Pushes device-list and value changes to the clients that should see them.
///
/// Device-list changes go to every authorized client, each scoped to its own
/// username. Value changes only go to clients subscribed to the exact
/// `(hub, device)` pair.
#[derive(Clone)]
pub struct NotificationRouter {
    registry: Arc<SessionRegistry>,
}

impl NotificationRouter {
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self { registry }
    }

    /// The hub list visible to `username`: every authorized hub owned by the
    /// user, with its mirrored devices.
    pub fn build_hub_list(&self, username: &str) -> HubList {
        let hubs = self
            .registry
            .hubs_for_user(username)
            .into_iter()
            .filter_map(|hub| {
                hub.info().map(|info| HubDevices {
                    devices: hub.device_views(&info.uuid),
                    uuid: info.uuid,
                    name: info.name,
                })
            })
            .collect();
        HubList { hubs }
    }

    /// Tell every authorized client that the set of hubs or devices changed.
    /// Each client gets a list scoped to its own username. Delivery is
    /// non-blocking so one stalled client cannot hold up the caller.
    pub fn notify_device_list_change(&self) {
        for client in self.registry.clients() {
            let Some(username) = client.username() else {
                continue;
            };
            let list = self.build_hub_list(&username);
            let payload = serde_json::to_value(&list).unwrap_or_default();
            client.try_send(Envelope::event(names::EVENT_DEVICE_LIST_UPDATE, payload));
        }
    }

    /// Push one resource change to every subscribed client.
    pub fn notify_resource_change(
        &self,
        hub_uuid: &str,
        device_id: &str,
        resource: &str,
        value: &Value,
    ) {
        let update = ClientValueUpdate {
            uuid: device_id.to_string(),
            hub_uuid: hub_uuid.to_string(),
            resource: resource.to_string(),
            value: value.clone(),
        };
        let payload = serde_json::to_value(&update).unwrap_or_default();
        let mut delivered = 0usize;
        for client in self.registry.clients() {
            if !client.is_subscribed(hub_uuid, device_id) {
                continue;
            }
            client.try_send(Envelope::event(names::EVENT_VALUE_UPDATE, payload.clone()));
            delivered += 1;
        }
        debug!(hub_uuid, device_id, resource, delivered, "resource change fanned out");
    }

    /// Send one client the current state of a device it just subscribed to.
    pub fn send_device_update(&self, client: &ClientSession, hub_uuid: &str, device_id: &str) {
        let Some(hub) = self.registry.hub_by_uuid(hub_uuid) else {
            return;
        };
        let Some(view) = hub.device_view(device_id, hub_uuid) else {
            return;
        };
        let payload = serde_json::to_value(&view).unwrap_or_default();
        client.try_send(Envelope::event(names::EVENT_DEVICE_UPDATE, payload));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::HubInfo;
    use iotcloud_protocol::messages::DeviceSnapshot;
    use serde_json::json;
    use tokio::sync::mpsc;

    async fn hub_with_device(
        registry: &SessionRegistry,
        username: &str,
        hub_uuid: &str,
        device_id: &str,
    ) {
        let (tx, _rx) = mpsc::channel(16);
        let hub = registry.register_hub(tx);
        hub.authorize(HubInfo {
            username: username.to_string(),
            uuid: hub_uuid.to_string(),
            name: format!("hub {hub_uuid}"),
        });
        let snapshot: DeviceSnapshot = serde_json::from_value(json!({
            "devices": [{
                "id": device_id,
                "name": "Lamp",
                "variables": [
                    {"href": "/master", "n": "Power", "if": "oic.if.a",
                     "rt": "oic.r.switch.binary", "values": {"value": false}}
                ]
            }]
        }))
        .unwrap();
        hub.synchronize(snapshot.devices).await;
    }

    fn recv_event(rx: &mut mpsc::Receiver<String>) -> Option<Envelope> {
        rx.try_recv().ok().map(|f| Envelope::decode(&f).unwrap())
    }

    #[tokio::test]
    async fn device_lists_are_scoped_per_username() {
        let registry = Arc::new(SessionRegistry::new());
        hub_with_device(&registry, "alice", "h-alice", "d1").await;
        hub_with_device(&registry, "bob", "h-bob", "d2").await;

        let (alice_tx, mut alice_rx) = mpsc::channel(4);
        let alice = registry.register_client(alice_tx);
        alice.authorize("alice".to_string());

        let (bob_tx, mut bob_rx) = mpsc::channel(4);
        let bob = registry.register_client(bob_tx);
        bob.authorize("bob".to_string());

        let router = NotificationRouter::new(registry);
        router.notify_device_list_change();

        let alice_event = recv_event(&mut alice_rx).unwrap();
        assert_eq!(alice_event.name.as_deref(), Some("EventDeviceListUpdate"));
        assert_eq!(alice_event.payload["hubs"][0]["uuid"], "h-alice");
        assert_eq!(alice_event.payload["hubs"].as_array().unwrap().len(), 1);

        let bob_event = recv_event(&mut bob_rx).unwrap();
        assert_eq!(bob_event.payload["hubs"][0]["uuid"], "h-bob");
    }

    #[tokio::test]
    async fn unauthenticated_clients_get_no_list() {
        let registry = Arc::new(SessionRegistry::new());
        let (tx, mut rx) = mpsc::channel(4);
        registry.register_client(tx);

        let router = NotificationRouter::new(registry);
        router.notify_device_list_change();
        assert!(recv_event(&mut rx).is_none());
    }

    #[tokio::test]
    async fn value_updates_reach_only_exact_subscribers() {
        let registry = Arc::new(SessionRegistry::new());
        hub_with_device(&registry, "alice", "h1", "d1").await;

        let (sub_tx, mut sub_rx) = mpsc::channel(4);
        let subscriber = registry.register_client(sub_tx);
        subscriber.authorize("alice".to_string());
        subscriber.subscribe("h1", "d1");

        let (other_tx, mut other_rx) = mpsc::channel(4);
        let other = registry.register_client(other_tx);
        other.authorize("alice".to_string());
        other.subscribe("h1", "d9");

        let router = NotificationRouter::new(registry);
        router.notify_resource_change("h1", "d1", "/master", &json!({"value": true}));

        let event = recv_event(&mut sub_rx).unwrap();
        assert_eq!(event.name.as_deref(), Some("EventValueUpdate"));
        assert_eq!(event.payload["uuid"], "d1");
        assert_eq!(event.payload["hubUuid"], "h1");
        assert_eq!(event.payload["value"]["value"], true);

        assert!(recv_event(&mut other_rx).is_none());
    }

    #[tokio::test]
    async fn disconnected_clients_get_no_residual_deliveries() {
        let registry = Arc::new(SessionRegistry::new());
        hub_with_device(&registry, "alice", "h1", "d1").await;

        let (tx, mut rx) = mpsc::channel(4);
        let client = registry.register_client(tx);
        client.authorize("alice".to_string());
        client.subscribe("h1", "d1");
        registry.remove_client(client.conn_id);

        let router = NotificationRouter::new(registry);
        router.notify_resource_change("h1", "d1", "/master", &json!({"value": true}));
        router.notify_device_list_change();
        assert!(recv_event(&mut rx).is_none());
    }

    #[tokio::test]
    async fn stalled_subscriber_does_not_block_other_deliveries() {
        let registry = Arc::new(SessionRegistry::new());
        hub_with_device(&registry, "alice", "h1", "d1").await;

        // Capacity-1 channel that is never drained fills on the first event.
        let (slow_tx, _slow_rx) = mpsc::channel(1);
        let slow = registry.register_client(slow_tx);
        slow.authorize("alice".to_string());
        slow.subscribe("h1", "d1");

        let (fast_tx, mut fast_rx) = mpsc::channel(4);
        let fast = registry.register_client(fast_tx);
        fast.authorize("alice".to_string());
        fast.subscribe("h1", "d1");

        let router = NotificationRouter::new(registry);
        for step in 0..3 {
            router.notify_resource_change("h1", "d1", "/master", &json!({"value": step}));
        }

        // All three events reached the healthy client; the stalled one only
        // kept what fit in its buffer and never held up the loop.
        for step in 0..3 {
            let event = recv_event(&mut fast_rx).unwrap();
            assert_eq!(event.payload["value"]["value"], step);
        }
    }

    #[tokio::test]
    async fn device_update_sends_current_state_on_subscribe() {
        let registry = Arc::new(SessionRegistry::new());
        hub_with_device(&registry, "alice", "h1", "d1").await;

        let (tx, mut rx) = mpsc::channel(4);
        let client = registry.register_client(tx);
        client.authorize("alice".to_string());

        let router = NotificationRouter::new(registry.clone());
        router.send_device_update(&client, "h1", "d1");

        let event = recv_event(&mut rx).unwrap();
        assert_eq!(event.name.as_deref(), Some("EventDeviceUpdate"));
        assert_eq!(event.payload["id"], "d1");
        assert_eq!(event.payload["hubUuid"], "h1");

        // Unknown target stays silent.
        router.send_device_update(&client, "h1", "ghost");
        assert!(recv_event(&mut rx).is_none());
    }
}
