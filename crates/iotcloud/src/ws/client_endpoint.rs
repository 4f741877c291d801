//! WebSocket endpoint for web client connections.

use std::sync::Arc;

use axum::{
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::Response,
};
use futures::StreamExt;
use iotcloud_protocol::messages::{AuthorizePayload, AuthorizeStatus, ClientSubscribe};
use iotcloud_protocol::{Envelope, names};
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::api::AppState;
use crate::auth::{self, SessionClass};
use crate::session::ClientSession;

use super::{Flow, MAX_MESSAGE_SIZE, OUTBOUND_BUFFER, run_writer};

/// WebSocket upgrade handler for web clients.
///
/// GET /connectClient
pub async fn client_ws_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.max_message_size(MAX_MESSAGE_SIZE)
        .on_upgrade(move |socket| handle_client_socket(socket, state))
}

async fn handle_client_socket(socket: WebSocket, state: AppState) {
    let (sink, mut stream) = socket.split();
    let (tx, rx) = mpsc::channel(OUTBOUND_BUFFER);
    let client = state.registry.register_client(tx);
    let writer = tokio::spawn(run_writer(sink, rx));

    while let Some(msg) = stream.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                if process_client_message(&state, &client, text.as_str()).await == Flow::Close {
                    break;
                }
            }
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(other) => {
                debug!(conn_id = client.conn_id, ?other, "ignoring non-text frame from client");
            }
        }
    }

    state.registry.remove_client(client.conn_id);
    writer.abort();
}

/// Handle one frame from a client connection.
async fn process_client_message(
    state: &AppState,
    client: &Arc<ClientSession>,
    text: &str,
) -> Flow {
    let envelope = match Envelope::decode(text) {
        Ok(envelope) => envelope,
        Err(err) => {
            warn!(conn_id = client.conn_id, %err, "dropping malformed client frame");
            return Flow::Continue;
        }
    };

    if !client.is_authorized() {
        // The only thing an unauthenticated session may do is authorize.
        return match envelope.name.as_deref() {
            Some(names::REQUEST_AUTHORIZE) => handle_authorize(state, client, &envelope).await,
            other => {
                debug!(conn_id = client.conn_id, name = ?other, "message before authorization dropped");
                Flow::Continue
            }
        };
    }

    match envelope.name.as_deref() {
        // A second authorize on a live session is a client bug; keep the
        // current identity.
        Some(names::REQUEST_AUTHORIZE) => {
            debug!(conn_id = client.conn_id, "repeated authorize ignored");
            Flow::Continue
        }
        Some(names::REQUEST_GET_DEVICES) => handle_get_devices(state, client, &envelope).await,
        Some(names::REQUEST_SUBSCRIBE_DEVICE) => {
            handle_subscribe(state, client, &envelope).await
        }
        Some(names::REQUEST_UNSUBSCRIBE_DEVICE) => handle_unsubscribe(client, &envelope),
        other => {
            debug!(conn_id = client.conn_id, name = ?other, "ignoring unknown client message");
            Flow::Continue
        }
    }
}

async fn handle_authorize(
    state: &AppState,
    client: &Arc<ClientSession>,
    envelope: &Envelope,
) -> Flow {
    let payload: AuthorizePayload =
        serde_json::from_value(envelope.payload.clone()).unwrap_or_else(|_| AuthorizePayload {
            token: String::new(),
            uuid: None,
            name: None,
        });

    match auth::authorize(state.auth.as_ref(), &payload.token, SessionClass::Web).await {
        Ok(username) => {
            info!(conn_id = client.conn_id, "client authorized");
            client.authorize(username);
            client
                .send(Envelope::request(
                    envelope.mid,
                    names::RESPONSE_AUTHORIZE,
                    json!(AuthorizeStatus::ok()),
                ))
                .await;
            Flow::Continue
        }
        Err(err) => {
            info!(conn_id = client.conn_id, %err, "client authorization failed, closing");
            client
                .send(Envelope::request(
                    envelope.mid,
                    names::RESPONSE_AUTHORIZE,
                    json!(AuthorizeStatus::error()),
                ))
                .await;
            Flow::Close
        }
    }
}

async fn handle_get_devices(
    state: &AppState,
    client: &Arc<ClientSession>,
    envelope: &Envelope,
) -> Flow {
    let Some(username) = client.username() else {
        return Flow::Continue;
    };
    let list = state.notifier.build_hub_list(&username);
    client
        .send(Envelope::request(
            envelope.mid,
            names::RESPONSE_GET_DEVICES,
            serde_json::to_value(&list).unwrap_or_default(),
        ))
        .await;
    Flow::Continue
}

async fn handle_subscribe(
    state: &AppState,
    client: &Arc<ClientSession>,
    envelope: &Envelope,
) -> Flow {
    let sub: ClientSubscribe =
        serde_json::from_value(envelope.payload.clone()).unwrap_or_else(|_| ClientSubscribe {
            uuid: String::new(),
            hub_uuid: String::new(),
        });

    // Cross-user subscriptions are refused when the hub is known. An unknown
    // hub uuid is recorded anyway; it is inert until such a hub appears
    // under this user.
    if let Some(hub) = state.registry.hub_by_uuid(&sub.hub_uuid) {
        let owner = hub.info().map(|info| info.username);
        if owner.as_deref() != client.username().as_deref() {
            warn!(
                conn_id = client.conn_id,
                hub_uuid = %sub.hub_uuid,
                "subscription to another user's hub refused"
            );
            return Flow::Continue;
        }
    }

    if client.subscribe(&sub.hub_uuid, &sub.uuid) {
        debug!(conn_id = client.conn_id, hub_uuid = %sub.hub_uuid, device_id = %sub.uuid, "subscribed");
    }
    // Seed the subscriber with current state so it does not wait for the
    // next change.
    state
        .notifier
        .send_device_update(client, &sub.hub_uuid, &sub.uuid);
    Flow::Continue
}

fn handle_unsubscribe(client: &Arc<ClientSession>, envelope: &Envelope) -> Flow {
    let sub: ClientSubscribe =
        serde_json::from_value(envelope.payload.clone()).unwrap_or_else(|_| ClientSubscribe {
            uuid: String::new(),
            hub_uuid: String::new(),
        });
    client.unsubscribe(&sub.hub_uuid, &sub.uuid);
    Flow::Continue
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{AuthError, TokenIntrospector, UserInfo};
    use crate::session::HubInfo;
    use async_trait::async_trait;
    use iotcloud_protocol::messages::DeviceSnapshot;
    use std::sync::Arc;

    struct StaticAuth {
        username: Option<&'static str>,
    }

    #[async_trait]
    impl TokenIntrospector for StaticAuth {
        async fn introspect(
            &self,
            _token: &str,
            _class: SessionClass,
        ) -> Result<UserInfo, AuthError> {
            Ok(UserInfo {
                active: self.username.is_some(),
                username: self.username.unwrap_or_default().to_string(),
            })
        }
    }

    fn state_with_auth(username: Option<&'static str>) -> AppState {
        AppState::new(Arc::new(StaticAuth { username }))
    }

    fn connected_client(state: &AppState) -> (Arc<ClientSession>, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(16);
        (state.registry.register_client(tx), rx)
    }

    async fn seed_hub(state: &AppState, username: &str, hub_uuid: &str, device_id: &str) {
        let (tx, _rx) = mpsc::channel(16);
        let hub = state.registry.register_hub(tx);
        hub.authorize(HubInfo {
            username: username.to_string(),
            uuid: hub_uuid.to_string(),
            name: "Home".to_string(),
        });
        let snapshot: DeviceSnapshot = serde_json::from_value(json!({
            "devices": [{
                "id": device_id, "name": "Lamp",
                "variables": [{"href": "/master", "n": "Power", "if": "oic.if.a",
                               "rt": "oic.r.switch.binary", "values": {"value": false}}]
            }]
        }))
        .unwrap();
        hub.synchronize(snapshot.devices).await;
    }

    fn recv(rx: &mut mpsc::Receiver<String>) -> Envelope {
        Envelope::decode(&rx.try_recv().unwrap()).unwrap()
    }

    #[tokio::test]
    async fn authorize_round_trip_echoes_the_request_mid() {
        let state = state_with_auth(Some("alice"));
        let (client, mut rx) = connected_client(&state);

        let frame = Envelope::request(5, names::REQUEST_AUTHORIZE, json!({"token": "t"})).encode();
        let flow = process_client_message(&state, &client, &frame).await;
        assert_eq!(flow, Flow::Continue);

        let reply = recv(&mut rx);
        assert_eq!(reply.mid, 5);
        assert_eq!(reply.name.as_deref(), Some("ResponseAuthorize"));
        assert_eq!(reply.payload["status"], "ok");
        assert_eq!(client.username().as_deref(), Some("alice"));
    }

    #[tokio::test]
    async fn rejected_authorize_answers_then_closes() {
        let state = state_with_auth(None);
        let (client, mut rx) = connected_client(&state);

        let frame = Envelope::request(1, names::REQUEST_AUTHORIZE, json!({"token": "bad"})).encode();
        let flow = process_client_message(&state, &client, &frame).await;
        assert_eq!(flow, Flow::Close);

        let reply = recv(&mut rx);
        assert_eq!(reply.payload["status"], "error");
        assert!(!client.is_authorized());
    }

    #[tokio::test]
    async fn requests_before_authorization_are_dropped() {
        let state = state_with_auth(Some("alice"));
        let (client, mut rx) = connected_client(&state);

        let frame = Envelope::request(1, names::REQUEST_GET_DEVICES, json!({})).encode();
        let flow = process_client_message(&state, &client, &frame).await;
        assert_eq!(flow, Flow::Continue);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn get_devices_returns_the_callers_hubs_only() {
        let state = state_with_auth(Some("alice"));
        seed_hub(&state, "alice", "h-alice", "d1").await;
        seed_hub(&state, "bob", "h-bob", "d2").await;

        let (client, mut rx) = connected_client(&state);
        client.authorize("alice".to_string());

        let frame = Envelope::request(9, names::REQUEST_GET_DEVICES, json!({})).encode();
        process_client_message(&state, &client, &frame).await;

        let reply = recv(&mut rx);
        assert_eq!(reply.mid, 9);
        assert_eq!(reply.name.as_deref(), Some("ResponseGetDevices"));
        let hubs = reply.payload["hubs"].as_array().unwrap();
        assert_eq!(hubs.len(), 1);
        assert_eq!(hubs[0]["uuid"], "h-alice");
        assert_eq!(hubs[0]["devices"][0]["id"], "d1");
    }

    #[tokio::test]
    async fn subscribe_seeds_current_device_state() {
        let state = state_with_auth(Some("alice"));
        seed_hub(&state, "alice", "h1", "d1").await;

        let (client, mut rx) = connected_client(&state);
        client.authorize("alice".to_string());

        let frame = Envelope::request(
            2,
            names::REQUEST_SUBSCRIBE_DEVICE,
            json!({"uuid": "d1", "hubUuid": "h1"}),
        )
        .encode();
        process_client_message(&state, &client, &frame).await;

        assert!(client.is_subscribed("h1", "d1"));
        let seed = recv(&mut rx);
        assert_eq!(seed.name.as_deref(), Some("EventDeviceUpdate"));
        assert_eq!(seed.payload["id"], "d1");
    }

    #[tokio::test]
    async fn subscribing_to_another_users_hub_is_refused() {
        let state = state_with_auth(Some("alice"));
        seed_hub(&state, "bob", "h-bob", "d1").await;

        let (client, mut rx) = connected_client(&state);
        client.authorize("alice".to_string());

        let frame = Envelope::request(
            3,
            names::REQUEST_SUBSCRIBE_DEVICE,
            json!({"uuid": "d1", "hubUuid": "h-bob"}),
        )
        .encode();
        process_client_message(&state, &client, &frame).await;

        assert!(!client.is_subscribed("h-bob", "d1"));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn unsubscribe_removes_the_pair() {
        let state = state_with_auth(Some("alice"));
        let (client, _rx) = connected_client(&state);
        client.authorize("alice".to_string());
        client.subscribe("h1", "d1");

        let frame = Envelope::request(
            4,
            names::REQUEST_UNSUBSCRIBE_DEVICE,
            json!({"uuid": "d1", "hubUuid": "h1"}),
        )
        .encode();
        process_client_message(&state, &client, &frame).await;
        assert!(!client.is_subscribed("h1", "d1"));
    }
}
