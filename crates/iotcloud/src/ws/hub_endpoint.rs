//! WebSocket endpoint for hub connections.

use std::sync::Arc;

use axum::{
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::Response,
};
use futures::StreamExt;
use iotcloud_protocol::messages::{AuthorizePayload, DeviceSnapshot, ValueUpdate};
use iotcloud_protocol::{Envelope, names};
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::api::AppState;
use crate::auth::{self, SessionClass};
use crate::session::HubSession;

use super::{Flow, MAX_MESSAGE_SIZE, OUTBOUND_BUFFER, run_writer};

/// WebSocket upgrade handler for hubs.
///
/// GET /connect
pub async fn hub_ws_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.max_message_size(MAX_MESSAGE_SIZE)
        .on_upgrade(move |socket| handle_hub_socket(socket, state))
}

async fn handle_hub_socket(socket: WebSocket, state: AppState) {
    let (sink, mut stream) = socket.split();
    let (tx, rx) = mpsc::channel(OUTBOUND_BUFFER);
    let hub = state.registry.register_hub(tx);
    let writer = tokio::spawn(run_writer(sink, rx));

    while let Some(msg) = stream.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                if process_hub_message(&state, &hub, text.as_str()).await == Flow::Close {
                    break;
                }
            }
            Ok(Message::Close(_)) | Err(_) => break,
            // Pings are answered by axum; binary frames are not part of the
            // protocol.
            Ok(other) => {
                debug!(conn_id = hub.conn_id, ?other, "ignoring non-text frame from hub");
            }
        }
    }

    cleanup_hub_session(&state, &hub);
    writer.abort();
}

/// Tear down a hub connection: drop it from the registry and, if the hub had
/// authorized, tell the owner's clients their hub list shrank.
fn cleanup_hub_session(state: &AppState, hub: &Arc<HubSession>) {
    let was_authorized = hub.is_authorized();
    state.registry.remove_hub(hub.conn_id);
    if was_authorized {
        state.notifier.notify_device_list_change();
    }
}

/// Handle one frame from a hub connection.
async fn process_hub_message(state: &AppState, hub: &Arc<HubSession>, text: &str) -> Flow {
    let envelope = match Envelope::decode(text) {
        Ok(envelope) => envelope,
        Err(err) => {
            warn!(conn_id = hub.conn_id, %err, "dropping malformed hub frame");
            return Flow::Continue;
        }
    };

    // A correlated mid resolves its pending request first; the name is
    // still dispatched afterwards, since hubs put event names on some
    // replies and expect both effects.
    if envelope.is_correlated() {
        hub.correlations.resolve(envelope.mid, &envelope);
    }

    match envelope.name.as_deref() {
        Some(names::REQUEST_AUTHORIZE) => handle_authorize(state, hub, &envelope).await,
        Some(names::EVENT_DEVICE_LIST_UPDATE) => {
            handle_device_list_update(state, hub, &envelope).await
        }
        Some(names::EVENT_VALUE_UPDATE) => handle_value_update(state, hub, &envelope).await,
        other => {
            debug!(conn_id = hub.conn_id, name = ?other, "ignoring unknown hub message");
            Flow::Continue
        }
    }
}

async fn handle_authorize(state: &AppState, hub: &Arc<HubSession>, envelope: &Envelope) -> Flow {
    let payload: AuthorizePayload =
        serde_json::from_value(envelope.payload.clone()).unwrap_or_else(|_| AuthorizePayload {
            token: String::new(),
            uuid: None,
            name: None,
        });

    let username = match auth::authorize(state.auth.as_ref(), &payload.token, SessionClass::Hub)
        .await
    {
        Ok(username) => username,
        Err(err) => {
            info!(conn_id = hub.conn_id, %err, "hub authorization failed, closing");
            return Flow::Close;
        }
    };

    let info = crate::session::HubInfo {
        username,
        uuid: payload.uuid.unwrap_or_default(),
        name: payload.name.unwrap_or_default(),
    };
    info!(conn_id = hub.conn_id, uuid = %info.uuid, name = %info.name, "hub authorized");
    hub.authorize(info);
    state.notifier.notify_device_list_change();

    // Pull the initial device snapshot; the reply lands in the correlation
    // table and is applied out of band.
    let (mid, rx) = hub
        .send_correlated(names::REQUEST_GET_DEVICES, json!({}))
        .await;
    let hub = hub.clone();
    let state = state.clone();
    tokio::spawn(async move {
        let Some(reply) = hub.await_reply(mid, rx).await else {
            return;
        };
        let snapshot: DeviceSnapshot =
            serde_json::from_value(reply.payload).unwrap_or_default();
        let outcome = hub.synchronize(snapshot.devices).await;
        if outcome.changed() {
            state.notifier.notify_device_list_change();
        }
    });
    Flow::Continue
}

async fn handle_device_list_update(
    state: &AppState,
    hub: &Arc<HubSession>,
    envelope: &Envelope,
) -> Flow {
    if !hub.is_authorized() {
        debug!(conn_id = hub.conn_id, "device list from unauthorized hub ignored");
        return Flow::Continue;
    }
    let snapshot: DeviceSnapshot =
        serde_json::from_value(envelope.payload.clone()).unwrap_or_default();
    let outcome = hub.synchronize(snapshot.devices).await;
    if outcome.changed() {
        state.notifier.notify_device_list_change();
    }
    Flow::Continue
}

async fn handle_value_update(
    state: &AppState,
    hub: &Arc<HubSession>,
    envelope: &Envelope,
) -> Flow {
    let Some(info) = hub.info() else {
        debug!(conn_id = hub.conn_id, "value update from unauthorized hub ignored");
        return Flow::Continue;
    };
    let update: ValueUpdate = match serde_json::from_value(envelope.payload.clone()) {
        Ok(update) => update,
        Err(err) => {
            warn!(conn_id = hub.conn_id, %err, "unparseable value update");
            return Flow::Continue;
        }
    };
    let Some(device_id) = update.device_id() else {
        warn!(conn_id = hub.conn_id, "value update without device id");
        return Flow::Continue;
    };

    if hub.apply_value_update(device_id, &update.resource, &update.value) {
        state
            .notifier
            .notify_resource_change(&info.uuid, device_id, &update.resource, &update.value);
    } else {
        // Stale update for a device that left the tree. Nothing to fan out.
        debug!(
            conn_id = hub.conn_id,
            device_id,
            resource = %update.resource,
            "value update for unmirrored target dropped"
        );
    }
    Flow::Continue
}
