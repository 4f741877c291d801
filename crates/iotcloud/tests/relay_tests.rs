//! Relay integration tests.

use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    Router,
    body::Body,
    http::{Method, Request, StatusCode, header},
};
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tower::ServiceExt;

use iotcloud::api::{AppState, create_router};
use iotcloud::auth::{AuthError, SessionClass, TokenIntrospector, UserInfo};
use iotcloud::session::HubInfo;
use iotcloud_protocol::Envelope;
use iotcloud_protocol::messages::DeviceSnapshot;

/// Introspector that accepts exactly one token and maps it to one user.
struct SingleToken {
    token: &'static str,
    username: &'static str,
}

#[async_trait]
impl TokenIntrospector for SingleToken {
    async fn introspect(
        &self,
        token: &str,
        _class: SessionClass,
    ) -> Result<UserInfo, AuthError> {
        Ok(UserInfo {
            active: token == self.token,
            username: self.username.to_string(),
        })
    }
}

fn test_state() -> AppState {
    AppState::new(Arc::new(SingleToken {
        token: "good-token",
        username: "alice",
    }))
}

fn test_app(state: &AppState) -> Router {
    create_router(state.clone())
}

/// Register an authorized hub with one switchable, dimmable lamp. Returns
/// the receiving end of its outbound frame channel.
async fn seed_hub(state: &AppState, hub_uuid: &str) -> mpsc::Receiver<String> {
    let (tx, mut rx) = mpsc::channel(32);
    let hub = state.registry.register_hub(tx);
    hub.authorize(HubInfo {
        username: "alice".to_string(),
        uuid: hub_uuid.to_string(),
        name: "Home".to_string(),
    });
    let snapshot: DeviceSnapshot = serde_json::from_value(json!({
        "devices": [{
            "id": "lamp-1",
            "name": "Living Room Lamp",
            "variables": [
                {"href": "/master", "n": "Power", "if": "oic.if.a",
                 "rt": "oic.r.switch.binary", "values": {"value": false}},
                {"href": "/dimming", "n": "Lamp Brightness", "if": "oic.if.a",
                 "rt": "oic.r.light.dimming",
                 "values": {"dimmingSetting": 40, "range": "0,255"}}
            ]
        }]
    }))
    .unwrap();
    hub.synchronize(snapshot.devices).await;
    // Discard the subscribe frames from the initial sync.
    while rx.try_recv().is_ok() {}
    rx
}

async fn post_assistant(app: Router, body: Value) -> (StatusCode, Value) {
    let response = app
        .oneshot(
            Request::builder()
                .uri("/")
                .method(Method::POST)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, json)
}

fn assistant_request(namespace: &str, name: &str, extra: Value) -> Value {
    let mut payload = json!({"accessToken": "good-token"});
    if let (Some(obj), Some(extra)) = (payload.as_object_mut(), extra.as_object()) {
        for (k, v) in extra {
            obj.insert(k.clone(), v.clone());
        }
    }
    json!({
        "header": {
            "namespace": namespace,
            "name": name,
            "payloadVersion": "2",
            "messageId": "test-message"
        },
        "payload": payload
    })
}

#[tokio::test]
async fn health_endpoint_reports_ok() {
    let state = test_state();
    let response = test_app(&state)
        .oneshot(
            Request::builder()
                .uri("/health")
                .method(Method::GET)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["status"], "ok");
    assert!(json["version"].is_string());
}

#[tokio::test]
async fn discovery_lists_appliances_for_the_token_owner() {
    let state = test_state();
    let _hub_rx = seed_hub(&state, "hub-1").await;

    let (status, body) = post_assistant(
        test_app(&state),
        assistant_request("Alexa.ConnectedHome.Discovery", "DiscoverAppliancesRequest", json!({})),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["header"]["name"], "DiscoverAppliancesResponse");
    assert_eq!(body["header"]["payloadVersion"], "2");

    let appliances = body["payload"]["discoveredAppliances"].as_array().unwrap();
    // One on/off appliance for the master resource, one percentage appliance
    // for the dimming resource.
    assert_eq!(appliances.len(), 2);

    // The on/off appliance addresses the whole device, so its id has no
    // resource segment.
    let switch = appliances
        .iter()
        .find(|a| a["applianceId"] == "hub-1:lamp-1")
        .unwrap();
    assert_eq!(switch["friendlyName"], "Living Room Lamp");
    assert_eq!(switch["friendlyDescription"], "OCF Device by Wiklosoft");
    assert_eq!(switch["manufacturerName"], "Wiklosoft");
    assert_eq!(switch["version"], "0.1");
    assert!(switch["actions"].as_array().unwrap().contains(&json!("turnOn")));

    let dimmer = appliances
        .iter()
        .find(|a| a["applianceId"] == "hub-1:lamp-1:_dimming")
        .unwrap();
    assert_eq!(dimmer["friendlyName"], "Lamp Brightness");
    assert_eq!(dimmer["friendlyDescription"], "OCF Resource by Wiklosoft");
    assert_eq!(dimmer["version"], "0.1");
    assert!(
        dimmer["actions"]
            .as_array()
            .unwrap()
            .contains(&json!("setPercentage"))
    );
}

#[tokio::test]
async fn bad_token_is_unauthorized() {
    let state = test_state();
    let mut request = assistant_request(
        "Alexa.ConnectedHome.Discovery",
        "DiscoverAppliancesRequest",
        json!({}),
    );
    request["payload"]["accessToken"] = json!("wrong");

    let (status, _) = post_assistant(test_app(&state), request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn turn_on_reaches_the_hub_connection() {
    let state = test_state();
    let mut hub_rx = seed_hub(&state, "hub-1").await;

    let (status, body) = post_assistant(
        test_app(&state),
        assistant_request(
            "Alexa.ConnectedHome.Control",
            "TurnOnRequest",
            json!({"appliance": {"applianceId": "hub-1:lamp-1"}}),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["header"]["name"], "TurnOnConfirmation");

    let frame = hub_rx.try_recv().unwrap();
    let envelope = Envelope::decode(&frame).unwrap();
    assert_eq!(envelope.name.as_deref(), Some("RequestSetValue"));
    assert_eq!(envelope.payload["di"], "lamp-1");
    assert_eq!(envelope.payload["resource"], "/master");
    assert_eq!(envelope.payload["value"]["value"], true);
}

#[tokio::test]
async fn set_percentage_scales_into_the_device_range() {
    let state = test_state();
    let mut hub_rx = seed_hub(&state, "hub-1").await;

    let (status, body) = post_assistant(
        test_app(&state),
        assistant_request(
            "Alexa.ConnectedHome.Control",
            "SetPercentageRequest",
            json!({
                "appliance": {"applianceId": "hub-1:lamp-1:_dimming"},
                "percentageState": {"value": 50}
            }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["header"]["name"], "SetPercentageConfirmation");

    let envelope = Envelope::decode(&hub_rx.try_recv().unwrap()).unwrap();
    assert_eq!(envelope.payload["resource"], "/dimming");
    assert_eq!(envelope.payload["value"]["dimmingSetting"], 127);
}

#[tokio::test]
async fn decrement_clamps_at_zero() {
    let state = test_state();
    let mut hub_rx = seed_hub(&state, "hub-1").await;

    let (status, body) = post_assistant(
        test_app(&state),
        assistant_request(
            "Alexa.ConnectedHome.Control",
            "DecrementPercentageRequest",
            json!({
                "appliance": {"applianceId": "hub-1:lamp-1:_dimming"},
                "deltaPercentage": {"value": 80}
            }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["header"]["name"], "DecrementPercentageConfirmation");

    // Mirrored setting is 40; 80% of 255 below that clamps to 0.
    let envelope = Envelope::decode(&hub_rx.try_recv().unwrap()).unwrap();
    assert_eq!(envelope.payload["value"]["dimmingSetting"], 0);
}

#[tokio::test]
async fn malformed_appliance_id_is_a_bad_request() {
    let state = test_state();
    let _hub_rx = seed_hub(&state, "hub-1").await;

    let (status, body) = post_assistant(
        test_app(&state),
        assistant_request(
            "Alexa.ConnectedHome.Control",
            "TurnOnRequest",
            json!({"appliance": {"applianceId": "not-an-appliance"}}),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "BAD_REQUEST");
}

#[tokio::test]
async fn control_on_a_vanished_hub_is_a_server_error() {
    let state = test_state();

    let (status, _) = post_assistant(
        test_app(&state),
        assistant_request(
            "Alexa.ConnectedHome.Control",
            "TurnOnRequest",
            json!({"appliance": {"applianceId": "gone-hub:lamp-1"}}),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
}
