//! Voice-assistant skill adapter.
//!
//! One POST endpoint speaking the connected-home skill contract: a
//! discovery request returns the caller's devices as appliances, control
//! requests are translated into dispatcher intents. Appliance ids pack the
//! routing target (`hub:device[:resource]`) so control requests need no
//! server-side lookup state.

use axum::{Json, extract::State};
use serde_json::{Value, json};
use tracing::{debug, info};
use uuid::Uuid;

use crate::api::{ApiError, AppState};
use crate::auth::{self, SessionClass};
use crate::dispatch::{DIMMING_RESOURCE_TYPE, MASTER_RESOURCE};

const NAMESPACE_DISCOVERY: &str = "Alexa.ConnectedHome.Discovery";
const NAMESPACE_CONTROL: &str = "Alexa.ConnectedHome.Control";
const PAYLOAD_VERSION: &str = "2";

const DISCOVER_REQUEST: &str = "DiscoverAppliancesRequest";
const DISCOVER_RESPONSE: &str = "DiscoverAppliancesResponse";
const TURN_ON_REQUEST: &str = "TurnOnRequest";
const TURN_OFF_REQUEST: &str = "TurnOffRequest";
const SET_PERCENTAGE_REQUEST: &str = "SetPercentageRequest";
const INCREMENT_PERCENTAGE_REQUEST: &str = "IncrementPercentageRequest";
const DECREMENT_PERCENTAGE_REQUEST: &str = "DecrementPercentageRequest";

const MANUFACTURER_NAME: &str = "Wiklosoft";
const MODEL_NAME: &str = "The Best Model";
const APPLIANCE_VERSION: &str = "0.1";

/// Routing target packed into an appliance id.
///
/// Wire form is `hubUuid:deviceId` for whole-device (on/off) appliances
/// and `hubUuid:deviceId:resource` for per-resource ones, with `/` mapped
/// to `_` inside the resource segment since the skill treats appliance ids
/// as opaque tokens that must not contain slashes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplianceId {
    pub hub_uuid: String,
    pub device_id: String,
    /// Empty for whole-device appliances.
    pub resource: String,
}

impl ApplianceId {
    pub fn new(hub_uuid: &str, device_id: &str, resource: &str) -> Self {
        Self {
            hub_uuid: hub_uuid.to_string(),
            device_id: device_id.to_string(),
            resource: resource.to_string(),
        }
    }

    pub fn encode(&self) -> String {
        if self.resource.is_empty() {
            format!("{}:{}", self.hub_uuid, self.device_id)
        } else {
            format!(
                "{}:{}:{}",
                self.hub_uuid,
                self.device_id,
                self.resource.replace('/', "_")
            )
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        let mut parts = raw.splitn(3, ':');
        let hub_uuid = parts.next()?;
        let device_id = parts.next()?;
        let resource = parts.next().unwrap_or("");
        if hub_uuid.is_empty() || device_id.is_empty() {
            return None;
        }
        Some(Self {
            hub_uuid: hub_uuid.to_string(),
            device_id: device_id.to_string(),
            resource: resource.replace('_', "/"),
        })
    }
}

/// POST / — single entry point for the skill.
pub async fn assistant_handler(
    State(state): State<AppState>,
    Json(request): Json<Value>,
) -> Result<Json<Value>, ApiError> {
    let header = &request["header"];
    let name = header["name"].as_str().unwrap_or_default().to_string();
    let namespace = header["namespace"].as_str().unwrap_or_default();
    let payload = &request["payload"];

    let token = payload["accessToken"].as_str().unwrap_or_default();
    let username = auth::authorize(state.auth.as_ref(), token, SessionClass::Assistant).await?;

    debug!(namespace, name = %name, username = %username, "assistant request");
    match namespace {
        NAMESPACE_DISCOVERY if name == DISCOVER_REQUEST => {
            Ok(Json(discover(&state, &username)))
        }
        NAMESPACE_CONTROL => control(&state, &name, payload).await.map(Json),
        _ => Err(ApiError::bad_request(format!(
            "unsupported request {namespace}/{name}"
        ))),
    }
}

fn response_header(namespace: &str, name: &str) -> Value {
    json!({
        "namespace": namespace,
        "name": name,
        "payloadVersion": PAYLOAD_VERSION,
        "messageId": Uuid::new_v4().to_string(),
    })
}

/// Build the appliance list for `username` from the mirrored device trees.
///
/// Each switchable device yields one on/off appliance for its master
/// resource, and one percentage appliance per dimming resource.
fn discover(state: &AppState, username: &str) -> Value {
    let mut appliances = Vec::new();
    for hub in state.registry.hubs_for_user(username) {
        let Some(info) = hub.info() else { continue };
        for device in hub.device_views(&info.uuid) {
            // Whole-device on/off appliance for anything with a master
            // resource; the id carries no resource segment.
            if device.variables.iter().any(|v| v.href == MASTER_RESOURCE) {
                let id = ApplianceId::new(&info.uuid, &device.id, "");
                appliances.push(json!({
                    "applianceId": id.encode(),
                    "manufacturerName": MANUFACTURER_NAME,
                    "modelName": MODEL_NAME,
                    "version": APPLIANCE_VERSION,
                    "friendlyName": device.name,
                    "friendlyDescription": "OCF Device by Wiklosoft",
                    "isReachable": true,
                    "actions": ["turnOn", "turnOff"],
                    "additionalApplianceDetails": {},
                }));
            }
            for variable in &device.variables {
                if variable.resource_type != DIMMING_RESOURCE_TYPE {
                    continue;
                }
                let id = ApplianceId::new(&info.uuid, &device.id, &variable.href);
                appliances.push(json!({
                    "applianceId": id.encode(),
                    "manufacturerName": MANUFACTURER_NAME,
                    "modelName": MODEL_NAME,
                    "version": APPLIANCE_VERSION,
                    "friendlyName": variable.name,
                    "friendlyDescription": "OCF Resource by Wiklosoft",
                    "isReachable": true,
                    "actions": ["setPercentage", "incrementPercentage", "decrementPercentage"],
                    "additionalApplianceDetails": {},
                }));
            }
        }
    }
    info!(username, count = appliances.len(), "assistant discovery");
    json!({
        "header": response_header(NAMESPACE_DISCOVERY, DISCOVER_RESPONSE),
        "payload": {"discoveredAppliances": appliances},
    })
}

async fn control(state: &AppState, name: &str, payload: &Value) -> Result<Value, ApiError> {
    let raw_id = payload["appliance"]["applianceId"]
        .as_str()
        .unwrap_or_default();
    let target = ApplianceId::parse(raw_id)
        .ok_or_else(|| ApiError::bad_request(format!("malformed appliance id {raw_id:?}")))?;

    let confirmation = match name {
        TURN_ON_REQUEST | TURN_OFF_REQUEST => {
            let on = name == TURN_ON_REQUEST;
            state
                .dispatcher
                .turn_on_off(&target.hub_uuid, &target.device_id, on)
                .await?;
            if on { "TurnOnConfirmation" } else { "TurnOffConfirmation" }
        }
        SET_PERCENTAGE_REQUEST => {
            let percent = payload["percentageState"]["value"].as_i64().unwrap_or(0);
            state
                .dispatcher
                .set_percentage(&target.hub_uuid, &target.device_id, &target.resource, percent)
                .await?;
            "SetPercentageConfirmation"
        }
        INCREMENT_PERCENTAGE_REQUEST | DECREMENT_PERCENTAGE_REQUEST => {
            let mut delta = payload["deltaPercentage"]["value"].as_i64().unwrap_or(0);
            if name == DECREMENT_PERCENTAGE_REQUEST {
                delta = -delta;
            }
            state
                .dispatcher
                .adjust_percentage(&target.hub_uuid, &target.device_id, &target.resource, delta)
                .await?;
            if name == INCREMENT_PERCENTAGE_REQUEST {
                "IncrementPercentageConfirmation"
            } else {
                "DecrementPercentageConfirmation"
            }
        }
        other => {
            return Err(ApiError::bad_request(format!(
                "unsupported control request {other}"
            )));
        }
    };

    Ok(json!({
        "header": response_header(NAMESPACE_CONTROL, confirmation),
        "payload": {},
    }))
}
