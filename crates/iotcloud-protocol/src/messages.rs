//! Payload types for hub-protocol and client-protocol envelopes.
//!
//! Field names follow the wire contract, not Rust conventions: device
//! variables use the OCF short keys (`n`, `if`, `rt`, `href`) and client
//! payloads use camelCase (`hubUuid`).

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ============================================================================
// Hub protocol (hub -> relay)
// ============================================================================

/// Payload of `RequestAuthorize` from a hub or client.
///
/// `uuid` and `name` identify the hub itself and are only present on hub
/// sessions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorizePayload {
    #[serde(default)]
    pub token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// One variable descriptor inside a device snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariableDescriptor {
    pub href: String,
    #[serde(rename = "n", default)]
    pub name: String,
    #[serde(rename = "if", default)]
    pub interface: String,
    #[serde(rename = "rt", default)]
    pub resource_type: String,
    /// Initial value object; mirrored as its JSON text.
    #[serde(default)]
    pub values: Value,
}

/// One device descriptor inside a device snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub variables: Vec<VariableDescriptor>,
}

/// Payload of `EventDeviceListUpdate` from a hub (and of the response to
/// `RequestGetDevices`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceSnapshot {
    #[serde(default)]
    pub devices: Vec<DeviceDescriptor>,
}

/// Payload of `EventValueUpdate` from a hub.
///
/// Hub firmware revisions disagree on whether the device-identifying field
/// is `di` or `uuid`; both are accepted and `di` wins when both appear.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValueUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub di: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
    #[serde(default)]
    pub resource: String,
    #[serde(default)]
    pub value: Value,
}

impl ValueUpdate {
    /// The device id, regardless of which key the hub used.
    pub fn device_id(&self) -> Option<&str> {
        self.di.as_deref().or(self.uuid.as_deref())
    }
}

/// Payload of `RequestSetValue` sent to a hub.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetValue {
    pub di: String,
    pub resource: String,
    pub value: Value,
}

/// Payload of `RequestSubscribeDevice`/`RequestUnsubscribeDevice` sent to a
/// hub.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubSubscribe {
    pub uuid: String,
}

// ============================================================================
// Client protocol (client <-> relay)
// ============================================================================

/// Payload of `RequestSubscribeDevice`/`RequestUnsubscribeDevice` from a
/// client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientSubscribe {
    #[serde(default)]
    pub uuid: String,
    #[serde(rename = "hubUuid", default)]
    pub hub_uuid: String,
}

/// Payload of `ResponseAuthorize` to a client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorizeStatus {
    pub status: String,
}

impl AuthorizeStatus {
    pub fn ok() -> Self {
        Self {
            status: "ok".to_string(),
        }
    }

    pub fn error() -> Self {
        Self {
            status: "error".to_string(),
        }
    }
}

/// One variable as serialized to clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariableView {
    pub href: String,
    #[serde(rename = "n")]
    pub name: String,
    #[serde(rename = "if")]
    pub interface: String,
    #[serde(rename = "rt")]
    pub resource_type: String,
    /// JSON-encoded value text, exactly as mirrored.
    pub value: String,
}

/// One device as serialized to clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceView {
    pub id: String,
    pub name: String,
    #[serde(rename = "hubUuid")]
    pub hub_uuid: String,
    pub variables: Vec<VariableView>,
}

/// One hub together with its devices, as serialized to clients in
/// `ResponseGetDevices` and `EventDeviceListUpdate`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubDevices {
    pub uuid: String,
    pub name: String,
    pub devices: Vec<DeviceView>,
}

/// Payload of `ResponseGetDevices` and the client-bound
/// `EventDeviceListUpdate`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HubList {
    pub hubs: Vec<HubDevices>,
}

/// Payload of the client-bound `EventValueUpdate`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientValueUpdate {
    pub uuid: String,
    #[serde(rename = "hubUuid")]
    pub hub_uuid: String,
    pub resource: String,
    pub value: Value,
}
