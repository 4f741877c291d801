//! Control intent dispatch.
//!
//! Turns high-level intents (turn on, set brightness to 40%) into
//! `RequestSetValue` frames on the owning hub connection. Percentages are
//! scaled into the device's native dimming range.

use std::sync::Arc;

use iotcloud_protocol::messages::SetValue;
use iotcloud_protocol::names;
use serde_json::json;
use thiserror::Error;
use tracing::{debug, warn};

use crate::session::{HubSession, SessionRegistry};

pub const DIMMING_RESOURCE_TYPE: &str = "oic.r.light.dimming";
pub const MASTER_RESOURCE: &str = "/master";

/// Default dimming maximum when the device reports no usable range.
const DEFAULT_DIMMING_MAX: i64 = 100;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("no connected hub with uuid {0}")]
    HubNotFound(String),
    #[error("hub {hub_uuid} has no device {device_id}")]
    DeviceNotFound { hub_uuid: String, device_id: String },
    #[error("device {device_id} has no resource {resource}")]
    ResourceNotFound { device_id: String, resource: String },
}

/// Routes control intents to hub sessions.
#[derive(Clone)]
pub struct ControlDispatcher {
    registry: Arc<SessionRegistry>,
}

impl ControlDispatcher {
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self { registry }
    }

    fn resolve_hub(&self, hub_uuid: &str) -> Result<Arc<HubSession>, DispatchError> {
        self.registry
            .hub_by_uuid(hub_uuid)
            .ok_or_else(|| DispatchError::HubNotFound(hub_uuid.to_string()))
    }

    /// Switch a device's master resource.
    pub async fn turn_on_off(
        &self,
        hub_uuid: &str,
        device_id: &str,
        on: bool,
    ) -> Result<(), DispatchError> {
        let hub = self.resolve_hub(hub_uuid)?;
        if !hub.has_device(device_id) {
            return Err(DispatchError::DeviceNotFound {
                hub_uuid: hub_uuid.to_string(),
                device_id: device_id.to_string(),
            });
        }
        let payload = json!(SetValue {
            di: device_id.to_string(),
            resource: MASTER_RESOURCE.to_string(),
            value: json!({"value": on}),
        });
        hub.send_request(names::REQUEST_SET_VALUE, payload).await;
        Ok(())
    }

    /// Set a dimming resource to `percent` of its native range.
    ///
    /// Targeting a resource that is not a dimming resource is a no-op, not
    /// an error; assistants retry hard on 5xx and the device state would not
    /// change either way.
    pub async fn set_percentage(
        &self,
        hub_uuid: &str,
        device_id: &str,
        resource: &str,
        percent: i64,
    ) -> Result<(), DispatchError> {
        let hub = self.resolve_hub(hub_uuid)?;
        let variable = self.dimming_variable(&hub, hub_uuid, device_id, resource)?;
        let Some(variable) = variable else {
            return Ok(());
        };

        let max = dimming_max(&variable.value);
        // Assistants send whatever the user said; bound the input before
        // any arithmetic so extreme values cannot overflow the scaling.
        let scaled = percent.clamp(0, 100).saturating_mul(max) / 100;
        let payload = json!(SetValue {
            di: device_id.to_string(),
            resource: resource.to_string(),
            value: json!({"dimmingSetting": scaled}),
        });
        hub.send_request(names::REQUEST_SET_VALUE, payload).await;
        Ok(())
    }

    /// Shift a dimming resource by `delta` percent of its native range,
    /// relative to the last mirrored value, clamped to `[0, max]`.
    pub async fn adjust_percentage(
        &self,
        hub_uuid: &str,
        device_id: &str,
        resource: &str,
        delta: i64,
    ) -> Result<(), DispatchError> {
        let hub = self.resolve_hub(hub_uuid)?;
        let variable = self.dimming_variable(&hub, hub_uuid, device_id, resource)?;
        let Some(variable) = variable else {
            return Ok(());
        };

        let max = dimming_max(&variable.value);
        let previous = serde_json::from_str::<serde_json::Value>(&variable.value)
            .ok()
            .and_then(|v| v.get("dimmingSetting").and_then(|n| n.as_i64()))
            .unwrap_or(0);
        // Both delta and the mirrored previous value are external input;
        // bound and saturate so the arithmetic cannot overflow.
        let step = delta.clamp(-100, 100).saturating_mul(max) / 100;
        let target = previous.saturating_add(step).clamp(0, max);
        let payload = json!(SetValue {
            di: device_id.to_string(),
            resource: resource.to_string(),
            value: json!({"dimmingSetting": target}),
        });
        hub.send_request(names::REQUEST_SET_VALUE, payload).await;
        Ok(())
    }

    /// Resolve the target variable, returning `Ok(None)` when it exists but
    /// is not a dimming resource.
    fn dimming_variable(
        &self,
        hub: &HubSession,
        hub_uuid: &str,
        device_id: &str,
        resource: &str,
    ) -> Result<Option<crate::device::Variable>, DispatchError> {
        if !hub.has_device(device_id) {
            return Err(DispatchError::DeviceNotFound {
                hub_uuid: hub_uuid.to_string(),
                device_id: device_id.to_string(),
            });
        }
        let Some(variable) = hub.find_variable(device_id, resource) else {
            return Err(DispatchError::ResourceNotFound {
                device_id: device_id.to_string(),
                resource: resource.to_string(),
            });
        };
        if variable.resource_type != DIMMING_RESOURCE_TYPE {
            debug!(
                device_id,
                resource,
                resource_type = %variable.resource_type,
                "dimming intent on non-dimming resource ignored"
            );
            return Ok(None);
        }
        Ok(Some(variable))
    }
}

/// Parse the upper bound out of a mirrored value's `"range": "min,max"`
/// field. Anything unusable falls back to a 0..=100 range.
fn dimming_max(value_text: &str) -> i64 {
    let parsed: Option<i64> = serde_json::from_str::<serde_json::Value>(value_text)
        .ok()
        .and_then(|v| v.get("range").and_then(|r| r.as_str().map(str::to_string)))
        .and_then(|range| {
            let (_, max) = range.split_once(',')?;
            max.trim().parse().ok()
        });
    match parsed {
        Some(max) if max > 0 => max,
        _ => {
            warn!(value = value_text, "no usable dimming range, assuming 0..=100");
            DEFAULT_DIMMING_MAX
        }
    }
}
