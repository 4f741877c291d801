//! Mirrored device model.
//!
//! Devices are owned by exactly one hub session; everything handed to
//! clients or the notification router is a serialized snapshot
//! ([`DeviceView`]), never a live reference.

use iotcloud_protocol::messages::{
    DeviceDescriptor, DeviceView, VariableDescriptor, VariableView,
};

/// An individually addressable resource exposed by a device.
///
/// The value is kept as the JSON text the hub last reported, exactly as
/// received; the relay never interprets it except for dimming arithmetic.
#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    pub href: String,
    pub name: String,
    pub interface: String,
    pub resource_type: String,
    pub value: String,
}

impl Variable {
    pub fn from_descriptor(desc: VariableDescriptor) -> Self {
        let value = if desc.values.is_null() {
            "{}".to_string()
        } else {
            desc.values.to_string()
        };
        Self {
            href: desc.href,
            name: desc.name,
            interface: desc.interface,
            resource_type: desc.resource_type,
            value,
        }
    }

    pub fn view(&self) -> VariableView {
        VariableView {
            href: self.href.clone(),
            name: self.name.clone(),
            interface: self.interface.clone(),
            resource_type: self.resource_type.clone(),
            value: self.value.clone(),
        }
    }
}

/// One mirrored device. `id` is unique within its hub; variable hrefs are
/// unique within the device.
#[derive(Debug, Clone, PartialEq)]
pub struct Device {
    pub id: String,
    pub name: String,
    pub variables: Vec<Variable>,
}

impl Device {
    pub fn from_descriptor(desc: DeviceDescriptor) -> Self {
        Self {
            id: desc.id,
            name: desc.name,
            variables: desc
                .variables
                .into_iter()
                .map(Variable::from_descriptor)
                .collect(),
        }
    }

    pub fn variable(&self, href: &str) -> Option<&Variable> {
        self.variables.iter().find(|v| v.href == href)
    }

    pub fn variable_mut(&mut self, href: &str) -> Option<&mut Variable> {
        self.variables.iter_mut().find(|v| v.href == href)
    }

    pub fn view(&self, hub_uuid: &str) -> DeviceView {
        DeviceView {
            id: self.id.clone(),
            name: self.name.clone(),
            hub_uuid: hub_uuid.to_string(),
            variables: self.variables.iter().map(Variable::view).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn descriptor() -> DeviceDescriptor {
        serde_json::from_value(json!({
            "id": "dev-1",
            "name": "Lamp",
            "variables": [
                {"href": "/master", "n": "Power", "if": "oic.if.a", "rt": "oic.r.switch.binary",
                 "values": {"value": false}},
                {"href": "/dimming", "n": "Brightness", "if": "oic.if.a", "rt": "oic.r.light.dimming",
                 "values": {"dimmingSetting": 40, "range": "0,255"}}
            ]
        }))
        .unwrap()
    }

    #[test]
    fn builds_device_from_descriptor() {
        let device = Device::from_descriptor(descriptor());
        assert_eq!(device.id, "dev-1");
        assert_eq!(device.variables.len(), 2);
        let dimming = device.variable("/dimming").unwrap();
        assert_eq!(dimming.resource_type, "oic.r.light.dimming");
        // Value is mirrored as JSON text.
        let parsed: serde_json::Value = serde_json::from_str(&dimming.value).unwrap();
        assert_eq!(parsed["range"], "0,255");
    }

    #[test]
    fn view_carries_hub_uuid() {
        let device = Device::from_descriptor(descriptor());
        let view = device.view("hub-1");
        assert_eq!(view.hub_uuid, "hub-1");
        assert_eq!(view.variables[0].href, "/master");
    }

    #[test]
    fn unknown_variable_is_none() {
        let device = Device::from_descriptor(descriptor());
        assert!(device.variable("/nope").is_none());
    }
}
