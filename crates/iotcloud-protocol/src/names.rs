//! Message names used on hub and client sessions.

// Shared by both protocols.
pub const REQUEST_AUTHORIZE: &str = "RequestAuthorize";
pub const REQUEST_GET_DEVICES: &str = "RequestGetDevices";
pub const REQUEST_SUBSCRIBE_DEVICE: &str = "RequestSubscribeDevice";
pub const REQUEST_UNSUBSCRIBE_DEVICE: &str = "RequestUnsubscribeDevice";

// Hub protocol.
pub const REQUEST_SET_VALUE: &str = "RequestSetValue";
pub const EVENT_DEVICE_LIST_UPDATE: &str = "EventDeviceListUpdate";
pub const EVENT_VALUE_UPDATE: &str = "EventValueUpdate";

// Client protocol.
pub const RESPONSE_AUTHORIZE: &str = "ResponseAuthorize";
pub const RESPONSE_GET_DEVICES: &str = "ResponseGetDevices";
pub const EVENT_DEVICE_UPDATE: &str = "EventDeviceUpdate";
