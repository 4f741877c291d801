//! IoT Cloud Relay
//!
//! A relay that bridges home IoT hubs, web clients, and a voice-assistant
//! skill adapter. Hubs connect outward over a persistent WebSocket and push
//! device snapshots; the relay mirrors each hub's device tree, multiplexes
//! control intents back to the owning hub connection, and fans out state
//! changes to the clients that subscribed to them.

pub mod api;
pub mod assistant;
pub mod auth;
pub mod device;
pub mod dispatch;
pub mod notify;
pub mod session;
pub mod ws;
