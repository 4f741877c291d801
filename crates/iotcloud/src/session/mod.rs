//! Session state for connected hubs and clients.
//!
//! Each WebSocket connection gets one session object shared between the
//! reader loop, the notification router, and the dispatcher. Sessions never
//! touch the socket directly; frames go through a per-connection mpsc
//! channel drained by a writer task, so concurrent senders cannot interleave
//! partial frames.

mod client;
mod correlation;
mod hub;
mod registry;

pub use client::ClientSession;
pub use correlation::{CorrelationTable, CORRELATION_TIMEOUT};
pub use hub::{HubInfo, HubSession, SyncOutcome};
pub use registry::SessionRegistry;
