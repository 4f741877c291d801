//! WebSocket endpoints for hub and client sessions.
//!
//! Both endpoints share the same shape: the socket is split, a writer task
//! drains the session's outbound channel, and the reader loop feeds frames
//! through a per-protocol message processor until the peer goes away.

mod client_endpoint;
mod hub_endpoint;

pub use client_endpoint::client_ws_handler;
pub use hub_endpoint::hub_ws_handler;

use axum::extract::ws::{Message, WebSocket};
use futures::SinkExt;
use futures::stream::SplitSink;
use tokio::sync::mpsc;
use tracing::debug;

/// Upper bound on a single inbound frame. Device snapshots from large homes
/// run tens of kilobytes; anything bigger is not ours.
pub(crate) const MAX_MESSAGE_SIZE: usize = 102_400;

/// Outbound channel depth per connection.
pub(crate) const OUTBOUND_BUFFER: usize = 64;

/// What the message processor wants the reader loop to do next.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Flow {
    Continue,
    Close,
}

/// Drain `rx` into the socket sink until the channel or socket closes.
pub(crate) async fn run_writer(
    mut sink: SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<String>,
) {
    while let Some(frame) = rx.recv().await {
        if sink.send(Message::Text(frame.into())).await.is_err() {
            break;
        }
    }
    debug!("writer task finished");
}
