//! Wire protocol for the iotcloud relay.
//!
//! Both the hub protocol and the client protocol exchange the same envelope
//! shape over a persistent duplex connection: a JSON object with a message id
//! (`mid`), an optional message `name`, and an opaque `payload`. This crate
//! owns the envelope codec and the serde types for every payload the relay
//! reads or writes, so the server crate never touches raw JSON field names.

mod envelope;
pub mod messages;
pub mod names;

pub use envelope::{Envelope, ProtocolError, UNSOLICITED};
