//! Request/reply correlation for hub-bound requests.
//!
//! Every outbound request carries a message id drawn from a per-session
//! monotonic counter. Replies echo the id; the table maps ids to oneshot
//! senders so at most one waiter completes per id.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use iotcloud_protocol::Envelope;
use tokio::sync::oneshot;
use tracing::warn;

/// How long a pending request waits for its reply before the entry is
/// discarded and a late reply is treated as unsolicited.
pub const CORRELATION_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Default)]
pub struct CorrelationTable {
    next: AtomicI64,
    pending: Mutex<HashMap<i64, oneshot::Sender<Envelope>>>,
}

impl CorrelationTable {
    pub fn new() -> Self {
        Self {
            next: AtomicI64::new(1),
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Allocate the next message id without registering a waiter.
    pub fn next_id(&self) -> i64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }

    /// Register a waiter for the reply to `mid`. A duplicate id means the
    /// id allocation was bypassed somewhere; the existing waiter is kept
    /// and the new one refused.
    pub fn register(&self, mid: i64) -> Option<oneshot::Receiver<Envelope>> {
        let (tx, rx) = oneshot::channel();
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        if pending.contains_key(&mid) {
            warn!(mid, "duplicate correlation id, waiter refused");
            return None;
        }
        pending.insert(mid, tx);
        Some(rx)
    }

    /// Allocate a message id and register a waiter for its reply in one
    /// step, so the reply cannot arrive before the entry exists. Ids come
    /// from the private counter, so registration cannot collide.
    pub fn begin(&self) -> (i64, oneshot::Receiver<Envelope>) {
        loop {
            let mid = self.next_id();
            if let Some(rx) = self.register(mid) {
                return (mid, rx);
            }
        }
    }

    /// Complete the waiter registered for `mid`, if any. Returns whether a
    /// waiter was found; a second reply with the same id returns false.
    pub fn resolve(&self, mid: i64, reply: &Envelope) -> bool {
        let waiter = {
            let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
            pending.remove(&mid)
        };
        match waiter {
            Some(tx) => tx.send(reply.clone()).is_ok(),
            None => false,
        }
    }

    /// Drop the waiter for `mid` without completing it.
    pub fn discard(&self, mid: i64) {
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        pending.remove(&mid);
    }

    /// Drop all waiters. Used when the session closes; the oneshot receivers
    /// observe the drop as a cancellation.
    pub fn discard_all(&self) {
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        pending.clear();
    }

    #[cfg(test)]
    pub fn pending_count(&self) -> usize {
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn ids_are_strictly_ascending_from_one() {
        let table = CorrelationTable::new();
        assert_eq!(table.next_id(), 1);
        assert_eq!(table.next_id(), 2);
        let (mid, _rx) = table.begin();
        assert_eq!(mid, 3);
    }

    #[tokio::test]
    async fn resolve_completes_waiter_exactly_once() {
        let table = CorrelationTable::new();
        let (mid, rx) = table.begin();

        let reply = Envelope::request(mid, "ResponseGetDevices", json!({"devices": []}));
        assert!(table.resolve(mid, &reply));
        // Second reply with the same id has nothing to complete.
        assert!(!table.resolve(mid, &reply));

        let got = rx.await.unwrap();
        assert_eq!(got.mid, mid);
        assert_eq!(table.pending_count(), 0);
    }

    #[tokio::test]
    async fn duplicate_registration_is_refused() {
        let table = CorrelationTable::new();
        let rx = table.register(5).unwrap();
        assert!(table.register(5).is_none());
        // The original waiter is unaffected.
        let reply = Envelope::request(5, "ResponseGetDevices", json!({}));
        assert!(table.resolve(5, &reply));
        assert_eq!(rx.await.unwrap().mid, 5);
    }

    #[test]
    fn resolve_without_waiter_is_false() {
        let table = CorrelationTable::new();
        let reply = Envelope::request(7, "ResponseGetDevices", json!({}));
        assert!(!table.resolve(7, &reply));
    }

    #[tokio::test]
    async fn discard_cancels_without_completing() {
        let table = CorrelationTable::new();
        let (mid, rx) = table.begin();
        table.discard(mid);
        assert!(rx.await.is_err());
        assert_eq!(table.pending_count(), 0);
    }

    #[tokio::test]
    async fn discard_all_cancels_every_waiter() {
        let table = CorrelationTable::new();
        let (_, rx1) = table.begin();
        let (_, rx2) = table.begin();
        table.discard_all();
        assert!(rx1.await.is_err());
        assert!(rx2.await.is_err());
    }
}
