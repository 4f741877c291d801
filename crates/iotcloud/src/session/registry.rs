//! Registry of live hub and client sessions.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::debug;

use super::client::ClientSession;
use super::hub::HubSession;

/// All live sessions, keyed by connection id.
///
/// Connection ids come from a process-wide counter, so a reconnecting hub
/// gets a fresh entry and a stale close cannot evict its replacement.
#[derive(Default)]
pub struct SessionRegistry {
    next_conn_id: AtomicU64,
    hubs: DashMap<u64, Arc<HubSession>>,
    clients: DashMap<u64, Arc<ClientSession>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_conn_id(&self) -> u64 {
        self.next_conn_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn register_hub(&self, outbound: mpsc::Sender<String>) -> Arc<HubSession> {
        let conn_id = self.next_conn_id();
        let session = Arc::new(HubSession::new(conn_id, outbound));
        self.hubs.insert(conn_id, session.clone());
        debug!(conn_id, hubs = self.hubs.len(), "hub connected");
        session
    }

    /// Remove a hub session. Idempotent; pending correlations are cancelled
    /// so no waiter outlives the connection.
    pub fn remove_hub(&self, conn_id: u64) -> Option<Arc<HubSession>> {
        let removed = self.hubs.remove(&conn_id).map(|(_, session)| session);
        if let Some(ref session) = removed {
            session.correlations.discard_all();
            debug!(conn_id, hubs = self.hubs.len(), "hub disconnected");
        }
        removed
    }

    pub fn hub_by_uuid(&self, uuid: &str) -> Option<Arc<HubSession>> {
        self.hubs.iter().find_map(|entry| {
            let session = entry.value();
            match session.info() {
                Some(info) if info.uuid == uuid => Some(session.clone()),
                _ => None,
            }
        })
    }

    /// Authorized hubs belonging to `username`, as a snapshot.
    pub fn hubs_for_user(&self, username: &str) -> Vec<Arc<HubSession>> {
        self.hubs
            .iter()
            .filter(|entry| {
                entry
                    .value()
                    .info()
                    .is_some_and(|info| info.username == username)
            })
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub fn register_client(&self, outbound: mpsc::Sender<String>) -> Arc<ClientSession> {
        let conn_id = self.next_conn_id();
        let session = Arc::new(ClientSession::new(conn_id, outbound));
        self.clients.insert(conn_id, session.clone());
        debug!(conn_id, clients = self.clients.len(), "client connected");
        session
    }

    pub fn remove_client(&self, conn_id: u64) -> Option<Arc<ClientSession>> {
        let removed = self.clients.remove(&conn_id).map(|(_, session)| session);
        if removed.is_some() {
            debug!(conn_id, clients = self.clients.len(), "client disconnected");
        }
        removed
    }

    /// Snapshot of all client sessions, taken before any fan-out so sends
    /// never happen while the map is being iterated.
    pub fn clients(&self) -> Vec<Arc<ClientSession>> {
        self.clients
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub fn hub_count(&self) -> usize {
        self.hubs.len()
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }
}
