//! Shared application state.

use std::sync::Arc;

use crate::auth::TokenIntrospector;
use crate::dispatch::ControlDispatcher;
use crate::notify::NotificationRouter;
use crate::session::SessionRegistry;

/// State handed to every handler. Everything inside is `Arc`-shared, so the
/// whole struct is cheap to clone per request.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<SessionRegistry>,
    pub notifier: NotificationRouter,
    pub dispatcher: ControlDispatcher,
    pub auth: Arc<dyn TokenIntrospector>,
}

impl AppState {
    pub fn new(auth: Arc<dyn TokenIntrospector>) -> Self {
        let registry = Arc::new(SessionRegistry::new());
        Self {
            notifier: NotificationRouter::new(registry.clone()),
            dispatcher: ControlDispatcher::new(registry.clone()),
            registry,
            auth,
        }
    }
}
