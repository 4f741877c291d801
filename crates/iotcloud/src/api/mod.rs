//! HTTP surface: WebSocket upgrade endpoints, the assistant adapter route,
//! and health.

mod error;
mod routes;
mod state;

pub use error::{ApiError, ErrorResponse};
pub use routes::create_router;
pub use state::AppState;
