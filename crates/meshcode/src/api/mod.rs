//! HTTP API module.
//!
//! REST endpoints for projects and their files, plus the WebSocket upgrade.

mod error;
mod handlers;
mod routes;
mod state;

pub use error::{ApiError, ApiResult, ErrorResponse};
pub use routes::create_router;
pub use state::{AppState, StateConfig};
