//! API route definitions.

use axum::http::{HeaderValue, Method, header};
use axum::{
    Router,
    routing::{get, post, put},
};
use tower_http::cors::CorsLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::Level;

use super::handlers;
use super::state::AppState;
use crate::ws;

/// Origins allowed when none are configured.
const LOCAL_ORIGINS: &[&str] = &[
    "http://localhost:3000",
    "http://localhost:5173",
    "http://127.0.0.1:3000",
    "http://127.0.0.1:5173",
];

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    let cors = build_cors_layer(&state.cors_origins);

    // Tracing layer with request IDs and timing
    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
        .on_request(DefaultOnRequest::new().level(Level::INFO))
        .on_response(DefaultOnResponse::new().level(Level::INFO));

    Router::new()
        .route("/health", get(handlers::health))
        // Projects
        .route(
            "/projects",
            get(handlers::list_projects).post(handlers::create_project),
        )
        .route(
            "/projects/{project_id}",
            get(handlers::get_project).delete(handlers::delete_project),
        )
        .route(
            "/projects/{project_id}/provision",
            post(handlers::provision_project),
        )
        // Files
        .route(
            "/projects/{project_id}/files",
            get(handlers::list_files)
                .post(handlers::create_entry)
                .delete(handlers::delete_entry),
        )
        .route(
            "/projects/{project_id}/files/rename",
            put(handlers::rename_entry),
        )
        .route(
            "/projects/{project_id}/files/content",
            get(handlers::read_file).put(handlers::save_file),
        )
        .route(
            "/projects/{project_id}/notify-file-change",
            post(handlers::notify_file_change),
        )
        // Real-time channel
        .route("/ws", get(ws::ws_handler))
        .with_state(state)
        .layer(cors)
        .layer(trace_layer)
}

/// Build the CORS layer from the configured origins.
///
/// Without configuration only local development origins are allowed.
fn build_cors_layer(configured: &[String]) -> CorsLayer {
    let methods = [
        Method::GET,
        Method::POST,
        Method::PUT,
        Method::DELETE,
        Method::OPTIONS,
    ];
    let headers = [header::CONTENT_TYPE, header::ACCEPT, header::ORIGIN];

    let origins: Vec<HeaderValue> = if configured.is_empty() {
        LOCAL_ORIGINS
            .iter()
            .filter_map(|origin| origin.parse::<HeaderValue>().ok())
            .collect()
    } else {
        configured
            .iter()
            .filter_map(|origin| {
                origin.parse::<HeaderValue>().ok().or_else(|| {
                    tracing::warn!("CORS: Invalid origin in config: {}", origin);
                    None
                })
            })
            .collect()
    };

    tracing::info!("CORS: Allowing {} origin(s)", origins.len());
    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods(methods)
        .allow_headers(headers)
}
