//! The HTTP surface.
//!
//! JSON over HTTP. Sessions are readable and forkable by anyone holding
//! the unguessable id; every mutation requires the `X-Owner-Token`
//! header. Validation failures are rejected before any side effect and
//! auth failures short-circuit before body-dependent logic runs.

pub mod error;
pub use error::ApiError;

mod parse;
mod sessions;

use crate::parse::{DocumentExtractor, ParseCache};
use crate::session::SessionStore;
use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post, put};
use std::sync::Arc;
use tower_http::cors::CorsLayer;

/// Upper bound on uploaded file size.
pub const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

// Multipart framing and headers need room beyond the file itself.
const BODY_LIMIT_BYTES: usize = MAX_UPLOAD_BYTES + 64 * 1024;

/// Shared state for request handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn SessionStore>,
    pub cache: ParseCache,
    pub extractor: Arc<dyn DocumentExtractor>,
}

/// Build the application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/sessions", post(sessions::create_session))
        .route(
            "/api/sessions/{id}",
            get(sessions::get_session).delete(sessions::delete_session),
        )
        .route("/api/sessions/{id}/fork", post(sessions::fork_session))
        .route("/api/sessions/{id}/threads", post(sessions::add_thread))
        .route(
            "/api/sessions/{id}/threads/{tid}/messages",
            post(sessions::add_message).delete(sessions::truncate_messages),
        )
        .route(
            "/api/sessions/{id}/threads/{tid}/messages/{mid}",
            put(sessions::update_message),
        )
        .route("/api/parse", post(parse::parse_document))
        .layer(DefaultBodyLimit::max(BODY_LIMIT_BYTES))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}
