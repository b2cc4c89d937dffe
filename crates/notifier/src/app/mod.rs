//! HTTP application wiring (Axum router).
//!
//! - `routes/system.rs`: liveness
//! - `routes/notifications.rs`: SSE stream and connected-client count

use std::sync::Arc;

use axum::{Extension, Router, routing::get};

use crate::hub::BroadcastHub;

pub mod routes;

/// Build the full HTTP router (public entrypoint used by `main.rs`).
pub fn build_app(hub: Arc<BroadcastHub>) -> Router {
    Router::new()
        .route("/health", get(routes::system::health))
        .nest("/notifications", routes::notifications::router())
        .layer(Extension(hub))
}
