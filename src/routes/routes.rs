//! Defines routes for build submission and status.
//!
//! ## Structure
//! - **Health endpoints**
//!   - `GET  /healthz`, `GET /readyz`
//!
//! - **Build endpoints**
//!   - `POST /build` (alias `POST /api/build`): multipart submission
//!   - `GET  /build/{build_id}`: build status
//!   - `GET  /status?build_id=`: build status, query-string form

use crate::{
    handlers::{
        build_handlers::{build_status, build_status_query, submit_build},
        health_handlers::{healthz, readyz},
    },
    services::build_service::BuildService,
};
use axum::{
    Router,
    routing::{get, post},
};

/// Build and return the router for all endpoints.
///
/// The router carries shared state (`BuildService`) to all handlers; the
/// request body limit is applied by the caller.
pub fn routes() -> Router<BuildService> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        // build endpoints
        .route("/build", post(submit_build))
        .route("/api/build", post(submit_build))
        .route("/build/{build_id}", get(build_status))
        .route("/status", get(build_status_query))
}
