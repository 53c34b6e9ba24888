//! Read API server.
//!
//! A thin HTTP surface over the measurement view. Rendering is left to the
//! consumer; this serves the sorted, bounded projection as JSON.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Query, State},
    response::IntoResponse,
    routing::get,
};
use serde::{Deserialize, Serialize};
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, TraceLayer},
};

use crate::store::MeasurementStore;
use crate::view;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Handle to the shared measurement history.
    pub store: MeasurementStore,
    /// Default number of groups returned when the caller gives no limit.
    pub view_limit: usize,
}

/// Health check response.
#[derive(Serialize)]
struct HealthResponse {
    status: String,
    groups: usize,
}

/// Query parameters for the groups API.
#[derive(Debug, Deserialize)]
pub struct GroupsQueryParams {
    /// Override for the configured view limit.
    pub limit: Option<usize>,
}

/// Create the Axum router with all routes.
pub fn create_router(state: AppState) -> Router {
    let app_state = Arc::new(state);

    Router::new()
        .route("/healthz", get(healthz_handler))
        .route("/api/groups", get(groups_handler))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::default().include_headers(true)),
        )
        .layer(CorsLayer::permissive())
        .with_state(app_state)
}

/// Liveness probe.
async fn healthz_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        groups: state.store.len(),
    })
}

/// Groups API endpoint: most recent measurement groups, newest first.
async fn groups_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<GroupsQueryParams>,
) -> impl IntoResponse {
    let limit = params.limit.unwrap_or(state.view_limit);
    Json(view::recent(&state.store, limit))
}
