//! HTTP API for the control service.
//!
//! Provides endpoints for:
//! - Lifecycle actions (`POST /projects/{id}/{action}`)
//! - Project and transition history queries
//! - Health and readiness checks
//! - Prometheus metrics

mod projects;

use std::fmt::Write as _;
use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};

use crate::registry::ProjectRegistry;
use crate::types::LifecycleState;
use crate::workflow::WorkflowCoordinator;

pub use projects::{ErrorBody, ProjectResponse, ProjectSummary, TransitionResponse};

/// Shared application state for the control service.
#[derive(Clone)]
pub struct AppState {
    /// Coordinator running lifecycle transitions.
    pub coordinator: Arc<WorkflowCoordinator>,
    /// Project registry for read-only queries.
    pub registry: Arc<dyn ProjectRegistry>,
}

/// Creates the API router.
pub fn router(state: AppState) -> Router {
    Router::new()
        // Health endpoints
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        // Projects
        .route("/projects", get(projects::list_projects))
        .route("/projects/{id}", get(projects::get_project))
        .route("/projects/{id}/transitions", get(projects::list_transitions))
        .route("/projects/{id}/{action}", post(projects::run_action))
        // Metrics
        .route("/metrics", get(metrics))
        .with_state(state)
}

/// Health check endpoint.
async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse { status: "healthy" })
}

/// Readiness check endpoint.
///
/// Not ready once the coordinator is draining or if the registry cannot be read.
async fn readiness_check(State(state): State<AppState>) -> (StatusCode, Json<ReadyResponse>) {
    let accepting = state.coordinator.is_accepting();
    let in_flight = state.coordinator.in_flight();

    match state.registry.list().await {
        Ok(projects) if accepting => (
            StatusCode::OK,
            Json(ReadyResponse {
                ready: true,
                projects: projects.len(),
                in_flight,
            }),
        ),
        _ => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ReadyResponse {
                ready: false,
                projects: 0,
                in_flight,
            }),
        ),
    }
}

/// Metrics endpoint.
async fn metrics(State(state): State<AppState>) -> String {
    let mut output = String::new();
    let projects = state.registry.list().await.unwrap_or_default();

    output.push_str("# HELP hangar_projects_total Number of projects by lifecycle state\n");
    output.push_str("# TYPE hangar_projects_total gauge\n");
    for lifecycle in LifecycleState::ALL
        .into_iter()
        .filter(|s| *s != LifecycleState::Void)
    {
        let count = projects.iter().filter(|p| p.state == lifecycle).count();
        let _ = writeln!(
            output,
            "hangar_projects_total{{state=\"{}\"}} {count}",
            lifecycle.as_str().to_lowercase()
        );
    }

    output.push_str("# HELP hangar_transitions_in_flight Transitions currently running\n");
    output.push_str("# TYPE hangar_transitions_in_flight gauge\n");
    let _ = writeln!(
        output,
        "hangar_transitions_in_flight {}",
        state.coordinator.in_flight()
    );

    output
}

/// Health response.
#[derive(serde::Serialize)]
struct HealthResponse {
    status: &'static str,
}

/// Readiness response.
#[derive(serde::Serialize)]
struct ReadyResponse {
    ready: bool,
    projects: usize,
    in_flight: usize,
}
