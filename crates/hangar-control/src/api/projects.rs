//! Project endpoints.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{ControlError, ErrorKind, TransitionFailure};
use crate::generator::Artifact;
use crate::transition::{Stage, TransitionRecord};
use crate::types::{Action, LifecycleState, Project, ProjectId};
use crate::workflow::TransitionConfig;

use super::AppState;

/// Short form of a project for listings.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectSummary {
    /// Project ID.
    pub id: ProjectId,
    /// Display name.
    pub name: String,
    /// Lifecycle state.
    pub state: LifecycleState,
    /// Last persisted change.
    pub last_modified: DateTime<Utc>,
}

/// A project with the actions currently available on it.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectResponse {
    /// Persisted document.
    pub project: Project,
    /// Legal actions from the current state.
    pub available_actions: Vec<Action>,
}

/// Outcome of a lifecycle action.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransitionResponse {
    /// Whether the transition committed.
    pub success: bool,
    /// State after the transition, absent on failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_state: Option<LifecycleState>,
    /// Generated artifact.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifacts: Option<serde_json::Value>,
    /// Non-blocking validation findings.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    /// Transition identifier, absent if rejected before it began.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transition_id: Option<String>,
    /// Failure details.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

/// A failed transition as seen by API callers.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    /// Error classification.
    pub kind: ErrorKind,
    /// Human readable message.
    pub message: String,
    /// Pipeline stage that failed.
    pub stage: Stage,
    /// Requested action.
    pub action: Action,
    /// Target project.
    pub project_id: String,
    /// Whether the same request may succeed if retried.
    pub retryable: bool,
}

impl TransitionResponse {
    fn failed(failure: &TransitionFailure) -> Self {
        Self {
            success: false,
            new_state: None,
            artifacts: None,
            warnings: Vec::new(),
            transition_id: None,
            error: Some(ErrorBody {
                kind: failure.kind(),
                message: failure.source.to_string(),
                stage: failure.stage,
                action: failure.action,
                project_id: failure.project_id.to_string(),
                retryable: failure.kind().is_retryable(),
            }),
        }
    }

    fn rejected(kind: ErrorKind, message: String, action: Action, project_id: &str) -> Self {
        Self {
            success: false,
            new_state: None,
            artifacts: None,
            warnings: Vec::new(),
            transition_id: None,
            error: Some(ErrorBody {
                kind,
                message,
                stage: Stage::Check,
                action,
                project_id: project_id.to_owned(),
                retryable: false,
            }),
        }
    }
}

/// Error response for read endpoints.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error message.
    pub error: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(error: &ControlError) -> ApiError {
    (
        kind_to_status(error.kind()),
        Json(ErrorResponse {
            error: error.to_string(),
        }),
    )
}

/// List all projects.
pub async fn list_projects(
    State(state): State<AppState>,
) -> Result<Json<Vec<ProjectSummary>>, ApiError> {
    let projects = state.registry.list().await.map_err(|e| api_error(&e))?;
    Ok(Json(
        projects
            .into_iter()
            .map(|p| ProjectSummary {
                id: p.id,
                name: p.name,
                state: p.state,
                last_modified: p.last_modified,
            })
            .collect(),
    ))
}

/// Get a project by ID.
pub async fn get_project(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ProjectResponse>, ApiError> {
    let project_id = ProjectId::parse(id).map_err(|e| api_error(&e))?;

    match state.registry.load(&project_id).await {
        Ok(Some(project)) => Ok(Json(ProjectResponse {
            available_actions: state
                .coordinator
                .state_machine()
                .available_actions(project.state),
            project,
        })),
        Ok(None) => Err(api_error(&ControlError::ProjectNotFound(
            project_id.to_string(),
        ))),
        Err(e) => Err(api_error(&e)),
    }
}

/// Finished transitions of a project, oldest first.
pub async fn list_transitions(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<TransitionRecord>>, ApiError> {
    let project_id = ProjectId::parse(id).map_err(|e| api_error(&e))?;
    Ok(Json(state.coordinator.history(&project_id)))
}

/// Run a lifecycle action.
///
/// The body is optional; an empty body runs the action with defaults.
pub async fn run_action(
    State(state): State<AppState>,
    Path((id, action)): Path<(String, String)>,
    body: Option<Json<TransitionConfig>>,
) -> (StatusCode, Json<TransitionResponse>) {
    let Ok(action) = action.parse::<Action>() else {
        return (
            StatusCode::NOT_FOUND,
            Json(TransitionResponse::rejected(
                ErrorKind::NotFound,
                format!("unknown action: {action}"),
                Action::Create,
                &id,
            )),
        );
    };
    let project_id = match ProjectId::parse(id.clone()) {
        Ok(project_id) => project_id,
        Err(e) => {
            return (
                kind_to_status(e.kind()),
                Json(TransitionResponse::rejected(e.kind(), e.to_string(), action, &id)),
            );
        }
    };
    let config = body.map(|Json(config)| config).unwrap_or_default();

    info!(project = %project_id, action = %action, "action requested via API");

    match state.coordinator.execute(&project_id, action, &config).await {
        Ok(report) => {
            let artifacts = artifact_json(&report.artifact);
            (
                StatusCode::OK,
                Json(TransitionResponse {
                    success: true,
                    new_state: Some(report.new_state),
                    artifacts,
                    warnings: report.warnings,
                    transition_id: Some(report.record.id),
                    error: None,
                }),
            )
        }
        Err(failure) => (
            kind_to_status(failure.kind()),
            Json(TransitionResponse::failed(&failure)),
        ),
    }
}

fn artifact_json(artifact: &Artifact) -> Option<serde_json::Value> {
    serde_json::to_value(artifact).ok()
}

const fn kind_to_status(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::IllegalTransition | ErrorKind::ConcurrentTransition => StatusCode::CONFLICT,
        ErrorKind::Validation => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Allocation | ErrorKind::Runtime => StatusCode::BAD_GATEWAY,
        ErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
        ErrorKind::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::RollbackFailed | ErrorKind::Registry | ErrorKind::Internal => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}
