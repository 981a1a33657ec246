//! Error types for hangar-control.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::transition::Stage;
use crate::types::{Action, LifecycleState, ProjectId};

/// Result type alias using [`ControlError`].
pub type ControlResult<T> = Result<T, ControlError>;

/// Errors that can occur in the control plane.
#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    /// The action is not in the transition table for the current state.
    #[error("illegal transition: {action} is not allowed from {from}")]
    IllegalTransition {
        /// Current state.
        from: LifecycleState,
        /// Requested action.
        action: Action,
    },

    /// Another transition holds the project lock.
    #[error("a transition is already in flight for project {0}")]
    ConcurrentTransition(String),

    /// A document or artifact failed validation.
    #[error("validation failed: {}", .errors.join("; "))]
    Validation {
        /// Individual validation errors.
        errors: Vec<String>,
    },

    /// Ports could not be allocated or verified.
    #[error("allocation error: {0}")]
    Allocation(String),

    /// The container runtime could not satisfy a request.
    #[error("runtime error: {0}")]
    Runtime(String),

    /// A stage ran past its deadline.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// The caller cancelled the transition.
    #[error("transition cancelled")]
    Cancelled,

    /// A compensating action failed; manual intervention is required.
    #[error("rollback failed ({}) after: {original}", .failures.join("; "))]
    RollbackFailed {
        /// Error that triggered the rollback.
        original: Box<ControlError>,
        /// Compensating actions that failed.
        failures: Vec<String>,
    },

    /// Project not found.
    #[error("project not found: {0}")]
    ProjectNotFound(String),

    /// Project ID is not a valid slug.
    #[error("invalid project id: {0:?} (expected [a-z0-9-]+)")]
    InvalidProjectId(String),

    /// Project registry failure.
    #[error("registry error: {0}")]
    Registry(String),

    /// The coordinator is draining and accepts no new transitions.
    #[error("coordinator is shutting down")]
    ShuttingDown,

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Serialisation error.
    #[error("serialisation error: {0}")]
    Serialisation(#[from] serde_json::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ControlError {
    /// Create a validation error from a single message.
    #[must_use]
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            errors: vec![msg.into()],
        }
    }

    /// Create an allocation error.
    #[must_use]
    pub fn allocation(msg: impl Into<String>) -> Self {
        Self::Allocation(msg.into())
    }

    /// Create a runtime error.
    #[must_use]
    pub fn runtime(msg: impl Into<String>) -> Self {
        Self::Runtime(msg.into())
    }

    /// Create a registry error.
    #[must_use]
    pub fn registry(msg: impl Into<String>) -> Self {
        Self::Registry(msg.into())
    }

    /// Create an internal error.
    #[must_use]
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Classify the error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::IllegalTransition { .. } => ErrorKind::IllegalTransition,
            Self::ConcurrentTransition(_) => ErrorKind::ConcurrentTransition,
            Self::Validation { .. } | Self::InvalidProjectId(_) => ErrorKind::Validation,
            Self::Allocation(_) => ErrorKind::Allocation,
            Self::Runtime(_) => ErrorKind::Runtime,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::Cancelled | Self::ShuttingDown => ErrorKind::Cancelled,
            Self::RollbackFailed { .. } => ErrorKind::RollbackFailed,
            Self::ProjectNotFound(_) => ErrorKind::NotFound,
            Self::Registry(_) | Self::Serialisation(_) | Self::Io(_) => ErrorKind::Registry,
            Self::Config(_) | Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Whether the coordinator may retry the failed adapter call.
    ///
    /// Only transient allocation and runtime failures qualify.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Allocation(_) | Self::Runtime(_))
    }
}

/// Error classification exposed to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Action not valid from the current state.
    #[serde(rename = "IllegalTransitionError")]
    IllegalTransition,
    /// Project lock held by another transition.
    #[serde(rename = "ConcurrentTransitionError")]
    ConcurrentTransition,
    /// Document or artifact failed validation.
    #[serde(rename = "ValidationError")]
    Validation,
    /// Port allocation failed.
    #[serde(rename = "AllocationError")]
    Allocation,
    /// Container runtime failed.
    #[serde(rename = "RuntimeError")]
    Runtime,
    /// Stage deadline exceeded.
    #[serde(rename = "TimeoutError")]
    Timeout,
    /// Transition cancelled.
    #[serde(rename = "CancelledError")]
    Cancelled,
    /// Compensating action failed.
    #[serde(rename = "RollbackFailedError")]
    RollbackFailed,
    /// Project not found.
    #[serde(rename = "NotFoundError")]
    NotFound,
    /// Registry failure.
    #[serde(rename = "RegistryError")]
    Registry,
    /// Anything else.
    #[serde(rename = "InternalError")]
    Internal,
}

impl ErrorKind {
    /// Get the kind name as a static string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::IllegalTransition => "IllegalTransitionError",
            Self::ConcurrentTransition => "ConcurrentTransitionError",
            Self::Validation => "ValidationError",
            Self::Allocation => "AllocationError",
            Self::Runtime => "RuntimeError",
            Self::Timeout => "TimeoutError",
            Self::Cancelled => "CancelledError",
            Self::RollbackFailed => "RollbackFailedError",
            Self::NotFound => "NotFoundError",
            Self::Registry => "RegistryError",
            Self::Internal => "InternalError",
        }
    }

    /// Whether a caller may retry the same request unchanged.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ConcurrentTransition | Self::Allocation | Self::Runtime | Self::Timeout
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A failed transition: the error plus where it happened.
#[derive(Debug, thiserror::Error)]
#[error("{action} on {project_id} failed at {stage}: {source}")]
pub struct TransitionFailure {
    /// Project the transition targeted.
    pub project_id: ProjectId,
    /// Requested action.
    pub action: Action,
    /// Pipeline stage that failed.
    pub stage: Stage,
    /// Underlying error.
    pub source: ControlError,
}

impl TransitionFailure {
    /// Create a new transition failure.
    #[must_use]
    pub const fn new(project_id: ProjectId, action: Action, stage: Stage, source: ControlError) -> Self {
        Self {
            project_id,
            action,
            stage,
            source,
        }
    }

    /// Classification of the underlying error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.source.kind()
    }
}
