//! Transition pipeline.
//!
//! The [`WorkflowCoordinator`] runs every lifecycle action through the same
//! sequence of stages:
//!
//! ```text
//! check ─▶ lock ─▶ load ─▶ generate ─▶ validate ─▶ allocate ─▶ execute ─▶ health ─▶ commit
//!                                                      │           │          │
//!                                                      └───────────┴──────────┴──▶ rollback
//! ```
//!
//! Persisted state changes only at `commit`. A failure in any earlier stage
//! undoes the side effects already applied and leaves the project as it was.

mod coordinator;
mod journal;
mod lock;

pub use coordinator::{Collaborators, WorkflowCoordinator};
pub use journal::{Effect, Journal};
pub use lock::{ProjectLockGuard, ProjectLocks};

use serde::{Deserialize, Serialize};

use crate::generator::Artifact;
use crate::transition::TransitionRecord;
use crate::types::{Action, LifecycleState, Page, Project, ProjectId};

/// Caller-supplied options for a transition.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TransitionConfig {
    /// Project name (CREATE, EDIT, UPDATE).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Template to create from (CREATE).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,

    /// Replacement pages (CREATE, EDIT, UPDATE).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pages: Option<Vec<Page>>,

    /// Deadline for the side-effect stages, overriding the configured default.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

/// A committed transition.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransitionReport {
    /// Target project.
    pub project_id: ProjectId,
    /// Action performed.
    pub action: Action,
    /// State before the transition.
    pub from_state: LifecycleState,
    /// State after the transition (`VOID` after DELETE).
    pub new_state: LifecycleState,
    /// Persisted document, `None` after DELETE.
    pub project: Option<Project>,
    /// Generated artifact.
    pub artifact: Artifact,
    /// Non-blocking validation findings.
    pub warnings: Vec<String>,
    /// Step timings.
    pub record: TransitionRecord,
}
