//! Per-transition bookkeeping: stages, step records and the audit log.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ErrorKind;
use crate::state::Target;
use crate::types::{Action, LifecycleState, ProjectId};

/// A pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Legality check against the state machine.
    Check,
    /// Per-project lock acquisition.
    Lock,
    /// Resource loading.
    Load,
    /// Artifact generation.
    Generate,
    /// Schema and template validation.
    Validate,
    /// Port allocation and verification.
    Allocate,
    /// Container runtime calls.
    Execute,
    /// Health check polling.
    Health,
    /// Persisting the new project state.
    Commit,
    /// Compensating actions.
    Rollback,
}

impl Stage {
    /// Get the stage name as a static string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Check => "check",
            Self::Lock => "lock",
            Self::Load => "load",
            Self::Generate => "generate",
            Self::Validate => "validate",
            Self::Allocate => "allocate",
            Self::Execute => "execute",
            Self::Health => "health",
            Self::Commit => "commit",
            Self::Rollback => "rollback",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Status of a pipeline step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// The step is running.
    Running,
    /// The step finished successfully.
    Completed,
    /// The step failed.
    Failed,
}

/// Timing and status of one pipeline step.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepRecord {
    /// Stage the step belongs to.
    pub name: Stage,
    /// Step status.
    pub status: StepStatus,
    /// Wall-clock duration in milliseconds.
    pub duration_ms: u64,
}

/// How a transition ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum Outcome {
    /// Still running.
    InProgress,
    /// The new state was persisted.
    Committed,
    /// The transition failed; persisted state is unchanged.
    Failed {
        /// Stage that failed.
        stage: Stage,
        /// Error classification.
        kind: ErrorKind,
        /// Human readable message.
        message: String,
        /// Whether compensating actions ran.
        rolled_back: bool,
    },
}

/// Record of a single transition, kept for progress reporting and audit.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransitionRecord {
    /// Unique transition identifier.
    pub id: String,
    /// Project the transition targets.
    pub project_id: ProjectId,
    /// Requested action.
    pub action: Action,
    /// State when the transition started.
    pub from_state: LifecycleState,
    /// State the transition leads to.
    pub to_state: LifecycleState,
    /// When the transition started.
    pub started_at: DateTime<Utc>,
    /// Completed steps in order.
    pub steps: Vec<StepRecord>,
    /// Final outcome.
    pub outcome: Outcome,
}

impl TransitionRecord {
    /// Start a new record.
    #[must_use]
    pub fn begin(project_id: ProjectId, action: Action, from: LifecycleState, target: Target) -> Self {
        Self {
            id: ulid::Ulid::new().to_string().to_lowercase(),
            project_id,
            action,
            from_state: from,
            to_state: target.observed_state(),
            started_at: Utc::now(),
            steps: Vec::new(),
            outcome: Outcome::InProgress,
        }
    }

    /// Total duration of all recorded steps.
    #[must_use]
    pub fn total_duration_ms(&self) -> u64 {
        self.steps.iter().map(|s| s.duration_ms).sum()
    }
}

/// Bounded in-memory archive of finished transitions.
#[derive(Debug)]
pub struct TransitionLog {
    capacity: usize,
    records: Mutex<VecDeque<TransitionRecord>>,
}

impl TransitionLog {
    /// Create an archive holding at most `capacity` records.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            records: Mutex::new(VecDeque::new()),
        }
    }

    /// Archive a finished record, evicting the oldest when full.
    pub fn archive(&self, record: TransitionRecord) {
        let Ok(mut records) = self.records.lock() else {
            return;
        };
        if records.len() == self.capacity {
            records.pop_front();
        }
        records.push_back(record);
    }

    /// Records for one project, oldest first.
    #[must_use]
    pub fn for_project(&self, project_id: &ProjectId) -> Vec<TransitionRecord> {
        self.records
            .lock()
            .map(|records| {
                records
                    .iter()
                    .filter(|r| &r.project_id == project_id)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Number of archived records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.lock().map(|r| r.len()).unwrap_or(0)
    }

    /// Whether the archive is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
