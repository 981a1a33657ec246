//! Lifecycle notifications.
//!
//! Events are fire-and-forget: a transition never waits for, or fails
//! because of, a subscriber.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::error::ErrorKind;
use crate::transition::{Stage, StepStatus};
use crate::types::{Action, LifecycleState, ProjectId};

/// A lifecycle notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LifecycleEvent {
    /// A transition passed its legality check and took the project lock.
    #[serde(rename_all = "camelCase")]
    WorkflowStarted {
        project_id: ProjectId,
        timestamp: DateTime<Utc>,
        transition_id: String,
        action: Action,
        from_state: LifecycleState,
    },

    /// A pipeline stage started or finished.
    #[serde(rename_all = "camelCase")]
    CallProgress {
        project_id: ProjectId,
        timestamp: DateTime<Utc>,
        transition_id: String,
        stage: Stage,
        status: StepStatus,
    },

    /// The transition committed.
    #[serde(rename_all = "camelCase")]
    WorkflowCompleted {
        project_id: ProjectId,
        timestamp: DateTime<Utc>,
        transition_id: String,
        action: Action,
        duration_ms: u64,
    },

    /// The transition failed; persisted state is unchanged.
    #[serde(rename_all = "camelCase")]
    WorkflowFailed {
        project_id: ProjectId,
        timestamp: DateTime<Utc>,
        transition_id: String,
        action: Action,
        stage: Stage,
        kind: ErrorKind,
        message: String,
    },

    /// The persisted state changed.
    #[serde(rename_all = "camelCase")]
    ProjectStateChanged {
        project_id: ProjectId,
        timestamp: DateTime<Utc>,
        from: LifecycleState,
        to: LifecycleState,
    },
}

impl LifecycleEvent {
    /// Project the event is about.
    #[must_use]
    pub const fn project_id(&self) -> &ProjectId {
        match self {
            Self::WorkflowStarted { project_id, .. }
            | Self::CallProgress { project_id, .. }
            | Self::WorkflowCompleted { project_id, .. }
            | Self::WorkflowFailed { project_id, .. }
            | Self::ProjectStateChanged { project_id, .. } => project_id,
        }
    }

    /// Event name as serialised.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::WorkflowStarted { .. } => "workflow_started",
            Self::CallProgress { .. } => "call_progress",
            Self::WorkflowCompleted { .. } => "workflow_completed",
            Self::WorkflowFailed { .. } => "workflow_failed",
            Self::ProjectStateChanged { .. } => "project_state_changed",
        }
    }
}

/// Receives lifecycle events.
pub trait EventSink: Send + Sync {
    /// Publish an event. Must not block.
    fn emit(&self, event: LifecycleEvent);
}

/// Broadcast-channel event bus.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<LifecycleEvent>,
}

impl EventBus {
    /// Create a bus buffering `capacity` events per subscriber.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Subscribe to events published from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.sender.subscribe()
    }
}

impl EventSink for EventBus {
    fn emit(&self, event: LifecycleEvent) {
        // No subscribers is not an error.
        let _ = self.sender.send(event);
    }
}
