//! Per-project transition locks.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::Notify;

use crate::error::{ControlError, ControlResult};
use crate::types::ProjectId;

/// Table of projects with a transition in flight.
///
/// Acquisition never waits: a second caller is rejected immediately.
#[derive(Debug, Default)]
pub struct ProjectLocks {
    held: DashMap<ProjectId, String>,
    released: Notify,
}

impl ProjectLocks {
    /// Create an empty lock table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock a project for a transition.
    ///
    /// The lock is released when the returned guard is dropped.
    pub fn try_acquire(
        self: &Arc<Self>,
        project: &ProjectId,
        transition_id: &str,
    ) -> ControlResult<ProjectLockGuard> {
        match self.held.entry(project.clone()) {
            Entry::Occupied(_) => Err(ControlError::ConcurrentTransition(project.to_string())),
            Entry::Vacant(entry) => {
                entry.insert(transition_id.to_owned());
                Ok(ProjectLockGuard {
                    locks: Arc::clone(self),
                    project: project.clone(),
                })
            }
        }
    }

    /// Whether a project is locked.
    #[must_use]
    pub fn is_locked(&self, project: &ProjectId) -> bool {
        self.held.contains_key(project)
    }

    /// ID of the transition holding a project's lock.
    #[must_use]
    pub fn holder(&self, project: &ProjectId) -> Option<String> {
        self.held.get(project).map(|entry| entry.value().clone())
    }

    /// Number of locked projects.
    #[must_use]
    pub fn len(&self) -> usize {
        self.held.len()
    }

    /// Whether no project is locked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.held.is_empty()
    }

    /// Wait until some lock is released.
    pub async fn released(&self) {
        self.released.notified().await;
    }
}

/// Holds a project lock until dropped.
#[derive(Debug)]
pub struct ProjectLockGuard {
    locks: Arc<ProjectLocks>,
    project: ProjectId,
}

impl Drop for ProjectLockGuard {
    fn drop(&mut self) {
        self.locks.held.remove(&self.project);
        self.locks.released.notify_waiters();
    }
}
