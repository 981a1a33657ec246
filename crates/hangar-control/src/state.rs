//! Project lifecycle state machine.
//!
//! The transition table below is the only place lifecycle edges are defined.
//! Everything else (the coordinator, the API's action menus) derives from it.
//!
//! ```text
//!            CREATE          BUILD            DEPLOY            START
//!   VOID ──────────▶ DRAFT ────────▶ BUILT ──────────▶ OFFLINE ────────▶ ONLINE
//!                    │  ▲  ◀──────── │                 │   ▲  ◀────────  │
//!                    └──┘   REVERT                     └───┘    STOP     └──┐
//!                    EDIT                              UPDATE        UPDATE ◀┘
//!
//!   any ── DELETE ──▶ (record removed)
//! ```

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::error::{ControlError, ControlResult};
use crate::types::{Action, LifecycleState, Project};

/// Where a legal transition leads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "state", rename_all = "snake_case")]
pub enum Target {
    /// The project moves to this state.
    State(LifecycleState),
    /// The project record is removed.
    Removed,
}

impl Target {
    /// The state a caller observes after the transition.
    #[must_use]
    pub const fn observed_state(&self) -> LifecycleState {
        match self {
            Self::State(state) => *state,
            Self::Removed => LifecycleState::Void,
        }
    }
}

/// Answer to a legality query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionCheck {
    /// Whether the action is allowed.
    pub allowed: bool,
    /// Target if allowed.
    pub target: Option<Target>,
}

/// Closed set of lifecycle edges. `Delete` is allowed from any state and is
/// handled separately.
const TRANSITIONS: &[(LifecycleState, Action, LifecycleState)] = &[
    (LifecycleState::Void, Action::Create, LifecycleState::Draft),
    (LifecycleState::Draft, Action::Edit, LifecycleState::Draft),
    (LifecycleState::Draft, Action::Build, LifecycleState::Built),
    (LifecycleState::Built, Action::Revert, LifecycleState::Draft),
    (LifecycleState::Built, Action::Deploy, LifecycleState::Offline),
    (LifecycleState::Offline, Action::Start, LifecycleState::Online),
    (LifecycleState::Offline, Action::Update, LifecycleState::Offline),
    (LifecycleState::Online, Action::Stop, LifecycleState::Offline),
    (LifecycleState::Online, Action::Update, LifecycleState::Online),
];

/// The authoritative transition-legality table.
#[derive(Debug, Clone, Copy, Default)]
pub struct StateMachine;

impl StateMachine {
    /// Create a state machine.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Check whether `action` is allowed from `current`.
    #[must_use]
    pub fn can_transition(&self, current: LifecycleState, action: Action) -> TransitionCheck {
        let target = if action == Action::Delete {
            Some(Target::Removed)
        } else {
            TRANSITIONS
                .iter()
                .find(|(from, a, _)| *from == current && *a == action)
                .map(|(_, _, to)| Target::State(*to))
        };

        TransitionCheck {
            allowed: target.is_some(),
            target,
        }
    }

    /// Resolve the target of a transition or fail with an illegal-transition error.
    pub fn target(&self, current: LifecycleState, action: Action) -> ControlResult<Target> {
        self.can_transition(current, action)
            .target
            .ok_or(ControlError::IllegalTransition {
                from: current,
                action,
            })
    }

    /// Actions available from a state, in table order.
    #[must_use]
    pub fn available_actions(&self, current: LifecycleState) -> Vec<Action> {
        Action::ALL
            .into_iter()
            .filter(|action| self.can_transition(current, *action).allowed)
            .collect()
    }

    /// Apply a transition to a generated document.
    ///
    /// `from` is the state the persisted project was in when the transition
    /// started (`Void` for a project that does not exist yet). The returned
    /// document carries the target state and a `last_modified` strictly
    /// greater than the document's previous value. Pure: nothing is persisted.
    pub fn apply_transition(
        &self,
        from: LifecycleState,
        mut document: Project,
        action: Action,
        at: DateTime<Utc>,
    ) -> ControlResult<Project> {
        let target = self.target(from, action)?;

        document.state = target.observed_state();
        document.last_modified = if from == LifecycleState::Void {
            at
        } else {
            at.max(document.last_modified + Duration::milliseconds(1))
        };

        Ok(document)
    }
}
