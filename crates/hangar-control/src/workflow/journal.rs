//! Side-effect journal and compensation.
//!
//! Every side effect is recorded before it is applied, so a failure or a
//! timeout part-way through an adapter call still leaves an entry whose
//! inverse undoes it. Inverses are idempotent and run newest first.

use tracing::{info, warn};

use crate::error::ControlResult;
use crate::ports::PortAllocator;
use crate::runtime::{ContainerRuntime, ContainerSpec};
use crate::types::ProjectId;

/// A side effect applied by a transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Ports newly reserved for the project.
    Reserved(Vec<u16>),
    /// Network, volumes, image and containers provisioned from scratch.
    Provisioned,
    /// Containers started.
    Started(Vec<String>),
    /// Containers stopped.
    Stopped(Vec<String>),
    /// Containers removed and replaced by new ones.
    Replaced {
        /// Containers that were removed.
        removed: Vec<ContainerSpec>,
        /// Names of the replacements.
        created: Vec<String>,
        /// Whether the removed containers were running.
        restart: bool,
    },
}

impl Effect {
    /// Short label for logs and rollback reports.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Reserved(_) => "release ports",
            Self::Provisioned => "remove resources",
            Self::Started(_) => "stop containers",
            Self::Stopped(_) => "restart containers",
            Self::Replaced { .. } => "restore containers",
        }
    }
}

/// Ordered record of applied side effects.
#[derive(Debug, Default)]
pub struct Journal {
    effects: Vec<Effect>,
}

impl Journal {
    /// Record an effect about to be applied.
    pub fn record(&mut self, effect: Effect) {
        self.effects.push(effect);
    }

    /// Whether nothing was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.effects.is_empty()
    }

    /// Recorded effects, oldest first.
    #[must_use]
    pub fn effects(&self) -> &[Effect] {
        &self.effects
    }

    /// Undo every recorded effect, newest first.
    ///
    /// All inverses are attempted even if some fail; the failures are
    /// returned as messages.
    pub async fn compensate(
        &self,
        project: &ProjectId,
        runtime: &dyn ContainerRuntime,
        ports: &dyn PortAllocator,
    ) -> Vec<String> {
        let mut failures = Vec::new();

        for effect in self.effects.iter().rev() {
            if let Err(e) = undo(effect, project, runtime, ports).await {
                warn!(project = %project, effect = effect.label(), error = %e, "compensation failed");
                failures.push(format!("{}: {e}", effect.label()));
            }
        }

        if failures.is_empty() {
            info!(project = %project, effects = self.effects.len(), "side effects rolled back");
        }
        failures
    }
}

async fn undo(
    effect: &Effect,
    project: &ProjectId,
    runtime: &dyn ContainerRuntime,
    ports: &dyn PortAllocator,
) -> ControlResult<()> {
    match effect {
        Effect::Reserved(reserved) => ports.release(project, reserved),
        Effect::Provisioned => runtime.remove_all(project).await,
        Effect::Started(names) => runtime.stop_containers(project, names).await,
        Effect::Stopped(names) => runtime.run_containers(project, names).await,
        Effect::Replaced {
            removed,
            created,
            restart,
        } => {
            runtime.remove_containers(project, created).await?;
            if removed.is_empty() {
                return Ok(());
            }
            runtime.create_containers(removed).await?;
            if *restart {
                let names: Vec<String> = removed.iter().map(|c| c.name.clone()).collect();
                runtime.run_containers(project, &names).await?;
            }
            Ok(())
        }
    }
}
