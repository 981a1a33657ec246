//! Resource loading: the read-only inputs of a transition.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::error::{ControlError, ControlResult};
use crate::ports::PortAllocator;
use crate::registry::ProjectRegistry;
use crate::runtime::{ContainerRuntime, RuntimeStatus};
use crate::templates::{TemplateDocument, TemplateSource, DEFAULT_TEMPLATE};
use crate::types::{Action, LifecycleState, Project, ProjectId};
use crate::workflow::TransitionConfig;

/// Everything a transition reads before generating artifacts.
#[derive(Debug, Clone)]
pub struct LoadedContext {
    /// Target project.
    pub project_id: ProjectId,
    /// Requested action.
    pub action: Action,
    /// Persisted project, `None` if it does not exist.
    pub project: Option<Project>,
    /// Template requested by CREATE, or the one the project was created
    /// from for actions that change content. `None` if it does not exist.
    pub template: Option<TemplateDocument>,
    /// Name of that template.
    pub template_name: Option<String>,
    /// Runtime resources currently held by the project.
    pub runtime: Option<RuntimeStatus>,
    /// Ports currently reserved for the project.
    pub reserved_ports: Vec<u16>,
    /// Clock reading used for timestamps in generated documents.
    pub now: DateTime<Utc>,
}

impl LoadedContext {
    /// The project's persisted state (`Void` if absent).
    #[must_use]
    pub fn current_state(&self) -> LifecycleState {
        self.project
            .as_ref()
            .map_or(LifecycleState::Void, |p| p.state)
    }

    /// The persisted project, or a not-found error.
    pub fn require_project(&self) -> ControlResult<&Project> {
        self.project
            .as_ref()
            .ok_or_else(|| ControlError::ProjectNotFound(self.project_id.to_string()))
    }
}

/// Gathers transition inputs from the registry, runtime, allocator and
/// template source.
#[derive(Clone)]
pub struct ResourceLoader {
    registry: Arc<dyn ProjectRegistry>,
    runtime: Arc<dyn ContainerRuntime>,
    ports: Arc<dyn PortAllocator>,
    templates: Arc<dyn TemplateSource>,
}

impl ResourceLoader {
    /// Create a loader.
    #[must_use]
    pub fn new(
        registry: Arc<dyn ProjectRegistry>,
        runtime: Arc<dyn ContainerRuntime>,
        ports: Arc<dyn PortAllocator>,
        templates: Arc<dyn TemplateSource>,
    ) -> Self {
        Self {
            registry,
            runtime,
            ports,
            templates,
        }
    }

    /// Load the inputs `action` needs.
    pub async fn load(
        &self,
        project_id: &ProjectId,
        action: Action,
        config: &TransitionConfig,
    ) -> ControlResult<LoadedContext> {
        let project = self.registry.load(project_id).await?;

        let mut ctx = LoadedContext {
            project_id: project_id.clone(),
            action,
            project,
            template: None,
            template_name: None,
            runtime: None,
            reserved_ports: Vec::new(),
            now: Utc::now(),
        };

        match action {
            Action::Create => {
                let name = config
                    .template
                    .clone()
                    .unwrap_or_else(|| DEFAULT_TEMPLATE.to_owned());
                ctx.template = self.templates.get(&name).await?;
                if ctx.template.is_none() {
                    warn!(project = %project_id, template = %name, "template not found, using empty project");
                }
                ctx.template_name = Some(name);
            }
            // Later edits are checked against the variables of the
            // template the project came from.
            Action::Edit | Action::Build | Action::Update => {
                if let Some(name) = ctx.project.as_ref().map(|p| p.template.clone()) {
                    ctx.template = self.templates.get(&name).await.unwrap_or_else(|e| {
                        warn!(project = %project_id, template = %name, error = %e, "template unavailable");
                        None
                    });
                    ctx.template_name = Some(name);
                }
            }
            _ => {}
        }

        if matches!(
            action,
            Action::Start | Action::Stop | Action::Update | Action::Delete
        ) {
            ctx.runtime = Some(self.runtime.status(project_id).await?);
        }

        if matches!(
            action,
            Action::Deploy | Action::Start | Action::Stop | Action::Update | Action::Delete
        ) {
            ctx.reserved_ports = self.ports.reservations(project_id);
        }

        debug!(
            project = %project_id,
            action = %action,
            state = %ctx.current_state(),
            reserved = ?ctx.reserved_ports,
            "resources loaded"
        );
        Ok(ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::{HostPortAllocator, PortHint, PortRange, ScriptedProbe};
    use crate::registry::MemoryRegistry;
    use crate::runtime::{MemoryRuntime, NetworkSpec};
    use crate::templates::BuiltinTemplates;

    struct Fixture {
        loader: ResourceLoader,
        runtime: Arc<MemoryRuntime>,
        ports: Arc<HostPortAllocator>,
    }

    fn fixture() -> Fixture {
        let runtime = Arc::new(MemoryRuntime::new());
        let ports = Arc::new(HostPortAllocator::new(
            PortRange::new(20000, 20009).unwrap(),
            Arc::new(ScriptedProbe::new()),
        ));
        let loader = ResourceLoader::new(
            Arc::new(MemoryRegistry::new()),
            runtime.clone(),
            ports.clone(),
            Arc::new(BuiltinTemplates),
        );
        Fixture {
            loader,
            runtime,
            ports,
        }
    }

    fn id() -> ProjectId {
        ProjectId::parse("site-1").unwrap()
    }

    #[tokio::test]
    async fn create_loads_default_template() {
        let f = fixture();
        let ctx = f
            .loader
            .load(&id(), Action::Create, &TransitionConfig::default())
            .await
            .unwrap();

        assert_eq!(ctx.current_state(), LifecycleState::Void);
        assert_eq!(ctx.template.unwrap().name, "basic");
        assert_eq!(ctx.template_name.as_deref(), Some("basic"));
        assert!(ctx.runtime.is_none());
    }

    #[tokio::test]
    async fn missing_template_is_not_an_error() {
        let f = fixture();
        let config = TransitionConfig {
            template: Some("portfolio".to_owned()),
            ..TransitionConfig::default()
        };
        let ctx = f.loader.load(&id(), Action::Create, &config).await.unwrap();
        assert!(ctx.template.is_none());
    }

    #[tokio::test]
    async fn delete_loads_runtime_and_ports() {
        let f = fixture();
        f.runtime
            .ensure_network(&NetworkSpec {
                name: "hangar-site-1".to_owned(),
                project_id: id(),
            })
            .await
            .unwrap();
        f.ports.allocate(&id(), 1, &PortHint::default()).unwrap();

        let ctx = f
            .loader
            .load(&id(), Action::Delete, &TransitionConfig::default())
            .await
            .unwrap();

        assert_eq!(ctx.runtime.as_ref().unwrap().networks.len(), 1);
        assert_eq!(ctx.reserved_ports, vec![20000]);
        assert!(ctx.require_project().is_err());
    }
}
