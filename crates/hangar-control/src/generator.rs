//! Artifact generation.
//!
//! The generator is a pure function of the loaded context and the caller's
//! transition config: it never talks to collaborators and reads the clock
//! only through [`LoadedContext::now`].

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::config::RuntimeConfig;
use crate::error::{ControlError, ControlResult};
use crate::loader::LoadedContext;
use crate::runtime::{ContainerSpec, ImageSpec, NetworkSpec, VolumeMount, VolumeSpec};
use crate::templates::TemplateDocument;
use crate::tree::{walk_page, walk_pages, PageStats};
use crate::types::{
    Action, BuildManifest, ContainerBinding, DeploymentBinding, LifecycleState, Page, Project,
    ProjectId, Route,
};
use crate::workflow::TransitionConfig;

/// Version stamped on new project documents.
pub const DOCUMENT_VERSION: &str = "1.0.0";

/// Mount point of the project data volume.
pub const DATA_MOUNT: &str = "/data";

/// Settings that shape generated container specs.
#[derive(Debug, Clone)]
pub struct GeneratorOptions {
    /// Base image for the `web` service.
    pub web_image: String,
    /// Image for the `api` service.
    pub api_image: String,
    /// Container port of the `web` service.
    pub web_port: u16,
    /// Container port of the `api` service.
    pub api_port: u16,
}

impl From<&RuntimeConfig> for GeneratorOptions {
    fn from(config: &RuntimeConfig) -> Self {
        Self {
            web_image: config.web_image.clone(),
            api_image: config.api_image.clone(),
            web_port: config.web_port,
            api_port: config.api_port,
        }
    }
}

impl Default for GeneratorOptions {
    fn default() -> Self {
        Self::from(&RuntimeConfig::default())
    }
}

// =============================================================================
// Artifacts
// =============================================================================

/// Output of the generate stage.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Artifact {
    /// A new project document (CREATE, EDIT, BUILD, REVERT).
    Document(Project),
    /// Runtime resources to provision (DEPLOY).
    Deployment(DeploymentPlan),
    /// Containers to start (START).
    Start(StartPlan),
    /// Containers to stop (STOP).
    Stop(StopPlan),
    /// Previous and next deployment (UPDATE).
    Update(UpdatePlan),
    /// Resources to tear down (DELETE).
    Teardown(TeardownPlan),
}

impl Artifact {
    /// The project document the transition commits, before the state
    /// machine applies the new state. `None` for DELETE.
    #[must_use]
    pub fn document(&self) -> Option<&Project> {
        match self {
            Self::Document(project) => Some(project),
            Self::Deployment(plan) => Some(&plan.project),
            Self::Start(plan) => Some(&plan.project),
            Self::Stop(plan) => Some(&plan.project),
            Self::Update(plan) => Some(&plan.next.project),
            Self::Teardown(_) => None,
        }
    }
}

/// A service the deployment runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServicePlan {
    /// Logical service name.
    pub service: String,
    /// Image reference.
    pub image: String,
    /// Container port.
    pub container_port: u16,
}

/// Runtime resources for a built project, before host ports are known.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentPlan {
    /// Project network.
    pub network: NetworkSpec,
    /// Project volumes.
    pub volumes: Vec<VolumeSpec>,
    /// Site image.
    pub image: ImageSpec,
    /// Services in start order.
    pub services: Vec<ServicePlan>,
    /// Deployment revision the plan produces.
    pub revision: u32,
    /// Document to commit; its `deployment` is filled in by [`Self::bind`].
    pub project: Project,
}

/// A deployment plan bound to host ports.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BoundDeployment {
    /// Containers to create.
    pub containers: Vec<ContainerSpec>,
    /// Binding recorded on the project.
    pub binding: DeploymentBinding,
}

impl DeploymentPlan {
    /// Host ports the plan needs.
    #[must_use]
    pub fn port_count(&self) -> usize {
        self.services.len()
    }

    /// Bind the plan to allocated host ports, one per service in order.
    pub fn bind(&self, ports: &[u16]) -> ControlResult<BoundDeployment> {
        if ports.len() != self.services.len() {
            return Err(ControlError::allocation(format!(
                "deployment needs {} ports, got {}",
                self.services.len(),
                ports.len()
            )));
        }

        let containers: Vec<ContainerBinding> = self
            .services
            .iter()
            .zip(ports)
            .map(|(service, &host_port)| ContainerBinding {
                name: container_name(&self.project.id, &service.service),
                service: service.service.clone(),
                image: service.image.clone(),
                container_port: service.container_port,
                host_port,
            })
            .collect();

        let binding = DeploymentBinding {
            image_tag: self.image.reference.clone(),
            network: self.network.name.clone(),
            volumes: self.volumes.iter().map(|v| v.name.clone()).collect(),
            containers,
            revision: self.revision,
        };

        Ok(BoundDeployment {
            containers: container_specs(&self.project.id, &binding),
            binding,
        })
    }

    /// The document to commit once bound.
    #[must_use]
    pub fn bound_document(&self, bound: &BoundDeployment) -> Project {
        let mut project = self.project.clone();
        project.deployment = Some(bound.binding.clone());
        project
    }
}

/// Containers to start.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartPlan {
    /// Binding recorded by the last DEPLOY, START or UPDATE.
    pub binding: DeploymentBinding,
    /// Containers of the binding missing from the runtime.
    pub missing: Vec<String>,
    /// Document to commit; the binding is refreshed if ports change.
    pub project: Project,
}

impl StartPlan {
    /// Host ports recorded in the binding, in container order.
    #[must_use]
    pub fn ports(&self) -> Vec<u16> {
        self.binding.containers.iter().map(|c| c.host_port).collect()
    }

    /// Container names in start order.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.binding.containers.iter().map(|c| c.name.clone()).collect()
    }

    /// Rebind the containers to new host ports.
    #[must_use]
    pub fn rebind(&self, ports: &[u16]) -> DeploymentBinding {
        let mut binding = self.binding.clone();
        for (container, &port) in binding.containers.iter_mut().zip(ports) {
            container.host_port = port;
        }
        binding
    }
}

/// Containers to stop.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StopPlan {
    /// Containers to stop.
    pub names: Vec<String>,
    /// Ports to release once stopped.
    pub ports: Vec<u16>,
    /// Document to commit.
    pub project: Project,
}

/// Replacement of a deployment.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePlan {
    /// Binding currently in place.
    pub previous: DeploymentBinding,
    /// Containers of `previous`.
    pub previous_containers: Vec<ContainerSpec>,
    /// Deployment to roll out.
    pub next: DeploymentPlan,
    /// Whether new containers are started (the project is online).
    pub restart: bool,
}

/// Resources to remove.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TeardownPlan {
    /// Running containers, stopped before removal.
    pub running: Vec<String>,
    /// Reserved ports to release.
    pub ports: Vec<u16>,
    /// Whether any runtime resource exists.
    pub has_resources: bool,
}

// =============================================================================
// Naming
// =============================================================================

/// Name of a project's network.
#[must_use]
pub fn network_name(project: &ProjectId) -> String {
    format!("hangar-{project}")
}

/// Name of a project's data volume.
#[must_use]
pub fn volume_name(project: &ProjectId) -> String {
    format!("hangar-{project}-data")
}

/// Name of a project's container for a service.
#[must_use]
pub fn container_name(project: &ProjectId, service: &str) -> String {
    format!("hangar-{project}-{service}")
}

/// Image tag of a project's build.
#[must_use]
pub fn image_tag(project: &ProjectId, build: &BuildManifest) -> String {
    format!("hangar/{project}:{}", build.short_digest())
}

/// Container specs described by a binding.
#[must_use]
pub fn container_specs(project: &ProjectId, binding: &DeploymentBinding) -> Vec<ContainerSpec> {
    let mounts: Vec<VolumeMount> = binding
        .volumes
        .iter()
        .map(|volume| VolumeMount {
            volume: volume.clone(),
            target: DATA_MOUNT.to_owned(),
        })
        .collect();

    binding
        .containers
        .iter()
        .map(|c| ContainerSpec {
            name: c.name.clone(),
            project_id: project.clone(),
            service: c.service.clone(),
            image: c.image.clone(),
            container_port: c.container_port,
            host_port: c.host_port,
            network: binding.network.clone(),
            mounts: mounts.clone(),
        })
        .collect()
}

// =============================================================================
// Generator
// =============================================================================

/// Produces transition artifacts.
#[derive(Debug, Clone, Default)]
pub struct ArtifactGenerator {
    options: GeneratorOptions,
}

impl ArtifactGenerator {
    /// Create a generator.
    #[must_use]
    pub const fn new(options: GeneratorOptions) -> Self {
        Self { options }
    }

    /// Generate the artifact for the context's action.
    pub fn generate(
        &self,
        ctx: &LoadedContext,
        config: &TransitionConfig,
    ) -> ControlResult<Artifact> {
        match ctx.action {
            Action::Create => Ok(Artifact::Document(self.create(ctx, config))),
            Action::Edit => {
                let mut project = ctx.require_project()?.clone();
                apply_edits(&mut project, config);
                project.build = None;
                Ok(Artifact::Document(project))
            }
            Action::Build => {
                let mut project = ctx.require_project()?.clone();
                project.build = Some(build_manifest(&project.pages, ctx)?);
                Ok(Artifact::Document(project))
            }
            Action::Revert => {
                let mut project = ctx.require_project()?.clone();
                project.build = None;
                Ok(Artifact::Document(project))
            }
            Action::Deploy => {
                let project = ctx.require_project()?.clone();
                Ok(Artifact::Deployment(self.deployment(project, 1)?))
            }
            Action::Start => self.start(ctx).map(Artifact::Start),
            Action::Stop => self.stop(ctx).map(Artifact::Stop),
            Action::Update => self.update(ctx, config).map(Artifact::Update),
            Action::Delete => Ok(Artifact::Teardown(Self::teardown(ctx))),
        }
    }

    fn create(&self, ctx: &LoadedContext, config: &TransitionConfig) -> Project {
        let template_name = ctx
            .template_name
            .clone()
            .unwrap_or_else(|| crate::templates::DEFAULT_TEMPLATE.to_owned());
        let pages = config
            .pages
            .clone()
            .or_else(|| ctx.template.as_ref().and_then(TemplateDocument::pages))
            .unwrap_or_default();

        Project {
            id: ctx.project_id.clone(),
            name: config
                .name
                .clone()
                .unwrap_or_else(|| ctx.project_id.to_string()),
            state: LifecycleState::Draft,
            version: DOCUMENT_VERSION.to_owned(),
            template: template_name,
            pages,
            created: ctx.now,
            last_modified: ctx.now,
            build: None,
            deployment: None,
        }
    }

    fn deployment(&self, project: Project, revision: u32) -> ControlResult<DeploymentPlan> {
        let build = project.build.as_ref().ok_or_else(|| {
            ControlError::validation(format!("project {} has no build", project.id))
        })?;

        let mut stats = PageStats::default();
        walk_pages(&project.pages, &mut stats);

        let reference = image_tag(&project.id, build);
        let mut services = vec![ServicePlan {
            service: "web".to_owned(),
            image: reference.clone(),
            container_port: self.options.web_port,
        }];
        if stats.forms > 0 {
            services.push(ServicePlan {
                service: "api".to_owned(),
                image: self.options.api_image.clone(),
                container_port: self.options.api_port,
            });
        }

        Ok(DeploymentPlan {
            network: NetworkSpec {
                name: network_name(&project.id),
                project_id: project.id.clone(),
            },
            volumes: vec![VolumeSpec {
                name: volume_name(&project.id),
                project_id: project.id.clone(),
            }],
            image: ImageSpec {
                reference,
                base: self.options.web_image.clone(),
                project_id: project.id.clone(),
            },
            services,
            revision,
            project,
        })
    }

    fn start(&self, ctx: &LoadedContext) -> ControlResult<StartPlan> {
        let project = ctx.require_project()?.clone();
        let binding = require_binding(&project)?.clone();

        let present = ctx
            .runtime
            .as_ref()
            .map(crate::runtime::RuntimeStatus::container_names)
            .unwrap_or_default();
        let missing = binding
            .containers
            .iter()
            .filter(|c| !present.contains(&c.name))
            .map(|c| c.name.clone())
            .collect();

        Ok(StartPlan {
            binding,
            missing,
            project,
        })
    }

    fn stop(&self, ctx: &LoadedContext) -> ControlResult<StopPlan> {
        let project = ctx.require_project()?.clone();
        let binding = require_binding(&project)?;

        Ok(StopPlan {
            names: binding.containers.iter().map(|c| c.name.clone()).collect(),
            ports: ctx.reserved_ports.clone(),
            project,
        })
    }

    fn update(&self, ctx: &LoadedContext, config: &TransitionConfig) -> ControlResult<UpdatePlan> {
        let mut project = ctx.require_project()?.clone();
        let previous = require_binding(&project)?.clone();
        let restart = project.state == LifecycleState::Online;

        apply_edits(&mut project, config);
        project.build = Some(build_manifest(&project.pages, ctx)?);

        let next = self.deployment(project, previous.revision.saturating_add(1))?;
        Ok(UpdatePlan {
            previous_containers: container_specs(&ctx.project_id, &previous),
            previous,
            next,
            restart,
        })
    }

    fn teardown(ctx: &LoadedContext) -> TeardownPlan {
        let status = ctx.runtime.clone().unwrap_or_default();
        TeardownPlan {
            running: status.running(),
            ports: ctx.reserved_ports.clone(),
            has_resources: !status.is_empty(),
        }
    }
}

fn require_binding(project: &Project) -> ControlResult<&DeploymentBinding> {
    project.deployment.as_ref().ok_or_else(|| {
        ControlError::validation(format!("project {} has no deployment", project.id))
    })
}

fn apply_edits(project: &mut Project, config: &TransitionConfig) {
    if let Some(name) = &config.name {
        project.name.clone_from(name);
    }
    if let Some(pages) = &config.pages {
        project.pages.clone_from(pages);
    }
}

/// Build a manifest for the given pages.
///
/// The digest covers the canonical JSON encoding of the pages, so two builds
/// of the same content produce the same image tag.
pub fn build_manifest(pages: &[Page], ctx: &LoadedContext) -> ControlResult<BuildManifest> {
    if pages.is_empty() {
        return Err(ControlError::validation(format!(
            "project {} has no pages to build",
            ctx.project_id
        )));
    }

    let canonical = serde_json::to_vec(pages)?;
    let digest = hex::encode(Sha256::digest(&canonical));

    let routes = pages
        .iter()
        .enumerate()
        .map(|(index, page)| {
            let mut stats = PageStats::default();
            walk_page(page, &mut stats);
            Route {
                path: page.path.clone().unwrap_or_else(|| {
                    if index == 0 {
                        "/".to_owned()
                    } else {
                        format!("/{}", page.id)
                    }
                }),
                page_id: page.id.clone(),
                components: stats.components_per_page.first().map_or(0, |(_, n)| *n),
            }
        })
        .collect();

    Ok(BuildManifest {
        digest,
        routes,
        built_at: ctx.now,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{ContainerState, ContainerStatus, RuntimeStatus};
    use crate::templates::BuiltinTemplates;
    use crate::templates::TemplateSource;
    use chrono::Utc;

    fn id() -> ProjectId {
        ProjectId::parse("site-1").unwrap()
    }

    fn ctx(action: Action, project: Option<Project>) -> LoadedContext {
        LoadedContext {
            project_id: id(),
            action,
            project,
            template: None,
            template_name: None,
            runtime: None,
            reserved_ports: vec![],
            now: Utc::now(),
        }
    }

    async fn created() -> Project {
        let mut ctx = ctx(Action::Create, None);
        ctx.template = BuiltinTemplates.get("basic").await.unwrap();
        ctx.template_name = Some("basic".to_owned());
        match ArtifactGenerator::default()
            .generate(&ctx, &TransitionConfig::default())
            .unwrap()
        {
            Artifact::Document(project) => project,
            other => panic!("unexpected artifact {other:?}"),
        }
    }

    async fn built() -> Project {
        let mut project = created().await;
        let ctx = ctx(Action::Build, Some(project.clone()));
        project.build = Some(build_manifest(&project.pages, &ctx).unwrap());
        project.state = LifecycleState::Built;
        project
    }

    #[tokio::test]
    async fn create_uses_template_pages() {
        let project = created().await;
        assert_eq!(project.id, id());
        assert_eq!(project.name, "site-1");
        assert_eq!(project.template, "basic");
        assert_eq!(project.state, LifecycleState::Draft);
        assert_eq!(project.pages.len(), 2);
        assert_eq!(project.created, project.last_modified);
    }

    #[test]
    fn create_without_template_is_empty() {
        let ctx = ctx(Action::Create, None);
        let config = TransitionConfig {
            name: Some("My Site".to_owned()),
            ..TransitionConfig::default()
        };
        let Artifact::Document(project) = ArtifactGenerator::default().generate(&ctx, &config).unwrap()
        else {
            panic!("expected document");
        };
        assert_eq!(project.name, "My Site");
        assert!(project.pages.is_empty());
    }

    #[tokio::test]
    async fn build_digest_is_deterministic() {
        let project = created().await;
        let a = build_manifest(&project.pages, &ctx(Action::Build, None)).unwrap();
        let b = build_manifest(&project.pages, &ctx(Action::Build, None)).unwrap();

        assert_eq!(a.digest, b.digest);
        assert_eq!(a.digest.len(), 64);
        assert_eq!(a.routes[0].path, "/");
        assert_eq!(a.routes[1].path, "/contact");
        assert_eq!(a.routes[1].components, 3);
    }

    #[test]
    fn build_without_pages_fails() {
        assert!(build_manifest(&[], &ctx(Action::Build, None)).is_err());
    }

    #[tokio::test]
    async fn deployment_adds_api_for_forms() {
        let project = built().await;
        let artifact = ArtifactGenerator::default()
            .generate(&ctx(Action::Deploy, Some(project.clone())), &TransitionConfig::default())
            .unwrap();

        let Artifact::Deployment(plan) = artifact else {
            panic!("expected deployment");
        };
        let services: Vec<_> = plan.services.iter().map(|s| s.service.as_str()).collect();
        assert_eq!(services, vec!["web", "api"]);
        assert_eq!(plan.port_count(), 2);
        assert!(plan.image.reference.starts_with("hangar/site-1:"));
        assert_eq!(plan.image.reference.len(), "hangar/site-1:".len() + 12);

        let bound = plan.bind(&[20000, 20001]).unwrap();
        assert_eq!(bound.containers[0].name, "hangar-site-1-web");
        assert_eq!(bound.containers[1].host_port, 20001);
        assert_eq!(bound.binding.revision, 1);
        assert!(plan.bind(&[20000]).is_err());
    }

    #[tokio::test]
    async fn deploy_requires_build() {
        let project = created().await;
        let result = ArtifactGenerator::default()
            .generate(&ctx(Action::Deploy, Some(project)), &TransitionConfig::default());
        assert!(matches!(result, Err(ControlError::Validation { .. })));
    }

    #[tokio::test]
    async fn start_reports_missing_containers() {
        let mut project = built().await;
        let generator = ArtifactGenerator::default();
        let Artifact::Deployment(plan) = generator
            .generate(&ctx(Action::Deploy, Some(project.clone())), &TransitionConfig::default())
            .unwrap()
        else {
            panic!("expected deployment");
        };
        let bound = plan.bind(&[20000, 20001]).unwrap();
        project.deployment = Some(bound.binding);
        project.state = LifecycleState::Offline;

        let mut ctx = ctx(Action::Start, Some(project));
        ctx.runtime = Some(RuntimeStatus {
            containers: vec![ContainerStatus {
                name: "hangar-site-1-web".to_owned(),
                state: ContainerState::Created,
            }],
            ..RuntimeStatus::default()
        });

        let Artifact::Start(start) = generator.generate(&ctx, &TransitionConfig::default()).unwrap()
        else {
            panic!("expected start plan");
        };
        assert_eq!(start.missing, vec!["hangar-site-1-api".to_owned()]);
        assert_eq!(start.ports(), vec![20000, 20001]);
        assert_eq!(start.rebind(&[20005, 20006]).containers[1].host_port, 20006);
    }

    #[tokio::test]
    async fn update_bumps_revision_and_applies_edits() {
        let mut project = built().await;
        let generator = ArtifactGenerator::default();
        let Artifact::Deployment(plan) = generator
            .generate(&ctx(Action::Deploy, Some(project.clone())), &TransitionConfig::default())
            .unwrap()
        else {
            panic!("expected deployment");
        };
        project.deployment = Some(plan.bind(&[20000, 20001]).unwrap().binding);
        project.state = LifecycleState::Online;

        let config = TransitionConfig {
            pages: Some(vec![project.pages[0].clone()]),
            ..TransitionConfig::default()
        };
        let Artifact::Update(update) = generator
            .generate(&ctx(Action::Update, Some(project)), &config)
            .unwrap()
        else {
            panic!("expected update plan");
        };

        assert!(update.restart);
        assert_eq!(update.next.revision, 2);
        // The home page has no form, so the api service goes away.
        assert_eq!(update.next.port_count(), 1);
        assert_eq!(update.previous_containers.len(), 2);
        assert_ne!(update.next.image.reference, update.previous.image_tag);
    }

    #[test]
    fn teardown_of_missing_project_is_empty() {
        let Artifact::Teardown(plan) = ArtifactGenerator::default()
            .generate(&ctx(Action::Delete, None), &TransitionConfig::default())
            .unwrap()
        else {
            panic!("expected teardown");
        };
        assert!(!plan.has_resources);
        assert!(plan.running.is_empty());
    }
}
