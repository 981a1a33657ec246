//! Container runtime adapters.
//!
//! The orchestrator describes the resources a project needs declaratively and
//! hands them to a [`ContainerRuntime`]. Every call is idempotent: ensuring a
//! network that exists, or removing a container that is gone, succeeds
//! without changing anything. All resources carry the owning project so that
//! [`ContainerRuntime::remove_all`] can tear them down without a spec.

mod docker;
mod memory;

pub use docker::DockerRuntime;
pub use memory::{MemoryRuntime, RuntimeOp};

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::{RuntimeConfig, RuntimeType};
use crate::error::ControlResult;
use crate::types::ProjectId;

/// Label attached to every runtime resource, valued with the project ID.
pub const PROJECT_LABEL: &str = "hangar.project";

/// A project network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkSpec {
    /// Network name.
    pub name: String,
    /// Owning project.
    pub project_id: ProjectId,
}

/// A project volume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeSpec {
    /// Volume name.
    pub name: String,
    /// Owning project.
    pub project_id: ProjectId,
}

/// The image serving a project's built site.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageSpec {
    /// Tag to produce, `hangar/<id>:<short digest>`.
    pub reference: String,
    /// Base image the tag is derived from.
    pub base: String,
    /// Owning project.
    pub project_id: ProjectId,
}

/// A volume mounted into a container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeMount {
    /// Volume name.
    pub volume: String,
    /// Mount point inside the container.
    pub target: String,
}

/// A container to create.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerSpec {
    /// Container name, unique on the host.
    pub name: String,
    /// Owning project.
    pub project_id: ProjectId,
    /// Logical service (`web`, `api`).
    pub service: String,
    /// Image reference.
    pub image: String,
    /// Port the service listens on inside the container.
    pub container_port: u16,
    /// Host port published for `container_port`.
    pub host_port: u16,
    /// Network the container joins.
    pub network: String,
    /// Volume mounts.
    #[serde(default)]
    pub mounts: Vec<VolumeMount>,
}

/// Observed container state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerState {
    /// Created but never started.
    Created,
    /// Running.
    Running,
    /// Stopped after running.
    Exited,
}

/// A container as reported by the runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerStatus {
    /// Container name.
    pub name: String,
    /// Current state.
    pub state: ContainerState,
}

/// Everything the runtime holds for one project.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeStatus {
    /// Networks.
    pub networks: Vec<String>,
    /// Volumes.
    pub volumes: Vec<String>,
    /// Image references.
    pub images: Vec<String>,
    /// Containers.
    pub containers: Vec<ContainerStatus>,
}

impl RuntimeStatus {
    /// Names of running containers.
    #[must_use]
    pub fn running(&self) -> Vec<String> {
        self.containers
            .iter()
            .filter(|c| c.state == ContainerState::Running)
            .map(|c| c.name.clone())
            .collect()
    }

    /// Names of all containers.
    #[must_use]
    pub fn container_names(&self) -> Vec<String> {
        self.containers.iter().map(|c| c.name.clone()).collect()
    }

    /// Whether the project holds no runtime resources.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.networks.is_empty()
            && self.volumes.is_empty()
            && self.images.is_empty()
            && self.containers.is_empty()
    }
}

/// Details of an ensured image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageInfo {
    /// Image reference.
    pub reference: String,
    /// Image size in bytes, 0 if unknown.
    pub size_bytes: u64,
}

/// Adapter over a container runtime.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Ensure a network exists. Returns `true` if it was created.
    async fn ensure_network(&self, spec: &NetworkSpec) -> ControlResult<bool>;

    /// Ensure a volume exists. Returns `true` if it was created.
    async fn ensure_volume(&self, spec: &VolumeSpec) -> ControlResult<bool>;

    /// Ensure an image is present locally.
    async fn ensure_image(&self, spec: &ImageSpec) -> ControlResult<ImageInfo>;

    /// Create containers without starting them. Existing containers with the
    /// same name are left as they are.
    async fn create_containers(&self, specs: &[ContainerSpec]) -> ControlResult<()>;

    /// Start containers.
    async fn run_containers(&self, project: &ProjectId, names: &[String]) -> ControlResult<()>;

    /// Stop containers.
    async fn stop_containers(&self, project: &ProjectId, names: &[String]) -> ControlResult<()>;

    /// Remove containers, stopping them first if needed.
    async fn remove_containers(&self, project: &ProjectId, names: &[String])
        -> ControlResult<()>;

    /// Remove every container, network, volume and image of a project.
    async fn remove_all(&self, project: &ProjectId) -> ControlResult<()>;

    /// Report the project's runtime resources.
    async fn status(&self, project: &ProjectId) -> ControlResult<RuntimeStatus>;

    /// Wait until the named containers are running and healthy.
    ///
    /// Fails with a timeout error if they are not healthy within `timeout`.
    async fn wait_healthy(
        &self,
        project: &ProjectId,
        names: &[String],
        timeout: Duration,
    ) -> ControlResult<()>;
}

/// Create a container runtime from configuration.
#[must_use]
pub fn create_runtime(config: &RuntimeConfig) -> Arc<dyn ContainerRuntime> {
    match config.runtime_type {
        RuntimeType::Docker => Arc::new(DockerRuntime::new(config)),
        RuntimeType::Mock => Arc::new(MemoryRuntime::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_reports_running_containers() {
        let status = RuntimeStatus {
            networks: vec!["hangar-site-1".to_owned()],
            containers: vec![
                ContainerStatus {
                    name: "hangar-site-1-web".to_owned(),
                    state: ContainerState::Running,
                },
                ContainerStatus {
                    name: "hangar-site-1-api".to_owned(),
                    state: ContainerState::Created,
                },
            ],
            ..RuntimeStatus::default()
        };

        assert_eq!(status.running(), vec!["hangar-site-1-web".to_owned()]);
        assert_eq!(status.container_names().len(), 2);
        assert!(!status.is_empty());
        assert!(RuntimeStatus::default().is_empty());
    }
}
