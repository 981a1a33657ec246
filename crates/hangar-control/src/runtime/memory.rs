//! In-memory container runtime for testing.
//!
//! Keeps per-project resources in a map and supports fault injection so that
//! tests can drive the coordinator's retry, timeout and rollback paths.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{ControlError, ControlResult};
use crate::types::ProjectId;

use super::{
    ContainerRuntime, ContainerSpec, ContainerState, ContainerStatus, ImageInfo, ImageSpec,
    NetworkSpec, RuntimeStatus, VolumeSpec,
};

/// Runtime operations that can be counted and faulted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuntimeOp {
    /// `ensure_network`
    EnsureNetwork,
    /// `ensure_volume`
    EnsureVolume,
    /// `ensure_image`
    EnsureImage,
    /// `create_containers`
    CreateContainers,
    /// `run_containers`
    RunContainers,
    /// `stop_containers`
    StopContainers,
    /// `remove_containers`
    RemoveContainers,
    /// `remove_all`
    RemoveAll,
    /// `status`
    Status,
    /// `wait_healthy`
    WaitHealthy,
}

#[derive(Debug, Clone, Copy)]
enum Fault {
    /// Fail the next `n` calls.
    Times(u32),
    /// Fail every call.
    Always,
    /// Never return.
    Hang,
}

#[derive(Debug, Default)]
struct Resources {
    networks: BTreeSet<String>,
    volumes: BTreeSet<String>,
    images: BTreeSet<String>,
    containers: BTreeMap<String, (ContainerSpec, ContainerState)>,
}

#[derive(Debug, Default)]
struct Inner {
    projects: HashMap<ProjectId, Resources>,
    faults: HashMap<RuntimeOp, Fault>,
    calls: HashMap<RuntimeOp, usize>,
    delay: Option<Duration>,
    unhealthy: bool,
}

/// In-memory container runtime.
#[derive(Debug, Default)]
pub struct MemoryRuntime {
    inner: Mutex<Inner>,
}

impl MemoryRuntime {
    /// Create an empty runtime.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `times` calls of `op` with a runtime error.
    pub fn fail_next(&self, op: RuntimeOp, times: u32) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.faults.insert(op, Fault::Times(times));
        }
    }

    /// Fail every call of `op` with a runtime error.
    pub fn fail_always(&self, op: RuntimeOp) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.faults.insert(op, Fault::Always);
        }
    }

    /// Make every call of `op` hang until the caller gives up.
    pub fn hang(&self, op: RuntimeOp) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.faults.insert(op, Fault::Hang);
        }
    }

    /// Remove all injected faults.
    pub fn clear_faults(&self) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.faults.clear();
        }
    }

    /// Delay every call by `delay`.
    pub fn set_delay(&self, delay: Duration) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.delay = Some(delay);
        }
    }

    /// Make `wait_healthy` report unhealthy containers.
    pub fn set_unhealthy(&self, unhealthy: bool) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.unhealthy = unhealthy;
        }
    }

    /// Number of calls made to `op`, including failed ones.
    #[must_use]
    pub fn calls(&self, op: RuntimeOp) -> usize {
        self.inner
            .lock()
            .map(|inner| inner.calls.get(&op).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    /// Total number of resources held for a project.
    #[must_use]
    pub fn resource_count(&self, project: &ProjectId) -> usize {
        self.inner
            .lock()
            .ok()
            .and_then(|inner| {
                inner.projects.get(project).map(|r| {
                    r.networks.len() + r.volumes.len() + r.images.len() + r.containers.len()
                })
            })
            .unwrap_or(0)
    }

    /// Specs of the containers held for a project.
    #[must_use]
    pub fn container_specs(&self, project: &ProjectId) -> Vec<ContainerSpec> {
        self.inner
            .lock()
            .ok()
            .and_then(|inner| {
                inner
                    .projects
                    .get(project)
                    .map(|r| r.containers.values().map(|(spec, _)| spec.clone()).collect())
            })
            .unwrap_or_default()
    }

    /// Count the call, apply the configured delay and fault.
    async fn enter(&self, op: RuntimeOp) -> ControlResult<()> {
        let (delay, fault) = {
            let mut inner = self
                .inner
                .lock()
                .map_err(|_| ControlError::internal("lock poisoned"))?;
            *inner.calls.entry(op).or_default() += 1;

            let fault = match inner.faults.get_mut(&op) {
                Some(Fault::Times(0)) | None => None,
                Some(Fault::Times(n)) => {
                    *n -= 1;
                    Some(Fault::Times(1))
                }
                Some(fault) => Some(*fault),
            };
            (inner.delay, fault)
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        match fault {
            None => Ok(()),
            Some(Fault::Hang) => std::future::pending().await,
            Some(_) => Err(ControlError::runtime(format!("injected {op:?} failure"))),
        }
    }

    fn with_project<T>(
        &self,
        project: &ProjectId,
        f: impl FnOnce(&mut Resources) -> ControlResult<T>,
    ) -> ControlResult<T> {
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| ControlError::internal("lock poisoned"))?;
        f(inner.projects.entry(project.clone()).or_default())
    }

    fn set_state(
        &self,
        project: &ProjectId,
        names: &[String],
        state: ContainerState,
    ) -> ControlResult<()> {
        self.with_project(project, |resources| {
            for name in names {
                match resources.containers.get_mut(name) {
                    Some((_, current)) => *current = state,
                    None if state == ContainerState::Exited => {}
                    None => return Err(ControlError::runtime(format!("no such container: {name}"))),
                }
            }
            Ok(())
        })
    }
}

#[async_trait]
impl ContainerRuntime for MemoryRuntime {
    async fn ensure_network(&self, spec: &NetworkSpec) -> ControlResult<bool> {
        self.enter(RuntimeOp::EnsureNetwork).await?;
        self.with_project(&spec.project_id, |r| Ok(r.networks.insert(spec.name.clone())))
    }

    async fn ensure_volume(&self, spec: &VolumeSpec) -> ControlResult<bool> {
        self.enter(RuntimeOp::EnsureVolume).await?;
        self.with_project(&spec.project_id, |r| Ok(r.volumes.insert(spec.name.clone())))
    }

    async fn ensure_image(&self, spec: &ImageSpec) -> ControlResult<ImageInfo> {
        self.enter(RuntimeOp::EnsureImage).await?;
        self.with_project(&spec.project_id, |r| {
            r.images.insert(spec.reference.clone());
            Ok(ImageInfo {
                reference: spec.reference.clone(),
                size_bytes: 0,
            })
        })
    }

    async fn create_containers(&self, specs: &[ContainerSpec]) -> ControlResult<()> {
        self.enter(RuntimeOp::CreateContainers).await?;
        for spec in specs {
            self.with_project(&spec.project_id, |r| {
                if !r.networks.contains(&spec.network) {
                    return Err(ControlError::runtime(format!(
                        "network {} not found",
                        spec.network
                    )));
                }
                r.containers
                    .entry(spec.name.clone())
                    .or_insert_with(|| (spec.clone(), ContainerState::Created));
                Ok(())
            })?;
        }
        Ok(())
    }

    async fn run_containers(&self, project: &ProjectId, names: &[String]) -> ControlResult<()> {
        self.enter(RuntimeOp::RunContainers).await?;
        self.set_state(project, names, ContainerState::Running)
    }

    async fn stop_containers(&self, project: &ProjectId, names: &[String]) -> ControlResult<()> {
        self.enter(RuntimeOp::StopContainers).await?;
        self.set_state(project, names, ContainerState::Exited)
    }

    async fn remove_containers(
        &self,
        project: &ProjectId,
        names: &[String],
    ) -> ControlResult<()> {
        self.enter(RuntimeOp::RemoveContainers).await?;
        self.with_project(project, |r| {
            for name in names {
                r.containers.remove(name);
            }
            Ok(())
        })
    }

    async fn remove_all(&self, project: &ProjectId) -> ControlResult<()> {
        self.enter(RuntimeOp::RemoveAll).await?;
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| ControlError::internal("lock poisoned"))?;
        inner.projects.remove(project);
        Ok(())
    }

    async fn status(&self, project: &ProjectId) -> ControlResult<RuntimeStatus> {
        self.enter(RuntimeOp::Status).await?;
        self.with_project(project, |r| {
            Ok(RuntimeStatus {
                networks: r.networks.iter().cloned().collect(),
                volumes: r.volumes.iter().cloned().collect(),
                images: r.images.iter().cloned().collect(),
                containers: r
                    .containers
                    .iter()
                    .map(|(name, (_, state))| ContainerStatus {
                        name: name.clone(),
                        state: *state,
                    })
                    .collect(),
            })
        })
    }

    async fn wait_healthy(
        &self,
        project: &ProjectId,
        names: &[String],
        timeout: Duration,
    ) -> ControlResult<()> {
        self.enter(RuntimeOp::WaitHealthy).await?;
        let unhealthy = self
            .inner
            .lock()
            .map(|inner| inner.unhealthy)
            .unwrap_or(false);

        let status = self.status(project).await?;
        let running = status.running();
        let all_running = names.iter().all(|n| running.contains(n));

        if unhealthy || !all_running {
            tokio::time::sleep(timeout).await;
            return Err(ControlError::Timeout(timeout));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id() -> ProjectId {
        ProjectId::parse("site-1").unwrap()
    }

    fn network() -> NetworkSpec {
        NetworkSpec {
            name: "hangar-site-1".to_owned(),
            project_id: id(),
        }
    }

    fn container(name: &str) -> ContainerSpec {
        ContainerSpec {
            name: name.to_owned(),
            project_id: id(),
            service: "web".to_owned(),
            image: "hangar/site-1:abc".to_owned(),
            container_port: 80,
            host_port: 20000,
            network: "hangar-site-1".to_owned(),
            mounts: vec![],
        }
    }

    #[tokio::test]
    async fn ensure_network_is_idempotent() {
        let runtime = MemoryRuntime::new();
        assert!(runtime.ensure_network(&network()).await.unwrap());
        assert!(!runtime.ensure_network(&network()).await.unwrap());

        let status = runtime.status(&id()).await.unwrap();
        assert_eq!(status.networks, vec!["hangar-site-1".to_owned()]);
    }

    #[tokio::test]
    async fn containers_need_their_network() {
        let runtime = MemoryRuntime::new();
        assert!(runtime.create_containers(&[container("web")]).await.is_err());

        runtime.ensure_network(&network()).await.unwrap();
        runtime.create_containers(&[container("web")]).await.unwrap();
        runtime
            .run_containers(&id(), &["web".to_owned()])
            .await
            .unwrap();

        let status = runtime.status(&id()).await.unwrap();
        assert_eq!(status.running(), vec!["web".to_owned()]);
    }

    #[tokio::test]
    async fn remove_all_clears_project() {
        let runtime = MemoryRuntime::new();
        runtime.ensure_network(&network()).await.unwrap();
        runtime.create_containers(&[container("web")]).await.unwrap();
        assert_eq!(runtime.resource_count(&id()), 2);

        runtime.remove_all(&id()).await.unwrap();
        runtime.remove_all(&id()).await.unwrap();
        assert_eq!(runtime.resource_count(&id()), 0);
    }

    #[tokio::test]
    async fn fail_next_fails_then_recovers() {
        let runtime = MemoryRuntime::new();
        runtime.fail_next(RuntimeOp::EnsureNetwork, 2);

        assert!(runtime.ensure_network(&network()).await.is_err());
        assert!(runtime.ensure_network(&network()).await.is_err());
        assert!(runtime.ensure_network(&network()).await.is_ok());
        assert_eq!(runtime.calls(RuntimeOp::EnsureNetwork), 3);
    }

    #[tokio::test]
    async fn hang_never_returns() {
        let runtime = MemoryRuntime::new();
        runtime.hang(RuntimeOp::EnsureNetwork);

        let result =
            tokio::time::timeout(Duration::from_millis(20), runtime.ensure_network(&network()))
                .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn wait_healthy_times_out_when_not_running() {
        let runtime = MemoryRuntime::new();
        runtime.ensure_network(&network()).await.unwrap();
        runtime.create_containers(&[container("web")]).await.unwrap();

        let err = runtime
            .wait_healthy(&id(), &["web".to_owned()], Duration::from_millis(5))
            .await
            .unwrap_err();
        assert!(matches!(err, ControlError::Timeout(_)));
    }
}
