//! Container runtime backed by the `docker` CLI.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::config::RuntimeConfig;
use crate::error::{ControlError, ControlResult};
use crate::types::ProjectId;

use super::{
    ContainerRuntime, ContainerSpec, ContainerState, ContainerStatus, ImageInfo, ImageSpec,
    NetworkSpec, RuntimeStatus, VolumeSpec, PROJECT_LABEL,
};

/// Docker CLI runtime.
#[derive(Debug, Clone)]
pub struct DockerRuntime {
    docker_bin: String,
    poll_interval: Duration,
}

impl DockerRuntime {
    /// Create a runtime from configuration.
    #[must_use]
    pub fn new(config: &RuntimeConfig) -> Self {
        Self {
            docker_bin: config.docker_bin.clone(),
            poll_interval: Duration::from_millis(config.health_poll_ms),
        }
    }

    /// Run a docker command and return its stdout.
    async fn docker<I, S>(&self, args: I) -> ControlResult<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<std::ffi::OsStr>,
    {
        let output = Command::new(&self.docker_bin)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| ControlError::runtime(format!("failed to run {}: {e}", self.docker_bin)))?;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).into_owned())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(ControlError::runtime(format!(
                "docker exited with {}: {}",
                output.status,
                stderr.trim()
            )))
        }
    }

    /// Run a docker command, mapping failure to `false`.
    async fn succeeds(&self, args: &[&str]) -> bool {
        self.docker(args).await.is_ok()
    }

    fn label(project: &ProjectId) -> String {
        format!("{PROJECT_LABEL}={project}")
    }

    fn filter(project: &ProjectId) -> String {
        format!("label={PROJECT_LABEL}={project}")
    }

    async fn list(&self, args: &[&str]) -> ControlResult<Vec<String>> {
        Ok(self
            .docker(args)
            .await?
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_owned)
            .collect())
    }

    async fn container_health(&self, name: &str) -> ControlResult<String> {
        let out = self
            .docker([
                "inspect",
                "--format",
                "{{if .State.Health}}{{.State.Health.Status}}{{else}}{{.State.Status}}{{end}}",
                name,
            ])
            .await?;
        Ok(out.trim().to_owned())
    }

    fn is_missing(err: &ControlError) -> bool {
        err.to_string().contains("No such")
    }
}

fn parse_state(state: &str) -> ContainerState {
    match state {
        "running" | "restarting" => ContainerState::Running,
        "created" => ContainerState::Created,
        _ => ContainerState::Exited,
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn ensure_network(&self, spec: &NetworkSpec) -> ControlResult<bool> {
        if self.succeeds(&["network", "inspect", spec.name.as_str()]).await {
            return Ok(false);
        }
        let label = Self::label(&spec.project_id);
        self.docker(["network", "create", "--label", label.as_str(), spec.name.as_str()])
            .await?;
        info!(project = %spec.project_id, network = %spec.name, "network created");
        Ok(true)
    }

    async fn ensure_volume(&self, spec: &VolumeSpec) -> ControlResult<bool> {
        if self.succeeds(&["volume", "inspect", spec.name.as_str()]).await {
            return Ok(false);
        }
        let label = Self::label(&spec.project_id);
        self.docker(["volume", "create", "--label", label.as_str(), spec.name.as_str()])
            .await?;
        info!(project = %spec.project_id, volume = %spec.name, "volume created");
        Ok(true)
    }

    async fn ensure_image(&self, spec: &ImageSpec) -> ControlResult<ImageInfo> {
        if !self.succeeds(&["image", "inspect", spec.reference.as_str()]).await {
            if !self.succeeds(&["image", "inspect", spec.base.as_str()]).await {
                info!(image = %spec.base, "pulling base image");
                self.docker(["pull", spec.base.as_str()]).await?;
            }
            self.docker(["tag", spec.base.as_str(), spec.reference.as_str()]).await?;
        }

        let size = self
            .docker(["image", "inspect", "--format", "{{.Size}}", spec.reference.as_str()])
            .await?;
        Ok(ImageInfo {
            reference: spec.reference.clone(),
            size_bytes: size.trim().parse().unwrap_or(0),
        })
    }

    async fn create_containers(&self, specs: &[ContainerSpec]) -> ControlResult<()> {
        for spec in specs {
            if self
                .succeeds(&["container", "inspect", spec.name.as_str()])
                .await
            {
                debug!(container = %spec.name, "container exists");
                continue;
            }

            let mut args = vec![
                "create".to_owned(),
                "--name".to_owned(),
                spec.name.clone(),
                "--label".to_owned(),
                Self::label(&spec.project_id),
                "--label".to_owned(),
                format!("hangar.service={}", spec.service),
                "--network".to_owned(),
                spec.network.clone(),
                "--publish".to_owned(),
                format!("{}:{}", spec.host_port, spec.container_port),
            ];
            for mount in &spec.mounts {
                args.push("--volume".to_owned());
                args.push(format!("{}:{}", mount.volume, mount.target));
            }
            args.push(spec.image.clone());

            self.docker(&args).await?;
            info!(
                project = %spec.project_id,
                container = %spec.name,
                host_port = spec.host_port,
                "container created"
            );
        }
        Ok(())
    }

    async fn run_containers(&self, project: &ProjectId, names: &[String]) -> ControlResult<()> {
        if names.is_empty() {
            return Ok(());
        }
        let mut args = vec!["start".to_owned()];
        args.extend(names.iter().cloned());
        self.docker(&args).await?;
        info!(project = %project, containers = ?names, "containers started");
        Ok(())
    }

    async fn stop_containers(&self, project: &ProjectId, names: &[String]) -> ControlResult<()> {
        for name in names {
            match self.docker(["stop", name.as_str()]).await {
                Ok(_) => {}
                Err(e) if Self::is_missing(&e) => {}
                Err(e) => return Err(e),
            }
        }
        info!(project = %project, containers = ?names, "containers stopped");
        Ok(())
    }

    async fn remove_containers(
        &self,
        project: &ProjectId,
        names: &[String],
    ) -> ControlResult<()> {
        for name in names {
            match self.docker(["rm", "--force", name.as_str()]).await {
                Ok(_) => {}
                Err(e) if Self::is_missing(&e) => {}
                Err(e) => return Err(e),
            }
        }
        debug!(project = %project, containers = ?names, "containers removed");
        Ok(())
    }

    async fn remove_all(&self, project: &ProjectId) -> ControlResult<()> {
        let filter = Self::filter(project);

        let containers = self
            .list(&["ps", "--all", "--quiet", "--filter", filter.as_str()])
            .await?;
        if !containers.is_empty() {
            let mut args = vec!["rm".to_owned(), "--force".to_owned()];
            args.extend(containers);
            self.docker(&args).await?;
        }

        for network in self
            .list(&["network", "ls", "--quiet", "--filter", filter.as_str()])
            .await?
        {
            self.docker(["network", "rm", network.as_str()]).await?;
        }

        for volume in self
            .list(&["volume", "ls", "--quiet", "--filter", filter.as_str()])
            .await?
        {
            self.docker(["volume", "rm", "--force", volume.as_str()])
                .await?;
        }

        let repository = format!("hangar/{project}");
        for image in self
            .list(&["image", "ls", "--format", "{{.Repository}}:{{.Tag}}", repository.as_str()])
            .await?
        {
            if let Err(e) = self.docker(["image", "rm", image.as_str()]).await {
                warn!(project = %project, image = %image, error = %e, "failed to remove image");
            }
        }

        info!(project = %project, "runtime resources removed");
        Ok(())
    }

    async fn status(&self, project: &ProjectId) -> ControlResult<RuntimeStatus> {
        let filter = Self::filter(project);
        let repository = format!("hangar/{project}");

        let containers = self
            .list(&[
                "ps",
                "--all",
                "--filter",
                filter.as_str(),
                "--format",
                "{{.Names}}\t{{.State}}",
            ])
            .await?
            .into_iter()
            .filter_map(|line| {
                let (name, state) = line.split_once('\t')?;
                Some(ContainerStatus {
                    name: name.to_owned(),
                    state: parse_state(state),
                })
            })
            .collect();

        Ok(RuntimeStatus {
            networks: self
                .list(&["network", "ls", "--filter", filter.as_str(), "--format", "{{.Name}}"])
                .await?,
            volumes: self
                .list(&["volume", "ls", "--filter", filter.as_str(), "--format", "{{.Name}}"])
                .await?,
            images: self
                .list(&["image", "ls", "--format", "{{.Repository}}:{{.Tag}}", repository.as_str()])
                .await?,
            containers,
        })
    }

    async fn wait_healthy(
        &self,
        project: &ProjectId,
        names: &[String],
        timeout: Duration,
    ) -> ControlResult<()> {
        let deadline = tokio::time::Instant::now() + timeout;

        for name in names {
            loop {
                match self.container_health(name).await?.as_str() {
                    "healthy" | "running" => break,
                    "exited" | "dead" | "unhealthy" => {
                        return Err(ControlError::runtime(format!(
                            "container {name} is not healthy"
                        )));
                    }
                    _ => {}
                }
                if tokio::time::Instant::now() >= deadline {
                    return Err(ControlError::Timeout(timeout));
                }
                tokio::time::sleep(self.poll_interval).await;
            }
        }

        debug!(project = %project, containers = ?names, "containers healthy");
        Ok(())
    }
}
