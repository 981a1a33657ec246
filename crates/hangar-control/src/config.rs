//! Configuration for hangar-control.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use figment::providers::{Env, Format, Toml};
use figment::Figment;
use serde::Deserialize;

use crate::error::{ControlError, ControlResult};

/// Top-level configuration for the control service.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ControlConfig {
    /// HTTP server configuration.
    #[serde(default)]
    pub server: ServerConfig,

    /// Project registry configuration.
    #[serde(default)]
    pub registry: RegistryConfig,

    /// Template source configuration.
    #[serde(default)]
    pub templates: TemplateConfig,

    /// Host port allocation.
    #[serde(default)]
    pub ports: PortConfig,

    /// Container runtime configuration.
    #[serde(default)]
    pub runtime: RuntimeConfig,

    /// Transition pipeline behaviour.
    #[serde(default)]
    pub workflow: WorkflowConfig,

    /// Lifecycle event bus.
    #[serde(default)]
    pub events: EventsConfig,
}

impl ControlConfig {
    /// Load configuration from the default sources.
    ///
    /// Configuration is loaded in the following order (later sources override earlier):
    /// 1. Default values
    /// 2. `hangar.toml` in the current directory (if present)
    /// 3. Environment variables with `HANGAR_CONTROL_` prefix
    pub fn load() -> ControlResult<Self> {
        Self::figment(Toml::file("hangar.toml"))
    }

    /// Load configuration from a specific TOML file.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> ControlResult<Self> {
        Self::figment(Toml::file(path.as_ref()))
    }

    fn figment(file: figment::providers::Data<Toml>) -> ControlResult<Self> {
        Figment::new()
            .merge(file)
            .merge(Env::prefixed("HANGAR_CONTROL_").split("__"))
            .extract()
            .map_err(|e| ControlError::Config(e.to_string()))
    }
}

/// HTTP server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Address to listen on.
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,

    /// How long shutdown waits for in-flight transitions, in seconds.
    #[serde(default = "default_drain_timeout_secs")]
    pub drain_timeout_secs: u64,
}

const fn default_listen() -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 8090)
}

const fn default_drain_timeout_secs() -> u64 {
    30
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            drain_timeout_secs: default_drain_timeout_secs(),
        }
    }
}

/// Project registry configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RegistryConfig {
    /// Storage backend.
    #[serde(default)]
    pub backend: RegistryBackend,

    /// Directory holding one JSON document per project.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("/var/lib/hangar/projects")
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            backend: RegistryBackend::default(),
            data_dir: default_data_dir(),
        }
    }
}

/// Project registry backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistryBackend {
    /// JSON files on disk.
    #[default]
    File,

    /// In-memory, lost on exit.
    Memory,
}

/// Template source configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TemplateConfig {
    /// Directory of `<name>.json` template documents. Built-in templates
    /// are used when unset or when a name is missing from the directory.
    pub dir: Option<PathBuf>,
}

/// Host port allocation.
#[derive(Debug, Clone, Deserialize)]
pub struct PortConfig {
    /// First port of the allocation range (inclusive).
    #[serde(default = "default_range_start")]
    pub range_start: u16,

    /// Last port of the allocation range (inclusive).
    #[serde(default = "default_range_end")]
    pub range_end: u16,
}

const fn default_range_start() -> u16 {
    20000
}

const fn default_range_end() -> u16 {
    20999
}

impl Default for PortConfig {
    fn default() -> Self {
        Self {
            range_start: default_range_start(),
            range_end: default_range_end(),
        }
    }
}

/// Container runtime configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RuntimeConfig {
    /// Runtime implementation.
    #[serde(default)]
    pub runtime_type: RuntimeType,

    /// Path or name of the docker binary.
    #[serde(default = "default_docker_bin")]
    pub docker_bin: String,

    /// Base image for the static `web` service.
    #[serde(default = "default_web_image")]
    pub web_image: String,

    /// Image for the `api` service handling form submissions.
    #[serde(default = "default_api_image")]
    pub api_image: String,

    /// Port the `web` service listens on inside its container.
    #[serde(default = "default_web_port")]
    pub web_port: u16,

    /// Port the `api` service listens on inside its container.
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Interval between health polls, in milliseconds.
    #[serde(default = "default_health_poll_ms")]
    pub health_poll_ms: u64,
}

fn default_docker_bin() -> String {
    "docker".to_owned()
}

fn default_web_image() -> String {
    "nginx:1.27-alpine".to_owned()
}

fn default_api_image() -> String {
    "ghcr.io/hangar-sites/forms:latest".to_owned()
}

const fn default_web_port() -> u16 {
    80
}

const fn default_api_port() -> u16 {
    8080
}

const fn default_health_poll_ms() -> u64 {
    500
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            runtime_type: RuntimeType::default(),
            docker_bin: default_docker_bin(),
            web_image: default_web_image(),
            api_image: default_api_image(),
            web_port: default_web_port(),
            api_port: default_api_port(),
            health_poll_ms: default_health_poll_ms(),
        }
    }
}

/// Type of container runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeType {
    /// Docker CLI.
    #[default]
    Docker,

    /// In-memory runtime for testing.
    Mock,
}

/// Transition pipeline behaviour.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkflowConfig {
    /// Default deadline for the side-effect stages, in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Deadline for health polling after containers start, in seconds.
    #[serde(default = "default_health_timeout_secs")]
    pub health_timeout_secs: u64,

    /// Attempts per adapter call for transient failures (1 disables retry).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Backoff between attempts, multiplied by the attempt number.
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    /// Number of finished transitions kept for audit.
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,

    /// Document validation options.
    #[serde(default)]
    pub validation: ValidationConfig,
}

const fn default_timeout_secs() -> u64 {
    300 // 5 minutes
}

const fn default_health_timeout_secs() -> u64 {
    60
}

const fn default_max_attempts() -> u32 {
    3
}

const fn default_retry_backoff_ms() -> u64 {
    200
}

const fn default_history_capacity() -> usize {
    256
}

impl WorkflowConfig {
    /// Default deadline as a duration.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Health deadline as a duration.
    #[must_use]
    pub const fn health_timeout(&self) -> Duration {
        Duration::from_secs(self.health_timeout_secs)
    }

    /// Backoff before retry number `attempt` (1-based).
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.retry_backoff_ms.saturating_mul(u64::from(attempt)))
    }
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            health_timeout_secs: default_health_timeout_secs(),
            max_attempts: default_max_attempts(),
            retry_backoff_ms: default_retry_backoff_ms(),
            history_capacity: default_history_capacity(),
            validation: ValidationConfig::default(),
        }
    }
}

/// Document validation options.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct ValidationConfig {
    /// Nesting depth past which the validator stops descending.
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,

    /// Treat unknown types as errors instead of warnings.
    #[serde(default)]
    pub strict: bool,
}

const fn default_max_depth() -> usize {
    32
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            max_depth: default_max_depth(),
            strict: false,
        }
    }
}

/// Lifecycle event bus.
#[derive(Debug, Clone, Deserialize)]
pub struct EventsConfig {
    /// Events buffered per subscriber before the slowest one lags.
    #[serde(default = "default_events_capacity")]
    pub capacity: usize,
}

const fn default_events_capacity() -> usize {
    1024
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            capacity: default_events_capacity(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = ControlConfig::default();
        assert_eq!(config.server.listen.port(), 8090);
        assert_eq!(config.registry.backend, RegistryBackend::File);
        assert_eq!(config.ports.range_start, 20000);
        assert_eq!(config.runtime.runtime_type, RuntimeType::Docker);
        assert_eq!(config.workflow.max_attempts, 3);
        assert_eq!(config.workflow.validation.max_depth, 32);
        assert!(!config.workflow.validation.strict);
    }

    #[test]
    fn config_from_toml() {
        let toml = r#"
            [server]
            listen = "0.0.0.0:9000"

            [registry]
            backend = "memory"

            [ports]
            range_start = 31000
            range_end = 31010

            [runtime]
            runtime_type = "mock"

            [workflow]
            timeout_secs = 10
            max_attempts = 1

            [workflow.validation]
            strict = true
        "#;

        let config: ControlConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.server.listen.port(), 9000);
        assert_eq!(config.registry.backend, RegistryBackend::Memory);
        assert_eq!(config.ports.range_end, 31010);
        assert_eq!(config.runtime.runtime_type, RuntimeType::Mock);
        assert_eq!(config.workflow.timeout(), Duration::from_secs(10));
        assert_eq!(config.workflow.max_attempts, 1);
        assert!(config.workflow.validation.strict);
        assert_eq!(config.workflow.validation.max_depth, 32);
    }

    #[test]
    fn backoff_grows_linearly() {
        let config = WorkflowConfig::default();
        assert_eq!(config.backoff(1), Duration::from_millis(200));
        assert_eq!(config.backoff(3), Duration::from_millis(600));
    }
}
