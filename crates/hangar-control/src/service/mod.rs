//! Service lifecycle management.
//!
//! Provides the main service runner with signal handling and graceful shutdown.

use std::sync::Arc;
use std::time::Duration;

use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::api;
use crate::config::ControlConfig;
use crate::error::{ControlError, ControlResult};
use crate::events::{EventBus, LifecycleEvent};
use crate::generator::GeneratorOptions;
use crate::ports::create_port_allocator;
use crate::registry::{create_registry, ProjectRegistry};
use crate::runtime::create_runtime;
use crate::templates::create_templates;
use crate::workflow::{Collaborators, WorkflowCoordinator};

/// The control service.
///
/// Manages the lifecycle of the control plane, including:
/// - Project registry
/// - Container runtime and port allocator
/// - Workflow coordinator
/// - HTTP API server
/// - Signal handling and graceful shutdown
pub struct ControlService {
    config: ControlConfig,
    cancel: CancellationToken,
}

impl ControlService {
    /// Create a new control service with the given configuration.
    #[must_use]
    pub fn new(config: ControlConfig) -> Self {
        Self {
            config,
            cancel: CancellationToken::new(),
        }
    }

    /// Run the control service until a shutdown signal arrives.
    ///
    /// In-flight transitions are given `server.drain_timeout_secs` to finish
    /// once the listener has closed.
    pub async fn run(&self) -> ControlResult<()> {
        let registry = create_registry(&self.config.registry).await?;
        info!(backend = ?self.config.registry.backend, "project registry configured");
        let coordinator = Arc::new(self.create_coordinator(Arc::clone(&registry))?);

        let state = api::AppState {
            coordinator: Arc::clone(&coordinator),
            registry,
        };
        let app = api::router(state);

        let listener = tokio::net::TcpListener::bind(self.config.server.listen)
            .await
            .map_err(|e| ControlError::Config(format!("failed to bind TCP: {e}")))?;
        info!(listen = %self.config.server.listen, "control service listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal(self.cancel.clone()))
            .await
            .map_err(|e| ControlError::Config(format!("server error: {e}")))?;

        let drain = Duration::from_secs(self.config.server.drain_timeout_secs);
        if !coordinator.drain(drain).await {
            warn!(
                in_flight = coordinator.in_flight(),
                "shutting down with transitions still in flight"
            );
        }

        info!("control service shutdown complete");
        Ok(())
    }

    /// Request graceful shutdown.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    fn create_coordinator(
        &self,
        registry: Arc<dyn ProjectRegistry>,
    ) -> ControlResult<WorkflowCoordinator> {
        let runtime = create_runtime(&self.config.runtime);
        info!(runtime_type = ?self.config.runtime.runtime_type, "container runtime configured");

        let ports = create_port_allocator(&self.config.ports)?;
        info!(
            start = self.config.ports.range_start,
            end = self.config.ports.range_end,
            "port allocator configured"
        );

        let events = EventBus::new(self.config.events.capacity);
        spawn_event_logger(&events, self.cancel.clone());

        Ok(WorkflowCoordinator::new(
            Collaborators {
                registry,
                runtime,
                ports,
                templates: create_templates(&self.config.templates),
                events: Arc::new(events),
            },
            GeneratorOptions::from(&self.config.runtime),
            &self.config.workflow,
        ))
    }
}

/// Log lifecycle events until cancelled.
fn spawn_event_logger(events: &EventBus, cancel: CancellationToken) {
    let mut rx = events.subscribe();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                received = rx.recv() => match received {
                    Ok(LifecycleEvent::CallProgress { .. }) => {}
                    Ok(event) => {
                        info!(project = %event.project_id(), event = event.name(), "lifecycle event");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "event logger lagged");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                },
            }
        }
    });
}

async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            info!("received SIGTERM, initiating shutdown");
        }
        () = cancel.cancelled() => {
            info!("shutdown requested");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::MemoryRegistry;

    #[test]
    fn service_creation() {
        let service = ControlService::new(ControlConfig::default());
        assert!(!service.cancel.is_cancelled());
    }

    #[test]
    fn service_shutdown() {
        let service = ControlService::new(ControlConfig::default());
        service.shutdown();
        assert!(service.cancel.is_cancelled());
    }

    #[tokio::test]
    async fn coordinator_from_mock_config() {
        let mut config = ControlConfig::default();
        config.runtime.runtime_type = crate::config::RuntimeType::Mock;

        let coordinator = ControlService::new(config)
            .create_coordinator(Arc::new(MemoryRegistry::new()))
            .unwrap();
        assert!(coordinator.is_accepting());
        assert_eq!(coordinator.in_flight(), 0);
    }
}
