//! Common test utilities for control-plane integration tests.

#![allow(dead_code)]

pub mod fixtures;

use std::sync::Arc;

use hangar_control::api::AppState;
use hangar_control::config::WorkflowConfig;
use hangar_control::generator::GeneratorOptions;
use hangar_control::ports::{
    HostPortAllocator, PortAllocation, PortAllocator, PortHint, PortRange, ScriptedProbe,
};
use hangar_control::templates::BuiltinTemplates;
use hangar_control::{
    Collaborators, ControlResult, EventBus, MemoryRegistry, MemoryRuntime, ProjectId,
    ProjectRegistry, WorkflowCoordinator,
};

/// First port of the test range.
pub const RANGE_START: u16 = 20000;
/// Last port of the test range.
pub const RANGE_END: u16 = 20009;

/// Coordinator wired to in-memory collaborators.
pub struct TestControl {
    pub coordinator: Arc<WorkflowCoordinator>,
    pub registry: Arc<MemoryRegistry>,
    pub runtime: Arc<MemoryRuntime>,
    pub ports: Arc<HostPortAllocator>,
    pub probe: Arc<ScriptedProbe>,
    pub events: EventBus,
}

impl TestControl {
    /// Creates a test control plane with fast retries and health checks.
    pub fn new() -> Self {
        Self::with_config(WorkflowConfig {
            retry_backoff_ms: 1,
            health_timeout_secs: 1,
            ..WorkflowConfig::default()
        })
    }

    /// Creates a test control plane with custom workflow configuration.
    pub fn with_config(config: WorkflowConfig) -> Self {
        Self::build(config, |ports| -> Arc<dyn PortAllocator> { ports })
    }

    /// Creates a test control plane whose coordinator sees the host port
    /// allocator through `wrap`. `ports` still exposes the inner allocator.
    pub fn with_port_allocator(
        wrap: impl FnOnce(Arc<HostPortAllocator>) -> Arc<dyn PortAllocator>,
    ) -> Self {
        Self::build(
            WorkflowConfig {
                retry_backoff_ms: 1,
                health_timeout_secs: 1,
                ..WorkflowConfig::default()
            },
            wrap,
        )
    }

    fn build(
        config: WorkflowConfig,
        wrap: impl FnOnce(Arc<HostPortAllocator>) -> Arc<dyn PortAllocator>,
    ) -> Self {
        let registry = Arc::new(MemoryRegistry::new());
        let runtime = Arc::new(MemoryRuntime::new());
        let probe = Arc::new(ScriptedProbe::new());
        let ports = Arc::new(HostPortAllocator::new(
            PortRange::new(RANGE_START, RANGE_END).unwrap(),
            probe.clone(),
        ));
        let events = EventBus::new(1024);

        let coordinator = WorkflowCoordinator::new(
            Collaborators {
                registry: registry.clone(),
                runtime: runtime.clone(),
                ports: wrap(ports.clone()),
                templates: Arc::new(BuiltinTemplates),
                events: Arc::new(events.clone()),
            },
            GeneratorOptions::default(),
            &config,
        );

        Self {
            coordinator: Arc::new(coordinator),
            registry,
            runtime,
            ports,
            probe,
            events,
        }
    }

    /// API state sharing this control plane's coordinator and registry.
    pub fn app_state(&self) -> AppState {
        let registry: Arc<dyn ProjectRegistry> = self.registry.clone();
        AppState {
            coordinator: Arc::clone(&self.coordinator),
            registry,
        }
    }
}

impl Default for TestControl {
    fn default() -> Self {
        Self::new()
    }
}

/// Allocator that hands out the first allocated port for every slot.
///
/// Reservations are made by the inner allocator, so releasing the reported
/// `reserved` ports still undoes the allocation.
pub struct DuplicatePorts(pub Arc<HostPortAllocator>);

impl PortAllocator for DuplicatePorts {
    fn allocate(
        &self,
        project: &ProjectId,
        count: usize,
        hint: &PortHint,
    ) -> ControlResult<PortAllocation> {
        let mut allocation = self.0.allocate(project, count, hint)?;
        if let Some(first) = allocation.ports.first().copied() {
            allocation.ports = vec![first; allocation.ports.len()];
        }
        Ok(allocation)
    }

    fn release(&self, project: &ProjectId, ports: &[u16]) -> ControlResult<()> {
        self.0.release(project, ports)
    }

    fn verify(&self, project: &ProjectId, ports: &[u16]) -> ControlResult<()> {
        self.0.verify(project, ports)
    }

    fn reservations(&self, project: &ProjectId) -> Vec<u16> {
        self.0.reservations(project)
    }
}
