//! Integration tests for failure handling: rollback, deadlines and retries.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::fixtures::{drive_to, id};
use common::{DuplicatePorts, TestControl, RANGE_END, RANGE_START};
use hangar_control::config::WorkflowConfig;
use hangar_control::ports::PortAllocator;
use hangar_control::runtime::{ContainerRuntime, RuntimeOp};
use hangar_control::{
    Action, ControlError, ErrorKind, LifecycleState, ProjectRegistry, Stage, TransitionConfig,
};
use rstest::rstest;

#[rstest]
#[case::network(RuntimeOp::EnsureNetwork)]
#[case::volume(RuntimeOp::EnsureVolume)]
#[case::image(RuntimeOp::EnsureImage)]
#[case::containers(RuntimeOp::CreateContainers)]
#[tokio::test]
async fn failed_deploy_leaves_nothing_behind(#[case] op: RuntimeOp) {
    let control = TestControl::new();
    let project = id("site-1");
    drive_to(&control, &project, LifecycleState::Built).await;
    let before = control.registry.document(&project);

    control.runtime.fail_always(op);
    let failure = control
        .coordinator
        .execute(&project, Action::Deploy, &TransitionConfig::default())
        .await
        .unwrap_err();

    assert_eq!(failure.kind(), ErrorKind::Runtime);
    assert_eq!(failure.stage, Stage::Execute);
    assert_eq!(control.registry.document(&project), before);
    assert!(control.ports.reservations(&project).is_empty());
    assert_eq!(control.ports.reserved_count(), 0);
    assert_eq!(control.runtime.resource_count(&project), 0);
}

#[tokio::test]
async fn hanging_runtime_hits_the_deadline() {
    let control = TestControl::new();
    let project = id("site-1");
    drive_to(&control, &project, LifecycleState::Built).await;

    control.runtime.hang(RuntimeOp::CreateContainers);
    let config = TransitionConfig {
        timeout_secs: Some(1),
        ..TransitionConfig::default()
    };
    let failure = control
        .coordinator
        .execute(&project, Action::Deploy, &config)
        .await
        .unwrap_err();

    assert!(matches!(failure.source, ControlError::Timeout(_)));
    assert_eq!(failure.stage, Stage::Execute);
    assert!(failure.kind().is_retryable());

    let stored = control.registry.load(&project).await.unwrap().unwrap();
    assert_eq!(stored.state, LifecycleState::Built);
    assert!(stored.deployment.is_none());
    assert!(control.ports.reservations(&project).is_empty());
    assert_eq!(control.runtime.resource_count(&project), 0);
}

#[tokio::test]
async fn failed_compensation_is_reported() {
    let control = TestControl::new();
    let project = id("site-1");
    drive_to(&control, &project, LifecycleState::Built).await;

    control.runtime.fail_always(RuntimeOp::CreateContainers);
    control.runtime.fail_always(RuntimeOp::RemoveAll);
    let failure = control
        .coordinator
        .execute(&project, Action::Deploy, &TransitionConfig::default())
        .await
        .unwrap_err();

    assert_eq!(failure.stage, Stage::Rollback);
    let ControlError::RollbackFailed { original, failures } = &failure.source else {
        panic!("expected rollback failure, got {failure}");
    };
    assert!(matches!(**original, ControlError::Runtime(_)));
    assert_eq!(failures.len(), 1);
    // Compensation still released the ports.
    assert!(control.ports.reservations(&project).is_empty());
    assert_eq!(
        control.registry.load(&project).await.unwrap().unwrap().state,
        LifecycleState::Built
    );
}

#[tokio::test]
async fn failed_update_restores_previous_containers() {
    let control = TestControl::new();
    let project = id("site-1");
    drive_to(&control, &project, LifecycleState::Online).await;
    let before = control.registry.document(&project);
    let specs_before = control.runtime.container_specs(&project);

    // Exhaust the retry budget; the compensating create then succeeds.
    control.runtime.fail_next(RuntimeOp::CreateContainers, 3);
    let failure = control
        .coordinator
        .execute(&project, Action::Update, &TransitionConfig::default())
        .await
        .unwrap_err();
    assert_eq!(failure.stage, Stage::Execute);
    assert!(matches!(failure.source, ControlError::Runtime(_)));

    assert_eq!(control.registry.document(&project), before);
    let status = control.runtime.status(&project).await.unwrap();
    assert_eq!(status.running().len(), specs_before.len());
}

#[tokio::test]
async fn failed_stop_restarts_containers() {
    let control = TestControl::with_config(WorkflowConfig {
        max_attempts: 1,
        health_timeout_secs: 1,
        ..WorkflowConfig::default()
    });
    let project = id("site-1");
    drive_to(&control, &project, LifecycleState::Online).await;
    let reserved = control.ports.reservations(&project);

    control.runtime.fail_always(RuntimeOp::StopContainers);
    control
        .coordinator
        .execute(&project, Action::Stop, &TransitionConfig::default())
        .await
        .unwrap_err();
    control.runtime.clear_faults();

    let stored = control.registry.load(&project).await.unwrap().unwrap();
    assert_eq!(stored.state, LifecycleState::Online);
    assert_eq!(control.ports.reservations(&project), reserved);
    assert_eq!(control.runtime.calls(RuntimeOp::StopContainers), 1);
}

#[tokio::test]
async fn failed_delete_restarts_containers() {
    let control = TestControl::with_config(WorkflowConfig {
        max_attempts: 1,
        health_timeout_secs: 1,
        ..WorkflowConfig::default()
    });
    let project = id("site-1");
    drive_to(&control, &project, LifecycleState::Online).await;
    let mut running = control.runtime.status(&project).await.unwrap().running();
    running.sort();
    let reserved = control.ports.reservations(&project);
    assert_eq!(running.len(), 2);

    control.runtime.fail_always(RuntimeOp::RemoveAll);
    let failure = control
        .coordinator
        .execute(&project, Action::Delete, &TransitionConfig::default())
        .await
        .unwrap_err();
    control.runtime.clear_faults();

    assert_eq!(failure.kind(), ErrorKind::Runtime);
    assert_eq!(failure.stage, Stage::Execute);
    let stored = control.registry.load(&project).await.unwrap().unwrap();
    assert_eq!(stored.state, LifecycleState::Online);
    let mut restarted = control.runtime.status(&project).await.unwrap().running();
    restarted.sort();
    assert_eq!(restarted, running);
    assert_eq!(control.ports.reservations(&project), reserved);

    // The project is intact, so DELETE can be retried.
    control
        .coordinator
        .execute(&project, Action::Delete, &TransitionConfig::default())
        .await
        .unwrap();
    assert_eq!(control.runtime.resource_count(&project), 0);
}

#[tokio::test]
async fn invalid_port_binding_releases_allocated_ports() {
    let control = TestControl::with_port_allocator(|ports| Arc::new(DuplicatePorts(ports)));
    let project = id("site-1");
    drive_to(&control, &project, LifecycleState::Built).await;
    let before = control.registry.document(&project);

    let failure = control
        .coordinator
        .execute(&project, Action::Deploy, &TransitionConfig::default())
        .await
        .unwrap_err();

    assert_eq!(failure.kind(), ErrorKind::Validation);
    assert_eq!(failure.stage, Stage::Allocate);
    assert!(failure.source.to_string().contains("already bound"));
    assert_eq!(control.registry.document(&project), before);
    assert!(control.ports.reservations(&project).is_empty());
    assert_eq!(control.ports.reserved_count(), 0);
    assert_eq!(control.runtime.resource_count(&project), 0);
}

#[tokio::test]
async fn transient_failures_are_retried_within_budget() {
    let control = TestControl::new();
    let project = id("site-1");
    drive_to(&control, &project, LifecycleState::Built).await;

    control.runtime.fail_next(RuntimeOp::CreateContainers, 2);
    let report = control
        .coordinator
        .execute(&project, Action::Deploy, &TransitionConfig::default())
        .await
        .unwrap();

    assert_eq!(report.new_state, LifecycleState::Offline);
    assert_eq!(control.runtime.calls(RuntimeOp::CreateContainers), 3);
}

#[tokio::test]
async fn exhausted_port_range_fails_allocation() {
    let control = TestControl::new();
    let project = id("site-1");
    drive_to(&control, &project, LifecycleState::Built).await;
    let before = control.registry.document(&project);

    control.probe.mark_busy(RANGE_START..=RANGE_END);
    let failure = control
        .coordinator
        .execute(&project, Action::Deploy, &TransitionConfig::default())
        .await
        .unwrap_err();

    assert_eq!(failure.kind(), ErrorKind::Allocation);
    assert_eq!(failure.stage, Stage::Allocate);
    assert_eq!(control.registry.document(&project), before);
    assert_eq!(control.ports.reserved_count(), 0);
    assert_eq!(control.runtime.resource_count(&project), 0);
}

#[tokio::test]
async fn start_rebinds_when_ports_are_taken() {
    let control = TestControl::new();
    let project = id("site-1");
    drive_to(&control, &project, LifecycleState::Offline).await;
    control
        .coordinator
        .execute(&project, Action::Start, &TransitionConfig::default())
        .await
        .unwrap();
    control
        .coordinator
        .execute(&project, Action::Stop, &TransitionConfig::default())
        .await
        .unwrap();

    // STOP released the ports; another process grabs the first one.
    let old = control
        .registry
        .load(&project)
        .await
        .unwrap()
        .unwrap()
        .host_ports();
    control.probe.mark_busy([old[0]]);

    let report = tokio::time::timeout(
        Duration::from_secs(5),
        control
            .coordinator
            .execute(&project, Action::Start, &TransitionConfig::default()),
    )
    .await
    .unwrap()
    .unwrap();

    let new_ports = report.project.unwrap().host_ports();
    assert!(!new_ports.contains(&old[0]));
    assert_eq!(new_ports.len(), old.len());
    let specs = control.runtime.container_specs(&project);
    assert!(specs.iter().all(|s| new_ports.contains(&s.host_port)));
}
