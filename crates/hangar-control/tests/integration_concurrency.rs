//! Integration tests for per-project exclusion and shutdown draining.

mod common;

use std::time::Duration;

use common::fixtures::{drive_to, id};
use common::TestControl;
use hangar_control::ports::PortAllocator;
use hangar_control::{Action, ControlError, LifecycleState, ProjectRegistry, Stage, TransitionConfig};

#[tokio::test]
async fn concurrent_transitions_on_one_project_never_both_commit() {
    let control = TestControl::new();
    let project = id("site-1");
    drive_to(&control, &project, LifecycleState::Built).await;
    control.runtime.set_delay(Duration::from_millis(50));

    let config = TransitionConfig::default();
    let (first, second) = tokio::join!(
        control.coordinator.execute(&project, Action::Deploy, &config),
        control.coordinator.execute(&project, Action::Deploy, &config),
    );

    let (winner, loser) = match (first, second) {
        (Ok(report), Err(failure)) | (Err(failure), Ok(report)) => (report, failure),
        (a, b) => panic!("expected exactly one commit, got {a:?} and {b:?}"),
    };
    assert_eq!(winner.new_state, LifecycleState::Offline);
    assert!(
        matches!(
            loser.source,
            ControlError::ConcurrentTransition(_) | ControlError::IllegalTransition { .. }
        ),
        "unexpected failure: {}",
        loser
    );
    // Only one set of ports was reserved.
    assert_eq!(control.ports.reservations(&project).len(), 2);
}

#[tokio::test]
async fn lock_holder_rejects_second_caller() {
    let control = TestControl::new();
    let project = id("site-1");
    drive_to(&control, &project, LifecycleState::Built).await;
    control.runtime.set_delay(Duration::from_millis(100));

    let coordinator = control.coordinator.clone();
    let background = {
        let project = project.clone();
        tokio::spawn(async move {
            coordinator
                .execute(&project, Action::Deploy, &TransitionConfig::default())
                .await
        })
    };

    // Wait for the background transition to take the lock.
    while control.coordinator.in_flight() == 0 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let failure = control
        .coordinator
        .execute(&project, Action::Revert, &TransitionConfig::default())
        .await
        .unwrap_err();
    assert!(matches!(failure.source, ControlError::ConcurrentTransition(_)));
    assert_eq!(failure.stage, Stage::Lock);

    background.await.unwrap().unwrap();
    let stored = control.registry.load(&project).await.unwrap().unwrap();
    assert_eq!(stored.state, LifecycleState::Offline);
}

#[tokio::test]
async fn different_projects_run_in_parallel() {
    let control = TestControl::new();
    let (a, b) = (id("site-a"), id("site-b"));
    drive_to(&control, &a, LifecycleState::Built).await;
    drive_to(&control, &b, LifecycleState::Built).await;
    control.runtime.set_delay(Duration::from_millis(20));

    let config = TransitionConfig::default();
    let (ra, rb) = tokio::join!(
        control.coordinator.execute(&a, Action::Deploy, &config),
        control.coordinator.execute(&b, Action::Deploy, &config),
    );
    ra.unwrap();
    rb.unwrap();

    let ports_a = control.ports.reservations(&a);
    let ports_b = control.ports.reservations(&b);
    assert!(ports_a.iter().all(|p| !ports_b.contains(p)));
}

#[tokio::test]
async fn drain_waits_for_in_flight_transitions() {
    let control = TestControl::new();
    let project = id("site-1");
    drive_to(&control, &project, LifecycleState::Built).await;
    control.runtime.set_delay(Duration::from_millis(50));

    let coordinator = control.coordinator.clone();
    let background = {
        let project = project.clone();
        tokio::spawn(async move {
            coordinator
                .execute(&project, Action::Deploy, &TransitionConfig::default())
                .await
        })
    };
    while control.coordinator.in_flight() == 0 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    assert!(control.coordinator.drain(Duration::from_secs(10)).await);
    assert_eq!(control.coordinator.in_flight(), 0);
    background.await.unwrap().unwrap();

    let failure = control
        .coordinator
        .execute(&project, Action::Start, &TransitionConfig::default())
        .await
        .unwrap_err();
    assert!(matches!(failure.source, ControlError::ShuttingDown));
}

#[tokio::test]
async fn drain_gives_up_after_timeout() {
    let control = TestControl::new();
    let project = id("site-1");
    drive_to(&control, &project, LifecycleState::Built).await;
    control
        .runtime
        .hang(hangar_control::runtime::RuntimeOp::CreateContainers);

    let coordinator = control.coordinator.clone();
    let background = {
        let project = project.clone();
        tokio::spawn(async move {
            coordinator
                .execute(&project, Action::Deploy, &TransitionConfig::default())
                .await
        })
    };
    while control.coordinator.in_flight() == 0 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    assert!(!control.coordinator.drain(Duration::from_millis(100)).await);
    background.abort();
}
