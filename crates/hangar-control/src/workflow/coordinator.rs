//! The transition coordinator.

use std::collections::BTreeSet;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::WorkflowConfig;
use crate::error::{ControlError, ControlResult, TransitionFailure};
use crate::events::{EventSink, LifecycleEvent};
use crate::generator::{
    container_specs, Artifact, ArtifactGenerator, DeploymentPlan, GeneratorOptions, StartPlan,
    StopPlan, TeardownPlan, UpdatePlan,
};
use crate::loader::{LoadedContext, ResourceLoader};
use crate::ports::{PortAllocation, PortAllocator, PortHint};
use crate::registry::ProjectRegistry;
use crate::runtime::{ContainerRuntime, ContainerSpec, NetworkSpec, VolumeSpec};
use crate::state::StateMachine;
use crate::templates::TemplateSource;
use crate::transition::{Outcome, Stage, StepRecord, StepStatus, TransitionLog, TransitionRecord};
use crate::types::{Action, LifecycleState, Project, ProjectId};
use crate::validator::{validate_containers, SchemaValidator, TemplateValidator, ValidationReport};

use super::journal::{Effect, Journal};
use super::lock::ProjectLocks;
use super::{TransitionConfig, TransitionReport};

/// Upper bound on a single wait while draining.
const DRAIN_POLL: Duration = Duration::from_millis(50);

/// Adapters the coordinator drives.
#[derive(Clone)]
pub struct Collaborators {
    /// Project document store.
    pub registry: Arc<dyn ProjectRegistry>,
    /// Container runtime.
    pub runtime: Arc<dyn ContainerRuntime>,
    /// Host port allocator.
    pub ports: Arc<dyn PortAllocator>,
    /// Template source for CREATE.
    pub templates: Arc<dyn TemplateSource>,
    /// Lifecycle event sink.
    pub events: Arc<dyn EventSink>,
}

/// Runs lifecycle actions as atomic, observable transitions.
///
/// At most one transition per project is in flight. A transition either
/// commits the new state with all of its side effects in place, or fails
/// with persisted state and runtime resources as they were before it began.
pub struct WorkflowCoordinator {
    registry: Arc<dyn ProjectRegistry>,
    runtime: Arc<dyn ContainerRuntime>,
    ports: Arc<dyn PortAllocator>,
    events: Arc<dyn EventSink>,
    loader: ResourceLoader,
    generator: ArtifactGenerator,
    machine: StateMachine,
    schema: SchemaValidator,
    locks: Arc<ProjectLocks>,
    log: TransitionLog,
    config: WorkflowConfig,
    accepting: AtomicBool,
}

/// What the side-effect stages leave for commit.
struct Applied {
    /// Document to persist, `None` to remove the record.
    document: Option<Project>,
    /// Ports to release once committed.
    release: Vec<u16>,
}

struct Committed {
    from: LifecycleState,
    project: Option<Project>,
    artifact: Artifact,
    warnings: Vec<String>,
}

/// Mutable state of one in-flight transition.
struct TransitionRun {
    record: TransitionRecord,
    events: Arc<dyn EventSink>,
    cancel: CancellationToken,
    current: Option<(Stage, Instant)>,
    journal: Journal,
}

impl TransitionRun {
    fn start(record: TransitionRecord, events: Arc<dyn EventSink>, cancel: CancellationToken) -> Self {
        events.emit(LifecycleEvent::WorkflowStarted {
            project_id: record.project_id.clone(),
            timestamp: Utc::now(),
            transition_id: record.id.clone(),
            action: record.action,
            from_state: record.from_state,
        });
        Self {
            record,
            events,
            cancel,
            current: None,
            journal: Journal::default(),
        }
    }

    /// Finish the current stage and begin `stage`, unless cancelled.
    fn enter(&mut self, stage: Stage) -> ControlResult<()> {
        self.finish(StepStatus::Completed);
        self.begin(stage);
        if self.cancel.is_cancelled() {
            return Err(ControlError::Cancelled);
        }
        Ok(())
    }

    fn begin(&mut self, stage: Stage) {
        self.current = Some((stage, Instant::now()));
        self.progress(stage, StepStatus::Running);
    }

    fn finish(&mut self, status: StepStatus) {
        let Some((stage, started)) = self.current.take() else {
            return;
        };
        self.record.steps.push(StepRecord {
            name: stage,
            status,
            duration_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        });
        self.progress(stage, status);
    }

    fn stage(&self) -> Stage {
        self.current.map_or(Stage::Load, |(stage, _)| stage)
    }

    fn progress(&self, stage: Stage, status: StepStatus) {
        self.events.emit(LifecycleEvent::CallProgress {
            project_id: self.record.project_id.clone(),
            timestamp: Utc::now(),
            transition_id: self.record.id.clone(),
            stage,
            status,
        });
    }
}

impl WorkflowCoordinator {
    /// Create a coordinator.
    #[must_use]
    pub fn new(
        collaborators: Collaborators,
        generator: GeneratorOptions,
        config: &WorkflowConfig,
    ) -> Self {
        let Collaborators {
            registry,
            runtime,
            ports,
            templates,
            events,
        } = collaborators;

        Self {
            loader: ResourceLoader::new(
                Arc::clone(&registry),
                Arc::clone(&runtime),
                Arc::clone(&ports),
                templates,
            ),
            registry,
            runtime,
            ports,
            events,
            generator: ArtifactGenerator::new(generator),
            machine: StateMachine::new(),
            schema: SchemaValidator::new(config.validation),
            locks: Arc::new(ProjectLocks::new()),
            log: TransitionLog::new(config.history_capacity),
            config: config.clone(),
            accepting: AtomicBool::new(true),
        }
    }

    /// The transition table.
    #[must_use]
    pub const fn state_machine(&self) -> &StateMachine {
        &self.machine
    }

    /// Finished transitions of a project, oldest first.
    #[must_use]
    pub fn history(&self, project_id: &ProjectId) -> Vec<TransitionRecord> {
        self.log.for_project(project_id)
    }

    /// Number of transitions in flight.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.locks.len()
    }

    /// Whether new transitions are accepted.
    #[must_use]
    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::SeqCst)
    }

    /// Run `action` on a project.
    pub async fn execute(
        &self,
        project_id: &ProjectId,
        action: Action,
        config: &TransitionConfig,
    ) -> Result<TransitionReport, TransitionFailure> {
        self.execute_with_cancel(project_id, action, config, CancellationToken::new())
            .await
    }

    /// Run `action` on a project, aborting at the next stage boundary once
    /// `cancel` fires.
    pub async fn execute_with_cancel(
        &self,
        project_id: &ProjectId,
        action: Action,
        config: &TransitionConfig,
        cancel: CancellationToken,
    ) -> Result<TransitionReport, TransitionFailure> {
        let fail = |stage, source| TransitionFailure::new(project_id.clone(), action, stage, source);

        if !self.is_accepting() {
            return Err(fail(Stage::Check, ControlError::ShuttingDown));
        }

        let current = self
            .registry
            .load(project_id)
            .await
            .map_err(|e| fail(Stage::Load, e))?;
        let from = current.as_ref().map_or(LifecycleState::Void, |p| p.state);
        let target = self.machine.target(from, action).map_err(|e| {
            debug!(project = %project_id, action = %action, state = %from, "transition rejected");
            fail(Stage::Check, e)
        })?;

        let record = TransitionRecord::begin(project_id.clone(), action, from, target);
        let _guard = self
            .locks
            .try_acquire(project_id, &record.id)
            .map_err(|e| {
                warn!(project = %project_id, action = %action, "transition already in flight");
                fail(Stage::Lock, e)
            })?;
        // A drain that started after the first check must not miss this one.
        if !self.is_accepting() {
            return Err(fail(Stage::Lock, ControlError::ShuttingDown));
        }

        info!(
            project = %project_id,
            action = %action,
            from = %from,
            to = %target.observed_state(),
            transition = %record.id,
            "transition started"
        );

        let mut run = TransitionRun::start(record, Arc::clone(&self.events), cancel);
        match self.pipeline(&mut run, project_id, action, config).await {
            Ok(committed) => Ok(self.complete(run, committed)),
            Err(e) => Err(self.abort(run, project_id, action, e).await),
        }
    }

    /// Stop accepting transitions and wait for in-flight ones to finish.
    ///
    /// Returns `false` if some were still running after `timeout`.
    pub async fn drain(&self, timeout: Duration) -> bool {
        self.accepting.store(false, Ordering::SeqCst);
        let deadline = tokio::time::Instant::now() + timeout;

        while !self.locks.is_empty() {
            let now = tokio::time::Instant::now();
            if now >= deadline {
                warn!(in_flight = self.locks.len(), "drain timed out");
                return false;
            }
            let wait = (deadline - now).min(DRAIN_POLL);
            let _ = tokio::time::timeout(wait, self.locks.released()).await;
        }

        info!("coordinator drained");
        true
    }

    // =========================================================================
    // Pipeline
    // =========================================================================

    async fn pipeline(
        &self,
        run: &mut TransitionRun,
        project_id: &ProjectId,
        action: Action,
        config: &TransitionConfig,
    ) -> ControlResult<Committed> {
        run.enter(Stage::Load)?;
        let ctx = self.loader.load(project_id, action, config).await?;

        // The project may have moved on between the first check and the lock.
        run.enter(Stage::Check)?;
        let from = ctx.current_state();
        let target = self.machine.target(from, action)?;
        run.record.from_state = from;
        run.record.to_state = target.observed_state();

        run.enter(Stage::Generate)?;
        let artifact = self.generator.generate(&ctx, config)?;

        run.enter(Stage::Validate)?;
        let warnings = self.validate(&ctx, &artifact)?;

        let deadline = config
            .timeout_secs
            .map_or_else(|| self.config.timeout(), Duration::from_secs);
        let outcome = tokio::time::timeout(deadline, self.apply(run, &ctx, &artifact)).await;
        let applied = match outcome {
            Ok(applied) => applied?,
            Err(_) => {
                warn!(project = %project_id, stage = %run.stage(), timeout = ?deadline, "transition deadline exceeded");
                return Err(ControlError::Timeout(deadline));
            }
        };

        run.enter(Stage::Commit)?;
        let project = match applied.document {
            Some(document) => {
                let document = self
                    .machine
                    .apply_transition(from, document, action, ctx.now)?;
                self.registry.save(&document).await?;
                Some(document)
            }
            None => {
                self.registry.delete(project_id).await?;
                None
            }
        };

        if !applied.release.is_empty() {
            if let Err(e) = self.ports.release(project_id, &applied.release) {
                warn!(project = %project_id, ports = ?applied.release, error = %e, "failed to release ports");
            }
        }

        Ok(Committed {
            from,
            project,
            artifact,
            warnings,
        })
    }

    fn validate(&self, ctx: &LoadedContext, artifact: &Artifact) -> ControlResult<Vec<String>> {
        let mut report = ValidationReport::new();

        let content_changed = matches!(
            ctx.action,
            Action::Create | Action::Edit | Action::Build | Action::Update
        );
        let document = match artifact {
            Artifact::Update(plan) => Some(&plan.next.project),
            other => other.document(),
        };
        if let Some(document) = document.filter(|_| content_changed) {
            report.merge(self.schema.validate(&serde_json::to_value(document)?));
            let variables = ctx
                .template
                .as_ref()
                .map(|t| t.variables.clone())
                .unwrap_or_default();
            report.merge(TemplateValidator::new(variables).validate(&document.pages));
        }

        match artifact {
            Artifact::Deployment(plan) => report.merge(validate_plan(plan)?),
            Artifact::Update(plan) => report.merge(validate_plan(&plan.next)?),
            Artifact::Start(plan) => report.merge(validate_containers(
                &container_specs(&ctx.project_id, &plan.binding),
                false,
            )),
            _ => {}
        }

        let warnings = report.into_result()?;
        for warning in &warnings {
            debug!(project = %ctx.project_id, warning = %warning, "validation warning");
        }
        Ok(warnings)
    }

    async fn apply(
        &self,
        run: &mut TransitionRun,
        ctx: &LoadedContext,
        artifact: &Artifact,
    ) -> ControlResult<Applied> {
        match artifact {
            Artifact::Document(project) => Ok(Applied {
                document: Some(project.clone()),
                release: Vec::new(),
            }),
            Artifact::Deployment(plan) => self.deploy(run, ctx, plan).await,
            Artifact::Start(plan) => self.start(run, &ctx.project_id, plan).await,
            Artifact::Stop(plan) => self.stop(run, &ctx.project_id, plan).await,
            Artifact::Update(plan) => self.update(run, ctx, plan).await,
            Artifact::Teardown(plan) => self.teardown(run, &ctx.project_id, plan).await,
        }
    }

    // =========================================================================
    // Side effects
    // =========================================================================

    async fn deploy(
        &self,
        run: &mut TransitionRun,
        ctx: &LoadedContext,
        plan: &DeploymentPlan,
    ) -> ControlResult<Applied> {
        let project_id = &ctx.project_id;
        let runtime = self.runtime.as_ref();

        run.enter(Stage::Allocate)?;
        let hint = PortHint::preferring(ctx.reserved_ports.clone());
        let allocation = self.allocate(run, project_id, plan.port_count(), &hint).await?;
        let bound = plan.bind(&allocation.ports)?;
        validate_containers(&bound.containers, true).into_result()?;

        run.enter(Stage::Execute)?;
        run.journal.record(Effect::Provisioned);
        self.ensure_networking(project_id, &plan.network, &plan.volumes)
            .await?;
        let image = &plan.image;
        let info = self
            .call(project_id, "ensure_image", || runtime.ensure_image(image))
            .await?;
        debug!(project = %project_id, image = %info.reference, size_bytes = info.size_bytes, "image ready");
        let containers = &bound.containers;
        self.call(project_id, "create_containers", || {
            runtime.create_containers(containers)
        })
        .await?;

        info!(project = %project_id, ports = ?allocation.ports, "deployment provisioned");
        Ok(Applied {
            document: Some(plan.bound_document(&bound)),
            release: Vec::new(),
        })
    }

    async fn start(
        &self,
        run: &mut TransitionRun,
        project_id: &ProjectId,
        plan: &StartPlan,
    ) -> ControlResult<Applied> {
        let runtime = self.runtime.as_ref();
        let ports = self.ports.as_ref();
        let names = plan.names();
        let previous_ports = plan.ports();

        run.enter(Stage::Allocate)?;
        let hint = PortHint::preferring(previous_ports.clone());
        let allocation = self.allocate(run, project_id, names.len(), &hint).await?;
        let allocated = &allocation.ports;
        self.call(project_id, "verify", || async move {
            ports.verify(project_id, allocated)
        })
        .await?;

        let binding = if allocation.ports == previous_ports {
            plan.binding.clone()
        } else {
            info!(project = %project_id, from = ?previous_ports, to = ?allocation.ports, "host ports changed, recreating containers");
            plan.rebind(&allocation.ports)
        };
        let rebound = binding != plan.binding;
        let specs = container_specs(project_id, &binding);
        validate_containers(&specs, true).into_result()?;

        run.enter(Stage::Execute)?;
        if rebound || !plan.missing.is_empty() {
            let network = NetworkSpec {
                name: binding.network.clone(),
                project_id: project_id.clone(),
            };
            let volumes: Vec<VolumeSpec> = binding
                .volumes
                .iter()
                .map(|name| VolumeSpec {
                    name: name.clone(),
                    project_id: project_id.clone(),
                })
                .collect();
            self.ensure_networking(project_id, &network, &volumes).await?;

            let removed: Vec<ContainerSpec> = if rebound {
                container_specs(project_id, &plan.binding)
                    .into_iter()
                    .filter(|c| !plan.missing.contains(&c.name))
                    .collect()
            } else {
                Vec::new()
            };
            let created = if rebound {
                names.clone()
            } else {
                plan.missing.clone()
            };
            run.journal.record(Effect::Replaced {
                removed: removed.clone(),
                created,
                restart: false,
            });

            if !removed.is_empty() {
                let removed_names: Vec<String> = removed.iter().map(|c| c.name.clone()).collect();
                let removed_names = &removed_names;
                self.call(project_id, "remove_containers", || {
                    runtime.remove_containers(project_id, removed_names)
                })
                .await?;
            }
            let specs = &specs;
            self.call(project_id, "create_containers", || {
                runtime.create_containers(specs)
            })
            .await?;
        }

        run.journal.record(Effect::Started(names.clone()));
        let started = &names;
        self.call(project_id, "run_containers", || {
            runtime.run_containers(project_id, started)
        })
        .await?;

        run.enter(Stage::Health)?;
        runtime
            .wait_healthy(project_id, &names, self.config.health_timeout())
            .await?;

        let mut document = plan.project.clone();
        document.deployment = Some(binding);
        Ok(Applied {
            document: Some(document),
            release: Vec::new(),
        })
    }

    async fn stop(
        &self,
        run: &mut TransitionRun,
        project_id: &ProjectId,
        plan: &StopPlan,
    ) -> ControlResult<Applied> {
        let runtime = self.runtime.as_ref();

        run.enter(Stage::Execute)?;
        run.journal.record(Effect::Stopped(plan.names.clone()));
        let names = &plan.names;
        self.call(project_id, "stop_containers", || {
            runtime.stop_containers(project_id, names)
        })
        .await?;

        Ok(Applied {
            document: Some(plan.project.clone()),
            release: plan.ports.clone(),
        })
    }

    async fn update(
        &self,
        run: &mut TransitionRun,
        ctx: &LoadedContext,
        plan: &UpdatePlan,
    ) -> ControlResult<Applied> {
        let project_id = &ctx.project_id;
        let runtime = self.runtime.as_ref();
        let next = &plan.next;
        let previous_ports: Vec<u16> = plan.previous.containers.iter().map(|c| c.host_port).collect();

        run.enter(Stage::Allocate)?;
        let hint = PortHint::preferring(previous_ports.clone());
        let allocation = self.allocate(run, project_id, next.port_count(), &hint).await?;
        let bound = next.bind(&allocation.ports)?;
        validate_containers(&bound.containers, true).into_result()?;

        run.enter(Stage::Execute)?;
        self.ensure_networking(project_id, &next.network, &next.volumes)
            .await?;
        let image = &next.image;
        self.call(project_id, "ensure_image", || runtime.ensure_image(image))
            .await?;

        let created: Vec<String> = bound.containers.iter().map(|c| c.name.clone()).collect();
        run.journal.record(Effect::Replaced {
            removed: plan.previous_containers.clone(),
            created: created.clone(),
            restart: plan.restart,
        });
        let previous_names: Vec<String> = plan
            .previous_containers
            .iter()
            .map(|c| c.name.clone())
            .collect();
        let previous_names = &previous_names;
        self.call(project_id, "remove_containers", || {
            runtime.remove_containers(project_id, previous_names)
        })
        .await?;
        let containers = &bound.containers;
        self.call(project_id, "create_containers", || {
            runtime.create_containers(containers)
        })
        .await?;

        if plan.restart {
            run.journal.record(Effect::Started(created.clone()));
            let started = &created;
            self.call(project_id, "run_containers", || {
                runtime.run_containers(project_id, started)
            })
            .await?;

            run.enter(Stage::Health)?;
            runtime
                .wait_healthy(project_id, &created, self.config.health_timeout())
                .await?;
        }

        let release: Vec<u16> = ctx
            .reserved_ports
            .iter()
            .chain(&previous_ports)
            .filter(|port| !allocation.ports.contains(port))
            .copied()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        info!(project = %project_id, revision = next.revision, restart = plan.restart, "deployment replaced");
        Ok(Applied {
            document: Some(next.bound_document(&bound)),
            release,
        })
    }

    async fn teardown(
        &self,
        run: &mut TransitionRun,
        project_id: &ProjectId,
        plan: &TeardownPlan,
    ) -> ControlResult<Applied> {
        let runtime = self.runtime.as_ref();

        run.enter(Stage::Execute)?;
        if !plan.running.is_empty() {
            run.journal.record(Effect::Stopped(plan.running.clone()));
            let running = &plan.running;
            self.call(project_id, "stop_containers", || {
                runtime.stop_containers(project_id, running)
            })
            .await?;
        }
        if plan.has_resources {
            self.call(project_id, "remove_all", || runtime.remove_all(project_id))
                .await?;
        }

        Ok(Applied {
            document: None,
            release: plan.ports.clone(),
        })
    }

    /// Allocate ports and journal the newly reserved ones.
    async fn allocate(
        &self,
        run: &mut TransitionRun,
        project_id: &ProjectId,
        count: usize,
        hint: &PortHint,
    ) -> ControlResult<PortAllocation> {
        let ports = self.ports.as_ref();
        let allocation = self
            .call(project_id, "allocate", || async move {
                ports.allocate(project_id, count, hint)
            })
            .await?;
        if !allocation.reserved.is_empty() {
            run.journal
                .record(Effect::Reserved(allocation.reserved.clone()));
        }
        debug!(project = %project_id, ports = ?allocation.ports, reserved = ?allocation.reserved, "ports allocated");
        Ok(allocation)
    }

    async fn ensure_networking(
        &self,
        project_id: &ProjectId,
        network: &NetworkSpec,
        volumes: &[VolumeSpec],
    ) -> ControlResult<()> {
        let runtime = self.runtime.as_ref();
        self.call(project_id, "ensure_network", || runtime.ensure_network(network))
            .await?;
        for volume in volumes {
            self.call(project_id, "ensure_volume", || runtime.ensure_volume(volume))
                .await?;
        }
        Ok(())
    }

    /// Run an adapter call, retrying transient failures with backoff.
    async fn call<T, F, Fut>(&self, project_id: &ProjectId, op: &'static str, mut f: F) -> ControlResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ControlResult<T>>,
    {
        let mut attempt: u32 = 1;
        loop {
            match f().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < self.config.max_attempts => {
                    let backoff = self.config.backoff(attempt);
                    warn!(
                        project = %project_id,
                        op,
                        attempt,
                        backoff = ?backoff,
                        error = %e,
                        "transient failure, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    // =========================================================================
    // Outcome
    // =========================================================================

    fn complete(&self, mut run: TransitionRun, committed: Committed) -> TransitionReport {
        run.finish(StepStatus::Completed);
        run.record.outcome = Outcome::Committed;

        let record = run.record;
        let new_state = committed
            .project
            .as_ref()
            .map_or(LifecycleState::Void, |p| p.state);
        let duration_ms = record.total_duration_ms();

        info!(
            project = %record.project_id,
            action = %record.action,
            state = %new_state,
            duration_ms,
            "transition committed"
        );

        self.log.archive(record.clone());
        self.events.emit(LifecycleEvent::WorkflowCompleted {
            project_id: record.project_id.clone(),
            timestamp: Utc::now(),
            transition_id: record.id.clone(),
            action: record.action,
            duration_ms,
        });
        self.events.emit(LifecycleEvent::ProjectStateChanged {
            project_id: record.project_id.clone(),
            timestamp: Utc::now(),
            from: committed.from,
            to: new_state,
        });

        TransitionReport {
            project_id: record.project_id.clone(),
            action: record.action,
            from_state: committed.from,
            new_state,
            project: committed.project,
            artifact: committed.artifact,
            warnings: committed.warnings,
            record,
        }
    }

    async fn abort(
        &self,
        mut run: TransitionRun,
        project_id: &ProjectId,
        action: Action,
        cause: ControlError,
    ) -> TransitionFailure {
        let mut stage = run.stage();
        run.finish(StepStatus::Failed);

        let rolled_back = !run.journal.is_empty();
        let source = if rolled_back {
            run.begin(Stage::Rollback);
            let compensation =
                run.journal
                    .compensate(project_id, self.runtime.as_ref(), self.ports.as_ref());
            let failures = match tokio::time::timeout(self.config.timeout(), compensation).await {
                Ok(failures) => failures,
                Err(_) => vec![format!(
                    "rollback timed out after {:?}",
                    self.config.timeout()
                )],
            };

            if failures.is_empty() {
                run.finish(StepStatus::Completed);
                cause
            } else {
                run.finish(StepStatus::Failed);
                stage = Stage::Rollback;
                error!(
                    project = %project_id,
                    action = %action,
                    failures = ?failures,
                    "rollback incomplete, manual intervention required"
                );
                ControlError::RollbackFailed {
                    original: Box::new(cause),
                    failures,
                }
            }
        } else {
            cause
        };

        warn!(
            project = %project_id,
            action = %action,
            stage = %stage,
            kind = %source.kind(),
            rolled_back,
            error = %source,
            "transition failed"
        );

        run.record.outcome = Outcome::Failed {
            stage,
            kind: source.kind(),
            message: source.to_string(),
            rolled_back,
        };
        self.events.emit(LifecycleEvent::WorkflowFailed {
            project_id: project_id.clone(),
            timestamp: Utc::now(),
            transition_id: run.record.id.clone(),
            action,
            stage,
            kind: source.kind(),
            message: source.to_string(),
        });
        self.log.archive(run.record);

        TransitionFailure::new(project_id.clone(), action, stage, source)
    }
}

/// Validate the containers a plan would create, before ports are known.
fn validate_plan(plan: &DeploymentPlan) -> ControlResult<ValidationReport> {
    let placeholder = vec![0; plan.port_count()];
    let bound = plan.bind(&placeholder)?;
    Ok(validate_containers(&bound.containers, false))
}
