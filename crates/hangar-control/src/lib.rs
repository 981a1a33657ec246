//! Hangar control plane.
//!
//! This crate drives site projects through their lifecycle. A project moves
//! between five states, and every move is an atomic, observable transition:
//!
//! ```text
//! VOID ──CREATE──▶ DRAFT ──BUILD──▶ BUILT ──DEPLOY──▶ OFFLINE ──START──▶ ONLINE
//! ```
//!
//! # Architecture
//!
//! - **State machine** ([`state`]): the only place lifecycle edges are defined.
//! - **Coordinator** ([`workflow`]): per-project locking, the stage pipeline,
//!   retries, deadlines, cancellation and rollback.
//! - **Collaborators**: the project [`registry`], the container [`runtime`],
//!   the host [`ports`] allocator and the [`templates`] source, each behind a
//!   trait with a production and an in-memory implementation.
//! - **Surfaces**: an HTTP [`api`] and the [`service`] runner.
//!
//! # Example
//!
//! ```ignore
//! use hangar_control::{types::Action, ProjectId, TransitionConfig};
//!
//! let id = ProjectId::parse("site-1")?;
//! let report = coordinator
//!     .execute(&id, Action::Create, &TransitionConfig::default())
//!     .await?;
//! assert_eq!(report.new_state, LifecycleState::Draft);
//! ```

#![forbid(unsafe_code)]

pub mod api;
pub mod config;
pub mod error;
pub mod events;
pub mod generator;
pub mod loader;
pub mod ports;
pub mod registry;
pub mod runtime;
pub mod service;
pub mod state;
pub mod templates;
pub mod transition;
pub mod tree;
pub mod types;
pub mod validator;
pub mod workflow;

// Re-export commonly used types at the crate root
pub use config::ControlConfig;
pub use error::{ControlError, ControlResult, ErrorKind, TransitionFailure};
pub use events::{EventBus, EventSink, LifecycleEvent};
pub use registry::{FileRegistry, MemoryRegistry, ProjectRegistry};
pub use runtime::{ContainerRuntime, DockerRuntime, MemoryRuntime};
pub use service::ControlService;
pub use state::StateMachine;
pub use transition::{Stage, TransitionRecord};
pub use types::{Action, LifecycleState, Project, ProjectId};
pub use workflow::{Collaborators, TransitionConfig, TransitionReport, WorkflowCoordinator};
