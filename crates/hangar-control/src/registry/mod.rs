//! Project registry backends.
//!
//! The registry is the only component that writes project state. Each project
//! is stored as one JSON document. A file-backed implementation is used in
//! production and an in-memory implementation is provided for testing.

mod file;
mod memory;

pub use file::FileRegistry;
pub use memory::MemoryRegistry;

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::{RegistryBackend, RegistryConfig};
use crate::error::ControlResult;
use crate::types::{Project, ProjectId};

/// Backend for storing project documents.
///
/// `save` must replace the whole document atomically: readers observe either
/// the previous or the new document, never a mix.
#[async_trait]
pub trait ProjectRegistry: Send + Sync {
    /// Load a project.
    ///
    /// Returns `None` if the project does not exist.
    async fn load(&self, id: &ProjectId) -> ControlResult<Option<Project>>;

    /// Insert or replace a project document.
    async fn save(&self, project: &Project) -> ControlResult<()>;

    /// Remove a project document.
    ///
    /// Removing a project that does not exist succeeds.
    async fn delete(&self, id: &ProjectId) -> ControlResult<()>;

    /// List all projects ordered by ID.
    async fn list(&self) -> ControlResult<Vec<Project>>;
}

/// Create a registry from configuration.
pub async fn create_registry(config: &RegistryConfig) -> ControlResult<Arc<dyn ProjectRegistry>> {
    match config.backend {
        RegistryBackend::File => {
            let registry = FileRegistry::open(&config.data_dir).await?;
            Ok(Arc::new(registry))
        }
        RegistryBackend::Memory => Ok(Arc::new(MemoryRegistry::new())),
    }
}
