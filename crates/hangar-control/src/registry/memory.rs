//! In-memory project registry for testing.

use std::collections::BTreeMap;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::error::{ControlError, ControlResult};
use crate::types::{Project, ProjectId};

use super::ProjectRegistry;

/// In-memory project registry.
///
/// Documents are kept in their serialised form so that tests can compare the
/// stored bytes before and after a transition.
#[derive(Debug, Default)]
pub struct MemoryRegistry {
    documents: RwLock<BTreeMap<String, String>>,
}

impl MemoryRegistry {
    /// Create a new empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw stored document for a project.
    #[must_use]
    pub fn document(&self, id: &ProjectId) -> Option<String> {
        self.documents
            .read()
            .ok()
            .and_then(|docs| docs.get(id.as_str()).cloned())
    }
}

#[async_trait]
impl ProjectRegistry for MemoryRegistry {
    async fn load(&self, id: &ProjectId) -> ControlResult<Option<Project>> {
        let documents = self
            .documents
            .read()
            .map_err(|_| ControlError::internal("lock poisoned"))?;

        documents
            .get(id.as_str())
            .map(|doc| serde_json::from_str::<Project>(doc))
            .transpose()
            .map_err(Into::into)
    }

    async fn save(&self, project: &Project) -> ControlResult<()> {
        let document = serde_json::to_string_pretty(project)?;
        let mut documents = self
            .documents
            .write()
            .map_err(|_| ControlError::internal("lock poisoned"))?;

        documents.insert(project.id.as_str().to_owned(), document);
        Ok(())
    }

    async fn delete(&self, id: &ProjectId) -> ControlResult<()> {
        let mut documents = self
            .documents
            .write()
            .map_err(|_| ControlError::internal("lock poisoned"))?;

        documents.remove(id.as_str());
        Ok(())
    }

    async fn list(&self) -> ControlResult<Vec<Project>> {
        let documents = self
            .documents
            .read()
            .map_err(|_| ControlError::internal("lock poisoned"))?;

        documents
            .values()
            .map(|doc| serde_json::from_str::<Project>(doc).map_err(Into::into))
            .collect()
    }
}
