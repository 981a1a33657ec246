//! File-backed project registry: one JSON document per project.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::{ControlError, ControlResult};
use crate::types::{Project, ProjectId};

use super::ProjectRegistry;

/// Project registry storing `<data_dir>/<id>.json`.
#[derive(Debug, Clone)]
pub struct FileRegistry {
    root: PathBuf,
}

impl FileRegistry {
    /// Open a registry rooted at `root`, creating the directory if needed.
    pub async fn open(root: impl AsRef<Path>) -> ControlResult<Self> {
        let root = root.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&root).await.map_err(|e| {
            ControlError::registry(format!(
                "failed to create registry directory {}: {e}",
                root.display()
            ))
        })?;
        Ok(Self { root })
    }

    /// Directory holding the documents.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of a project's document.
    #[must_use]
    pub fn document_path(&self, id: &ProjectId) -> PathBuf {
        self.root.join(format!("{id}.json"))
    }
}

#[async_trait]
impl ProjectRegistry for FileRegistry {
    async fn load(&self, id: &ProjectId) -> ControlResult<Option<Project>> {
        let path = self.document_path(id);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(ControlError::registry(format!(
                "failed to read {}: {e}",
                path.display()
            ))),
        }
    }

    async fn save(&self, project: &Project) -> ControlResult<()> {
        let path = self.document_path(&project.id);
        let tmp = self.root.join(format!(".{}.json.tmp", project.id));
        let bytes = serde_json::to_vec_pretty(project)?;

        tokio::fs::write(&tmp, &bytes).await.map_err(|e| {
            ControlError::registry(format!("failed to write {}: {e}", tmp.display()))
        })?;
        tokio::fs::rename(&tmp, &path).await.map_err(|e| {
            ControlError::registry(format!("failed to replace {}: {e}", path.display()))
        })?;

        debug!(project = %project.id, path = %path.display(), "project saved");
        Ok(())
    }

    async fn delete(&self, id: &ProjectId) -> ControlResult<()> {
        let path = self.document_path(id);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ControlError::registry(format!(
                "failed to remove {}: {e}",
                path.display()
            ))),
        }
    }

    async fn list(&self) -> ControlResult<Vec<Project>> {
        let mut entries = tokio::fs::read_dir(&self.root).await.map_err(|e| {
            ControlError::registry(format!("failed to list {}: {e}", self.root.display()))
        })?;

        let mut projects = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let Some(stem) = path
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(|n| n.strip_suffix(".json"))
            else {
                continue;
            };
            let Ok(id) = ProjectId::parse(stem) else {
                continue;
            };
            match self.load(&id).await {
                Ok(Some(project)) => projects.push(project),
                Ok(None) => {}
                Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable project"),
            }
        }

        projects.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(projects)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::LifecycleState;
    use chrono::Utc;

    fn test_project(id: &str) -> Project {
        let now = Utc::now();
        Project {
            id: ProjectId::parse(id).unwrap(),
            name: "Test".to_owned(),
            state: LifecycleState::Draft,
            version: "1.0.0".to_owned(),
            template: "blank".to_owned(),
            pages: vec![],
            created: now,
            last_modified: now,
            build: None,
            deployment: None,
        }
    }

    #[tokio::test]
    async fn roundtrip_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let registry = FileRegistry::open(dir.path()).await.unwrap();
        let project = test_project("site-1");

        registry.save(&project).await.unwrap();
        assert!(registry.document_path(&project.id).exists());

        let loaded = registry.load(&project.id).await.unwrap().unwrap();
        assert_eq!(loaded, project);
    }

    #[tokio::test]
    async fn save_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let registry = FileRegistry::open(dir.path()).await.unwrap();
        registry.save(&test_project("site-1")).await.unwrap();

        let names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["site-1.json"]);
    }

    #[tokio::test]
    async fn list_skips_foreign_files() {
        let dir = tempfile::tempdir().unwrap();
        let registry = FileRegistry::open(dir.path()).await.unwrap();
        registry.save(&test_project("site-2")).await.unwrap();
        registry.save(&test_project("site-1")).await.unwrap();
        std::fs::write(dir.path().join("notes.txt"), "hello").unwrap();
        std::fs::write(dir.path().join("Bad Name.json"), "{}").unwrap();

        let ids: Vec<_> = registry
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.id.to_string())
            .collect();
        assert_eq!(ids, vec!["site-1", "site-2"]);
    }

    #[tokio::test]
    async fn delete_missing_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let registry = FileRegistry::open(dir.path()).await.unwrap();
        registry
            .delete(&ProjectId::parse("ghost").unwrap())
            .await
            .unwrap();
    }
}
