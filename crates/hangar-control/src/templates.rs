//! Template sources for CREATE.
//!
//! A template is a JSON document carrying a page tree and the variables its
//! placeholders may reference. Templates are read-only inputs; the generator
//! copies their pages into the new project.

use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::config::TemplateConfig;
use crate::error::{ControlError, ControlResult};
use crate::types::{is_valid_slug, Page};

/// Template used when CREATE names none.
pub const DEFAULT_TEMPLATE: &str = "basic";

/// A template document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateDocument {
    /// Template name.
    pub name: String,

    /// Template version.
    #[serde(default = "default_template_version")]
    pub version: String,

    /// Variables placeholders may reference besides the built-in scopes.
    #[serde(default)]
    pub variables: Vec<String>,

    /// Raw page tree.
    #[serde(default)]
    pub pages: Value,
}

fn default_template_version() -> String {
    "1.0.0".to_owned()
}

impl TemplateDocument {
    /// Typed pages, or `None` if the page tree is missing or malformed.
    #[must_use]
    pub fn pages(&self) -> Option<Vec<Page>> {
        if self.pages.is_null() {
            return None;
        }
        serde_json::from_value(self.pages.clone()).ok()
    }
}

/// Source of template documents.
#[async_trait]
pub trait TemplateSource: Send + Sync {
    /// Look up a template by name.
    ///
    /// Returns `None` if no template has that name.
    async fn get(&self, name: &str) -> ControlResult<Option<TemplateDocument>>;
}

/// Create a template source from configuration.
#[must_use]
pub fn create_templates(config: &TemplateConfig) -> Arc<dyn TemplateSource> {
    match &config.dir {
        Some(dir) => Arc::new(DirectoryTemplates::new(dir.clone())),
        None => Arc::new(BuiltinTemplates),
    }
}

// =============================================================================
// Built-in templates
// =============================================================================

/// Templates compiled into the binary: `basic` and `blank`.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinTemplates;

impl BuiltinTemplates {
    /// Names of the built-in templates.
    pub const NAMES: [&'static str; 2] = ["basic", "blank"];

    fn basic() -> TemplateDocument {
        TemplateDocument {
            name: "basic".to_owned(),
            version: "1.0.0".to_owned(),
            variables: vec!["tagline".to_owned()],
            pages: json!([
                {
                    "id": "home",
                    "name": "Home",
                    "path": "/",
                    "sections": [{
                        "id": "hero",
                        "type": "hero",
                        "containers": [{
                            "id": "hero-content",
                            "type": "div",
                            "components": [
                                {
                                    "id": "hero-title",
                                    "type": "heading",
                                    "props": {"level": 1, "text": "{{ project.name }}"}
                                },
                                {
                                    "id": "hero-text",
                                    "type": "text",
                                    "props": {"text": "{{ tagline }}"}
                                }
                            ]
                        }]
                    }]
                },
                {
                    "id": "contact",
                    "name": "Contact",
                    "path": "/contact",
                    "sections": [{
                        "id": "contact-main",
                        "type": "content",
                        "containers": [{
                            "id": "contact-form",
                            "type": "form",
                            "components": [
                                {
                                    "id": "contact-email",
                                    "type": "input",
                                    "props": {"name": "email", "label": "Email"}
                                },
                                {
                                    "id": "contact-message",
                                    "type": "textarea",
                                    "props": {"name": "message", "label": "Message"}
                                },
                                {
                                    "id": "contact-submit",
                                    "type": "button",
                                    "props": {"text": "Send"}
                                }
                            ]
                        }]
                    }]
                }
            ]),
        }
    }

    fn blank() -> TemplateDocument {
        TemplateDocument {
            name: "blank".to_owned(),
            version: "1.0.0".to_owned(),
            variables: Vec::new(),
            pages: json!([]),
        }
    }
}

#[async_trait]
impl TemplateSource for BuiltinTemplates {
    async fn get(&self, name: &str) -> ControlResult<Option<TemplateDocument>> {
        Ok(match name {
            "basic" => Some(Self::basic()),
            "blank" => Some(Self::blank()),
            _ => None,
        })
    }
}

// =============================================================================
// Directory templates
// =============================================================================

/// Templates read from `<dir>/<name>.json`, falling back to the built-ins.
#[derive(Debug, Clone)]
pub struct DirectoryTemplates {
    dir: PathBuf,
}

impl DirectoryTemplates {
    /// Create a source reading from `dir`.
    #[must_use]
    pub const fn new(dir: PathBuf) -> Self {
        Self { dir }
    }
}

#[async_trait]
impl TemplateSource for DirectoryTemplates {
    async fn get(&self, name: &str) -> ControlResult<Option<TemplateDocument>> {
        if !is_valid_slug(name) {
            return Err(ControlError::validation(format!(
                "invalid template name: {name:?}"
            )));
        }

        let path = self.dir.join(format!("{name}.json"));
        match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let template = serde_json::from_slice::<TemplateDocument>(&bytes).map_err(|e| {
                    ControlError::validation(format!(
                        "template {} is malformed: {e}",
                        path.display()
                    ))
                })?;
                debug!(template = name, path = %path.display(), "template loaded");
                Ok(Some(template))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => BuiltinTemplates.get(name).await,
            Err(e) => {
                warn!(template = name, error = %e, "failed to read template");
                Err(e.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::{walk_pages, PageStats};

    #[tokio::test]
    async fn basic_template_has_form() {
        let template = BuiltinTemplates.get("basic").await.unwrap().unwrap();
        let pages = template.pages().unwrap();
        assert_eq!(pages.len(), 2);

        let mut stats = PageStats::default();
        walk_pages(&pages, &mut stats);
        assert_eq!(stats.forms, 1);
    }

    #[tokio::test]
    async fn blank_template_is_empty() {
        let template = BuiltinTemplates.get("blank").await.unwrap().unwrap();
        assert_eq!(template.pages(), Some(vec![]));
    }

    #[tokio::test]
    async fn unknown_builtin_is_none() {
        assert!(BuiltinTemplates.get("portfolio").await.unwrap().is_none());
    }

    #[test]
    fn missing_pages_are_none() {
        let template: TemplateDocument = serde_json::from_str(r#"{"name": "x"}"#).unwrap();
        assert_eq!(template.version, "1.0.0");
        assert!(template.pages().is_none());
    }

    #[tokio::test]
    async fn directory_overrides_and_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("landing.json"),
            r#"{"name": "landing", "pages": [{"id": "home", "name": "Home"}]}"#,
        )
        .unwrap();

        let source = DirectoryTemplates::new(dir.path().to_path_buf());

        let landing = source.get("landing").await.unwrap().unwrap();
        assert_eq!(landing.pages().unwrap()[0].id, "home");

        let basic = source.get("basic").await.unwrap().unwrap();
        assert_eq!(basic.name, "basic");

        assert!(source.get("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn directory_rejects_path_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let source = DirectoryTemplates::new(dir.path().to_path_buf());
        assert!(source.get("../secrets").await.is_err());
    }

    #[tokio::test]
    async fn directory_reports_malformed_template() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("broken.json"), "{not json").unwrap();
        let source = DirectoryTemplates::new(dir.path().to_path_buf());

        let err = source.get("broken").await.unwrap_err();
        assert!(matches!(err, ControlError::Validation { .. }));
    }
}
