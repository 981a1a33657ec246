//! Core types for hangar-control.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ControlError, ControlResult};

/// Unique identifier for a project.
///
/// Project IDs are slugs matching `^[a-z0-9-]+$` and never change once the
/// project has been created.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ProjectId(String);

impl ProjectId {
    /// Parse and validate a project ID.
    pub fn parse(id: impl Into<String>) -> ControlResult<Self> {
        let id = id.into();
        if is_valid_slug(&id) {
            Ok(Self(id))
        } else {
            Err(ControlError::InvalidProjectId(id))
        }
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Check whether a string is a non-empty lowercase slug.
#[must_use]
pub fn is_valid_slug(value: &str) -> bool {
    !value.is_empty()
        && value
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
}

impl TryFrom<String> for ProjectId {
    type Error = ControlError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<ProjectId> for String {
    fn from(id: ProjectId) -> Self {
        id.0
    }
}

impl std::str::FromStr for ProjectId {
    type Err = ControlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for ProjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for ProjectId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Lifecycle state of a project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LifecycleState {
    /// The project does not exist.
    Void,
    /// Editable draft.
    Draft,
    /// Built and ready to be deployed.
    Built,
    /// Deployed, containers exist but are not serving.
    Offline,
    /// Deployed and serving.
    Online,
}

impl LifecycleState {
    /// All states, in lifecycle order.
    pub const ALL: [Self; 5] = [
        Self::Void,
        Self::Draft,
        Self::Built,
        Self::Offline,
        Self::Online,
    ];

    /// Get the state name as a static string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Void => "VOID",
            Self::Draft => "DRAFT",
            Self::Built => "BUILT",
            Self::Offline => "OFFLINE",
            Self::Online => "ONLINE",
        }
    }

    /// Whether the project has runtime resources in this state.
    #[must_use]
    pub const fn is_deployed(&self) -> bool {
        matches!(self, Self::Offline | Self::Online)
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for LifecycleState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "VOID" => Ok(Self::Void),
            "DRAFT" => Ok(Self::Draft),
            "BUILT" => Ok(Self::Built),
            "OFFLINE" => Ok(Self::Offline),
            "ONLINE" => Ok(Self::Online),
            _ => Err(format!("unknown lifecycle state: {s}")),
        }
    }
}

/// An action that moves a project between lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Action {
    /// Create a project from a template.
    Create,
    /// Edit the draft content.
    Edit,
    /// Build the site.
    Build,
    /// Discard the build and return to draft.
    Revert,
    /// Provision runtime resources.
    Deploy,
    /// Start serving.
    Start,
    /// Stop serving.
    Stop,
    /// Roll new content or configuration onto the deployment.
    Update,
    /// Remove the project and all of its resources.
    Delete,
}

impl Action {
    /// All actions.
    pub const ALL: [Self; 9] = [
        Self::Create,
        Self::Edit,
        Self::Build,
        Self::Revert,
        Self::Deploy,
        Self::Start,
        Self::Stop,
        Self::Update,
        Self::Delete,
    ];

    /// Get the action name as a static string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "CREATE",
            Self::Edit => "EDIT",
            Self::Build => "BUILD",
            Self::Revert => "REVERT",
            Self::Deploy => "DEPLOY",
            Self::Start => "START",
            Self::Stop => "STOP",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
        }
    }

    /// Whether the action touches the port allocator or container runtime.
    #[must_use]
    pub const fn has_side_effects(&self) -> bool {
        matches!(
            self,
            Self::Deploy | Self::Start | Self::Stop | Self::Update | Self::Delete
        )
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Action {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "CREATE" => Ok(Self::Create),
            "EDIT" => Ok(Self::Edit),
            "BUILD" => Ok(Self::Build),
            "REVERT" => Ok(Self::Revert),
            "DEPLOY" => Ok(Self::Deploy),
            "START" => Ok(Self::Start),
            "STOP" => Ok(Self::Stop),
            "UPDATE" => Ok(Self::Update),
            "DELETE" => Ok(Self::Delete),
            _ => Err(format!("unknown action: {s}")),
        }
    }
}

// =============================================================================
// Project document
// =============================================================================

/// A site project as persisted by the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    /// Immutable project slug.
    pub id: ProjectId,
    /// Human readable name.
    pub name: String,
    /// Current lifecycle state.
    pub state: LifecycleState,
    /// Document version.
    pub version: String,
    /// Template the project was created from.
    pub template: String,
    /// Ordered pages.
    #[serde(default)]
    pub pages: Vec<Page>,
    /// Creation timestamp.
    pub created: DateTime<Utc>,
    /// Last commit timestamp.
    pub last_modified: DateTime<Utc>,
    /// Output of the last build, if the project is built.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build: Option<BuildManifest>,
    /// Runtime resources bound to the project, if deployed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployment: Option<DeploymentBinding>,
}

impl Project {
    /// Iterate over every component in the project, depth first.
    #[must_use]
    pub fn components(&self) -> Vec<&Component> {
        let mut collector = crate::tree::ComponentCollector::default();
        crate::tree::walk_pages(&self.pages, &mut collector);
        collector.components
    }

    /// Host ports currently bound by the deployment.
    #[must_use]
    pub fn host_ports(&self) -> Vec<u16> {
        self.deployment
            .as_ref()
            .map(|d| d.containers.iter().map(|c| c.host_port).collect())
            .unwrap_or_default()
    }
}

/// A page of the site.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page {
    /// Page identifier.
    pub id: String,
    /// Page title.
    pub name: String,
    /// Route path; derived from the id when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Ordered sections.
    #[serde(default)]
    pub sections: Vec<Section>,
}

/// A section of a page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Section {
    /// Section identifier.
    pub id: String,
    /// Section type (e.g. `hero`, `content`).
    #[serde(rename = "type", default = "default_section_type")]
    pub kind: String,
    /// Ordered containers.
    #[serde(default)]
    pub containers: Vec<Container>,
}

fn default_section_type() -> String {
    "section".to_owned()
}

/// Known container types.
pub const CONTAINER_TYPES: [&str; 3] = ["div", "list", "form"];

/// A layout container holding components and nested containers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Container {
    /// Container identifier.
    pub id: String,
    /// Container type (`div`, `list` or `form`).
    #[serde(rename = "type", default = "default_container_type")]
    pub kind: String,
    /// Components in this container.
    #[serde(default)]
    pub components: Vec<Component>,
    /// Nested containers.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub containers: Vec<Container>,
}

fn default_container_type() -> String {
    "div".to_owned()
}

impl Container {
    /// Whether this container collects user input.
    #[must_use]
    pub fn is_form(&self) -> bool {
        self.kind == "form"
    }
}

/// A leaf (or nested) content component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Component {
    /// Component identifier.
    pub id: String,
    /// Component type (e.g. `heading`, `text`, `image`).
    #[serde(rename = "type")]
    pub kind: String,
    /// Free-form properties.
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub props: serde_json::Map<String, serde_json::Value>,
    /// Nested components.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<Component>,
}

/// Result of building a project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildManifest {
    /// SHA-256 of the canonical page content.
    pub digest: String,
    /// One route per page.
    pub routes: Vec<Route>,
    /// When the build was produced.
    pub built_at: DateTime<Utc>,
}

impl BuildManifest {
    /// Short digest used for image tags.
    #[must_use]
    pub fn short_digest(&self) -> &str {
        let end = self.digest.len().min(12);
        &self.digest[..end]
    }
}

/// A built route.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Route {
    /// URL path.
    pub path: String,
    /// Page the route renders.
    pub page_id: String,
    /// Number of components on the page.
    pub components: usize,
}

/// Runtime resources bound to a deployed project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentBinding {
    /// Image serving the site.
    pub image_tag: String,
    /// Project network.
    pub network: String,
    /// Project volumes.
    pub volumes: Vec<String>,
    /// Containers and their port bindings.
    pub containers: Vec<ContainerBinding>,
    /// Incremented by each update.
    pub revision: u32,
}

/// A container and its port binding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerBinding {
    /// Container name.
    pub name: String,
    /// Logical service (`web`, `api`).
    pub service: String,
    /// Image reference.
    pub image: String,
    /// Port inside the container.
    pub container_port: u16,
    /// Port on the host.
    pub host_port: u16,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn project_id_accepts_slugs() {
        assert!(ProjectId::parse("site-1").is_ok());
        assert!(ProjectId::parse("abc").is_ok());
        assert!(ProjectId::parse("0-0").is_ok());
    }

    #[test]
    fn project_id_rejects_invalid() {
        assert!(ProjectId::parse("").is_err());
        assert!(ProjectId::parse("My Site").is_err());
        assert!(ProjectId::parse("site_1").is_err());
        assert!(ProjectId::parse("../etc").is_err());
    }

    #[test]
    fn project_id_has_no_length_cap() {
        let long = "a".repeat(64);
        assert_eq!(ProjectId::parse(long.clone()).unwrap().as_str(), long);
        assert!(ProjectId::parse(format!("{}-1", "site".repeat(40))).is_ok());
    }

    #[test]
    fn project_id_deserialise_validates() {
        let ok: Result<ProjectId, _> = serde_json::from_str(r#""site-1""#);
        assert!(ok.is_ok());

        let bad: Result<ProjectId, _> = serde_json::from_str(r#""Site 1""#);
        assert!(bad.is_err());
    }

    #[test]
    fn state_serialises_uppercase() {
        let json = serde_json::to_string(&LifecycleState::Draft).unwrap();
        assert_eq!(json, r#""DRAFT""#);
        assert_eq!("online".parse::<LifecycleState>().unwrap(), LifecycleState::Online);
    }

    #[test]
    fn action_parse_is_case_insensitive() {
        assert_eq!("deploy".parse::<Action>().unwrap(), Action::Deploy);
        assert_eq!("DELETE".parse::<Action>().unwrap(), Action::Delete);
        assert!("launch".parse::<Action>().is_err());
    }

    #[test]
    fn project_document_uses_camel_case() {
        let now = Utc::now();
        let project = Project {
            id: ProjectId::parse("site-1").unwrap(),
            name: "My Site".to_owned(),
            state: LifecycleState::Draft,
            version: "1.0.0".to_owned(),
            template: "basic".to_owned(),
            pages: vec![],
            created: now,
            last_modified: now,
            build: None,
            deployment: None,
        };

        let value = serde_json::to_value(&project).unwrap();
        assert_eq!(value["state"], "DRAFT");
        assert!(value.get("lastModified").is_some());
        assert!(value.get("build").is_none());
    }

    #[test]
    fn container_defaults() {
        let container: Container = serde_json::from_str(r#"{"id": "c1"}"#).unwrap();
        assert_eq!(container.kind, "div");
        assert!(container.components.is_empty());
        assert!(!container.is_form());
    }
}
