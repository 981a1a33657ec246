//! Document, template and artifact validation.
//!
//! Validation runs on the JSON form of a document so that it sees exactly
//! what will be persisted, including fields the typed model would default.

use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::config::ValidationConfig;
use crate::error::{ControlError, ControlResult};
use crate::runtime::ContainerSpec;
use crate::types::{is_valid_slug, Page, CONTAINER_TYPES};

/// Component types the renderer knows about.
pub const COMPONENT_TYPES: [&str; 10] = [
    "heading", "text", "image", "link", "button", "input", "textarea", "select", "video", "embed",
];

/// Node identifiers inside a project.
static NODE_ID_PATTERN: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_-]*$").ok());

/// `major.minor.patch` with an optional pre-release suffix.
static VERSION_PATTERN: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^\d+\.\d+\.\d+(-[0-9A-Za-z.-]+)?$").ok());

/// Any `{{ ... }}` placeholder.
static PLACEHOLDER_PATTERN: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"\{\{\s*([^{}]*?)\s*\}\}").ok());

/// A dotted variable path.
static VARIABLE_PATTERN: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)*$").ok());

fn matches(pattern: &LazyLock<Option<Regex>>, value: &str) -> bool {
    pattern.as_ref().is_some_and(|re| re.is_match(value))
}

/// Outcome of a validation run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    /// `true` if there are no errors.
    pub valid: bool,
    /// Problems that block the transition.
    pub errors: Vec<String>,
    /// Problems worth reporting that do not block it.
    pub warnings: Vec<String>,
}

impl ValidationReport {
    /// An empty, passing report.
    #[must_use]
    pub fn new() -> Self {
        Self {
            valid: true,
            ..Self::default()
        }
    }

    fn error(&mut self, msg: String) {
        self.valid = false;
        self.errors.push(msg);
    }

    fn warning(&mut self, msg: String) {
        self.warnings.push(msg);
    }

    /// Merge another report into this one.
    pub fn merge(&mut self, other: Self) {
        self.valid &= other.valid;
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
    }

    /// Turn a failing report into a validation error.
    pub fn into_result(self) -> ControlResult<Vec<String>> {
        if self.valid {
            Ok(self.warnings)
        } else {
            Err(ControlError::Validation {
                errors: self.errors,
            })
        }
    }
}

// =============================================================================
// Schema
// =============================================================================

/// Structural validator for project documents.
#[derive(Debug, Clone, Copy)]
pub struct SchemaValidator {
    options: ValidationConfig,
}

struct Walk<'a> {
    options: &'a ValidationConfig,
    report: ValidationReport,
    ids: HashSet<String>,
}

impl SchemaValidator {
    /// Create a validator.
    #[must_use]
    pub const fn new(options: ValidationConfig) -> Self {
        Self { options }
    }

    /// Validate a project document.
    #[must_use]
    pub fn validate(&self, document: &Value) -> ValidationReport {
        let mut walk = Walk {
            options: &self.options,
            report: ValidationReport::new(),
            ids: HashSet::new(),
        };

        let Some(project) = document.as_object() else {
            walk.report.error("project: expected an object".to_owned());
            return walk.report;
        };

        match project.get("id").and_then(Value::as_str) {
            Some(id) if is_valid_slug(id) => {}
            Some(id) => walk
                .report
                .error(format!("project.id: {id:?} does not match ^[a-z0-9-]+$")),
            None => walk.report.error("project.id: required".to_owned()),
        }
        require_string(project, "name", "project", &mut walk.report);

        match project.get("version").and_then(Value::as_str) {
            Some(version) if matches(&VERSION_PATTERN, version) => {}
            Some(version) => walk
                .report
                .warning(format!("project.version: {version:?} is not semver")),
            None => walk.report.warning("project.version: missing".to_owned()),
        }

        match project.get("pages") {
            Some(Value::Array(pages)) => {
                for (i, page) in pages.iter().enumerate() {
                    walk.page(page, &format!("pages[{i}]"));
                }
            }
            Some(_) => walk.report.error("project.pages: expected an array".to_owned()),
            None => {}
        }

        walk.report
    }
}

fn require_string(node: &Map<String, Value>, field: &str, path: &str, report: &mut ValidationReport) {
    match node.get(field) {
        Some(Value::String(s)) if !s.is_empty() => {}
        Some(Value::String(_)) => report.error(format!("{path}.{field}: must not be empty")),
        Some(_) => report.error(format!("{path}.{field}: expected a string")),
        None => report.error(format!("{path}.{field}: required")),
    }
}

impl Walk<'_> {
    fn object<'v>(&mut self, node: &'v Value, path: &str) -> Option<&'v Map<String, Value>> {
        let object = node.as_object();
        if object.is_none() {
            self.report.error(format!("{path}: expected an object"));
        }
        object
    }

    fn id(&mut self, node: &Map<String, Value>, path: &str) {
        require_string(node, "id", path, &mut self.report);
        let Some(id) = node.get("id").and_then(Value::as_str) else {
            return;
        };
        if id.is_empty() {
            return;
        }
        if !matches(&NODE_ID_PATTERN, id) {
            self.report
                .error(format!("{path}.id: {id:?} has invalid characters"));
        }
        if !self.ids.insert(id.to_owned()) {
            self.report.error(format!("{path}.id: duplicate id {id:?}"));
        }
    }

    fn children<'v>(&mut self, node: &'v Map<String, Value>, field: &str, path: &str) -> &'v [Value] {
        match node.get(field) {
            Some(Value::Array(items)) => items,
            Some(_) => {
                self.report.error(format!("{path}.{field}: expected an array"));
                &[]
            }
            None => &[],
        }
    }

    fn unknown_type(&mut self, msg: String) {
        if self.options.strict {
            self.report.error(msg);
        } else {
            self.report.warning(msg);
        }
    }

    fn too_deep(&mut self, depth: usize, path: &str) -> bool {
        if depth > self.options.max_depth {
            self.report.warning(format!(
                "{path}: nesting exceeds max depth {}, not validated",
                self.options.max_depth
            ));
            return true;
        }
        false
    }

    fn page(&mut self, node: &Value, path: &str) {
        let Some(page) = self.object(node, path) else {
            return;
        };
        self.id(page, path);
        require_string(page, "name", path, &mut self.report);

        for (i, section) in self.children(page, "sections", path).iter().enumerate() {
            self.section(section, &format!("{path}.sections[{i}]"));
        }
    }

    fn section(&mut self, node: &Value, path: &str) {
        let Some(section) = self.object(node, path) else {
            return;
        };
        self.id(section, path);

        for (i, container) in self.children(section, "containers", path).iter().enumerate() {
            self.container(container, &format!("{path}.containers[{i}]"), 1);
        }
    }

    fn container(&mut self, node: &Value, path: &str, depth: usize) {
        if self.too_deep(depth, path) {
            return;
        }
        let Some(container) = self.object(node, path) else {
            return;
        };
        self.id(container, path);

        if let Some(kind) = container.get("type").and_then(Value::as_str) {
            if !CONTAINER_TYPES.contains(&kind) {
                self.unknown_type(format!("{path}.type: unknown container type {kind:?}"));
            }
        }

        for (i, component) in self.children(container, "components", path).iter().enumerate() {
            self.component(component, &format!("{path}.components[{i}]"), depth + 1);
        }
        for (i, nested) in self.children(container, "containers", path).iter().enumerate() {
            self.container(nested, &format!("{path}.containers[{i}]"), depth + 1);
        }
    }

    fn component(&mut self, node: &Value, path: &str, depth: usize) {
        if self.too_deep(depth, path) {
            return;
        }
        let Some(component) = self.object(node, path) else {
            return;
        };
        self.id(component, path);
        require_string(component, "type", path, &mut self.report);

        if let Some(kind) = component.get("type").and_then(Value::as_str) {
            if !kind.is_empty() && !COMPONENT_TYPES.contains(&kind) {
                self.unknown_type(format!("{path}.type: unknown component type {kind:?}"));
            }
        }

        for (i, child) in self.children(component, "children", path).iter().enumerate() {
            self.component(child, &format!("{path}.children[{i}]"), depth + 1);
        }
    }
}

// =============================================================================
// Templates
// =============================================================================

/// Scopes every template may reference.
pub const BUILTIN_SCOPES: [&str; 3] = ["project", "page", "site"];

/// Checks `{{ var }}` placeholders in component string props.
#[derive(Debug, Clone, Default)]
pub struct TemplateValidator {
    variables: HashSet<String>,
}

impl TemplateValidator {
    /// Create a validator accepting the built-in scopes plus `variables`.
    #[must_use]
    pub fn new(variables: impl IntoIterator<Item = String>) -> Self {
        Self {
            variables: variables.into_iter().collect(),
        }
    }

    /// Whether a variable path may be referenced.
    #[must_use]
    pub fn is_known(&self, variable: &str) -> bool {
        let root = variable.split('.').next().unwrap_or(variable);
        (BUILTIN_SCOPES.contains(&root) && variable.contains('.')) || self.variables.contains(variable)
    }

    /// Validate all placeholders in a single string.
    pub fn check_text(&self, text: &str, path: &str, report: &mut ValidationReport) {
        let opens = text.matches("{{").count();
        let closes = text.matches("}}").count();
        if opens != closes {
            report.error(format!("{path}: unclosed placeholder in {text:?}"));
            return;
        }

        let Some(pattern) = PLACEHOLDER_PATTERN.as_ref() else {
            return;
        };
        for capture in pattern.captures_iter(text) {
            let variable = capture.get(1).map_or("", |m| m.as_str());
            if !matches(&VARIABLE_PATTERN, variable) {
                report.error(format!("{path}: invalid placeholder {{{{ {variable} }}}}"));
            } else if !self.is_known(variable) {
                report.error(format!("{path}: unknown variable {variable:?}"));
            }
        }
    }

    /// Validate every string prop in a page tree.
    #[must_use]
    pub fn validate(&self, pages: &[Page]) -> ValidationReport {
        let mut report = ValidationReport::new();
        let mut visitor = PlaceholderVisitor {
            validator: self,
            report: &mut report,
        };
        crate::tree::walk_pages(pages, &mut visitor);
        report
    }
}

struct PlaceholderVisitor<'v> {
    validator: &'v TemplateValidator,
    report: &'v mut ValidationReport,
}

impl<'a> crate::tree::Visitor<'a> for PlaceholderVisitor<'_> {
    fn visit_component(
        &mut self,
        page: &'a Page,
        component: &'a crate::types::Component,
        _depth: usize,
    ) {
        for (key, value) in &component.props {
            if let Value::String(text) = value {
                let path = format!("{}/{}.props.{key}", page.id, component.id);
                self.validator.check_text(text, &path, self.report);
            }
        }
    }
}

// =============================================================================
// Artifacts
// =============================================================================

/// Validate container specs before they reach the runtime.
///
/// Host ports are only checked once `bound` is set; before allocation they
/// are placeholders.
#[must_use]
pub fn validate_containers(specs: &[ContainerSpec], bound: bool) -> ValidationReport {
    let mut report = ValidationReport::new();
    if specs.is_empty() {
        report.error("deployment: at least one service is required".to_owned());
    }

    let mut names = HashSet::new();
    let mut host_ports: HashMap<u16, &str> = HashMap::new();
    for spec in specs {
        if !names.insert(spec.name.as_str()) {
            report.error(format!("container {}: duplicate name", spec.name));
        }
        if spec.image.trim().is_empty() {
            report.error(format!("container {}: image is required", spec.name));
        }
        if spec.container_port == 0 {
            report.error(format!("container {}: container port must be 1-65535", spec.name));
        }
        if bound {
            if spec.host_port == 0 {
                report.error(format!("container {}: host port must be 1-65535", spec.name));
            } else if let Some(other) = host_ports.insert(spec.host_port, spec.name.as_str()) {
                report.error(format!(
                    "container {}: host port {} already bound by {other}",
                    spec.name, spec.host_port
                ));
            }
        }
    }
    report
}
