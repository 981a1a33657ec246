//! Visitors over the page tree.
//!
//! Pages own their sections, sections own containers, containers own
//! components and nested containers. Children are stored inline, so a walk
//! always terminates.

use crate::types::{Component, Container, Page, Section};

/// Callbacks invoked while walking the page tree.
///
/// `depth` counts nesting below the owning section (0 for a top-level
/// container or a component directly inside it).
pub trait Visitor<'a> {
    /// Called for each page before its sections.
    fn visit_page(&mut self, _page: &'a Page) {}

    /// Called for each section before its containers.
    fn visit_section(&mut self, _page: &'a Page, _section: &'a Section) {}

    /// Called for each container before its contents.
    fn visit_container(&mut self, _page: &'a Page, _container: &'a Container, _depth: usize) {}

    /// Called for each component before its children.
    fn visit_component(&mut self, _page: &'a Page, _component: &'a Component, _depth: usize) {}
}

/// Walk every page in order.
pub fn walk_pages<'a, V: Visitor<'a>>(pages: &'a [Page], visitor: &mut V) {
    for page in pages {
        walk_page(page, visitor);
    }
}

/// Walk a single page.
pub fn walk_page<'a, V: Visitor<'a>>(page: &'a Page, visitor: &mut V) {
    visitor.visit_page(page);
    for section in &page.sections {
        visitor.visit_section(page, section);
        for container in &section.containers {
            walk_container(page, container, 0, visitor);
        }
    }
}

fn walk_container<'a, V: Visitor<'a>>(
    page: &'a Page,
    container: &'a Container,
    depth: usize,
    visitor: &mut V,
) {
    visitor.visit_container(page, container, depth);
    for component in &container.components {
        walk_component(page, component, depth, visitor);
    }
    for nested in &container.containers {
        walk_container(page, nested, depth + 1, visitor);
    }
}

fn walk_component<'a, V: Visitor<'a>>(
    page: &'a Page,
    component: &'a Component,
    depth: usize,
    visitor: &mut V,
) {
    visitor.visit_component(page, component, depth);
    for child in &component.children {
        walk_component(page, child, depth + 1, visitor);
    }
}

/// Collects references to every component.
#[derive(Debug, Default)]
pub struct ComponentCollector<'a> {
    /// Components in walk order.
    pub components: Vec<&'a Component>,
}

impl<'a> Visitor<'a> for ComponentCollector<'a> {
    fn visit_component(&mut self, _page: &'a Page, component: &'a Component, _depth: usize) {
        self.components.push(component);
    }
}

/// Counts components per page and detects form containers.
#[derive(Debug, Default)]
pub struct PageStats {
    /// `(page id, component count)` in page order.
    pub components_per_page: Vec<(String, usize)>,
    /// Number of form containers across all pages.
    pub forms: usize,
}

impl<'a> Visitor<'a> for PageStats {
    fn visit_page(&mut self, page: &'a Page) {
        self.components_per_page.push((page.id.clone(), 0));
    }

    fn visit_container(&mut self, _page: &'a Page, container: &'a Container, _depth: usize) {
        if container.is_form() {
            self.forms += 1;
        }
    }

    fn visit_component(&mut self, _page: &'a Page, _component: &'a Component, _depth: usize) {
        if let Some((_, count)) = self.components_per_page.last_mut() {
            *count += 1;
        }
    }
}
