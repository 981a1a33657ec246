//! Project fixtures.

use hangar_control::types::{Component, Container, Page, Section};
use hangar_control::{Action, LifecycleState, ProjectId, TransitionConfig};

use super::TestControl;

pub fn id(s: &str) -> ProjectId {
    ProjectId::parse(s).unwrap()
}

/// Actions that take a fresh project to `state`.
pub fn path_to(state: LifecycleState) -> &'static [Action] {
    match state {
        LifecycleState::Void => &[],
        LifecycleState::Draft => &[Action::Create],
        LifecycleState::Built => &[Action::Create, Action::Build],
        LifecycleState::Offline => &[Action::Create, Action::Build, Action::Deploy],
        LifecycleState::Online => &[Action::Create, Action::Build, Action::Deploy, Action::Start],
    }
}

/// Drive a project to `state` through the coordinator.
pub async fn drive_to(control: &TestControl, project: &ProjectId, state: LifecycleState) {
    for action in path_to(state) {
        control
            .coordinator
            .execute(project, *action, &TransitionConfig::default())
            .await
            .unwrap_or_else(|e| panic!("{action} failed while driving to {state}: {e}"));
    }
}

/// A single static page without forms.
pub fn static_pages() -> Vec<Page> {
    vec![Page {
        id: "home".to_owned(),
        name: "Home".to_owned(),
        path: Some("/".to_owned()),
        sections: vec![Section {
            id: "hero".to_owned(),
            kind: "hero".to_owned(),
            containers: vec![Container {
                id: "hero-body".to_owned(),
                kind: "div".to_owned(),
                components: vec![Component {
                    id: "title".to_owned(),
                    kind: "heading".to_owned(),
                    props: serde_json::Map::from_iter([(
                        "text".to_owned(),
                        serde_json::Value::from("{{ project.name }}"),
                    )]),
                    children: Vec::new(),
                }],
                containers: Vec::new(),
            }],
        }],
    }]
}
