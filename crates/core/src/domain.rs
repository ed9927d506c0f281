use serde::{Deserialize, Serialize};

/// CRM record categories the assistant can reference in an answer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Contact,
    Property,
    Deal,
    Task,
    CalendarEvent,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Contact => "contact",
            EntityKind::Property => "property",
            EntityKind::Deal => "deal",
            EntityKind::Task => "task",
            EntityKind::CalendarEvent => "calendar_event",
        }
    }

    fn ui_prefix(&self) -> &'static str {
        match self {
            EntityKind::Contact => "/contacts",
            EntityKind::Property => "/properties",
            EntityKind::Deal => "/deals",
            EntityKind::Task => "/tasks",
            EntityKind::CalendarEvent => "/calendar",
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A record touched by a tool execution, labeled for presentation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityHandle {
    pub kind: EntityKind,
    pub id: String,
    pub label: String,
}

impl EntityHandle {
    pub fn new(kind: EntityKind, id: impl Into<String>, label: impl Into<String>) -> Self {
        Self { kind, id: id.into(), label: label.into() }
    }
}

/// A navigable reference rendered alongside the answer. Derived from tool
/// results, deduplicated per turn by `(kind, id)`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Affordance {
    pub kind: EntityKind,
    pub id: String,
    pub label: String,
    pub path: String,
}

impl Affordance {
    pub fn for_entity(handle: &EntityHandle) -> Self {
        Self {
            kind: handle.kind,
            id: handle.id.clone(),
            label: handle.label.clone(),
            path: format!("{}/{}", handle.kind.ui_prefix(), handle.id),
        }
    }
}

/// Provenance for externally looked-up facts cited in an answer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRef {
    pub title: String,
    pub url: String,
}

impl SourceRef {
    pub fn new(title: impl Into<String>, url: impl Into<String>) -> Self {
        Self { title: title.into(), url: url.into() }
    }
}
