//! Diary tools: `calendar.schedule`, `calendar.cancel`, `calendar.list`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use hearth_core::catalog::{
    ApprovalLevel, CallContext, FieldKind, InputSchema, ToolDefinition, ToolHandler, ToolOutput,
};
use hearth_core::domain::{EntityHandle, EntityKind};

use crate::args;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CalendarEvent {
    pub id: Uuid,
    pub title: String,
    pub starts_at: DateTime<Utc>,
    pub ends_at: Option<DateTime<Utc>>,
    pub location: Option<String>,
    pub contact_id: Option<Uuid>,
    pub cancelled: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Default)]
pub struct CalendarStore {
    inner: Arc<Mutex<HashMap<Uuid, CalendarEvent>>>,
}

impl CalendarStore {
    pub fn insert(&self, event: CalendarEvent) {
        self.locked().insert(event.id, event);
    }

    pub fn get(&self, id: Uuid) -> Option<CalendarEvent> {
        self.locked().get(&id).cloned()
    }

    pub fn update<F>(&self, id: Uuid, apply: F) -> Option<CalendarEvent>
    where
        F: FnOnce(&mut CalendarEvent),
    {
        let mut events = self.locked();
        let event = events.get_mut(&id)?;
        apply(event);
        Some(event.clone())
    }

    pub fn list(&self) -> Vec<CalendarEvent> {
        let mut events: Vec<CalendarEvent> = self.locked().values().cloned().collect();
        events.sort_by_key(|event| event.starts_at);
        events
    }

    pub fn len(&self) -> usize {
        self.locked().len()
    }

    pub fn is_empty(&self) -> bool {
        self.locked().is_empty()
    }

    fn locked(&self) -> MutexGuard<'_, HashMap<Uuid, CalendarEvent>> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

pub fn definitions(store: &CalendarStore) -> Vec<ToolDefinition> {
    vec![
        ToolDefinition::new(
            "calendar.schedule",
            "Put a viewing, call, or meeting on the calendar",
            InputSchema::new()
                .required("title", FieldKind::String, "what the event is")
                .required("starts_at", FieldKind::String, "RFC 3339 start time")
                .optional("ends_at", FieldKind::String, "RFC 3339 end time")
                .optional("location", FieldKind::String, "where it happens")
                .optional("contact_id", FieldKind::String, "who it is with"),
            vec!["crm.write".to_string()],
            ApprovalLevel::Standard,
            Arc::new(ScheduleEvent { store: store.clone() }),
        )
        .with_prompt(|arguments| {
            format!("Schedule {} for {}?", arguments["title"], arguments["starts_at"])
        })
        .with_audit_format(|arguments, output| match output {
            Some(data) => {
                format!("scheduled {} as {}", arguments["title"], data["id"])
            }
            None => format!("attempted to schedule {}", arguments["title"]),
        }),
        ToolDefinition::new(
            "calendar.cancel",
            "Cancel a calendar event",
            InputSchema::new().required("event_id", FieldKind::String, "event id"),
            vec!["crm.write".to_string(), "crm.delete".to_string()],
            ApprovalLevel::Destructive,
            Arc::new(CancelEvent { store: store.clone() }),
        )
        .with_prompt(|arguments| {
            format!(
                "Cancel event {}? Anyone attending will need to be told separately.",
                arguments["event_id"]
            )
        }),
        ToolDefinition::new(
            "calendar.list",
            "List upcoming events, soonest first",
            InputSchema::new()
                .optional("from", FieldKind::String, "RFC 3339 lower bound")
                .optional("to", FieldKind::String, "RFC 3339 upper bound"),
            vec!["crm.read".to_string()],
            ApprovalLevel::None,
            Arc::new(ListEvents { store: store.clone() }),
        ),
    ]
}

struct ScheduleEvent {
    store: CalendarStore,
}

#[async_trait]
impl ToolHandler for ScheduleEvent {
    async fn run(&self, arguments: &Value, _ctx: &CallContext) -> anyhow::Result<ToolOutput> {
        let title = args::required_str(arguments, "title")?;
        let event = CalendarEvent {
            id: Uuid::new_v4(),
            title: title.to_string(),
            starts_at: args::required_datetime(arguments, "starts_at")?,
            ends_at: args::optional_datetime(arguments, "ends_at")?,
            location: args::optional_str(arguments, "location")?.map(str::to_string),
            contact_id: args::optional_id(arguments, "contact_id")?,
            cancelled: false,
            created_at: Utc::now(),
        };
        self.store.insert(event.clone());
        Ok(ToolOutput::new(
            format!(
                "Scheduled \"{}\" for {}.",
                event.title,
                event.starts_at.format("%b %-d at %H:%M")
            ),
            serde_json::to_value(&event)?,
        )
        .touching(handle_for(&event)))
    }
}

struct CancelEvent {
    store: CalendarStore,
}

#[async_trait]
impl ToolHandler for CancelEvent {
    async fn run(&self, arguments: &Value, _ctx: &CallContext) -> anyhow::Result<ToolOutput> {
        let id = args::required_id(arguments, "event_id")?;
        let event = self
            .store
            .update(id, |event| event.cancelled = true)
            .with_context(|| format!("no event found with id `{id}`"))?;
        Ok(ToolOutput::new(
            format!("Cancelled \"{}\".", event.title),
            serde_json::to_value(&event)?,
        ))
    }
}

struct ListEvents {
    store: CalendarStore,
}

#[async_trait]
impl ToolHandler for ListEvents {
    async fn run(&self, arguments: &Value, _ctx: &CallContext) -> anyhow::Result<ToolOutput> {
        let from = args::optional_datetime(arguments, "from")?;
        let to = args::optional_datetime(arguments, "to")?;
        let events: Vec<CalendarEvent> = self
            .store
            .list()
            .into_iter()
            .filter(|event| {
                !event.cancelled
                    && from.map_or(true, |from| event.starts_at >= from)
                    && to.map_or(true, |to| event.starts_at <= to)
            })
            .collect();
        let summary = match events.len() {
            0 => "Nothing on the calendar for that window.".to_string(),
            1 => format!("One event: \"{}\".", events[0].title),
            count => format!("You have {count} events."),
        };
        Ok(ToolOutput::new(summary, json!({ "events": events })))
    }
}

fn handle_for(event: &CalendarEvent) -> EntityHandle {
    EntityHandle::new(EntityKind::CalendarEvent, event.id.to_string(), event.title.clone())
}
