//! Follow-up tools: `task.create`, `task.complete`, `task.delete`,
//! `task.list`.

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
pub struct Task {
    pub id: Uuid,
    pub title: String,
    pub due: Option<DateTime<Utc>>,
    pub contact_id: Option<Uuid>,
    pub done: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Default)]
pub struct TaskStore {
    inner: Arc<Mutex<HashMap<Uuid, Task>>>,
}

impl TaskStore {
    pub fn insert(&self, task: Task) {
        self.locked().insert(task.id, task);
    }

    pub fn get(&self, id: Uuid) -> Option<Task> {
        self.locked().get(&id).cloned()
    }

    pub fn update<F>(&self, id: Uuid, apply: F) -> Option<Task>
    where
        F: FnOnce(&mut Task),
    {
        let mut tasks = self.locked();
        let task = tasks.get_mut(&id)?;
        apply(task);
        task.updated_at = Utc::now();
        Some(task.clone())
    }

    pub fn remove(&self, id: Uuid) -> Option<Task> {
        self.locked().remove(&id)
    }

    /// Due tasks first, undated ones after, ties broken by creation time.
    pub fn list(&self) -> Vec<Task> {
        let mut tasks: Vec<Task> = self.locked().values().cloned().collect();
        tasks.sort_by_key(|task| (task.due.is_none(), task.due, task.created_at));
        tasks
    }

    pub fn len(&self) -> usize {
        self.locked().len()
    }

    pub fn is_empty(&self) -> bool {
        self.locked().is_empty()
    }

    fn locked(&self) -> MutexGuard<'_, HashMap<Uuid, Task>> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

pub fn definitions(store: &TaskStore) -> Vec<ToolDefinition> {
    vec![
        ToolDefinition::new(
            "task.create",
            "Add a follow-up task",
            InputSchema::new()
                .required("title", FieldKind::String, "what to do")
                .optional("due", FieldKind::String, "RFC 3339 due time")
                .optional("contact_id", FieldKind::String, "related contact"),
            vec!["crm.write".to_string()],
            ApprovalLevel::None,
            Arc::new(CreateTask { store: store.clone() }),
        ),
        ToolDefinition::new(
            "task.complete",
            "Mark a task as done",
            InputSchema::new().required("task_id", FieldKind::String, "task id"),
            vec!["crm.write".to_string()],
            ApprovalLevel::None,
            Arc::new(CompleteTask { store: store.clone() }),
        ),
        ToolDefinition::new(
            "task.delete",
            "Delete a task permanently",
            InputSchema::new().required("task_id", FieldKind::String, "task id"),
            vec!["crm.write".to_string(), "crm.delete".to_string()],
            ApprovalLevel::Destructive,
            Arc::new(DeleteTask { store: store.clone() }),
        )
        .with_prompt(|arguments| {
            format!(
                "Permanently delete task {}? This cannot be undone.",
                arguments["task_id"]
            )
        })
        .with_audit_format(|arguments, output| match output {
            Some(data) => format!("deleted task {} ({})", arguments["task_id"], data["title"]),
            None => format!("attempted to delete task {}", arguments["task_id"]),
        }),
        ToolDefinition::new(
            "task.list",
            "List open tasks, oldest due first",
            InputSchema::new()
                .optional("include_done", FieldKind::Boolean, "also show finished tasks"),
            vec!["crm.read".to_string()],
            ApprovalLevel::None,
            Arc::new(ListTasks { store: store.clone() }),
        ),
    ]
}

struct CreateTask {
    store: TaskStore,
}

#[async_trait]
impl ToolHandler for CreateTask {
    async fn run(&self, arguments: &Value, _ctx: &CallContext) -> anyhow::Result<ToolOutput> {
        let title = args::required_str(arguments, "title")?;
        let now = Utc::now();
        let task = Task {
            id: Uuid::new_v4(),
            title: title.to_string(),
            due: args::optional_datetime(arguments, "due")?,
            contact_id: args::optional_id(arguments, "contact_id")?,
            done: false,
            created_at: now,
            updated_at: now,
        };
        self.store.insert(task.clone());
        Ok(ToolOutput::new(
            format!("Added the task \"{}\".", task.title),
            serde_json::to_value(&task)?,
        )
        .touching(handle_for(&task)))
    }
}

struct CompleteTask {
    store: TaskStore,
}

#[async_trait]
impl ToolHandler for CompleteTask {
    async fn run(&self, arguments: &Value, _ctx: &CallContext) -> anyhow::Result<ToolOutput> {
        let id = args::required_id(arguments, "task_id")?;
        let task = self
            .store
            .update(id, |task| task.done = true)
            .with_context(|| format!("no task found with id `{id}`"))?;
        Ok(ToolOutput::new(
            format!("Marked \"{}\" as done.", task.title),
            serde_json::to_value(&task)?,
        )
        .touching(handle_for(&task)))
    }
}

struct DeleteTask {
    store: TaskStore,
}

#[async_trait]
impl ToolHandler for DeleteTask {
    async fn run(&self, arguments: &Value, _ctx: &CallContext) -> anyhow::Result<ToolOutput> {
        let id = args::required_id(arguments, "task_id")?;
        let task =
            self.store.remove(id).with_context(|| format!("no task found with id `{id}`"))?;
        Ok(ToolOutput::new(
            format!("Deleted the task \"{}\".", task.title),
            serde_json::to_value(&task)?,
        ))
    }
}

struct ListTasks {
    store: TaskStore,
}

#[async_trait]
impl ToolHandler for ListTasks {
    async fn run(&self, arguments: &Value, _ctx: &CallContext) -> anyhow::Result<ToolOutput> {
        let include_done = args::optional_bool(arguments, "include_done")?.unwrap_or(false);
        let tasks: Vec<Task> = self
            .store
            .list()
            .into_iter()
            .filter(|task| include_done || !task.done)
            .collect();
        let summary = match tasks.len() {
            0 => "No open tasks.".to_string(),
            1 => format!("One task: \"{}\".", tasks[0].title),
            count => format!("You have {count} tasks."),
        };
        Ok(ToolOutput::new(summary, json!({ "tasks": tasks })))
    }
}

fn handle_for(task: &Task) -> EntityHandle {
    EntityHandle::new(EntityKind::Task, task.id.to_string(), task.title.clone())
}
