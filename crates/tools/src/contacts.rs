//! Contact book tools: `contact.create`, `contact.get`, `contact.update`,
//! `contact.list`.

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
pub struct Contact {
    pub id: Uuid,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Default)]
pub struct ContactStore {
    inner: Arc<Mutex<HashMap<Uuid, Contact>>>,
}

impl ContactStore {
    pub fn insert(&self, contact: Contact) {
        self.locked().insert(contact.id, contact);
    }

    pub fn get(&self, id: Uuid) -> Option<Contact> {
        self.locked().get(&id).cloned()
    }

    pub fn update<F>(&self, id: Uuid, apply: F) -> Option<Contact>
    where
        F: FnOnce(&mut Contact),
    {
        let mut contacts = self.locked();
        let contact = contacts.get_mut(&id)?;
        apply(contact);
        contact.updated_at = Utc::now();
        Some(contact.clone())
    }

    pub fn list(&self) -> Vec<Contact> {
        let mut contacts: Vec<Contact> = self.locked().values().cloned().collect();
        contacts.sort_by(|a, b| a.name.cmp(&b.name));
        contacts
    }

    pub fn len(&self) -> usize {
        self.locked().len()
    }

    pub fn is_empty(&self) -> bool {
        self.locked().is_empty()
    }

    fn locked(&self) -> MutexGuard<'_, HashMap<Uuid, Contact>> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

pub fn definitions(store: &ContactStore) -> Vec<ToolDefinition> {
    vec![
        ToolDefinition::new(
            "contact.create",
            "Add a person to the contact book",
            InputSchema::new()
                .required("name", FieldKind::String, "full name")
                .optional("email", FieldKind::String, "email address")
                .optional("phone", FieldKind::String, "phone number"),
            vec!["crm.write".to_string()],
            ApprovalLevel::None,
            Arc::new(CreateContact { store: store.clone() }),
        )
        .with_audit_format(|arguments, output| match output {
            Some(data) => format!("created contact {} as {}", arguments["name"], data["id"]),
            None => format!("attempted to create contact {}", arguments["name"]),
        }),
        ToolDefinition::new(
            "contact.get",
            "Look up one contact by id",
            InputSchema::new().required("contact_id", FieldKind::String, "contact id"),
            vec!["crm.read".to_string()],
            ApprovalLevel::None,
            Arc::new(GetContact { store: store.clone() }),
        ),
        ToolDefinition::new(
            "contact.update",
            "Change a contact's name, email, or phone",
            InputSchema::new()
                .required("contact_id", FieldKind::String, "contact id")
                .optional("name", FieldKind::String, "new full name")
                .optional("email", FieldKind::String, "new email address")
                .optional("phone", FieldKind::String, "new phone number"),
            vec!["crm.write".to_string()],
            ApprovalLevel::None,
            Arc::new(UpdateContact { store: store.clone() }),
        ),
        ToolDefinition::new(
            "contact.list",
            "List contacts, optionally filtered by a search string",
            InputSchema::new().optional("query", FieldKind::String, "substring to match"),
            vec!["crm.read".to_string()],
            ApprovalLevel::None,
            Arc::new(ListContacts { store: store.clone() }),
        ),
    ]
}

struct CreateContact {
    store: ContactStore,
}

#[async_trait]
impl ToolHandler for CreateContact {
    async fn run(&self, arguments: &Value, _ctx: &CallContext) -> anyhow::Result<ToolOutput> {
        let name = args::required_str(arguments, "name")?;
        let email = args::optional_str(arguments, "email")?;
        let phone = args::optional_str(arguments, "phone")?;
        let now = Utc::now();
        let contact = Contact {
            id: Uuid::new_v4(),
            name: name.to_string(),
            email: email.map(str::to_string),
            phone: phone.map(str::to_string),
            created_at: now,
            updated_at: now,
        };
        self.store.insert(contact.clone());
        Ok(ToolOutput::new(
            format!("Added {} to your contacts.", contact.name),
            serde_json::to_value(&contact)?,
        )
        .touching(handle_for(&contact)))
    }
}

struct GetContact {
    store: ContactStore,
}

#[async_trait]
impl ToolHandler for GetContact {
    async fn run(&self, arguments: &Value, _ctx: &CallContext) -> anyhow::Result<ToolOutput> {
        let id = args::required_id(arguments, "contact_id")?;
        let contact =
            self.store.get(id).with_context(|| format!("no contact found with id `{id}`"))?;
        Ok(ToolOutput::new(describe(&contact), serde_json::to_value(&contact)?)
            .touching(handle_for(&contact)))
    }
}

struct UpdateContact {
    store: ContactStore,
}

#[async_trait]
impl ToolHandler for UpdateContact {
    async fn run(&self, arguments: &Value, _ctx: &CallContext) -> anyhow::Result<ToolOutput> {
        let id = args::required_id(arguments, "contact_id")?;
        let name = args::optional_str(arguments, "name")?;
        let email = args::optional_str(arguments, "email")?;
        let phone = args::optional_str(arguments, "phone")?;
        let updated = self
            .store
            .update(id, |contact| {
                if let Some(name) = name {
                    contact.name = name.to_string();
                }
                if let Some(email) = email {
                    contact.email = Some(email.to_string());
                }
                if let Some(phone) = phone {
                    contact.phone = Some(phone.to_string());
                }
            })
            .with_context(|| format!("no contact found with id `{id}`"))?;
        Ok(ToolOutput::new(
            format!("Updated {}.", updated.name),
            serde_json::to_value(&updated)?,
        )
        .touching(handle_for(&updated)))
    }
}

struct ListContacts {
    store: ContactStore,
}

#[async_trait]
impl ToolHandler for ListContacts {
    async fn run(&self, arguments: &Value, _ctx: &CallContext) -> anyhow::Result<ToolOutput> {
        let query = args::optional_str(arguments, "query")?.map(str::to_ascii_lowercase);
        let contacts: Vec<Contact> = self
            .store
            .list()
            .into_iter()
            .filter(|contact| matches(contact, query.as_deref()))
            .collect();
        let summary = match contacts.len() {
            0 => "No contacts matched.".to_string(),
            1 => format!("Found one contact: {}.", contacts[0].name),
            count => format!("Found {count} contacts."),
        };
        Ok(ToolOutput::new(summary, json!({ "contacts": contacts })))
    }
}

fn matches(contact: &Contact, query: Option<&str>) -> bool {
    let Some(query) = query else { return true };
    contact.name.to_ascii_lowercase().contains(query)
        || contact
            .email
            .as_deref()
            .is_some_and(|email| email.to_ascii_lowercase().contains(query))
}

fn describe(contact: &Contact) -> String {
    let mut details = Vec::new();
    if let Some(email) = &contact.email {
        details.push(email.clone());
    }
    if let Some(phone) = &contact.phone {
        details.push(phone.clone());
    }
    if details.is_empty() {
        format!("{} has no contact details on file.", contact.name)
    } else {
        format!("{} can be reached at {}.", contact.name, details.join(" or "))
    }
}

fn handle_for(contact: &Contact) -> EntityHandle {
    EntityHandle::new(EntityKind::Contact, contact.id.to_string(), contact.name.clone())
}
