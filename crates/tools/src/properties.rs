//! Listing tools: `property.create`, `property.get`, `property.update`,
//! `property.search`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{bail, Context};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use hearth_core::catalog::{
    ApprovalLevel, CallContext, FieldKind, InputSchema, ToolDefinition, ToolHandler, ToolOutput,
};
use hearth_core::domain::{EntityHandle, EntityKind};

use crate::args;

/// Search results surface at most this many entity references.
const MAX_SEARCH_AFFORDANCES: usize = 5;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListingStatus {
    #[default]
    Active,
    UnderOffer,
    Sold,
}

impl ListingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ListingStatus::Active => "active",
            ListingStatus::UnderOffer => "under_offer",
            ListingStatus::Sold => "sold",
        }
    }

    fn human(&self) -> &'static str {
        match self {
            ListingStatus::Active => "currently listed",
            ListingStatus::UnderOffer => "under offer",
            ListingStatus::Sold => "sold",
        }
    }
}

fn parse_status(raw: &str) -> anyhow::Result<ListingStatus> {
    match raw.to_ascii_lowercase().replace(' ', "_").as_str() {
        "active" => Ok(ListingStatus::Active),
        "under_offer" => Ok(ListingStatus::UnderOffer),
        "sold" => Ok(ListingStatus::Sold),
        other => bail!("unknown listing status `{other}` (expected active, under_offer, or sold)"),
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Property {
    pub id: Uuid,
    pub address: String,
    pub city: Option<String>,
    pub price: Option<Decimal>,
    pub bedrooms: Option<u32>,
    pub status: ListingStatus,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Default)]
pub struct PropertyStore {
    inner: Arc<Mutex<HashMap<Uuid, Property>>>,
}

impl PropertyStore {
    pub fn insert(&self, property: Property) {
        self.locked().insert(property.id, property);
    }

    pub fn get(&self, id: Uuid) -> Option<Property> {
        self.locked().get(&id).cloned()
    }

    pub fn update<F>(&self, id: Uuid, apply: F) -> Option<Property>
    where
        F: FnOnce(&mut Property),
    {
        let mut properties = self.locked();
        let property = properties.get_mut(&id)?;
        apply(property);
        property.updated_at = Utc::now();
        Some(property.clone())
    }

    pub fn list(&self) -> Vec<Property> {
        let mut properties: Vec<Property> = self.locked().values().cloned().collect();
        properties.sort_by(|a, b| a.address.cmp(&b.address));
        properties
    }

    pub fn len(&self) -> usize {
        self.locked().len()
    }

    pub fn is_empty(&self) -> bool {
        self.locked().is_empty()
    }

    fn locked(&self) -> MutexGuard<'_, HashMap<Uuid, Property>> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

pub fn definitions(store: &PropertyStore) -> Vec<ToolDefinition> {
    vec![
        ToolDefinition::new(
            "property.create",
            "Create a listing for a property",
            InputSchema::new()
                .required("address", FieldKind::String, "street address")
                .optional("city", FieldKind::String, "town or city")
                .optional("price", FieldKind::Number, "asking price")
                .optional("bedrooms", FieldKind::Integer, "number of bedrooms")
                .optional("notes", FieldKind::String, "free-form notes"),
            vec!["crm.write".to_string()],
            ApprovalLevel::None,
            Arc::new(CreateProperty { store: store.clone() }),
        )
        .with_audit_format(|arguments, output| match output {
            Some(data) => format!("listed {} as {}", arguments["address"], data["id"]),
            None => format!("attempted to list {}", arguments["address"]),
        }),
        ToolDefinition::new(
            "property.get",
            "Look up one listing by id",
            InputSchema::new().required("property_id", FieldKind::String, "property id"),
            vec!["crm.read".to_string()],
            ApprovalLevel::None,
            Arc::new(GetProperty { store: store.clone() }),
        ),
        ToolDefinition::new(
            "property.update",
            "Change a listing's price, status, or notes",
            InputSchema::new()
                .required("property_id", FieldKind::String, "property id")
                .optional("price", FieldKind::Number, "new asking price")
                .optional("status", FieldKind::String, "active, under_offer, or sold")
                .optional("notes", FieldKind::String, "replacement notes"),
            vec!["crm.write".to_string()],
            ApprovalLevel::None,
            Arc::new(UpdateProperty { store: store.clone() }),
        ),
        ToolDefinition::new(
            "property.search",
            "Search listings by text, price ceiling, or minimum bedrooms",
            InputSchema::new()
                .optional("query", FieldKind::String, "substring of the address or city")
                .optional("max_price", FieldKind::Number, "highest acceptable price")
                .optional("min_bedrooms", FieldKind::Integer, "fewest acceptable bedrooms"),
            vec!["crm.read".to_string()],
            ApprovalLevel::None,
            Arc::new(SearchProperties { store: store.clone() }),
        ),
    ]
}

struct CreateProperty {
    store: PropertyStore,
}

#[async_trait]
impl ToolHandler for CreateProperty {
    async fn run(&self, arguments: &Value, _ctx: &CallContext) -> anyhow::Result<ToolOutput> {
        let address = args::required_str(arguments, "address")?;
        let now = Utc::now();
        let property = Property {
            id: Uuid::new_v4(),
            address: address.to_string(),
            city: args::optional_str(arguments, "city")?.map(str::to_string),
            price: args::optional_decimal(arguments, "price")?,
            bedrooms: args::optional_u32(arguments, "bedrooms")?,
            status: ListingStatus::Active,
            notes: args::optional_str(arguments, "notes")?.map(str::to_string),
            created_at: now,
            updated_at: now,
        };
        self.store.insert(property.clone());
        Ok(ToolOutput::new(
            format!("Listed {}.", property.address),
            serde_json::to_value(&property)?,
        )
        .touching(handle_for(&property)))
    }
}

struct GetProperty {
    store: PropertyStore,
}

#[async_trait]
impl ToolHandler for GetProperty {
    async fn run(&self, arguments: &Value, _ctx: &CallContext) -> anyhow::Result<ToolOutput> {
        let id = args::required_id(arguments, "property_id")?;
        let property =
            self.store.get(id).with_context(|| format!("no property found with id `{id}`"))?;
        Ok(ToolOutput::new(describe(&property), serde_json::to_value(&property)?)
            .touching(handle_for(&property)))
    }
}

struct UpdateProperty {
    store: PropertyStore,
}

#[async_trait]
impl ToolHandler for UpdateProperty {
    async fn run(&self, arguments: &Value, _ctx: &CallContext) -> anyhow::Result<ToolOutput> {
        let id = args::required_id(arguments, "property_id")?;
        let price = args::optional_decimal(arguments, "price")?;
        let status = match args::optional_str(arguments, "status")? {
            Some(raw) => Some(parse_status(raw)?),
            None => None,
        };
        let notes = args::optional_str(arguments, "notes")?;
        let updated = self
            .store
            .update(id, |property| {
                if let Some(price) = price {
                    property.price = Some(price);
                }
                if let Some(status) = status {
                    property.status = status;
                }
                if let Some(notes) = notes {
                    property.notes = Some(notes.to_string());
                }
            })
            .with_context(|| format!("no property found with id `{id}`"))?;
        Ok(ToolOutput::new(
            format!("Updated {}.", updated.address),
            serde_json::to_value(&updated)?,
        )
        .touching(handle_for(&updated)))
    }
}

struct SearchProperties {
    store: PropertyStore,
}

#[async_trait]
impl ToolHandler for SearchProperties {
    async fn run(&self, arguments: &Value, _ctx: &CallContext) -> anyhow::Result<ToolOutput> {
        let query = args::optional_str(arguments, "query")?.map(str::to_ascii_lowercase);
        let max_price = args::optional_decimal(arguments, "max_price")?;
        let min_bedrooms = args::optional_u32(arguments, "min_bedrooms")?;

        let matches: Vec<Property> = self
            .store
            .list()
            .into_iter()
            .filter(|property| {
                let text_ok = match query.as_deref() {
                    None => true,
                    Some(query) => {
                        property.address.to_ascii_lowercase().contains(query)
                            || property
                                .city
                                .as_deref()
                                .is_some_and(|city| city.to_ascii_lowercase().contains(query))
                    }
                };
                let price_ok = match (max_price, property.price) {
                    (Some(ceiling), Some(price)) => price <= ceiling,
                    (Some(_), None) => false,
                    (None, _) => true,
                };
                let bedrooms_ok = match (min_bedrooms, property.bedrooms) {
                    (Some(floor), Some(bedrooms)) => bedrooms >= floor,
                    (Some(_), None) => false,
                    (None, _) => true,
                };
                text_ok && price_ok && bedrooms_ok
            })
            .collect();

        let summary = match matches.len() {
            0 => "No properties matched.".to_string(),
            1 => format!("Found one property: {}.", matches[0].address),
            count => format!("Found {count} properties."),
        };
        let mut output = ToolOutput::new(summary, json!({ "properties": matches }));
        for property in matches.iter().take(MAX_SEARCH_AFFORDANCES) {
            output = output.touching(handle_for(property));
        }
        Ok(output)
    }
}

fn describe(property: &Property) -> String {
    let mut sentence = property.address.clone();
    if let Some(city) = &property.city {
        sentence.push_str(&format!(" in {city}"));
    }
    let mut details = Vec::new();
    if let Some(price) = &property.price {
        details.push(format!("asking {price}"));
    }
    if let Some(bedrooms) = property.bedrooms {
        details.push(format!("{bedrooms} bedrooms"));
    }
    details.push(property.status.human().to_string());
    sentence.push_str(": ");
    sentence.push_str(&details.join(", "));
    sentence.push('.');
    sentence
}

fn handle_for(property: &Property) -> EntityHandle {
    EntityHandle::new(EntityKind::Property, property.id.to_string(), property.address.clone())
}
