//! Pipeline tools: `deal.create`, `deal.update`, `deal.close`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{bail, Context};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use hearth_core::catalog::{
    ApprovalLevel, CallContext, FieldKind, InputSchema, ToolDefinition, ToolHandler, ToolOutput,
};
use hearth_core::domain::{EntityHandle, EntityKind};

use crate::args;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DealStage {
    #[default]
    Lead,
    Viewing,
    Offer,
    Closed,
}

impl DealStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            DealStage::Lead => "lead",
            DealStage::Viewing => "viewing",
            DealStage::Offer => "offer",
            DealStage::Closed => "closed",
        }
    }
}

fn parse_stage(raw: &str) -> anyhow::Result<DealStage> {
    match raw.to_ascii_lowercase().as_str() {
        "lead" => Ok(DealStage::Lead),
        "viewing" => Ok(DealStage::Viewing),
        "offer" => Ok(DealStage::Offer),
        "closed" => Ok(DealStage::Closed),
        other => bail!("unknown deal stage `{other}` (expected lead, viewing, offer, or closed)"),
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Deal {
    pub id: Uuid,
    pub contact_id: Option<Uuid>,
    pub property_id: Option<Uuid>,
    pub stage: DealStage,
    pub amount: Option<Decimal>,
    pub won: Option<bool>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Default)]
pub struct DealStore {
    inner: Arc<Mutex<HashMap<Uuid, Deal>>>,
}

impl DealStore {
    pub fn insert(&self, deal: Deal) {
        self.locked().insert(deal.id, deal);
    }

    pub fn get(&self, id: Uuid) -> Option<Deal> {
        self.locked().get(&id).cloned()
    }

    pub fn update<F>(&self, id: Uuid, apply: F) -> Option<Deal>
    where
        F: FnOnce(&mut Deal),
    {
        let mut deals = self.locked();
        let deal = deals.get_mut(&id)?;
        apply(deal);
        deal.updated_at = Utc::now();
        Some(deal.clone())
    }

    pub fn len(&self) -> usize {
        self.locked().len()
    }

    pub fn is_empty(&self) -> bool {
        self.locked().is_empty()
    }

    fn locked(&self) -> MutexGuard<'_, HashMap<Uuid, Deal>> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

pub fn definitions(store: &DealStore) -> Vec<ToolDefinition> {
    vec![
        ToolDefinition::new(
            "deal.create",
            "Open a deal, optionally tied to a contact and a property",
            InputSchema::new()
                .optional("contact_id", FieldKind::String, "interested contact")
                .optional("property_id", FieldKind::String, "property under discussion")
                .optional("amount", FieldKind::Number, "expected value"),
            vec!["crm.write".to_string()],
            ApprovalLevel::None,
            Arc::new(CreateDeal { store: store.clone() }),
        ),
        ToolDefinition::new(
            "deal.update",
            "Move a deal to another stage or revise its amount",
            InputSchema::new()
                .required("deal_id", FieldKind::String, "deal id")
                .optional("stage", FieldKind::String, "lead, viewing, offer, or closed")
                .optional("amount", FieldKind::Number, "revised value"),
            vec!["crm.write".to_string()],
            ApprovalLevel::None,
            Arc::new(UpdateDeal { store: store.clone() }),
        ),
        ToolDefinition::new(
            "deal.close",
            "Close a deal as won or lost",
            InputSchema::new()
                .required("deal_id", FieldKind::String, "deal id")
                .required("won", FieldKind::Boolean, "true if the deal was won"),
            vec!["crm.write".to_string()],
            ApprovalLevel::Standard,
            Arc::new(CloseDeal { store: store.clone() }),
        )
        .with_prompt(|arguments| {
            let verdict =
                if arguments["won"].as_bool().unwrap_or(false) { "won" } else { "lost" };
            format!("Close this deal as {verdict}? It will leave the active pipeline.")
        })
        .with_audit_format(|arguments, _| {
            format!("closed deal {} (won: {})", arguments["deal_id"], arguments["won"])
        }),
    ]
}

struct CreateDeal {
    store: DealStore,
}

#[async_trait]
impl ToolHandler for CreateDeal {
    async fn run(&self, arguments: &Value, _ctx: &CallContext) -> anyhow::Result<ToolOutput> {
        let now = Utc::now();
        let deal = Deal {
            id: Uuid::new_v4(),
            contact_id: args::optional_id(arguments, "contact_id")?,
            property_id: args::optional_id(arguments, "property_id")?,
            stage: DealStage::Lead,
            amount: args::optional_decimal(arguments, "amount")?,
            won: None,
            created_at: now,
            updated_at: now,
        };
        self.store.insert(deal.clone());
        Ok(ToolOutput::new("Opened a new deal.", serde_json::to_value(&deal)?)
            .touching(handle_for(&deal)))
    }
}

struct UpdateDeal {
    store: DealStore,
}

#[async_trait]
impl ToolHandler for UpdateDeal {
    async fn run(&self, arguments: &Value, _ctx: &CallContext) -> anyhow::Result<ToolOutput> {
        let id = args::required_id(arguments, "deal_id")?;
        let stage = match args::optional_str(arguments, "stage")? {
            Some(raw) => Some(parse_stage(raw)?),
            None => None,
        };
        let amount = args::optional_decimal(arguments, "amount")?;
        let updated = self
            .store
            .update(id, |deal| {
                if let Some(stage) = stage {
                    deal.stage = stage;
                }
                if let Some(amount) = amount {
                    deal.amount = Some(amount);
                }
            })
            .with_context(|| format!("no deal found with id `{id}`"))?;
        Ok(ToolOutput::new(
            format!("Moved the deal to {}.", updated.stage.as_str()),
            serde_json::to_value(&updated)?,
        )
        .touching(handle_for(&updated)))
    }
}

struct CloseDeal {
    store: DealStore,
}

#[async_trait]
impl ToolHandler for CloseDeal {
    async fn run(&self, arguments: &Value, _ctx: &CallContext) -> anyhow::Result<ToolOutput> {
        let id = args::required_id(arguments, "deal_id")?;
        let won = args::required_bool(arguments, "won")?;
        let closed = self
            .store
            .update(id, |deal| {
                deal.stage = DealStage::Closed;
                deal.won = Some(won);
            })
            .with_context(|| format!("no deal found with id `{id}`"))?;
        let verdict = if won { "won" } else { "lost" };
        Ok(ToolOutput::new(
            format!("Closed the deal as {verdict}."),
            serde_json::to_value(&closed)?,
        )
        .touching(handle_for(&closed)))
    }
}

fn handle_for(deal: &Deal) -> EntityHandle {
    let label = match &deal.amount {
        Some(amount) => format!("Deal worth {amount}"),
        None => "Open deal".to_string(),
    };
    EntityHandle::new(EntityKind::Deal, deal.id.to_string(), label)
}
