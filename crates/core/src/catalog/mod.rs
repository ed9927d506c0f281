pub mod alias;
pub mod schema;

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::domain::EntityHandle;

pub use alias::AliasTable;
pub use schema::{FieldKind, FieldSpec, InputSchema, SchemaIssue};

/// How much ceremony a tool demands before it may run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalLevel {
    None,
    Standard,
    Destructive,
}

impl ApprovalLevel {
    pub fn requires_confirmation(&self) -> bool {
        !matches!(self, ApprovalLevel::None)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalLevel::None => "none",
            ApprovalLevel::Standard => "standard",
            ApprovalLevel::Destructive => "destructive",
        }
    }
}

/// Caller identity and grants for a single tool invocation.
#[derive(Clone, Debug)]
pub struct CallContext {
    pub user_id: String,
    pub permissions: BTreeSet<String>,
    pub approval_confirmed: bool,
    pub turn_id: String,
}

impl CallContext {
    pub fn new(user_id: impl Into<String>, turn_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            permissions: BTreeSet::new(),
            approval_confirmed: false,
            turn_id: turn_id.into(),
        }
    }

    pub fn grant(mut self, permission: impl Into<String>) -> Self {
        self.permissions.insert(permission.into());
        self
    }

    pub fn grant_all<I, S>(mut self, permissions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.permissions.extend(permissions.into_iter().map(Into::into));
        self
    }

    pub fn confirmed(mut self) -> Self {
        self.approval_confirmed = true;
        self
    }
}

/// What a tool hands back on success: a sentence for the answer, a data
/// payload, and the records it touched.
#[derive(Clone, Debug)]
pub struct ToolOutput {
    pub summary: String,
    pub data: Value,
    pub touched: Vec<EntityHandle>,
}

impl ToolOutput {
    pub fn new(summary: impl Into<String>, data: Value) -> Self {
        Self { summary: summary.into(), data, touched: Vec::new() }
    }

    pub fn touching(mut self, handle: EntityHandle) -> Self {
        self.touched.push(handle);
        self
    }
}

#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn run(&self, arguments: &Value, ctx: &CallContext) -> anyhow::Result<ToolOutput>;
}

type PromptFn = Arc<dyn Fn(&Value) -> String + Send + Sync>;
type AuditFormatFn = Arc<dyn Fn(&Value, Option<&Value>) -> String + Send + Sync>;

/// One registered capability. Immutable after registration; looked up by its
/// canonical `domain.action` name for the process lifetime.
#[derive(Clone)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: InputSchema,
    pub permissions: Vec<String>,
    pub approval: ApprovalLevel,
    prompt: PromptFn,
    audit_format: AuditFormatFn,
    handler: Arc<dyn ToolHandler>,
}

impl ToolDefinition {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: InputSchema,
        permissions: Vec<String>,
        approval: ApprovalLevel,
        handler: Arc<dyn ToolHandler>,
    ) -> Self {
        let name = name.into();
        let prompt_name = name.clone();
        let audit_name = name.clone();
        Self {
            name,
            description: description.into(),
            input_schema,
            permissions,
            approval,
            prompt: Arc::new(move |_| format!("Proceed with `{prompt_name}`?")),
            audit_format: Arc::new(move |arguments, _| {
                format!("{audit_name} invoked with {arguments}")
            }),
            handler,
        }
    }

    pub fn with_prompt(
        mut self,
        prompt: impl Fn(&Value) -> String + Send + Sync + 'static,
    ) -> Self {
        self.prompt = Arc::new(prompt);
        self
    }

    pub fn with_audit_format(
        mut self,
        audit_format: impl Fn(&Value, Option<&Value>) -> String + Send + Sync + 'static,
    ) -> Self {
        self.audit_format = Arc::new(audit_format);
        self
    }

    /// The question put to the user before an approval-gated run.
    pub fn confirmation_prompt(&self, arguments: &Value) -> String {
        (self.prompt)(arguments)
    }

    /// The human-readable detail line for the audit record.
    pub fn audit_detail(&self, arguments: &Value, output: Option<&Value>) -> String {
        (self.audit_format)(arguments, output)
    }

    pub fn handler(&self) -> Arc<dyn ToolHandler> {
        Arc::clone(&self.handler)
    }

    pub fn domain(&self) -> &str {
        self.name.split_once('.').map(|(domain, _)| domain).unwrap_or(&self.name)
    }

    pub fn action(&self) -> &str {
        self.name.split_once('.').map(|(_, action)| action).unwrap_or(&self.name)
    }
}

impl fmt::Debug for ToolDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolDefinition")
            .field("name", &self.name)
            .field("permissions", &self.permissions)
            .field("approval", &self.approval)
            .finish_non_exhaustive()
    }
}

/// Manifest entry exposed to the language model.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ToolManifestEntry {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CatalogError {
    #[error("tool `{name}` is already registered")]
    DuplicateTool { name: String },
    #[error("tool name `{name}` is not in `domain.action` form")]
    MalformedName { name: String },
}

/// Collects tool definitions at startup and constructs the read-only catalog
/// and alias table in one step. There is no way to register a tool after
/// `build`.
#[derive(Default)]
pub struct CatalogBuilder {
    tools: Vec<ToolDefinition>,
}

impl CatalogBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a definition. Fails on a duplicate name rather than silently
    /// overwriting, and on names that do not follow `domain.action`.
    pub fn register(&mut self, definition: ToolDefinition) -> Result<(), CatalogError> {
        if !well_formed_name(&definition.name) {
            return Err(CatalogError::MalformedName { name: definition.name.clone() });
        }
        if self.tools.iter().any(|existing| existing.name == definition.name) {
            return Err(CatalogError::DuplicateTool { name: definition.name.clone() });
        }
        self.tools.push(definition);
        Ok(())
    }

    pub fn build(self) -> (ToolCatalog, AliasTable) {
        let mut index = HashMap::with_capacity(self.tools.len());
        for (position, definition) in self.tools.iter().enumerate() {
            index.insert(definition.name.clone(), position);
        }
        let catalog = ToolCatalog { tools: self.tools, index };
        let aliases = AliasTable::build(&catalog);
        (catalog, aliases)
    }
}

/// The process-wide capability registry. Read-only after construction, safe
/// to share across any number of concurrent turns.
pub struct ToolCatalog {
    tools: Vec<ToolDefinition>,
    index: HashMap<String, usize>,
}

impl ToolCatalog {
    pub fn lookup(&self, name: &str) -> Option<&ToolDefinition> {
        self.index.get(name).map(|position| &self.tools[*position])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Definitions in registration order.
    pub fn list_all(&self) -> &[ToolDefinition] {
        &self.tools
    }

    pub fn manifest(&self) -> Vec<ToolManifestEntry> {
        self.tools
            .iter()
            .map(|definition| ToolManifestEntry {
                name: definition.name.clone(),
                description: definition.description.clone(),
                parameters: definition.input_schema.to_manifest(),
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

fn well_formed_name(name: &str) -> bool {
    let Some((domain, action)) = name.split_once('.') else {
        return false;
    };
    let token_ok = |token: &str| {
        !token.is_empty()
            && token.chars().all(|ch| ch.is_ascii_lowercase() || ch.is_ascii_digit() || ch == '_')
    };
    token_ok(domain) && token_ok(action)
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use serde_json::{json, Value};

    use super::{
        ApprovalLevel, CallContext, CatalogBuilder, CatalogError, FieldKind, InputSchema,
        ToolDefinition, ToolHandler, ToolOutput,
    };

    pub(crate) struct EchoHandler;

    #[async_trait]
    impl ToolHandler for EchoHandler {
        async fn run(&self, arguments: &Value, _ctx: &CallContext) -> anyhow::Result<ToolOutput> {
            Ok(ToolOutput::new("echoed", arguments.clone()))
        }
    }

    pub(crate) fn definition_fixture(name: &str, approval: ApprovalLevel) -> ToolDefinition {
        ToolDefinition::new(
            name,
            format!("test tool {name}"),
            InputSchema::new().optional("note", FieldKind::String, "free text"),
            vec!["crm.read".to_string()],
            approval,
            Arc::new(EchoHandler),
        )
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let mut builder = CatalogBuilder::new();
        builder
            .register(definition_fixture("contact.create", ApprovalLevel::None))
            .expect("first registration should succeed");

        let error = builder
            .register(definition_fixture("contact.create", ApprovalLevel::None))
            .expect_err("second registration of the same name should fail");
        assert_eq!(error, CatalogError::DuplicateTool { name: "contact.create".to_string() });
    }

    #[test]
    fn names_must_be_domain_dot_action() {
        let mut builder = CatalogBuilder::new();
        for bad in ["contact", "contact.", ".create", "Contact.Create", "a.b.c"] {
            let error = builder
                .register(definition_fixture(bad, ApprovalLevel::None))
                .expect_err("malformed name should be rejected");
            assert!(matches!(error, CatalogError::MalformedName { .. }), "{bad} was accepted");
        }
    }

    #[test]
    fn lookup_and_listing_preserve_registration_order() {
        let mut builder = CatalogBuilder::new();
        builder.register(definition_fixture("contact.create", ApprovalLevel::None)).expect("register");
        builder.register(definition_fixture("task.delete", ApprovalLevel::Destructive)).expect("register");
        let (catalog, _aliases) = builder.build();

        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.list_all()[0].name, "contact.create");
        assert_eq!(catalog.list_all()[1].name, "task.delete");
        let definition = catalog.lookup("task.delete").expect("task.delete should be registered");
        assert_eq!(definition.approval, ApprovalLevel::Destructive);
        assert!(catalog.lookup("deal.close").is_none());
    }

    #[test]
    fn manifest_carries_schema_rendering() {
        let mut builder = CatalogBuilder::new();
        builder.register(definition_fixture("contact.create", ApprovalLevel::None)).expect("register");
        let (catalog, _aliases) = builder.build();

        let manifest = catalog.manifest();
        assert_eq!(manifest.len(), 1);
        assert_eq!(manifest[0].name, "contact.create");
        assert_eq!(manifest[0].parameters["properties"]["note"]["type"], "string");
    }

    #[test]
    fn prompt_and_audit_generators_default_and_override() {
        let plain = definition_fixture("task.delete", ApprovalLevel::Destructive);
        assert_eq!(plain.confirmation_prompt(&json!({})), "Proceed with `task.delete`?");

        let custom = definition_fixture("task.delete", ApprovalLevel::Destructive)
            .with_prompt(|arguments| {
                format!("Delete task {}? This cannot be undone.", arguments["task_id"])
            })
            .with_audit_format(|arguments, _| format!("deleted {}", arguments["task_id"]));
        assert_eq!(
            custom.confirmation_prompt(&json!({"task_id": "T1"})),
            "Delete task \"T1\"? This cannot be undone."
        );
        assert_eq!(custom.audit_detail(&json!({"task_id": "T1"}), None), "deleted \"T1\"");
    }

    #[test]
    fn domain_and_action_split_the_canonical_name() {
        let definition = definition_fixture("calendar.schedule", ApprovalLevel::Standard);
        assert_eq!(definition.domain(), "calendar");
        assert_eq!(definition.action(), "schedule");
    }
}
