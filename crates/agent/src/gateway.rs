use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use thiserror::Error;
use tracing::info;

use hearth_core::audit::{AuditEvent, AuditOutcome, AuditSink};
use hearth_core::catalog::{CallContext, SchemaIssue, ToolCatalog, ToolOutput};

pub const DEFAULT_TOOL_TIMEOUT_SECS: u64 = 20;

/// Why a single tool call did not produce a result. Every variant maps to a
/// plain-language sentence in the final answer; none of them aborts the
/// sibling calls of the same turn.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ToolCallError {
    #[error("no tool is registered under `{name}`")]
    UnknownTool { name: String },
    #[error("`{tool}` requires the `{missing}` permission")]
    PermissionDenied { tool: String, missing: String },
    #[error("`{tool}` needs explicit confirmation before it runs")]
    ApprovalRequired { tool: String, prompt: String },
    #[error("arguments for `{tool}` failed validation")]
    ValidationFailed { tool: String, issues: Vec<SchemaIssue> },
    #[error("`{tool}` did not finish within {budget_secs}s")]
    TimedOut { tool: String, budget_secs: u64 },
    #[error("`{tool}` failed: {message}")]
    Execution { tool: String, message: String },
}

impl ToolCallError {
    pub fn tool(&self) -> &str {
        match self {
            ToolCallError::UnknownTool { name } => name,
            ToolCallError::PermissionDenied { tool, .. }
            | ToolCallError::ApprovalRequired { tool, .. }
            | ToolCallError::ValidationFailed { tool, .. }
            | ToolCallError::TimedOut { tool, .. }
            | ToolCallError::Execution { tool, .. } => tool,
        }
    }

    /// Deferral is a state, not a failure.
    pub fn is_deferral(&self) -> bool {
        matches!(self, ToolCallError::ApprovalRequired { .. })
    }

    /// The sentence woven into the synthesized answer. Never an error code.
    pub fn user_sentence(&self) -> String {
        match self {
            ToolCallError::UnknownTool { name } => {
                format!("I couldn't find a tool named `{name}`.")
            }
            ToolCallError::PermissionDenied { tool, missing } => {
                format!(
                    "I'm not allowed to run `{tool}`: the `{missing}` permission has not been granted."
                )
            }
            ToolCallError::ApprovalRequired { prompt, .. } => prompt.clone(),
            ToolCallError::ValidationFailed { tool, issues } => {
                format!(
                    "I couldn't run `{tool}` because the arguments were invalid: {}.",
                    describe_issues(issues)
                )
            }
            ToolCallError::TimedOut { tool, budget_secs } => {
                format!("`{tool}` did not finish within {budget_secs} seconds, so I stopped waiting.")
            }
            ToolCallError::Execution { tool, message } => {
                format!("`{tool}` failed: {message}")
            }
        }
    }
}

fn describe_issues(issues: &[SchemaIssue]) -> String {
    issues.iter().map(ToString::to_string).collect::<Vec<_>>().join("; ")
}

/// Routes one resolved call through permission, approval, and schema gates,
/// invokes the handler under a timeout, and audits the outcome whichever way
/// it went. Sinks are infallible, so auditing can never abort a turn.
pub struct ExecutionGateway {
    catalog: Arc<ToolCatalog>,
    audit: Arc<dyn AuditSink>,
    tool_timeout: Duration,
}

impl ExecutionGateway {
    pub fn new(catalog: Arc<ToolCatalog>, audit: Arc<dyn AuditSink>) -> Self {
        Self { catalog, audit, tool_timeout: Duration::from_secs(DEFAULT_TOOL_TIMEOUT_SECS) }
    }

    pub fn with_tool_timeout(mut self, timeout: Duration) -> Self {
        self.tool_timeout = timeout;
        self
    }

    pub async fn execute(
        &self,
        name: &str,
        arguments: &Value,
        ctx: &CallContext,
    ) -> Result<ToolOutput, ToolCallError> {
        let Some(definition) = self.catalog.lookup(name) else {
            let error = ToolCallError::UnknownTool { name: name.to_string() };
            self.audit.emit(self.event(ctx, name, AuditOutcome::Failure, error.to_string()));
            return Err(error);
        };

        if let Some(missing) =
            definition.permissions.iter().find(|required| !ctx.permissions.contains(*required))
        {
            let error = ToolCallError::PermissionDenied {
                tool: definition.name.clone(),
                missing: missing.clone(),
            };
            self.audit.emit(
                self.event(
                    ctx,
                    &definition.name,
                    AuditOutcome::Denied,
                    definition.audit_detail(arguments, None),
                )
                .with_metadata("error", error.to_string()),
            );
            return Err(error);
        }

        if definition.approval.requires_confirmation() && !ctx.approval_confirmed {
            let prompt = definition.confirmation_prompt(arguments);
            self.audit.emit(
                self.event(
                    ctx,
                    &definition.name,
                    AuditOutcome::Deferred,
                    definition.audit_detail(arguments, None),
                )
                .with_metadata("confirmation_prompt", prompt.clone()),
            );
            return Err(ToolCallError::ApprovalRequired { tool: definition.name.clone(), prompt });
        }

        if let Err(issues) = definition.input_schema.validate(arguments) {
            let error =
                ToolCallError::ValidationFailed { tool: definition.name.clone(), issues };
            self.audit.emit(
                self.event(
                    ctx,
                    &definition.name,
                    AuditOutcome::Failure,
                    definition.audit_detail(arguments, None),
                )
                .with_metadata("error", error.user_sentence()),
            );
            return Err(error);
        }

        let handler = definition.handler();
        match tokio::time::timeout(self.tool_timeout, handler.run(arguments, ctx)).await {
            Ok(Ok(output)) => {
                self.audit.emit(self.event(
                    ctx,
                    &definition.name,
                    AuditOutcome::Success,
                    definition.audit_detail(arguments, Some(&output.data)),
                ));
                Ok(output)
            }
            Ok(Err(source)) => {
                let error = ToolCallError::Execution {
                    tool: definition.name.clone(),
                    message: format!("{source:#}"),
                };
                self.audit.emit(
                    self.event(
                        ctx,
                        &definition.name,
                        AuditOutcome::Failure,
                        definition.audit_detail(arguments, None),
                    )
                    .with_metadata("error", error.to_string()),
                );
                Err(error)
            }
            Err(_elapsed) => {
                let error = ToolCallError::TimedOut {
                    tool: definition.name.clone(),
                    budget_secs: self.tool_timeout.as_secs(),
                };
                self.audit.emit(
                    self.event(
                        ctx,
                        &definition.name,
                        AuditOutcome::Failure,
                        definition.audit_detail(arguments, None),
                    )
                    .with_metadata("error", error.to_string()),
                );
                Err(error)
            }
        }
    }

    fn event(
        &self,
        ctx: &CallContext,
        tool: &str,
        outcome: AuditOutcome,
        detail: String,
    ) -> AuditEvent {
        AuditEvent::new(&ctx.turn_id, &ctx.user_id, tool, outcome, detail)
    }
}

/// Emits audit records as structured log events.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn emit(&self, event: AuditEvent) {
        info!(
            event_name = "assistant.tool.audited",
            audit_id = %event.event_id,
            turn_id = %event.turn_id,
            user_id = %event.user_id,
            tool = %event.tool_name,
            outcome = ?event.outcome,
            detail = %event.detail,
            "tool call audited"
        );
    }
}
