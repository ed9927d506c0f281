//! The turn loop: take one user query, optionally enrich it, ask the model
//! what to do, run the tool calls it requested, and synthesize one answer.
//! A turn always delivers something; failures downgrade the answer instead
//! of surfacing as errors to the caller.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use hearth_core::audit::AuditSink;
use hearth_core::catalog::{AliasTable, CallContext, ToolCatalog};
use hearth_core::config::AppConfig;
use hearth_core::domain::{Affordance, SourceRef};
use hearth_core::enrichment::{
    EnrichmentCache, EnrichmentError, EnrichmentRecord, EnrichmentSource, NoopEnrichmentSource,
};
use hearth_core::progress::{NoopProgressNotifier, ProgressNotifier, ProgressStage, ProgressUpdate};
use hearth_core::session::{
    payload_fingerprint, HistoryEntry, PendingApproval, Role, RunStatus, SessionStore, ToolRun,
    DEFAULT_MAX_HISTORY,
};

use crate::gateway::{ExecutionGateway, ToolCallError, TracingAuditSink};
use crate::llm::{ChatMessage, ModelClient, ModelRequest};
use crate::parser::{parse_reply, ParseError, ToolCallRequest};
use crate::synthesis::{collect_affordances, collect_sources, compose_answer, CallOutcome};

pub const DEFAULT_ENRICHMENT_BUDGET_SECS: u64 = 8;

const SYSTEM_PROMPT: &str = "You are a real-estate CRM assistant. Use the provided tools to act on \
     contacts, properties, deals, tasks, and calendar events. Call a tool whenever the user asks \
     for an action; answer directly when they only ask a question.";

const MODEL_FAILURE_APOLOGY: &str =
    "I'm sorry, I couldn't reach the language model just now. Please try again in a moment.";

const UNPARSEABLE_APOLOGY: &str =
    "I'm sorry, I couldn't make sense of the model's reply. Please try rephrasing your request.";

/// Where a turn currently stands. Recorded in order on the [`TurnTrace`];
/// the permitted transitions are the whole contract.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnPhase {
    Received,
    Enriching,
    ModelInvoked,
    ModelInvocationFailed,
    CallsExtracted,
    ApprovalChecked,
    Executing,
    ExecutionFailed,
    Synthesizing,
    Delivered,
}

impl TurnPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            TurnPhase::Received => "received",
            TurnPhase::Enriching => "enriching",
            TurnPhase::ModelInvoked => "model_invoked",
            TurnPhase::ModelInvocationFailed => "model_invocation_failed",
            TurnPhase::CallsExtracted => "calls_extracted",
            TurnPhase::ApprovalChecked => "approval_checked",
            TurnPhase::Executing => "executing",
            TurnPhase::ExecutionFailed => "execution_failed",
            TurnPhase::Synthesizing => "synthesizing",
            TurnPhase::Delivered => "delivered",
        }
    }

    /// Transitions the turn loop may take. Everything else is a bug in the
    /// loop, not a condition user input can produce.
    pub fn can_advance_to(self, next: TurnPhase) -> bool {
        use TurnPhase::*;
        matches!(
            (self, next),
            (Received, Enriching)
                | (Received, ModelInvoked)
                | (Received, ApprovalChecked)
                | (Enriching, ModelInvoked)
                | (ModelInvoked, ModelInvocationFailed)
                | (ModelInvoked, CallsExtracted)
                | (ModelInvocationFailed, Delivered)
                | (CallsExtracted, ApprovalChecked)
                | (ApprovalChecked, Executing)
                | (ApprovalChecked, Synthesizing)
                | (Executing, ExecutionFailed)
                | (Executing, Synthesizing)
                | (ExecutionFailed, Synthesizing)
                | (Synthesizing, Delivered)
        )
    }
}

/// The phases one turn moved through, in order. Returned with every answer
/// so callers can see how the turn went without scraping logs.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnTrace {
    pub turn_id: String,
    pub phases: Vec<TurnPhase>,
}

impl TurnTrace {
    fn new(turn_id: String) -> Self {
        Self { turn_id, phases: vec![TurnPhase::Received] }
    }

    fn advance(&mut self, next: TurnPhase) {
        if let Some(last) = self.phases.last() {
            debug_assert!(
                last.can_advance_to(next),
                "turn phase {last:?} cannot advance to {next:?}"
            );
        }
        self.phases.push(next);
    }

    pub fn current(&self) -> TurnPhase {
        self.phases.last().copied().unwrap_or(TurnPhase::Received)
    }
}

/// One inbound turn: free text, previously requested approvals, or both.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct QueryRequest {
    #[serde(default)]
    pub text: String,
    /// Fingerprints of deferred calls the user has now approved.
    #[serde(default)]
    pub approvals: Vec<String>,
}

impl QueryRequest {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into(), approvals: Vec::new() }
    }

    /// A turn that only confirms earlier deferred work.
    pub fn confirmation(fingerprint: impl Into<String>) -> Self {
        Self { text: String::new(), approvals: vec![fingerprint.into()] }
    }

    pub fn with_approval(mut self, fingerprint: impl Into<String>) -> Self {
        self.approvals.push(fingerprint.into());
        self
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct QueryResponse {
    pub answer: String,
    pub sources: Vec<SourceRef>,
    pub affordances: Vec<Affordance>,
    /// Confirmations the assistant is still waiting on after this turn.
    pub pending: Vec<PendingApproval>,
    pub trace: TurnTrace,
}

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("an orchestrator needs a tool catalog")]
    MissingCatalog,
    #[error("an orchestrator needs a model client")]
    MissingModel,
}

pub struct OrchestratorBuilder {
    catalog: Option<(ToolCatalog, AliasTable)>,
    model: Option<Arc<dyn ModelClient>>,
    audit: Arc<dyn AuditSink>,
    progress: Arc<dyn ProgressNotifier>,
    enrichment_source: Arc<dyn EnrichmentSource>,
    enrichment_enabled: bool,
    enrichment_budget: Duration,
    max_history: usize,
    permissions: Vec<String>,
    tool_timeout: Option<Duration>,
}

impl Default for OrchestratorBuilder {
    fn default() -> Self {
        Self {
            catalog: None,
            model: None,
            audit: Arc::new(TracingAuditSink),
            progress: Arc::new(NoopProgressNotifier),
            enrichment_source: Arc::new(NoopEnrichmentSource),
            enrichment_enabled: false,
            enrichment_budget: Duration::from_secs(DEFAULT_ENRICHMENT_BUDGET_SECS),
            max_history: DEFAULT_MAX_HISTORY,
            permissions: Vec::new(),
            tool_timeout: None,
        }
    }
}

impl OrchestratorBuilder {
    /// Takes the pair a catalog build hands back.
    pub fn with_catalog(mut self, parts: (ToolCatalog, AliasTable)) -> Self {
        self.catalog = Some(parts);
        self
    }

    pub fn with_model(mut self, model: Arc<dyn ModelClient>) -> Self {
        self.model = Some(model);
        self
    }

    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressNotifier>) -> Self {
        self.progress = progress;
        self
    }

    /// Wires a lookup source and switches enrichment on.
    pub fn with_enrichment(mut self, source: Arc<dyn EnrichmentSource>) -> Self {
        self.enrichment_source = source;
        self.enrichment_enabled = true;
        self
    }

    pub fn enrichment_enabled(mut self, enabled: bool) -> Self {
        self.enrichment_enabled = enabled;
        self
    }

    pub fn enrichment_budget(mut self, budget: Duration) -> Self {
        self.enrichment_budget = budget;
        self
    }

    pub fn max_history(mut self, max_history: usize) -> Self {
        self.max_history = max_history;
        self
    }

    pub fn grant_permissions<I, S>(mut self, permissions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.permissions.extend(permissions.into_iter().map(Into::into));
        self
    }

    pub fn tool_timeout(mut self, timeout: Duration) -> Self {
        self.tool_timeout = Some(timeout);
        self
    }

    /// Applies the tunable parts of an [`AppConfig`]. Sources and sinks stay
    /// whatever was wired explicitly.
    pub fn configure(mut self, config: &AppConfig) -> Self {
        self.max_history = config.session.max_history;
        self.permissions = config.access.permissions.clone();
        self.enrichment_enabled = config.enrichment.enabled;
        self.enrichment_budget = Duration::from_secs(config.enrichment.timeout_secs);
        self
    }

    pub fn build(self) -> Result<Orchestrator, BuildError> {
        let (catalog, aliases) = self.catalog.ok_or(BuildError::MissingCatalog)?;
        let model = self.model.ok_or(BuildError::MissingModel)?;
        let catalog = Arc::new(catalog);
        let mut gateway = ExecutionGateway::new(Arc::clone(&catalog), self.audit);
        if let Some(timeout) = self.tool_timeout {
            gateway = gateway.with_tool_timeout(timeout);
        }
        Ok(Orchestrator {
            catalog,
            aliases,
            gateway,
            model,
            sessions: SessionStore::new(self.max_history),
            enrichment_cache: EnrichmentCache::new(),
            enrichment_source: self.enrichment_source,
            enrichment_enabled: self.enrichment_enabled,
            enrichment_budget: self.enrichment_budget,
            progress: self.progress,
            permissions: self.permissions,
        })
    }
}

/// Drives whole turns end to end. One instance serves every user; per-user
/// state lives in the session store and the enrichment cache.
pub struct Orchestrator {
    catalog: Arc<ToolCatalog>,
    aliases: AliasTable,
    gateway: ExecutionGateway,
    model: Arc<dyn ModelClient>,
    sessions: SessionStore,
    enrichment_cache: EnrichmentCache,
    enrichment_source: Arc<dyn EnrichmentSource>,
    enrichment_enabled: bool,
    enrichment_budget: Duration,
    progress: Arc<dyn ProgressNotifier>,
    permissions: Vec<String>,
}

impl Orchestrator {
    pub fn builder() -> OrchestratorBuilder {
        OrchestratorBuilder::default()
    }

    pub fn catalog(&self) -> &ToolCatalog {
        &self.catalog
    }

    pub fn aliases(&self) -> &AliasTable {
        &self.aliases
    }

    pub async fn process_query(&self, user_id: &str, request: QueryRequest) -> QueryResponse {
        let mut trace = TurnTrace::new(Uuid::new_v4().to_string());
        info!(
            event_name = "assistant.turn.received",
            user_id = %user_id,
            turn_id = %trace.turn_id,
            approvals = request.approvals.len(),
            "turn received"
        );

        let text = request.text.trim().to_string();
        if !text.is_empty() {
            self.sessions.append_history(user_id, HistoryEntry::user(text.clone()));
        }

        let mut notes: Vec<String> = Vec::new();
        let confirmed = self.match_approvals(user_id, &request.approvals, &mut notes);

        let mut enrichment_records: Vec<EnrichmentRecord> = Vec::new();
        if self.enrichment_enabled && !text.is_empty() {
            if let Some(subject) = enrichment_subject(&text) {
                trace.advance(TurnPhase::Enriching);
                match self.enrich(user_id, &subject).await {
                    Ok(record) => {
                        self.progress.notify(ProgressUpdate {
                            user_id: user_id.to_string(),
                            turn_id: trace.turn_id.clone(),
                            stage: ProgressStage::EnrichmentReady {
                                subject: record.subject.clone(),
                            },
                        });
                        self.sessions
                            .append_history(user_id, HistoryEntry::system(enrichment_note(&record)));
                        enrichment_records.push(record);
                    }
                    Err(EnrichmentError::Disabled) => {
                        debug!(
                            event_name = "assistant.enrichment.failed",
                            subject = %subject,
                            "no enrichment source wired"
                        );
                    }
                    Err(error) => {
                        warn!(
                            event_name = "assistant.enrichment.failed",
                            subject = %subject,
                            error = %error,
                            "enrichment failed; answering without it"
                        );
                    }
                }
            }
        }

        // A turn that only confirms earlier work has nothing to ask the
        // model; everything it needs is in the stored payloads.
        let confirmation_only = text.is_empty() && !request.approvals.is_empty();
        let mut model_text: Option<String> = None;
        let mut new_calls: Vec<ToolCallRequest> = Vec::new();

        if confirmation_only {
            trace.advance(TurnPhase::ApprovalChecked);
        } else {
            let model_request = self.model_request(user_id);
            trace.advance(TurnPhase::ModelInvoked);
            info!(
                event_name = "assistant.model.invoked",
                turn_id = %trace.turn_id,
                messages = model_request.messages.len(),
                tools = model_request.tools.len(),
                "invoking model"
            );
            match self.model.invoke(&model_request).await {
                Err(error) => {
                    warn!(
                        event_name = "assistant.model.failed",
                        turn_id = %trace.turn_id,
                        error = %error,
                        "model invocation failed"
                    );
                    trace.advance(TurnPhase::ModelInvocationFailed);
                    return self.deliver(
                        user_id,
                        trace,
                        MODEL_FAILURE_APOLOGY.to_string(),
                        Vec::new(),
                        Vec::new(),
                        Vec::new(),
                    );
                }
                Ok(reply) => match parse_reply(&reply, &trace.turn_id) {
                    Err(ParseError::UnparseableResponse) => {
                        warn!(
                            event_name = "assistant.model.failed",
                            turn_id = %trace.turn_id,
                            reason = "unparseable_reply",
                            "model reply carried nothing usable"
                        );
                        trace.advance(TurnPhase::ModelInvocationFailed);
                        return self.deliver(
                            user_id,
                            trace,
                            UNPARSEABLE_APOLOGY.to_string(),
                            Vec::new(),
                            Vec::new(),
                            Vec::new(),
                        );
                    }
                    Ok(parsed) => {
                        for dropped in &parsed.dropped {
                            notes.push(format!(
                                "I ignored a call to `{}` because {}.",
                                dropped.name, dropped.reason
                            ));
                        }
                        model_text = parsed.message;
                        new_calls = parsed.calls;
                        trace.advance(TurnPhase::CallsExtracted);
                        trace.advance(TurnPhase::ApprovalChecked);
                    }
                },
            }
        }

        let outcomes = self
            .run_calls(user_id, &mut trace, confirmed, new_calls)
            .await;

        trace.advance(TurnPhase::Synthesizing);
        let answer = compose_answer(model_text.as_deref(), &outcomes, &notes);
        let sources = collect_sources(&enrichment_records);
        let affordances = collect_affordances(&outcomes);
        let tool_runs = outcomes
            .iter()
            .map(|outcome| ToolRun::new(outcome.tool.clone(), outcome.run_status()))
            .collect();

        self.deliver(user_id, trace, answer, sources, affordances, tool_runs)
    }

    /// Pulls the stored payloads matching this turn's approval fingerprints.
    /// Unmatched fingerprints become a note rather than an error.
    fn match_approvals(
        &self,
        user_id: &str,
        approvals: &[String],
        notes: &mut Vec<String>,
    ) -> Vec<PendingApproval> {
        let mut confirmed = Vec::new();
        let mut unmatched = 0usize;
        for fingerprint in approvals {
            match self.sessions.take_pending(user_id, fingerprint) {
                Some(pending) => confirmed.push(pending),
                None => {
                    unmatched += 1;
                    warn!(
                        event_name = "assistant.approval.unmatched",
                        user_id = %user_id,
                        fingerprint = %fingerprint,
                        "approval does not match any pending call"
                    );
                }
            }
        }
        if unmatched == 1 {
            notes.push(
                "One approval didn't match anything I was waiting on, so I skipped it.".to_string(),
            );
        } else if unmatched > 1 {
            notes.push(format!(
                "{unmatched} approvals didn't match anything I was waiting on, so I skipped them."
            ));
        }
        confirmed
    }

    /// Runs confirmed payloads first, then this turn's new calls, in order.
    /// A new call that defers parks its payload for a later confirmation.
    async fn run_calls(
        &self,
        user_id: &str,
        trace: &mut TurnTrace,
        confirmed: Vec<PendingApproval>,
        new_calls: Vec<ToolCallRequest>,
    ) -> Vec<CallOutcome> {
        let total = confirmed.len() + new_calls.len();
        if total == 0 {
            return Vec::new();
        }

        trace.advance(TurnPhase::Executing);
        let mut outcomes = Vec::with_capacity(total);
        let mut index = 0usize;

        for pending in confirmed {
            index += 1;
            let ctx = self.call_context(user_id, &trace.turn_id).confirmed();
            let result = self.gateway.execute(&pending.tool, &pending.arguments, &ctx).await;
            self.note_tool_finished(user_id, &trace.turn_id, &pending.tool, index, total);
            let requested = ToolCallRequest {
                name: pending.tool.clone(),
                arguments: pending.arguments.clone(),
                turn_id: trace.turn_id.clone(),
            };
            outcomes.push(CallOutcome::new(requested, pending.tool, result));
        }

        for call in new_calls {
            index += 1;
            let canonical = self.aliases.resolve(&call.name).to_string();
            let ctx = self.call_context(user_id, &trace.turn_id);
            let result = match self.gateway.execute(&canonical, &call.arguments, &ctx).await {
                Err(ToolCallError::ApprovalRequired { tool, prompt }) => {
                    let fingerprint = payload_fingerprint(&tool, &call.arguments);
                    info!(
                        event_name = "assistant.approval.deferred",
                        user_id = %user_id,
                        tool = %tool,
                        fingerprint = %fingerprint,
                        "call deferred pending confirmation"
                    );
                    self.sessions.push_pending(
                        user_id,
                        PendingApproval {
                            fingerprint,
                            tool: tool.clone(),
                            arguments: call.arguments.clone(),
                            prompt: prompt.clone(),
                            requested_at: Utc::now(),
                        },
                    );
                    Err(ToolCallError::ApprovalRequired { tool, prompt })
                }
                other => other,
            };
            self.note_tool_finished(user_id, &trace.turn_id, &canonical, index, total);
            outcomes.push(CallOutcome::new(call, canonical, result));
        }

        let failed = outcomes
            .iter()
            .any(|outcome| matches!(outcome.run_status(), RunStatus::Failed));
        if failed {
            trace.advance(TurnPhase::ExecutionFailed);
        }

        outcomes
    }

    async fn enrich(
        &self,
        user_id: &str,
        subject: &str,
    ) -> Result<EnrichmentRecord, EnrichmentError> {
        let mut computed = false;
        let result = self
            .enrichment_cache
            .get_or_compute(user_id, subject, || {
                computed = true;
                let source = Arc::clone(&self.enrichment_source);
                let budget = self.enrichment_budget;
                let subject = subject.to_string();
                async move {
                    match tokio::time::timeout(budget, source.lookup(&subject)).await {
                        Ok(outcome) => outcome,
                        Err(_elapsed) => {
                            Err(EnrichmentError::TimedOut { budget_secs: budget.as_secs() })
                        }
                    }
                }
            })
            .await;

        if let Ok(record) = &result {
            if computed {
                debug!(
                    event_name = "assistant.enrichment.miss",
                    subject = %record.subject,
                    "enrichment computed and cached"
                );
            } else {
                debug!(
                    event_name = "assistant.enrichment.hit",
                    subject = %record.subject,
                    "enrichment served from cache"
                );
            }
        }
        result
    }

    fn model_request(&self, user_id: &str) -> ModelRequest {
        let mut messages = vec![ChatMessage::system(SYSTEM_PROMPT)];
        for entry in self.sessions.history(user_id) {
            let message = match entry.role {
                Role::User => ChatMessage::user(entry.content),
                Role::Assistant => ChatMessage::assistant(entry.content),
                Role::System => ChatMessage::system(entry.content),
            };
            messages.push(message);
        }
        ModelRequest { messages, tools: self.catalog.manifest() }
    }

    fn call_context(&self, user_id: &str, turn_id: &str) -> CallContext {
        CallContext::new(user_id, turn_id).grant_all(self.permissions.iter().cloned())
    }

    fn note_tool_finished(
        &self,
        user_id: &str,
        turn_id: &str,
        tool: &str,
        index: usize,
        total: usize,
    ) {
        debug!(
            event_name = "assistant.tool.executed",
            turn_id = %turn_id,
            tool = %tool,
            index,
            total,
            "tool call finished"
        );
        self.progress.notify(ProgressUpdate {
            user_id: user_id.to_string(),
            turn_id: turn_id.to_string(),
            stage: ProgressStage::ToolFinished { tool: tool.to_string(), index, total },
        });
    }

    fn deliver(
        &self,
        user_id: &str,
        mut trace: TurnTrace,
        answer: String,
        sources: Vec<SourceRef>,
        affordances: Vec<Affordance>,
        tool_runs: Vec<ToolRun>,
    ) -> QueryResponse {
        self.sessions.append_history(user_id, HistoryEntry::assistant(answer.clone(), tool_runs));
        self.progress.notify(ProgressUpdate {
            user_id: user_id.to_string(),
            turn_id: trace.turn_id.clone(),
            stage: ProgressStage::AnswerReady,
        });
        trace.advance(TurnPhase::Delivered);
        info!(
            event_name = "assistant.turn.delivered",
            user_id = %user_id,
            turn_id = %trace.turn_id,
            phases = trace.phases.len(),
            "turn delivered"
        );
        let pending = self.sessions.pending(user_id);
        QueryResponse { answer, sources, affordances, pending, trace }
    }
}

const STREET_SUFFIXES: &[&str] = &[
    "road", "rd", "street", "st", "avenue", "ave", "lane", "ln", "drive", "dr", "court", "ct",
    "way", "place", "crescent", "boulevard", "blvd", "terrace",
];

/// Finds the most likely lookup subject in a query: a street-address shape
/// (a number followed within a few words by a street suffix), else a quoted
/// phrase of sensible length. Purely lexical, so a miss just means the turn
/// skips enrichment.
pub fn enrichment_subject(text: &str) -> Option<String> {
    let tokens: Vec<String> = text
        .split_whitespace()
        .map(|token| {
            token.trim_matches(|c: char| !c.is_ascii_alphanumeric()).to_string()
        })
        .collect();

    for (start, token) in tokens.iter().enumerate() {
        if token.is_empty() || !token.chars().all(|c| c.is_ascii_digit()) {
            continue;
        }
        let stop = tokens.len().min(start + 5);
        for end in start + 1..stop {
            if tokens[end].is_empty() {
                break;
            }
            if STREET_SUFFIXES.contains(&tokens[end].to_ascii_lowercase().as_str()) {
                return Some(tokens[start..=end].join(" "));
            }
        }
    }

    quoted_subject(text)
}

fn quoted_subject(text: &str) -> Option<String> {
    let opening = text.find('"')?;
    let rest = &text[opening + 1..];
    let closing = rest.find('"')?;
    let subject = rest[..closing].trim();
    (subject.len() >= 3 && subject.len() <= 80).then(|| subject.to_string())
}

fn enrichment_note(record: &EnrichmentRecord) -> String {
    let mut note = format!("Background on {}: {}", record.subject, record.summary);
    if !record.facts.is_empty() {
        note.push(' ');
        note.push_str(&record.facts.join(" "));
    }
    note
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use serde_json::{json, Value};

    use hearth_core::audit::{AuditOutcome, InMemoryAuditSink};
    use hearth_core::catalog::{
        ApprovalLevel, CallContext, CatalogBuilder, FieldKind, InputSchema, ToolDefinition,
        ToolHandler, ToolOutput,
    };
    use hearth_core::domain::{EntityHandle, EntityKind, SourceRef};
    use hearth_core::enrichment::{EnrichmentRecord, StaticEnrichmentSource};
    use hearth_core::session::RunStatus;

    use crate::llm::{ModelError, ModelReply, RawToolCall, ScriptedModelClient};

    use super::{
        enrichment_subject, Orchestrator, QueryRequest, TurnPhase, MODEL_FAILURE_APOLOGY,
        UNPARSEABLE_APOLOGY,
    };

    struct StubHandler {
        summary: &'static str,
        touched: Option<EntityHandle>,
        calls: AtomicUsize,
        seen: Mutex<Vec<Value>>,
    }

    impl StubHandler {
        fn new(summary: &'static str) -> Arc<Self> {
            Arc::new(Self {
                summary,
                touched: None,
                calls: AtomicUsize::new(0),
                seen: Mutex::new(Vec::new()),
            })
        }

        fn touching(summary: &'static str, handle: EntityHandle) -> Arc<Self> {
            Arc::new(Self {
                summary,
                touched: Some(handle),
                calls: AtomicUsize::new(0),
                seen: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn last_arguments(&self) -> Option<Value> {
            self.seen.lock().expect("seen lock").last().cloned()
        }
    }

    #[async_trait]
    impl ToolHandler for StubHandler {
        async fn run(&self, arguments: &Value, _ctx: &CallContext) -> anyhow::Result<ToolOutput> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().expect("seen lock").push(arguments.clone());
            let mut output = ToolOutput::new(self.summary, json!({"ok": true}));
            if let Some(handle) = &self.touched {
                output = output.touching(handle.clone());
            }
            Ok(output)
        }
    }

    struct FailingHandler;

    #[async_trait]
    impl ToolHandler for FailingHandler {
        async fn run(&self, _arguments: &Value, _ctx: &CallContext) -> anyhow::Result<ToolOutput> {
            Err(anyhow::anyhow!("datastore unavailable"))
        }
    }

    fn tool(
        name: &str,
        schema: InputSchema,
        approval: ApprovalLevel,
        handler: Arc<dyn ToolHandler>,
    ) -> ToolDefinition {
        ToolDefinition::new(name, "test tool", schema, vec!["crm.write".to_string()], approval, handler)
    }

    fn orchestrator_with(
        tools: Vec<ToolDefinition>,
        model: Arc<ScriptedModelClient>,
    ) -> (Orchestrator, Arc<InMemoryAuditSink>) {
        let mut builder = CatalogBuilder::new();
        for definition in tools {
            builder.register(definition).expect("tool should register");
        }
        let audit = Arc::new(InMemoryAuditSink::default());
        let orchestrator = Orchestrator::builder()
            .with_catalog(builder.build())
            .with_model(model)
            .with_audit(audit.clone())
            .grant_permissions(["crm.read", "crm.write", "crm.delete"])
            .build()
            .expect("orchestrator should build");
        (orchestrator, audit)
    }

    #[tokio::test]
    async fn property_create_runs_with_enrichment_context() {
        let handler = StubHandler::touching(
            "Created the listing for 12 Oak Street.",
            EntityHandle::new(EntityKind::Property, "P-1", "12 Oak Street"),
        );
        let model = Arc::new(ScriptedModelClient::with_replies(vec![Ok(
            ModelReply::calls_only(vec![RawToolCall::new(
                "property.create",
                &json!({"address": "12 Oak Street", "notes": "great school district"}),
            )]),
        )]));
        let source = Arc::new(StaticEnrichmentSource::default().with_record(
            "12 Oak Street",
            EnrichmentRecord::new("12 Oak Street", "Three-bed terrace, listed twice since 2019.")
                .with_source(SourceRef::new("Listing archive", "https://listings.example/12-oak")),
        ));

        let mut builder = CatalogBuilder::new();
        builder
            .register(tool(
                "property.create",
                InputSchema::new()
                    .required("address", FieldKind::String, "street address")
                    .optional("notes", FieldKind::String, "extra notes"),
                ApprovalLevel::None,
                handler.clone(),
            ))
            .expect("tool should register");
        let orchestrator = Orchestrator::builder()
            .with_catalog(builder.build())
            .with_model(model)
            .with_audit(Arc::new(InMemoryAuditSink::default()))
            .with_enrichment(source.clone())
            .grant_permissions(["crm.write"])
            .build()
            .expect("orchestrator should build");

        let response = orchestrator
            .process_query(
                "U-alice",
                QueryRequest::new(
                    "Create a property listing for 12 Oak Street and note the school district",
                ),
            )
            .await;

        assert_eq!(handler.calls(), 1);
        assert!(response.answer.contains("Created the listing for 12 Oak Street."));
        assert_eq!(response.sources.len(), 1);
        assert_eq!(response.sources[0].url, "https://listings.example/12-oak");
        assert_eq!(response.affordances.len(), 1);
        assert_eq!(response.affordances[0].path, "/properties/P-1");
        assert_eq!(source.lookups(), 1);
        assert_eq!(
            response.trace.phases,
            vec![
                TurnPhase::Received,
                TurnPhase::Enriching,
                TurnPhase::ModelInvoked,
                TurnPhase::CallsExtracted,
                TurnPhase::ApprovalChecked,
                TurnPhase::Executing,
                TurnPhase::Synthesizing,
                TurnPhase::Delivered,
            ]
        );
    }

    #[tokio::test]
    async fn same_subject_is_looked_up_once_per_user() {
        let model = Arc::new(ScriptedModelClient::with_replies(vec![
            Ok(ModelReply::text_only("Looked it up.")),
            Ok(ModelReply::text_only("Looked it up.")),
            Ok(ModelReply::text_only("Looked it up.")),
        ]));
        let source = Arc::new(StaticEnrichmentSource::default().with_record(
            "12 Oak Street",
            EnrichmentRecord::new("12 Oak Street", "Three-bed terrace."),
        ));
        let mut builder = CatalogBuilder::new();
        builder
            .register(tool(
                "property.get",
                InputSchema::new(),
                ApprovalLevel::None,
                StubHandler::new("Fetched."),
            ))
            .expect("tool should register");
        let orchestrator = Orchestrator::builder()
            .with_catalog(builder.build())
            .with_model(model)
            .with_enrichment(source.clone())
            .build()
            .expect("orchestrator should build");

        let ask = "What do we know about 12 Oak Street?";
        orchestrator.process_query("U-alice", QueryRequest::new(ask)).await;
        orchestrator.process_query("U-alice", QueryRequest::new(ask)).await;
        assert_eq!(source.lookups(), 1);

        orchestrator.process_query("U-bob", QueryRequest::new(ask)).await;
        assert_eq!(source.lookups(), 2);
    }

    #[tokio::test]
    async fn destructive_call_defers_then_runs_on_confirmation() {
        let handler = StubHandler::new("Deleted the task.");
        let model = Arc::new(ScriptedModelClient::with_replies(vec![Ok(
            ModelReply::calls_only(vec![RawToolCall::new(
                "task.delete",
                &json!({"task_id": "T-9"}),
            )]),
        )]));
        let (orchestrator, audit) = orchestrator_with(
            vec![tool(
                "task.delete",
                InputSchema::new().required("task_id", FieldKind::String, "task to delete"),
                ApprovalLevel::Destructive,
                handler.clone(),
            )],
            model.clone(),
        );

        let first = orchestrator
            .process_query("U-alice", QueryRequest::new("Delete the Henderson follow-up task"))
            .await;

        assert_eq!(handler.calls(), 0);
        assert_eq!(first.pending.len(), 1);
        assert!(first.answer.contains("task.delete"));
        assert!(first
            .trace
            .phases
            .iter()
            .all(|phase| *phase != TurnPhase::ExecutionFailed));
        assert_eq!(audit.events().last().expect("audit event").outcome, AuditOutcome::Deferred);

        let fingerprint = first.pending[0].fingerprint.clone();
        let second = orchestrator
            .process_query("U-alice", QueryRequest::confirmation(fingerprint))
            .await;

        assert_eq!(handler.calls(), 1);
        assert_eq!(handler.last_arguments(), Some(json!({"task_id": "T-9"})));
        assert!(second.pending.is_empty());
        assert!(second.answer.contains("Deleted the task."));
        assert_eq!(model.invocations().await, 1);
        assert_eq!(
            second.trace.phases,
            vec![
                TurnPhase::Received,
                TurnPhase::ApprovalChecked,
                TurnPhase::Executing,
                TurnPhase::Synthesizing,
                TurnPhase::Delivered,
            ]
        );
        assert_eq!(audit.events().last().expect("audit event").outcome, AuditOutcome::Success);
    }

    #[tokio::test]
    async fn one_failing_call_does_not_erase_its_siblings() {
        let create = StubHandler::new("Created contact Jane Doe.");
        let model = Arc::new(ScriptedModelClient::with_replies(vec![Ok(ModelReply::calls_only(
            vec![
                RawToolCall::new("contact.create", &json!({"name": "Jane Doe"})),
                RawToolCall::new("deal.update", &json!({})),
            ],
        )
        .with_text("Here's what I did."))]));
        let (orchestrator, _audit) = orchestrator_with(
            vec![
                tool(
                    "contact.create",
                    InputSchema::new().required("name", FieldKind::String, "full name"),
                    ApprovalLevel::None,
                    create.clone(),
                ),
                tool("deal.update", InputSchema::new(), ApprovalLevel::None, Arc::new(FailingHandler)),
            ],
            model,
        );

        let response = orchestrator
            .process_query("U-alice", QueryRequest::new("Add Jane and update the deal"))
            .await;

        assert_eq!(create.calls(), 1);
        assert!(response.answer.contains("Here's what I did."));
        assert!(response.answer.contains("Created contact Jane Doe."));
        assert!(response.answer.contains("`deal.update` failed"));
        assert!(response
            .trace
            .phases
            .windows(2)
            .any(|pair| pair == [TurnPhase::ExecutionFailed, TurnPhase::Synthesizing]));
    }

    #[tokio::test]
    async fn every_call_in_a_cascade_is_recorded_by_name() {
        let contact = StubHandler::new("Created contact Jane Doe.");
        let task = StubHandler::new("Created the follow-up task.");
        let deal = StubHandler::new("Opened the deal.");
        let model = Arc::new(ScriptedModelClient::with_replies(vec![Ok(
            ModelReply::calls_only(vec![
                RawToolCall::new("contact.create", &json!({"name": "Jane Doe"})),
                RawToolCall::new("task.create", &json!({"title": "Call Jane"})),
                RawToolCall::new("deal.create", &json!({})),
            ]),
        )]));
        let (orchestrator, _audit) = orchestrator_with(
            vec![
                tool(
                    "contact.create",
                    InputSchema::new().required("name", FieldKind::String, "full name"),
                    ApprovalLevel::None,
                    contact.clone(),
                ),
                tool(
                    "task.create",
                    InputSchema::new().required("title", FieldKind::String, "what to do"),
                    ApprovalLevel::None,
                    task.clone(),
                ),
                tool("deal.create", InputSchema::new(), ApprovalLevel::None, deal.clone()),
            ],
            model,
        );

        let response = orchestrator
            .process_query(
                "U-alice",
                QueryRequest::new("Add Jane, set a follow-up, and open a deal for her"),
            )
            .await;

        assert_eq!(contact.calls(), 1);
        assert_eq!(task.calls(), 1);
        assert_eq!(deal.calls(), 1);
        assert!(response.answer.contains("Created contact Jane Doe."));
        assert!(response.answer.contains("Opened the deal."));

        let history = orchestrator.sessions.history("U-alice");
        let recorded = history.last().expect("assistant entry is appended on delivery");
        let names: Vec<&str> = recorded.tool_runs.iter().map(|run| run.tool.as_str()).collect();
        assert_eq!(names, vec!["contact.create", "task.create", "deal.create"]);
        assert!(recorded.tool_runs.iter().all(|run| run.status == RunStatus::Ok));
    }

    #[tokio::test]
    async fn model_outage_delivers_an_apology() {
        let model = Arc::new(ScriptedModelClient::with_replies(vec![Err(ModelError::Status {
            status: 503,
            detail: "overloaded".to_string(),
        })]));
        let (orchestrator, _audit) =
            orchestrator_with(vec![tool("task.list", InputSchema::new(), ApprovalLevel::None, StubHandler::new("Listed."))], model);

        let response =
            orchestrator.process_query("U-alice", QueryRequest::new("List my tasks")).await;

        assert_eq!(response.answer, MODEL_FAILURE_APOLOGY);
        assert!(response.affordances.is_empty());
        assert_eq!(
            response.trace.phases,
            vec![
                TurnPhase::Received,
                TurnPhase::ModelInvoked,
                TurnPhase::ModelInvocationFailed,
                TurnPhase::Delivered,
            ]
        );
    }

    #[tokio::test]
    async fn empty_reply_gets_its_own_apology() {
        let model =
            Arc::new(ScriptedModelClient::with_replies(vec![Ok(ModelReply::text_only("  "))]));
        let (orchestrator, _audit) =
            orchestrator_with(vec![tool("task.list", InputSchema::new(), ApprovalLevel::None, StubHandler::new("Listed."))], model);

        let response =
            orchestrator.process_query("U-alice", QueryRequest::new("List my tasks")).await;

        assert_eq!(response.answer, UNPARSEABLE_APOLOGY);
        assert_eq!(response.trace.current(), TurnPhase::Delivered);
    }

    #[tokio::test]
    async fn aliased_names_reach_the_canonical_tool() {
        let handler = StubHandler::new("Created the task.");
        let model = Arc::new(ScriptedModelClient::with_replies(vec![Ok(
            ModelReply::calls_only(vec![RawToolCall::new(
                "create_task",
                &json!({"title": "Call Jane"}),
            )]),
        )]));
        let (orchestrator, _audit) = orchestrator_with(
            vec![tool(
                "task.create",
                InputSchema::new().required("title", FieldKind::String, "what to do"),
                ApprovalLevel::None,
                handler.clone(),
            )],
            model,
        );

        let response = orchestrator
            .process_query("U-alice", QueryRequest::new("Remind me to call Jane"))
            .await;

        assert_eq!(handler.calls(), 1);
        assert!(response.answer.contains("Created the task."));
    }

    #[tokio::test]
    async fn malformed_call_becomes_a_note_not_a_failure() {
        let model = Arc::new(ScriptedModelClient::with_replies(vec![Ok(
            ModelReply::calls_only(vec![RawToolCall::raw("task.create", "{not json")])
                .with_text("I tried to create that task."),
        )]));
        let (orchestrator, _audit) = orchestrator_with(
            vec![tool(
                "task.create",
                InputSchema::new().required("title", FieldKind::String, "what to do"),
                ApprovalLevel::None,
                StubHandler::new("Created."),
            )],
            model,
        );

        let response =
            orchestrator.process_query("U-alice", QueryRequest::new("Add a task")).await;

        assert!(response.answer.contains("I tried to create that task."));
        assert!(response.answer.contains("I ignored a call to `task.create`"));
    }

    #[tokio::test]
    async fn unmatched_approval_is_skipped_with_a_note() {
        let model = Arc::new(ScriptedModelClient::with_replies(Vec::new()));
        let (orchestrator, _audit) =
            orchestrator_with(vec![tool("task.list", InputSchema::new(), ApprovalLevel::None, StubHandler::new("Listed."))], model.clone());

        let response = orchestrator
            .process_query("U-alice", QueryRequest::confirmation("no-such-fingerprint"))
            .await;

        assert!(response.answer.contains("didn't match anything I was waiting on"));
        assert_eq!(model.invocations().await, 0);
        assert_eq!(
            response.trace.phases,
            vec![
                TurnPhase::Received,
                TurnPhase::ApprovalChecked,
                TurnPhase::Synthesizing,
                TurnPhase::Delivered,
            ]
        );
    }

    #[test]
    fn subjects_are_spotted_in_address_and_quoted_forms() {
        assert_eq!(
            enrichment_subject("Create a listing for 12 Oak Street, please"),
            Some("12 Oak Street".to_string())
        );
        assert_eq!(
            enrichment_subject("Any history on 4801 Maple Grove Ave?"),
            Some("4801 Maple Grove Ave".to_string())
        );
        assert_eq!(
            enrichment_subject("Look into \"Harborview Estate\" for me"),
            Some("Harborview Estate".to_string())
        );
        assert_eq!(enrichment_subject("Schedule 3 viewings on Saturday"), None);
        assert_eq!(enrichment_subject("List my open tasks"), None);
    }
}
