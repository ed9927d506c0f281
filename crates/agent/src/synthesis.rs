//! Folds tool results, deferral prompts, and enrichment notes into the final
//! answer. Synthesis never fails: a turn that produced nothing usable still
//! gets a stock sentence rather than an empty reply.

use std::collections::HashSet;

use hearth_core::catalog::ToolOutput;
use hearth_core::domain::{Affordance, EntityKind, SourceRef};
use hearth_core::enrichment::EnrichmentRecord;
use hearth_core::session::RunStatus;

use crate::gateway::ToolCallError;
use crate::parser::ToolCallRequest;

pub const NO_CONTENT_FALLBACK: &str = "I don't have anything to report for that request.";

/// One tool call after the gateway has had its say.
#[derive(Clone, Debug)]
pub struct CallOutcome {
    /// The call as the model spoke it, alias and all.
    pub requested: ToolCallRequest,
    /// Canonical tool name after alias resolution.
    pub tool: String,
    pub result: Result<ToolOutput, ToolCallError>,
}

impl CallOutcome {
    pub fn new(
        requested: ToolCallRequest,
        tool: impl Into<String>,
        result: Result<ToolOutput, ToolCallError>,
    ) -> Self {
        Self { requested, tool: tool.into(), result }
    }

    pub fn succeeded(&self) -> bool {
        self.result.is_ok()
    }

    pub fn run_status(&self) -> RunStatus {
        match &self.result {
            Ok(_) => RunStatus::Ok,
            Err(error) if error.is_deferral() => RunStatus::Deferred,
            Err(_) => RunStatus::Failed,
        }
    }
}

/// Weaves the model's own text, per-call summaries and failure sentences, and
/// any trailing notes into one answer, in that order. Failed calls do not
/// erase their successful siblings.
pub fn compose_answer(
    model_text: Option<&str>,
    outcomes: &[CallOutcome],
    notes: &[String],
) -> String {
    let mut lines: Vec<String> = Vec::new();

    if let Some(text) = model_text {
        let trimmed = text.trim();
        if !trimmed.is_empty() {
            lines.push(trimmed.to_string());
        }
    }

    for outcome in outcomes {
        match &outcome.result {
            Ok(output) => {
                let summary = output.summary.trim();
                if !summary.is_empty() {
                    lines.push(summary.to_string());
                }
            }
            Err(error) => lines.push(error.user_sentence()),
        }
    }

    for note in notes {
        let trimmed = note.trim();
        if !trimmed.is_empty() {
            lines.push(trimmed.to_string());
        }
    }

    if lines.is_empty() {
        return NO_CONTENT_FALLBACK.to_string();
    }
    lines.join("\n")
}

/// Entity references from successful calls, first mention wins. A turn that
/// touches the same record twice still surfaces it once.
pub fn collect_affordances(outcomes: &[CallOutcome]) -> Vec<Affordance> {
    let mut seen: HashSet<(EntityKind, String)> = HashSet::new();
    let mut affordances = Vec::new();
    for outcome in outcomes {
        let Ok(output) = &outcome.result else { continue };
        for handle in &output.touched {
            if seen.insert((handle.kind, handle.id.clone())) {
                affordances.push(Affordance::for_entity(handle));
            }
        }
    }
    affordances
}

/// Citations from enrichment lookups, deduplicated by URL.
pub fn collect_sources(records: &[EnrichmentRecord]) -> Vec<SourceRef> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut sources = Vec::new();
    for record in records {
        for source in &record.sources {
            if seen.insert(source.url.clone()) {
                sources.push(source.clone());
            }
        }
    }
    sources
}
