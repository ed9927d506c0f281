use std::sync::Arc;

use hearth_agent::http::HttpModelClient;
use hearth_agent::orchestrator::{Orchestrator, QueryRequest, QueryResponse};
use hearth_core::config::{AppConfig, LoadOptions};
use hearth_tools::catalog::standard_catalog;
use hearth_tools::CrmStores;

use crate::commands::CommandResult;

/// Runs one question through a freshly assembled assistant. The CRM stores
/// live only for this process, so `ask` is a conversation probe, not a way to
/// build up data. When the assistant defers a call for approval, `--yes`
/// sends the confirmation in the same session; without it the prompt is
/// printed and the pending work dies with the process.
pub fn run(question: &str, user: &str, yes: bool) -> CommandResult {
    let question = question.trim();
    if question.is_empty() {
        return CommandResult::failure("ask", "empty_question", "nothing to ask", 2);
    }

    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure("ask", "config_validation", error.to_string(), 2)
        }
    };

    let catalog = match standard_catalog(&CrmStores::default()) {
        Ok(catalog) => catalog,
        Err(error) => {
            return CommandResult::failure("ask", "catalog_integrity", error.to_string(), 3)
        }
    };

    let model = match HttpModelClient::from_config(&config.model) {
        Ok(model) => model,
        Err(error) => return CommandResult::failure("ask", "model_setup", error.to_string(), 4),
    };

    let orchestrator = match Orchestrator::builder()
        .with_catalog(catalog)
        .with_model(Arc::new(model))
        .configure(&config)
        .build()
    {
        Ok(orchestrator) => orchestrator,
        Err(error) => {
            return CommandResult::failure("ask", "orchestrator_setup", error.to_string(), 4)
        }
    };

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return CommandResult::failure(
                "ask",
                "async_runtime",
                format!("failed to initialize async runtime: {error}"),
                5,
            )
        }
    };

    let response = runtime.block_on(async {
        let mut response = orchestrator.process_query(user, QueryRequest::new(question)).await;

        if yes && !response.pending.is_empty() {
            let mut confirmation = QueryRequest::default();
            for pending in &response.pending {
                confirmation = confirmation.with_approval(pending.fingerprint.clone());
            }
            response = orchestrator.process_query(user, confirmation).await;
        }

        response
    });

    CommandResult { exit_code: 0, output: render(&response) }
}

fn render(response: &QueryResponse) -> String {
    let mut lines = vec![response.answer.clone()];

    if !response.sources.is_empty() {
        lines.push(String::new());
        lines.push("Sources:".to_string());
        for source in &response.sources {
            lines.push(format!("- {} <{}>", source.title, source.url));
        }
    }

    if !response.affordances.is_empty() {
        lines.push(String::new());
        lines.push("Mentioned records:".to_string());
        for affordance in &response.affordances {
            lines.push(format!("- {} ({})", affordance.label, affordance.path));
        }
    }

    if !response.pending.is_empty() {
        lines.push(String::new());
        lines.push("Waiting on your approval:".to_string());
        for pending in &response.pending {
            lines.push(format!("- {}", pending.prompt));
        }
        lines.push("Re-run the same question with --yes to approve.".to_string());
    }

    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use serde_json::json;

    use hearth_agent::orchestrator::{QueryResponse, TurnPhase, TurnTrace};
    use hearth_core::domain::{Affordance, EntityKind, SourceRef};
    use hearth_core::session::PendingApproval;

    use super::render;

    fn response_fixture() -> QueryResponse {
        QueryResponse {
            answer: "Done.".to_string(),
            sources: Vec::new(),
            affordances: Vec::new(),
            pending: Vec::new(),
            trace: TurnTrace {
                turn_id: "t-1".to_string(),
                phases: vec![TurnPhase::Received, TurnPhase::Delivered],
            },
        }
    }

    #[test]
    fn a_bare_answer_renders_as_a_single_line() {
        assert_eq!(render(&response_fixture()), "Done.");
    }

    #[test]
    fn sources_records_and_pending_each_get_a_section() {
        let mut response = response_fixture();
        response.sources.push(SourceRef {
            title: "Land registry".to_string(),
            url: "https://registry.example.com/22br".to_string(),
        });
        response.affordances.push(Affordance {
            kind: EntityKind::Task,
            id: "T-1".to_string(),
            label: "Call Jane".to_string(),
            path: "/tasks/T-1".to_string(),
        });
        response.pending.push(PendingApproval {
            fingerprint: "abc123".to_string(),
            tool: "task.delete".to_string(),
            arguments: json!({"task_id": "T-1"}),
            prompt: "Permanently delete task T-1? This cannot be undone.".to_string(),
            requested_at: Utc::now(),
        });

        let rendered = render(&response);
        assert!(rendered.contains("Sources:\n- Land registry <https://registry.example.com/22br>"));
        assert!(rendered.contains("Mentioned records:\n- Call Jane (/tasks/T-1)"));
        assert!(rendered.contains("Waiting on your approval:"));
        assert!(rendered.contains("Re-run the same question with --yes to approve."));
    }
}
