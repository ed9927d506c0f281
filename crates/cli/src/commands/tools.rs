use serde::Serialize;

use hearth_core::catalog::ToolDefinition;
use hearth_tools::catalog::standard_catalog;
use hearth_tools::CrmStores;

#[derive(Debug, Serialize)]
struct ToolListing {
    name: String,
    description: String,
    approval: &'static str,
    permissions: Vec<String>,
}

#[derive(Debug, Serialize)]
struct ToolReport {
    tools: Vec<ToolListing>,
    alias_count: usize,
}

pub fn run(json_output: bool) -> String {
    let (catalog, aliases) = match standard_catalog(&CrmStores::default()) {
        Ok(parts) => parts,
        Err(error) => return format!("tool catalog failed to assemble: {error}"),
    };

    let report = ToolReport {
        tools: catalog.list_all().iter().map(listing).collect(),
        alias_count: aliases.len(),
    };

    if json_output {
        return serde_json::to_string_pretty(&report)
            .unwrap_or_else(|error| format!("{{\"error\":\"serialization failed: {error}\"}}"));
    }

    render_human(&report)
}

fn listing(definition: &ToolDefinition) -> ToolListing {
    ToolListing {
        name: definition.name.clone(),
        description: definition.description.clone(),
        approval: definition.approval.as_str(),
        permissions: definition.permissions.clone(),
    }
}

fn render_human(report: &ToolReport) -> String {
    let mut lines = vec![format!("{} tools registered:", report.tools.len())];

    for tool in &report.tools {
        let mut line = format!("- {} [{}] {}", tool.name, tool.approval, tool.description);
        if tool.approval != "none" {
            line.push_str(" (asks first)");
        }
        lines.push(line);
    }

    lines.push(format!(
        "{} aliases accepted for loosely spelled names (e.g. create_contact -> contact.create)",
        report.alias_count
    ));

    lines.join("\n")
}
