use std::collections::{HashMap, HashSet};

use super::ToolCatalog;

/// Lexical near-miss table mapping surface forms the model tends to emit
/// back to canonical `domain.action` keys. Built once from the catalog and
/// read-only afterwards. Resolution is purely lexical, so a resolved name can
/// still fail schema validation downstream.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AliasTable {
    entries: HashMap<String, String>,
    canonical: HashSet<String>,
}

impl AliasTable {
    /// Generates every candidate alias for every registered tool. Candidates
    /// equal to a registered name are skipped; a candidate already claimed by
    /// an earlier registrant is kept for the earlier one.
    pub fn build(catalog: &ToolCatalog) -> Self {
        let mut table = Self::default();
        for definition in catalog.list_all() {
            table.canonical.insert(definition.name.clone());
        }

        for definition in catalog.list_all() {
            for candidate in candidates_for(&definition.name) {
                if table.canonical.contains(&candidate) {
                    continue;
                }
                table.entries.entry(candidate).or_insert_with(|| definition.name.clone());
            }
        }

        table
    }

    /// Canonical names resolve to themselves, aliases to their canonical
    /// name, and everything else passes through unchanged so it fails the
    /// registry lookup loudly instead of vanishing.
    pub fn resolve<'a>(&'a self, name: &'a str) -> &'a str {
        if self.canonical.contains(name) {
            return name;
        }
        match self.entries.get(name) {
            Some(canonical) => canonical.as_str(),
            None => name,
        }
    }

    pub fn entries(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(alias, canonical)| (alias.as_str(), canonical.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn candidates_for(name: &str) -> Vec<String> {
    let Some((domain, action)) = name.split_once('.') else {
        return Vec::new();
    };

    let verbs: Vec<&str> =
        std::iter::once(action).chain(verb_synonyms(action).iter().copied()).collect();
    let nouns: Vec<&str> =
        std::iter::once(domain).chain(noun_synonyms(domain).iter().copied()).collect();

    let mut candidates = Vec::new();
    for verb in &verbs {
        for noun in &nouns {
            push_pair(&mut candidates, verb, noun);
            if is_read_action(action) {
                push_pair(&mut candidates, verb, &pluralize(noun));
            }
        }
        for suffix in entity_suffixes(domain) {
            push_pair(&mut candidates, verb, suffix);
        }
    }
    candidates
}

/// Underscore and camelCase variants of a verb/noun pair, in both orders.
fn push_pair(candidates: &mut Vec<String>, verb: &str, noun: &str) {
    candidates.push(format!("{verb}_{noun}"));
    candidates.push(format!("{noun}_{verb}"));
    candidates.push(camel(verb, noun));
    candidates.push(camel(noun, verb));
}

fn camel(first: &str, second: &str) -> String {
    let mut chars = second.chars();
    match chars.next() {
        Some(initial) => {
            let mut combined = String::with_capacity(first.len() + second.len());
            combined.push_str(first);
            combined.extend(initial.to_uppercase());
            combined.push_str(chars.as_str());
            combined
        }
        None => first.to_string(),
    }
}

fn verb_synonyms(action: &str) -> &'static [&'static str] {
    match action {
        "create" => &["add", "new", "make"],
        "get" => &["fetch", "show"],
        "update" => &["edit", "modify"],
        "delete" => &["remove"],
        "complete" => &["finish"],
        "search" => &["find"],
        "schedule" => &["book"],
        "close" => &["finalize"],
        _ => &[],
    }
}

fn noun_synonyms(domain: &str) -> &'static [&'static str] {
    match domain {
        "contact" => &["person", "client"],
        "property" => &["listing", "home", "house"],
        "deal" => &["opportunity"],
        "task" => &["todo", "reminder"],
        _ => &[],
    }
}

/// Object nouns the model uses for a domain whose name is not itself the
/// object, e.g. you schedule an "event" rather than a "calendar".
fn entity_suffixes(domain: &str) -> &'static [&'static str] {
    match domain {
        "calendar" => &["event", "appointment", "showing"],
        _ => &[],
    }
}

fn is_read_action(action: &str) -> bool {
    matches!(action, "get" | "list" | "search")
}

fn pluralize(noun: &str) -> String {
    if noun == "person" {
        return "people".to_string();
    }
    if let Some(stem) = noun.strip_suffix('y') {
        let consonant_before =
            !stem.chars().last().map(|ch| "aeiou".contains(ch)).unwrap_or(true);
        if consonant_before {
            return format!("{stem}ies");
        }
    }
    if noun.ends_with('s') || noun.ends_with('x') || noun.ends_with("ch") || noun.ends_with("sh") {
        return format!("{noun}es");
    }
    format!("{noun}s")
}

#[cfg(test)]
mod tests {
    use crate::catalog::tests::definition_fixture;
    use crate::catalog::{AliasTable, ApprovalLevel, CatalogBuilder, ToolCatalog};

    fn catalog_fixture() -> (ToolCatalog, AliasTable) {
        let mut builder = CatalogBuilder::new();
        for (name, approval) in [
            ("contact.create", ApprovalLevel::None),
            ("contact.get", ApprovalLevel::None),
            ("contact.list", ApprovalLevel::None),
            ("property.search", ApprovalLevel::None),
            ("calendar.schedule", ApprovalLevel::Standard),
            ("task.delete", ApprovalLevel::Destructive),
        ] {
            builder.register(definition_fixture(name, approval)).expect("fixture registration");
        }
        builder.build()
    }

    #[test]
    fn every_tool_gains_at_least_one_resolving_alias() {
        let (catalog, aliases) = catalog_fixture();

        for definition in catalog.list_all() {
            let resolving = aliases
                .entries()
                .filter(|(alias, canonical)| {
                    *canonical == definition.name && *alias != definition.name
                })
                .count();
            assert!(resolving > 0, "{} has no alias of its own", definition.name);
        }
    }

    #[test]
    fn verbatim_names_resolve_to_themselves() {
        let (_catalog, aliases) = catalog_fixture();
        assert_eq!(aliases.resolve("contact.create"), "contact.create");
        assert_eq!(aliases.resolve("task.delete"), "task.delete");
    }

    #[test]
    fn unknown_names_pass_through_unchanged() {
        let (_catalog, aliases) = catalog_fixture();
        assert_eq!(aliases.resolve("crm.zap"), "crm.zap");
        assert_eq!(aliases.resolve(""), "");
    }

    #[test]
    fn case_style_and_token_order_variants_resolve() {
        let (_catalog, aliases) = catalog_fixture();
        assert_eq!(aliases.resolve("create_contact"), "contact.create");
        assert_eq!(aliases.resolve("contact_create"), "contact.create");
        assert_eq!(aliases.resolve("createContact"), "contact.create");
        assert_eq!(aliases.resolve("contactCreate"), "contact.create");
    }

    #[test]
    fn verb_and_noun_synonyms_resolve() {
        let (_catalog, aliases) = catalog_fixture();
        assert_eq!(aliases.resolve("add_contact"), "contact.create");
        assert_eq!(aliases.resolve("new_person"), "contact.create");
        assert_eq!(aliases.resolve("create_client"), "contact.create");
        assert_eq!(aliases.resolve("remove_task"), "task.delete");
        assert_eq!(aliases.resolve("delete_todo"), "task.delete");
    }

    #[test]
    fn read_actions_gain_plural_forms() {
        let (_catalog, aliases) = catalog_fixture();
        assert_eq!(aliases.resolve("list_contacts"), "contact.list");
        assert_eq!(aliases.resolve("search_properties"), "property.search");
        assert_eq!(aliases.resolve("find_listings"), "property.search");
        assert_eq!(aliases.resolve("get_people"), "contact.get");
    }

    #[test]
    fn scheduling_gains_event_style_suffixes() {
        let (_catalog, aliases) = catalog_fixture();
        assert_eq!(aliases.resolve("schedule_event"), "calendar.schedule");
        assert_eq!(aliases.resolve("book_showing"), "calendar.schedule");
        assert_eq!(aliases.resolve("scheduleAppointment"), "calendar.schedule");
    }

    #[test]
    fn first_registrant_wins_on_alias_collision() {
        let mut builder = CatalogBuilder::new();
        builder.register(definition_fixture("note.create", ApprovalLevel::None)).expect("register");
        builder.register(definition_fixture("note.add", ApprovalLevel::None)).expect("register");
        let (_catalog, aliases) = builder.build();

        // Both tools generate the `add`/`note` variants; the earlier
        // registrant keeps every one of them.
        assert_eq!(aliases.resolve("add_note"), "note.create");
        assert_eq!(aliases.resolve("note_add"), "note.create");
        // The loser is still reachable verbatim.
        assert_eq!(aliases.resolve("note.add"), "note.add");
    }

    #[test]
    fn rebuilding_from_the_same_catalog_is_a_no_op() {
        let (catalog, aliases) = catalog_fixture();
        let rebuilt = AliasTable::build(&catalog);
        assert_eq!(aliases, rebuilt);
    }
}
