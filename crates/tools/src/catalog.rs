//! Assembles the full CRM capability set into one catalog. This is the only
//! place the tool roster is spelled out; everything downstream works from the
//! built catalog and its alias table.

use hearth_core::catalog::{AliasTable, CatalogBuilder, CatalogError, ToolCatalog};

use crate::calendar::{self, CalendarStore};
use crate::contacts::{self, ContactStore};
use crate::deals::{self, DealStore};
use crate::properties::{self, PropertyStore};
use crate::tasks::{self, TaskStore};

/// The in-memory stores behind every tool. Clone freely; clones share state.
#[derive(Clone, Default)]
pub struct CrmStores {
    pub contacts: ContactStore,
    pub properties: PropertyStore,
    pub deals: DealStore,
    pub tasks: TaskStore,
    pub calendar: CalendarStore,
}

/// Registers every CRM tool against `stores` and builds the catalog plus its
/// alias table. Fails if two definitions claim the same name, which points at
/// a programming error in one of the `definitions` lists.
pub fn standard_catalog(stores: &CrmStores) -> Result<(ToolCatalog, AliasTable), CatalogError> {
    let mut builder = CatalogBuilder::new();
    let definitions = contacts::definitions(&stores.contacts)
        .into_iter()
        .chain(properties::definitions(&stores.properties))
        .chain(deals::definitions(&stores.deals))
        .chain(tasks::definitions(&stores.tasks))
        .chain(calendar::definitions(&stores.calendar));
    for definition in definitions {
        builder.register(definition)?;
    }
    Ok(builder.build())
}

#[cfg(test)]
mod tests {
    use hearth_core::catalog::ApprovalLevel;

    use super::{standard_catalog, CrmStores};

    #[test]
    fn the_full_roster_registers_cleanly() {
        let stores = CrmStores::default();
        let (catalog, aliases) = standard_catalog(&stores).expect("catalog should build");

        assert_eq!(catalog.len(), 18);
        for name in [
            "contact.create",
            "contact.get",
            "contact.update",
            "contact.list",
            "property.create",
            "property.get",
            "property.update",
            "property.search",
            "deal.create",
            "deal.update",
            "deal.close",
            "task.create",
            "task.complete",
            "task.delete",
            "task.list",
            "calendar.schedule",
            "calendar.cancel",
            "calendar.list",
        ] {
            assert!(catalog.contains(name), "missing tool {name}");
        }
        assert!(!aliases.is_empty());
    }

    #[test]
    fn approval_levels_match_the_blast_radius() {
        let stores = CrmStores::default();
        let (catalog, _aliases) = standard_catalog(&stores).expect("catalog should build");

        let approval = |name: &str| {
            catalog.lookup(name).unwrap_or_else(|| panic!("missing tool {name}")).approval
        };

        assert_eq!(approval("contact.create"), ApprovalLevel::None);
        assert_eq!(approval("property.search"), ApprovalLevel::None);
        assert_eq!(approval("deal.close"), ApprovalLevel::Standard);
        assert_eq!(approval("calendar.schedule"), ApprovalLevel::Standard);
        assert_eq!(approval("task.delete"), ApprovalLevel::Destructive);
        assert_eq!(approval("calendar.cancel"), ApprovalLevel::Destructive);
    }

    #[test]
    fn read_tools_never_demand_write_permission() {
        let stores = CrmStores::default();
        let (catalog, _aliases) = standard_catalog(&stores).expect("catalog should build");

        for name in ["contact.get", "contact.list", "property.get", "property.search", "task.list", "calendar.list"] {
            let definition = catalog.lookup(name).unwrap_or_else(|| panic!("missing tool {name}"));
            assert_eq!(definition.permissions, vec!["crm.read".to_string()], "{name}");
        }

        let delete = catalog.lookup("task.delete").expect("task.delete registered");
        assert!(delete.permissions.contains(&"crm.delete".to_string()));
    }

    #[test]
    fn common_model_spellings_resolve_to_canonical_names() {
        let stores = CrmStores::default();
        let (_catalog, aliases) = standard_catalog(&stores).expect("catalog should build");

        for (spoken, canonical) in [
            ("create_contact", "contact.create"),
            ("add_contact", "contact.create"),
            ("createContact", "contact.create"),
            ("find_properties", "property.search"),
            ("search_listings", "property.search"),
            ("book_appointment", "calendar.schedule"),
            ("remove_task", "task.delete"),
            ("list_tasks", "task.list"),
        ] {
            assert_eq!(aliases.resolve(spoken), canonical, "{spoken}");
        }

        assert_eq!(aliases.resolve("task.delete"), "task.delete");
        assert_eq!(aliases.resolve("contact.merge"), "contact.merge");
    }

    #[test]
    fn manifest_entries_cover_every_tool() {
        let stores = CrmStores::default();
        let (catalog, _aliases) = standard_catalog(&stores).expect("catalog should build");

        let manifest = catalog.manifest();
        assert_eq!(manifest.len(), catalog.len());
        assert!(manifest
            .iter()
            .all(|entry| !entry.name.is_empty() && !entry.description.is_empty()));
    }
}
