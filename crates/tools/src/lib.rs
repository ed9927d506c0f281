//! CRM capability pack - the tools the assistant can call
//!
//! Each domain module owns its record type, an in-memory store, the handlers
//! that mutate it, and a `definitions` list describing those handlers to the
//! catalog. `catalog::standard_catalog` stitches the five domains into the
//! registry the agent runtime executes against.
//!
//! Handlers never talk to the model and never format final answers; they
//! return a one-line summary, a JSON payload, and the entities they touched.
//! Everything conversational happens a layer up.

pub mod args;
pub mod calendar;
pub mod catalog;
pub mod contacts;
pub mod deals;
pub mod properties;
pub mod tasks;

pub use calendar::{CalendarEvent, CalendarStore};
pub use catalog::{standard_catalog, CrmStores};
pub use contacts::{Contact, ContactStore};
pub use deals::{Deal, DealStage, DealStore};
pub use properties::{ListingStatus, Property, PropertyStore};
pub use tasks::{Task, TaskStore};
