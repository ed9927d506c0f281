pub mod audit;
pub mod catalog;
pub mod config;
pub mod domain;
pub mod enrichment;
pub mod progress;
pub mod session;

pub use audit::{AuditEvent, AuditOutcome, AuditSink, InMemoryAuditSink};
pub use catalog::{
    AliasTable, ApprovalLevel, CallContext, CatalogBuilder, CatalogError, FieldKind, FieldSpec,
    InputSchema, SchemaIssue, ToolCatalog, ToolDefinition, ToolHandler, ToolManifestEntry,
    ToolOutput,
};
pub use config::{
    AccessConfig, AppConfig, ConfigError, ConfigOverrides, EnrichmentConfig, LoadOptions,
    LogFormat, LoggingConfig, ModelConfig, ServerConfig, SessionConfig,
};
pub use domain::{Affordance, EntityHandle, EntityKind, SourceRef};
pub use enrichment::{
    EnrichmentCache, EnrichmentError, EnrichmentRecord, EnrichmentSource, NoopEnrichmentSource,
    StaticEnrichmentSource, normalize_subject,
};
pub use progress::{
    InMemoryProgressNotifier, NoopProgressNotifier, ProgressNotifier, ProgressStage,
    ProgressUpdate,
};
pub use session::{
    HistoryEntry, PendingApproval, Role, RunStatus, Session, SessionStore, ToolRun,
    payload_fingerprint, DEFAULT_MAX_HISTORY,
};
