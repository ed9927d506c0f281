use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use hearth_agent::gateway::TracingAuditSink;
use hearth_agent::http::HttpModelClient;
use hearth_agent::llm::ModelError;
use hearth_agent::orchestrator::{BuildError, Orchestrator};
use hearth_core::catalog::CatalogError;
use hearth_core::config::{AppConfig, ConfigError, LoadOptions};
use hearth_tools::catalog::standard_catalog;
use hearth_tools::CrmStores;

use crate::enrichment::WebEnrichmentSource;
use crate::notify::BroadcastNotifier;

pub struct Application {
    pub config: AppConfig,
    pub orchestrator: Arc<Orchestrator>,
    pub notifier: BroadcastNotifier,
    pub stores: CrmStores,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("tool catalog assembly failed: {0}")]
    Catalog(#[from] CatalogError),
    #[error("model client setup failed: {0}")]
    Model(#[source] ModelError),
    #[error("orchestrator assembly failed: {0}")]
    Orchestrator(#[from] BuildError),
    #[error("enrichment source setup failed: {0}")]
    Enrichment(String),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

/// Assembles the runtime from an already-loaded config. `main` uses this so
/// logging can be initialized from the config before bootstrap starts.
pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(event_name = "system.bootstrap.start", "starting application bootstrap");

    let stores = CrmStores::default();
    let catalog = standard_catalog(&stores)?;
    info!(
        event_name = "system.bootstrap.catalog_ready",
        tools = catalog.0.len(),
        "tool catalog assembled"
    );

    let model = HttpModelClient::from_config(&config.model).map_err(BootstrapError::Model)?;
    let notifier = BroadcastNotifier::new();

    let mut builder = Orchestrator::builder()
        .with_catalog(catalog)
        .with_model(Arc::new(model))
        .with_audit(Arc::new(TracingAuditSink))
        .with_progress(Arc::new(notifier.clone()))
        .configure(&config);

    if let Some(source) = WebEnrichmentSource::from_config(&config.enrichment)
        .map_err(|error| BootstrapError::Enrichment(error.to_string()))?
    {
        builder = builder.with_enrichment(Arc::new(source)).enrichment_enabled(config.enrichment.enabled);
        info!(
            event_name = "system.bootstrap.enrichment_ready",
            enabled = config.enrichment.enabled,
            "web enrichment source attached"
        );
    }

    let orchestrator = Arc::new(builder.build()?);
    info!(event_name = "system.bootstrap.ready", "application bootstrap complete");

    Ok(Application { config, orchestrator, notifier, stores })
}
