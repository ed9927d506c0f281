use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use hearth_core::config::EnrichmentConfig;
use hearth_core::domain::SourceRef;
use hearth_core::enrichment::{EnrichmentError, EnrichmentRecord, EnrichmentSource};

/// Looks subjects up against an external fact service over HTTP. The service
/// answers `GET {endpoint}?subject=...` with a JSON body shaped like
/// `{"summary": "...", "facts": [...], "sources": [{"title": ..., "url": ...}]}`.
pub struct WebEnrichmentSource {
    http: reqwest::Client,
    endpoint: String,
}

impl WebEnrichmentSource {
    pub fn from_config(config: &EnrichmentConfig) -> Result<Option<Self>, EnrichmentError> {
        let Some(endpoint) = config.endpoint.as_deref() else {
            return Ok(None);
        };

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|error| {
                EnrichmentError::LookupFailed(format!("failed to build http client: {error}"))
            })?;

        Ok(Some(Self { http, endpoint: endpoint.trim_end_matches('/').to_string() }))
    }
}

#[async_trait]
impl EnrichmentSource for WebEnrichmentSource {
    async fn lookup(&self, subject: &str) -> Result<EnrichmentRecord, EnrichmentError> {
        let response = self
            .http
            .get(&self.endpoint)
            .query(&[("subject", subject)])
            .send()
            .await
            .map_err(|error| EnrichmentError::LookupFailed(error.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(EnrichmentError::LookupFailed(format!(
                "fact service answered {status} for `{subject}`"
            )));
        }

        let wire = response
            .json::<WireEnrichment>()
            .await
            .map_err(|error| EnrichmentError::LookupFailed(error.to_string()))?;
        Ok(record_from_wire(subject, wire))
    }
}

fn record_from_wire(subject: &str, wire: WireEnrichment) -> EnrichmentRecord {
    let mut record = EnrichmentRecord::new(subject, wire.summary);
    record.facts = wire.facts;
    record.sources = wire
        .sources
        .into_iter()
        .map(|source| SourceRef { title: source.title, url: source.url })
        .collect();
    record
}

#[derive(Deserialize)]
struct WireEnrichment {
    summary: String,
    #[serde(default)]
    facts: Vec<String>,
    #[serde(default)]
    sources: Vec<WireSource>,
}

#[derive(Deserialize)]
struct WireSource {
    title: String,
    url: String,
}
