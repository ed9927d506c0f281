use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::SourceRef;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum EnrichmentError {
    #[error("enrichment lookup failed: {0}")]
    LookupFailed(String),
    #[error("enrichment lookup exceeded its {budget_secs}s budget")]
    TimedOut { budget_secs: u64 },
    #[error("enrichment is disabled")]
    Disabled,
}

/// Facts discovered for one subject, e.g. a property address.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrichmentRecord {
    pub subject: String,
    pub summary: String,
    pub facts: Vec<String>,
    pub sources: Vec<SourceRef>,
    pub fetched_at: DateTime<Utc>,
}

impl EnrichmentRecord {
    pub fn new(subject: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            summary: summary.into(),
            facts: Vec::new(),
            sources: Vec::new(),
            fetched_at: Utc::now(),
        }
    }

    pub fn with_fact(mut self, fact: impl Into<String>) -> Self {
        self.facts.push(fact.into());
        self
    }

    pub fn with_source(mut self, source: SourceRef) -> Self {
        self.sources.push(source);
        self
    }
}

#[async_trait]
pub trait EnrichmentSource: Send + Sync {
    async fn lookup(&self, subject: &str) -> Result<EnrichmentRecord, EnrichmentError>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NoopEnrichmentSource;

#[async_trait]
impl EnrichmentSource for NoopEnrichmentSource {
    async fn lookup(&self, _subject: &str) -> Result<EnrichmentRecord, EnrichmentError> {
        Err(EnrichmentError::Disabled)
    }
}

/// Canned lookup results keyed by normalized subject. Counts invocations so
/// tests can assert memoization behavior.
#[derive(Default)]
pub struct StaticEnrichmentSource {
    records: HashMap<String, EnrichmentRecord>,
    lookups: AtomicUsize,
}

impl StaticEnrichmentSource {
    pub fn with_record(mut self, subject: &str, record: EnrichmentRecord) -> Self {
        self.records.insert(normalize_subject(subject), record);
        self
    }

    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EnrichmentSource for StaticEnrichmentSource {
    async fn lookup(&self, subject: &str) -> Result<EnrichmentRecord, EnrichmentError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        self.records
            .get(&normalize_subject(subject))
            .cloned()
            .ok_or_else(|| EnrichmentError::LookupFailed(format!("no information found for `{subject}`")))
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct CacheKey {
    user_id: String,
    subject: String,
}

/// Memoized enrichment results. The key always carries the user id: the same
/// subject under two users occupies two slots and computes twice, so one
/// user's lookup is never served to another.
#[derive(Clone, Default)]
pub struct EnrichmentCache {
    entries: Arc<Mutex<HashMap<CacheKey, EnrichmentRecord>>>,
}

impl EnrichmentCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached record for `(user_id, subject)` or runs `compute`
    /// and stores its result. Failures propagate and are never cached.
    pub async fn get_or_compute<F, Fut>(
        &self,
        user_id: &str,
        subject: &str,
        compute: F,
    ) -> Result<EnrichmentRecord, EnrichmentError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<EnrichmentRecord, EnrichmentError>>,
    {
        let key =
            CacheKey { user_id: user_id.to_string(), subject: normalize_subject(subject) };

        if let Some(hit) = self.lookup(&key) {
            return Ok(hit);
        }

        let record = compute().await?;
        self.store(key, record.clone());
        Ok(record)
    }

    pub fn len(&self) -> usize {
        match self.entries.lock() {
            Ok(entries) => entries.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lookup(&self, key: &CacheKey) -> Option<EnrichmentRecord> {
        match self.entries.lock() {
            Ok(entries) => entries.get(key).cloned(),
            Err(poisoned) => poisoned.into_inner().get(key).cloned(),
        }
    }

    fn store(&self, key: CacheKey, record: EnrichmentRecord) {
        match self.entries.lock() {
            Ok(mut entries) => {
                entries.insert(key, record);
            }
            Err(poisoned) => {
                poisoned.into_inner().insert(key, record);
            }
        }
    }
}

/// Lowercases and strips punctuation so surface variants of the same subject
/// share one cache slot.
pub fn normalize_subject(subject: &str) -> String {
    let mut normalized = String::with_capacity(subject.len());
    for ch in subject.chars() {
        if ch.is_alphanumeric() {
            normalized.extend(ch.to_lowercase());
        } else if !normalized.ends_with(' ') && !normalized.is_empty() {
            normalized.push(' ');
        }
    }
    normalized.trim_end().to_string()
}
