use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;

use crate::model::*;

use super::{GatewayError, LedgerPartition, RecordStore};

struct Category {
    resource_key: String,
    label: Option<String>,
}

/// Seeded store for tests and dry runs. Failures can be injected per ledger
/// key, per calendar, or for the whole store.
pub struct InMemoryStore {
    categories: DashMap<String, Category>,
    ledger: DashMap<String, Vec<RawRecord>>,
    malformed_rows: DashMap<String, usize>,
    ledger_failures: DashMap<String, GatewayError>,
    summaries: DashMap<String, SummarySnapshot>,
    summary_failures: DashMap<String, GatewayError>,
    unavailable: AtomicBool,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            categories: DashMap::new(),
            ledger: DashMap::new(),
            malformed_rows: DashMap::new(),
            ledger_failures: DashMap::new(),
            summaries: DashMap::new(),
            summary_failures: DashMap::new(),
            unavailable: AtomicBool::new(false),
        }
    }

    // ── Seeding ──────────────────────────────────────────────

    pub fn add_category(&self, category: &str, resource_key: &str, label: Option<&str>) {
        self.categories.insert(
            category.to_string(),
            Category {
                resource_key: resource_key.to_string(),
                label: label.map(str::to_string),
            },
        );
    }

    pub fn add_ledger_record(&self, ledger_key: &str, record: RawRecord) {
        self.ledger.entry(ledger_key.to_string()).or_default().push(record);
    }

    /// Pretend `count` rows under `ledger_key` failed boundary validation.
    pub fn add_malformed_rows(&self, ledger_key: &str, count: usize) {
        *self.malformed_rows.entry(ledger_key.to_string()).or_insert(0) += count;
    }

    pub fn set_summary(&self, resource_key: &str, snapshot: SummarySnapshot) {
        self.summaries.insert(resource_key.to_string(), snapshot);
    }

    // ── Failure injection ────────────────────────────────────

    pub fn fail_ledger_key(&self, ledger_key: &str, error: GatewayError) {
        self.ledger_failures.insert(ledger_key.to_string(), error);
    }

    pub fn fail_summary(&self, resource_key: &str, error: GatewayError) {
        self.summary_failures.insert(resource_key.to_string(), error);
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), GatewayError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(GatewayError::SourceUnavailable("in-memory store offline".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl RecordStore for InMemoryStore {
    async fn resolve_resource_key(&self, category: &str) -> Result<Option<String>, GatewayError> {
        self.check_available()?;
        Ok(self.categories.get(category).map(|c| c.resource_key.clone()))
    }

    async fn describe_category(&self, category: &str) -> Result<Option<String>, GatewayError> {
        self.check_available()?;
        Ok(self.categories.get(category).and_then(|c| c.label.clone()))
    }

    async fn discover_ledger_keys(&self, category: &str) -> Result<BTreeSet<String>, GatewayError> {
        self.check_available()?;
        Ok(self
            .ledger
            .iter()
            .filter(|entry| {
                entry
                    .value()
                    .iter()
                    .any(|r| r.encoded_slot.as_deref().is_some_and(|v| v.contains(category)))
            })
            .map(|entry| entry.key().clone())
            .collect())
    }

    async fn fetch_ledger_partition(&self, ledger_key: &str) -> Result<LedgerPartition, GatewayError> {
        self.check_available()?;
        if let Some(err) = self.ledger_failures.get(ledger_key) {
            return Err(err.value().clone());
        }
        Ok(LedgerPartition {
            records: self
                .ledger
                .get(ledger_key)
                .map(|e| e.value().clone())
                .unwrap_or_default(),
            malformed: self.malformed_rows.get(ledger_key).map_or(0, |e| *e.value()),
        })
    }

    async fn fetch_summary_counts(&self, resource_key: &str) -> Result<SummarySnapshot, GatewayError> {
        self.check_available()?;
        if let Some(err) = self.summary_failures.get(resource_key) {
            return Err(err.value().clone());
        }
        Ok(self
            .summaries
            .get(resource_key)
            .map(|e| e.value().clone())
            .unwrap_or_default())
    }
}
