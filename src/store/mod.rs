mod aws;
mod error;
mod memory;

pub use aws::{AwsCliStore, AwsTables};
pub use error::GatewayError;
pub use memory::InMemoryStore;

use std::collections::BTreeSet;

use async_trait::async_trait;
use futures::{stream, StreamExt};
use tracing::{debug, warn};

use crate::model::*;

/// Records returned for one ledger key. `malformed` counts rows that were
/// dropped at the boundary because they could not be typed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LedgerPartition {
    pub records: Vec<RawRecord>,
    pub malformed: usize,
}

/// The store the audit reads from. Both tables are read-only here.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Calendar id for a category. `None` when nothing matches.
    async fn resolve_resource_key(&self, category: &str) -> Result<Option<String>, GatewayError>;

    /// Human-readable label for a category (`tag1 > tag2 > tag3`).
    async fn describe_category(&self, category: &str) -> Result<Option<String>, GatewayError>;

    /// Ledger keys (survey ids) whose records mention the category.
    async fn discover_ledger_keys(&self, category: &str) -> Result<BTreeSet<String>, GatewayError>;

    /// All ledger records under one ledger key.
    async fn fetch_ledger_partition(&self, ledger_key: &str) -> Result<LedgerPartition, GatewayError>;

    /// Current summary counts for a calendar. Empty, not an error, when the
    /// calendar has no slots.
    async fn fetch_summary_counts(&self, resource_key: &str) -> Result<SummarySnapshot, GatewayError>;
}

/// Ledger records across a key set, plus what could not be read.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LedgerFetch {
    pub records: Vec<RawRecord>,
    /// Keys whose partition came back malformed; their records are missing.
    pub failed_keys: Vec<String>,
    /// Rows dropped at the boundary across all partitions.
    pub malformed_records: usize,
}

impl LedgerFetch {
    pub fn is_complete(&self) -> bool {
        self.failed_keys.is_empty() && self.malformed_records == 0
    }
}

/// Fetch every partition in `ledger_keys`, at most `concurrency` at a time.
///
/// A malformed partition is recorded in `failed_keys` and skipped. An
/// unavailable store aborts the whole fetch.
pub async fn fetch_group_records<S: RecordStore + ?Sized>(
    store: &S,
    ledger_keys: &BTreeSet<String>,
    concurrency: usize,
) -> Result<LedgerFetch, GatewayError> {
    let mut fetch = LedgerFetch::default();
    let mut results = stream::iter(ledger_keys.iter())
        .map(|key| async move {
            let start = std::time::Instant::now();
            let result = store.fetch_ledger_partition(key).await;
            metrics::histogram!(crate::observability::LEDGER_FETCH_DURATION_SECONDS)
                .record(start.elapsed().as_secs_f64());
            (key, result)
        })
        .buffered(concurrency.max(1));

    while let Some((key, result)) = results.next().await {
        match result {
            Ok(partition) => {
                debug!(
                    "ledger key {key}: {} records, {} malformed",
                    partition.records.len(),
                    partition.malformed
                );
                metrics::counter!(crate::observability::LEDGER_RECORDS_TOTAL)
                    .increment(partition.records.len() as u64);
                fetch.malformed_records += partition.malformed;
                fetch.records.extend(partition.records);
            }
            Err(e @ GatewayError::MalformedResponse(_)) => {
                warn!("ledger key {key} excluded: {e}");
                metrics::counter!(crate::observability::LEDGER_FETCH_FAILURES_TOTAL, "kind" => e.kind())
                    .increment(1);
                fetch.failed_keys.push(key.clone());
            }
            Err(e) => {
                metrics::counter!(crate::observability::LEDGER_FETCH_FAILURES_TOTAL, "kind" => e.kind())
                    .increment(1);
                return Err(e);
            }
        }
    }
    Ok(fetch)
}
