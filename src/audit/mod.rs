mod aggregate;
mod classify;
mod error;
mod reconcile;

pub use aggregate::{aggregate, Aggregate};
pub use classify::{
    classify, classify_all, classify_group, group_records, relevant_coordinate, ClassificationStats,
    ClassifiedGroup, GroupVerdict, CANCELLED_TAG, DEFAULT_CANCELLATION_TAGS, WITHDRAWN_TAG,
};
pub use error::AuditError;
pub use reconcile::{reconcile, Reconciliation};

use std::collections::BTreeSet;

use tracing::{info, warn};
use ulid::Ulid;

use crate::model::*;
use crate::store::{fetch_group_records, LedgerFetch, RecordStore};

/// What to audit and how.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditRequest {
    /// Category id; also the tag that marks a ledger slot as ours.
    pub category: String,
    /// Ledger keys to read. Empty means discover them from the ledger.
    pub ledger_keys: BTreeSet<String>,
    pub cancellation_tags: Vec<String>,
    pub fetch_concurrency: usize,
}

impl AuditRequest {
    pub fn new(category: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            ledger_keys: BTreeSet::new(),
            cancellation_tags: DEFAULT_CANCELLATION_TAGS.iter().map(|t| t.to_string()).collect(),
            fetch_concurrency: 1,
        }
    }

    pub fn with_ledger_keys<I, K>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        self.ledger_keys = keys.into_iter().map(Into::into).collect();
        self
    }
}

/// Whether actual counts saw the whole ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completeness {
    Complete,
    Incomplete {
        failed_keys: Vec<String>,
        malformed_records: usize,
    },
}

impl Completeness {
    fn of(fetch: &LedgerFetch) -> Self {
        if fetch.is_complete() {
            Completeness::Complete
        } else {
            Completeness::Incomplete {
                failed_keys: fetch.failed_keys.clone(),
                malformed_records: fetch.malformed_records,
            }
        }
    }

    pub fn is_complete(&self) -> bool {
        matches!(self, Completeness::Complete)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditReport {
    pub run_id: Ulid,
    pub category: String,
    pub label: Option<String>,
    pub resource_key: String,
    pub ledger_keys: BTreeSet<String>,
    pub record_count: usize,
    pub stats: ClassificationStats,
    pub actual: Aggregate,
    pub summary: SummarySnapshot,
    pub reconciliation: Reconciliation,
    pub completeness: Completeness,
    pub started_at: Ms,
    pub finished_at: Ms,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuditOutcome {
    /// No calendar for the category; nothing was compared.
    ResourceNotFound { run_id: Ulid, category: String },
    Reconciled(Box<AuditReport>),
}

impl AuditOutcome {
    pub fn run_id(&self) -> Ulid {
        match self {
            AuditOutcome::ResourceNotFound { run_id, .. } => *run_id,
            AuditOutcome::Reconciled(report) => report.run_id,
        }
    }
}

pub(crate) fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as Ms
}

/// One read-only pass: resolve calendar → fetch ledger → classify and
/// aggregate → fetch summary → reconcile.
pub async fn run_audit<S: RecordStore + ?Sized>(
    store: &S,
    request: &AuditRequest,
) -> Result<AuditOutcome, AuditError> {
    let run_id = Ulid::new();
    let started_at = now_ms();
    let clock = std::time::Instant::now();
    let category = request.category.as_str();
    info!("audit {run_id} started for {category}");

    let Some(resource_key) = store.resolve_resource_key(category).await? else {
        info!("no calendar for {category}; reconciliation skipped");
        return Ok(AuditOutcome::ResourceNotFound {
            run_id,
            category: category.to_string(),
        });
    };
    let label = store.describe_category(category).await?;

    let ledger_keys = if request.ledger_keys.is_empty() {
        let keys = store.discover_ledger_keys(category).await?;
        if keys.is_empty() {
            return Err(AuditError::NoLedgerKeys(category.to_string()));
        }
        keys
    } else {
        request.ledger_keys.clone()
    };
    info!("ledger keys: {ledger_keys:?}");

    let fetch = fetch_group_records(store, &ledger_keys, request.fetch_concurrency).await?;
    let completeness = Completeness::of(&fetch);
    if let Completeness::Incomplete {
        failed_keys,
        malformed_records,
    } = &completeness
    {
        warn!(
            "actual counts are incomplete: failed keys {failed_keys:?}, {malformed_records} malformed records"
        );
    }

    let record_count = fetch.records.len();
    let (classified, stats) = classify_all(fetch.records, category, &request.cancellation_tags);
    let actual = aggregate(&classified);
    info!(
        "{record_count} records in {} groups, {} active",
        stats.groups(),
        stats.active
    );

    let summary = store.fetch_summary_counts(&resource_key).await?;
    let reconciliation = reconcile(&actual.counts, &summary.reservation_counts);
    for m in &reconciliation.mismatches {
        metrics::counter!(crate::observability::MISMATCHES_TOTAL, "direction" => m.direction.label())
            .increment(1);
    }
    metrics::histogram!(crate::observability::AUDIT_DURATION_SECONDS)
        .record(clock.elapsed().as_secs_f64());
    info!(
        "audit {run_id} finished: {} mismatches",
        reconciliation.mismatches.len()
    );

    Ok(AuditOutcome::Reconciled(Box::new(AuditReport {
        run_id,
        category: category.to_string(),
        label,
        resource_key,
        ledger_keys,
        record_count,
        stats,
        actual,
        summary,
        reconciliation,
        completeness,
        started_at,
        finished_at: now_ms(),
    })))
}
