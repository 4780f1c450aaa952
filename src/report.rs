use tracing::info;

use crate::audit::{AuditOutcome, AuditReport, Completeness};
use crate::model::*;

/// Where a finished audit goes.
pub trait Reporter {
    fn report(&mut self, outcome: &AuditOutcome);
}

/// Writes each rendered line as an `info` event on `slotaudit::report`.
/// Pair with a file layer in the subscriber for a durable log.
#[derive(Debug, Default)]
pub struct TracingReporter;

impl Reporter for TracingReporter {
    fn report(&mut self, outcome: &AuditOutcome) {
        for line in render_lines(outcome) {
            info!(target: "slotaudit::report", "{line}");
        }
    }
}

fn mismatch_line(report: &AuditReport, m: &Mismatch) -> String {
    let mut line = format!(
        "{}:{} summary:actual = {}:{}",
        m.date, m.slot, m.summary_count, m.actual_count
    );
    if let Some(quota) = report.summary.quota(&m.date, &m.slot) {
        line.push_str(&format!(" (quota {quota})"));
    }
    let occupants = report.actual.occupants(&m.date, &m.slot);
    if !occupants.is_empty() {
        let who: Vec<String> = occupants
            .iter()
            .map(|o| match &o.owner_id {
                Some(owner) => format!("{} ({owner})", o.group_key),
                None => o.group_key.clone(),
            })
            .collect();
        line.push_str(&format!(" [{}]", who.join(", ")));
    }
    line
}

fn direction_section(report: &AuditReport, direction: Direction, lines: &mut Vec<String>) {
    let (heading, count) = match direction {
        Direction::SummaryExceedsActual => ("summary > actual", report.reconciliation.summary_exceeds),
        Direction::ActualExceedsSummary => ("summary < actual", report.reconciliation.actual_exceeds),
    };
    lines.push(format!("{heading}: {count}"));
    lines.extend(
        report
            .reconciliation
            .with_direction(direction)
            .map(|m| mismatch_line(report, m)),
    );
}

/// Render an outcome as plain log lines.
pub fn render_lines(outcome: &AuditOutcome) -> Vec<String> {
    let report = match outcome {
        AuditOutcome::ResourceNotFound { run_id, category } => {
            return vec![
                format!("run {run_id}: {category}"),
                format!("no calendar found for {category}; reconciliation skipped"),
            ];
        }
        AuditOutcome::Reconciled(report) => report,
    };

    let mut lines = vec![
        format!("run {}: {}", report.run_id, report.category),
        format!(
            "{}: {}",
            report.category,
            report.label.as_deref().unwrap_or("-")
        ),
        format!(
            "calendar {}, ledger keys {}",
            report.resource_key,
            report.ledger_keys.iter().cloned().collect::<Vec<_>>().join(", ")
        ),
        format!(
            "{} records in {} groups: {} active, {} ambiguous, {} cancelled, {} unconfirmed, {} unrelated",
            report.record_count,
            report.stats.groups(),
            report.stats.active,
            report.stats.ambiguous,
            report.stats.cancelled,
            report.stats.unconfirmed,
            report.stats.unrelated,
        ),
    ];
    if let Completeness::Incomplete {
        failed_keys,
        malformed_records,
    } = &report.completeness
    {
        lines.push(format!(
            "INCOMPLETE: actual counts exclude ledger keys [{}] and {malformed_records} malformed records",
            failed_keys.join(", ")
        ));
    }
    direction_section(report, Direction::SummaryExceedsActual, &mut lines);
    direction_section(report, Direction::ActualExceedsSummary, &mut lines);
    lines.push(format!(
        "finished in {} ms",
        report.finished_at - report.started_at
    ));
    lines
}
