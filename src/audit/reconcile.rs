use std::collections::BTreeSet;

use crate::model::*;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reconciliation {
    /// Sorted by `(date, slot)`.
    pub mismatches: Vec<Mismatch>,
    pub actual_exceeds: usize,
    pub summary_exceeds: usize,
}

impl Reconciliation {
    pub fn is_clean(&self) -> bool {
        self.mismatches.is_empty()
    }

    pub fn with_direction(&self, direction: Direction) -> impl Iterator<Item = &Mismatch> {
        self.mismatches.iter().filter(move |m| m.direction == direction)
    }
}

/// Diff actual counts against the summary over the union of both key sets.
/// A coordinate missing on one side counts as zero there.
pub fn reconcile(actual: &SlotCounts, summary: &SlotCounts) -> Reconciliation {
    let mut out = Reconciliation::default();
    let dates: BTreeSet<&str> = actual.dates().chain(summary.dates()).collect();

    for date in dates {
        let slots: BTreeSet<&str> = actual.slots(date).chain(summary.slots(date)).collect();
        for slot in slots {
            let actual_count = actual.get(date, slot);
            let summary_count = summary.get(date, slot);
            let direction = match actual_count.cmp(&summary_count) {
                std::cmp::Ordering::Equal => continue,
                std::cmp::Ordering::Greater => {
                    out.actual_exceeds += 1;
                    Direction::ActualExceedsSummary
                }
                std::cmp::Ordering::Less => {
                    out.summary_exceeds += 1;
                    Direction::SummaryExceedsActual
                }
            };
            out.mismatches.push(Mismatch {
                date: date.to_string(),
                slot: slot.to_string(),
                summary_count,
                actual_count,
                direction,
            });
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counts(entries: &[(&str, &str, Count)]) -> SlotCounts {
        entries.iter().copied().collect()
    }

    #[test]
    fn equal_counts_no_mismatch() {
        let actual = counts(&[("2021-05-22", "1", 3)]);
        let summary = counts(&[("2021-05-22", "1", 3)]);
        let r = reconcile(&actual, &summary);
        assert!(r.is_clean());
        assert_eq!(r.actual_exceeds, 0);
        assert_eq!(r.summary_exceeds, 0);
    }

    #[test]
    fn summary_higher() {
        let actual = counts(&[("2021-05-22", "1", 2)]);
        let summary = counts(&[("2021-05-22", "1", 5)]);
        let r = reconcile(&actual, &summary);
        assert_eq!(
            r.mismatches,
            vec![Mismatch {
                date: "2021-05-22".into(),
                slot: "1".into(),
                summary_count: 5,
                actual_count: 2,
                direction: Direction::SummaryExceedsActual,
            }]
        );
        assert_eq!(r.summary_exceeds, 1);
        assert_eq!(r.actual_exceeds, 0);
    }

    #[test]
    fn actual_higher() {
        let actual = counts(&[("2021-05-22", "1", 4)]);
        let summary = counts(&[("2021-05-22", "1", 1)]);
        let r = reconcile(&actual, &summary);
        assert_eq!(r.mismatches[0].direction, Direction::ActualExceedsSummary);
        assert_eq!(r.actual_exceeds, 1);
    }

    #[test]
    fn summary_only_slot_surfaces() {
        let actual = SlotCounts::new();
        let summary = counts(&[("d", "2", 4)]);
        let r = reconcile(&actual, &summary);
        assert_eq!(r.mismatches.len(), 1);
        assert_eq!(r.mismatches[0].actual_count, 0);
        assert_eq!(r.mismatches[0].summary_count, 4);
        assert_eq!(r.mismatches[0].direction, Direction::SummaryExceedsActual);
    }

    #[test]
    fn negative_summary_is_below_empty_slot() {
        let actual = SlotCounts::new();
        let summary = counts(&[("d", "1", -1)]);
        let r = reconcile(&actual, &summary);
        assert_eq!(r.mismatches.len(), 1);
        assert_eq!(r.mismatches[0].summary_count, -1);
        assert_eq!(r.mismatches[0].direction, Direction::ActualExceedsSummary);
    }

    #[test]
    fn actual_only_slot_surfaces() {
        let actual = counts(&[("d", "1", 1)]);
        let summary = counts(&[("d", "2", 0)]);
        let r = reconcile(&actual, &summary);
        assert_eq!(r.mismatches.len(), 1);
        assert_eq!(r.mismatches[0].slot, "1");
        assert_eq!(r.mismatches[0].summary_count, 0);
    }

    #[test]
    fn explicit_zero_matches_missing() {
        let actual = SlotCounts::new();
        let summary = counts(&[("d", "1", 0), ("d", "2", 0)]);
        assert!(reconcile(&actual, &summary).is_clean());
    }

    #[test]
    fn sorted_by_date_then_slot() {
        let actual = counts(&[("2021-05-22", "2", 1), ("2021-05-21", "9", 1)]);
        let summary = SlotCounts::new();
        let r = reconcile(&actual, &summary);
        let order: Vec<_> = r
            .mismatches
            .iter()
            .map(|m| (m.date.as_str(), m.slot.as_str()))
            .collect();
        assert_eq!(order, vec![("2021-05-21", "9"), ("2021-05-22", "2")]);
    }

    #[test]
    fn direction_filter() {
        let actual = counts(&[("d", "1", 2), ("d", "2", 0), ("d", "3", 5)]);
        let summary = counts(&[("d", "1", 1), ("d", "2", 3), ("d", "3", 5)]);
        let r = reconcile(&actual, &summary);
        assert_eq!(r.with_direction(Direction::ActualExceedsSummary).count(), 1);
        assert_eq!(r.with_direction(Direction::SummaryExceedsActual).count(), 1);
        assert_eq!(r.actual_exceeds + r.summary_exceeds, r.mismatches.len());
    }
}
