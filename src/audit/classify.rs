use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use crate::model::*;

/// Status written when a reservation is cancelled by the user.
pub const CANCELLED_TAG: &str = "キャンセル";
/// Status written when a reservation is withdrawn by an operator.
pub const WITHDRAWN_TAG: &str = "取り消し";
pub const DEFAULT_CANCELLATION_TAGS: [&str; 2] = [CANCELLED_TAG, WITHDRAWN_TAG];

/// Why a group was or was not counted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupVerdict {
    /// Counted once at `coordinate`.
    Active {
        coordinate: SlotCoordinate,
        owner_id: Option<String>,
    },
    /// Records disagree on status (in-flight cancel/rebook). Never counted.
    Ambiguous { statuses: Vec<String> },
    Cancelled { status: String },
    /// No record carries a status, so nothing proves a completed write.
    Unconfirmed,
    /// No status-bearing record points at a slot of the target resource.
    Unrelated,
}

impl GroupVerdict {
    pub fn label(&self) -> &'static str {
        match self {
            GroupVerdict::Active { .. } => "active",
            GroupVerdict::Ambiguous { .. } => "ambiguous",
            GroupVerdict::Cancelled { .. } => "cancelled",
            GroupVerdict::Unconfirmed => "unconfirmed",
            GroupVerdict::Unrelated => "unrelated",
        }
    }
}

/// The slot a record points at, if it belongs to `target_tag`.
pub fn relevant_coordinate(record: &RawRecord, target_tag: &str) -> Option<SlotCoordinate> {
    let slot = record.encoded_slot.as_deref()?;
    if !slot.contains(SLOT_SEPARATOR) || !slot.contains(target_tag) {
        return None;
    }
    SlotCoordinate::parse(slot)
}

/// Decide whether a group of records sharing a group key is one live booking.
///
/// Status values must be unanimous among the records that carry one, and
/// that value must not be a cancellation tag. The coordinate comes from the
/// first record that both carries the status and is relevant; the owner from
/// the first record that has one.
pub fn classify_group<S: AsRef<str>>(
    group: &[RawRecord],
    target_tag: &str,
    cancellation_tags: &[S],
) -> GroupVerdict {
    let statuses: BTreeSet<&str> = group.iter().filter_map(|r| r.status.as_deref()).collect();
    if statuses.len() > 1 {
        return GroupVerdict::Ambiguous {
            statuses: statuses.into_iter().map(str::to_string).collect(),
        };
    }
    let Some(status) = statuses.into_iter().next() else {
        return GroupVerdict::Unconfirmed;
    };
    if cancellation_tags.iter().any(|t| t.as_ref() == status) {
        return GroupVerdict::Cancelled {
            status: status.to_string(),
        };
    }

    let coordinate = group
        .iter()
        .filter(|r| r.status.is_some())
        .find_map(|r| relevant_coordinate(r, target_tag));
    match coordinate {
        Some(coordinate) => GroupVerdict::Active {
            coordinate,
            owner_id: group.iter().find_map(|r| r.owner_id.clone()),
        },
        None => GroupVerdict::Unrelated,
    }
}

/// `classify_group` reduced to the counted case.
pub fn classify<S: AsRef<str>>(
    group: &[RawRecord],
    target_tag: &str,
    cancellation_tags: &[S],
) -> Option<(SlotCoordinate, Option<String>)> {
    match classify_group(group, target_tag, cancellation_tags) {
        GroupVerdict::Active {
            coordinate,
            owner_id,
        } => Some((coordinate, owner_id)),
        _ => None,
    }
}

/// Split records into groups by key. Records inside a group are put in a
/// canonical order so "first record" does not depend on fetch order.
pub fn group_records(records: impl IntoIterator<Item = RawRecord>) -> BTreeMap<String, Vec<RawRecord>> {
    let mut groups: BTreeMap<String, Vec<RawRecord>> = BTreeMap::new();
    for record in records {
        groups.entry(record.group_key.clone()).or_default().push(record);
    }
    for group in groups.values_mut() {
        group.sort();
    }
    groups
}

/// A group that counts as one reservation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifiedGroup {
    pub group_key: String,
    pub coordinate: SlotCoordinate,
    pub owner_id: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClassificationStats {
    pub active: usize,
    pub ambiguous: usize,
    pub cancelled: usize,
    pub unconfirmed: usize,
    pub unrelated: usize,
}

impl ClassificationStats {
    pub fn record(&mut self, verdict: &GroupVerdict) {
        match verdict {
            GroupVerdict::Active { .. } => self.active += 1,
            GroupVerdict::Ambiguous { .. } => self.ambiguous += 1,
            GroupVerdict::Cancelled { .. } => self.cancelled += 1,
            GroupVerdict::Unconfirmed => self.unconfirmed += 1,
            GroupVerdict::Unrelated => self.unrelated += 1,
        }
    }

    pub fn groups(&self) -> usize {
        self.active + self.excluded()
    }

    pub fn excluded(&self) -> usize {
        self.ambiguous + self.cancelled + self.unconfirmed + self.unrelated
    }
}

/// Group, classify and tally a batch of raw records.
pub fn classify_all<S: AsRef<str>>(
    records: impl IntoIterator<Item = RawRecord>,
    target_tag: &str,
    cancellation_tags: &[S],
) -> (Vec<ClassifiedGroup>, ClassificationStats) {
    let mut classified = Vec::new();
    let mut stats = ClassificationStats::default();

    for (group_key, group) in group_records(records) {
        let verdict = classify_group(&group, target_tag, cancellation_tags);
        stats.record(&verdict);
        metrics::counter!(crate::observability::GROUPS_TOTAL, "verdict" => verdict.label())
            .increment(1);
        match verdict {
            GroupVerdict::Active {
                coordinate,
                owner_id,
            } => classified.push(ClassifiedGroup {
                group_key,
                coordinate,
                owner_id,
            }),
            GroupVerdict::Ambiguous { statuses } => {
                debug!("group {group_key} excluded: ambiguous statuses {statuses:?}");
            }
            other => debug!("group {group_key} excluded: {}", other.label()),
        }
    }

    (classified, stats)
}
