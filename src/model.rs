use std::collections::BTreeMap;

/// Unix milliseconds.
pub type Ms = i64;

/// Slot count. Signed: a drifted summary can hold negative values.
pub type Count = i64;

/// Separator between the segments of an encoded slot: `tag_variant|date|slot`.
pub const SLOT_SEPARATOR: char = '|';

/// One ledger row, validated at the store boundary.
///
/// Only `group_key` is guaranteed; the other attributes are optional on the
/// wire and stay optional here.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RawRecord {
    pub group_key: String,
    pub status: Option<String>,
    pub encoded_slot: Option<String>,
    pub owner_id: Option<String>,
}

impl RawRecord {
    pub fn new(group_key: impl Into<String>) -> Self {
        Self {
            group_key: group_key.into(),
            status: None,
            encoded_slot: None,
            owner_id: None,
        }
    }

    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }

    pub fn with_slot(mut self, encoded_slot: impl Into<String>) -> Self {
        self.encoded_slot = Some(encoded_slot.into());
        self
    }

    pub fn with_owner(mut self, owner_id: impl Into<String>) -> Self {
        self.owner_id = Some(owner_id.into());
        self
    }
}

/// A bookable unit: `(date, slot)`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SlotCoordinate {
    pub date: String,
    pub slot: String,
}

impl SlotCoordinate {
    pub fn new(date: impl Into<String>, slot: impl Into<String>) -> Self {
        Self {
            date: date.into(),
            slot: slot.into(),
        }
    }

    /// Split `tag_variant|date|slot`, dropping the tag segment.
    /// Returns `None` when there are fewer than three segments.
    pub fn parse(encoded: &str) -> Option<Self> {
        let mut parts = encoded.split(SLOT_SEPARATOR);
        let _tag = parts.next()?;
        let date = parts.next()?;
        let slot = parts.next()?;
        Some(Self::new(date, slot))
    }
}

impl std::fmt::Display for SlotCoordinate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.date, self.slot)
    }
}

/// `date → slot → count`. Ordered so iteration is deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SlotCounts(BTreeMap<String, BTreeMap<String, Count>>);

impl SlotCounts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count at `(date, slot)`; a missing entry is zero.
    pub fn get(&self, date: &str, slot: &str) -> Count {
        self.0
            .get(date)
            .and_then(|slots| slots.get(slot))
            .copied()
            .unwrap_or(0)
    }

    pub fn set(&mut self, date: impl Into<String>, slot: impl Into<String>, count: Count) {
        self.0
            .entry(date.into())
            .or_default()
            .insert(slot.into(), count);
    }

    /// Add one at `coord`, creating the entry at zero first if needed.
    pub fn increment(&mut self, coord: &SlotCoordinate) {
        *self
            .0
            .entry(coord.date.clone())
            .or_default()
            .entry(coord.slot.clone())
            .or_insert(0) += 1;
    }

    /// Register a date with no slots (a summary row with an empty map).
    pub fn touch_date(&mut self, date: impl Into<String>) {
        self.0.entry(date.into()).or_default();
    }

    pub fn dates(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn slots(&self, date: &str) -> impl Iterator<Item = &str> {
        self.0
            .get(date)
            .into_iter()
            .flat_map(|slots| slots.keys().map(String::as_str))
    }

    pub fn is_empty(&self) -> bool {
        self.0.values().all(BTreeMap::is_empty)
    }
}

impl<D: Into<String>, S: Into<String>> FromIterator<(D, S, Count)> for SlotCounts {
    fn from_iter<I: IntoIterator<Item = (D, S, Count)>>(iter: I) -> Self {
        let mut counts = SlotCounts::new();
        for (date, slot, count) in iter {
            counts.set(date, slot, count);
        }
        counts
    }
}

/// The summary table's view of one resource.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SummarySnapshot {
    pub reservation_counts: SlotCounts,
    /// Per-slot capacity. Not compared, only shown next to mismatches.
    pub quotas: SlotCounts,
}

impl SummarySnapshot {
    pub fn quota(&self, date: &str, slot: &str) -> Option<Count> {
        self.quotas.0.get(date)?.get(slot).copied()
    }
}

/// Which side of a mismatch holds the larger count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    ActualExceedsSummary,
    SummaryExceedsActual,
}

impl Direction {
    pub fn label(&self) -> &'static str {
        match self {
            Direction::ActualExceedsSummary => "actual_exceeds_summary",
            Direction::SummaryExceedsActual => "summary_exceeds_actual",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mismatch {
    pub date: String,
    pub slot: String,
    pub summary_count: Count,
    pub actual_count: Count,
    pub direction: Direction,
}

/// Who occupies a slot, for the audit trace.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Occupant {
    pub group_key: String,
    pub owner_id: Option<String>,
}
