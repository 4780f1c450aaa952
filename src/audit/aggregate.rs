use std::collections::BTreeMap;

use crate::model::*;

use super::classify::ClassifiedGroup;

/// Actual counts plus who occupies each slot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Aggregate {
    pub counts: SlotCounts,
    /// Occupants per slot, sorted by group key.
    pub trace: BTreeMap<SlotCoordinate, Vec<Occupant>>,
}

impl Aggregate {
    pub fn occupants(&self, date: &str, slot: &str) -> &[Occupant] {
        self.trace
            .get(&SlotCoordinate::new(date, slot))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

/// Fold classified groups into per-slot counts. One group is one
/// reservation, however many records it had.
pub fn aggregate<'a>(groups: impl IntoIterator<Item = &'a ClassifiedGroup>) -> Aggregate {
    let mut out = Aggregate::default();
    for group in groups {
        out.counts.increment(&group.coordinate);
        out.trace
            .entry(group.coordinate.clone())
            .or_default()
            .push(Occupant {
                group_key: group.group_key.clone(),
                owner_id: group.owner_id.clone(),
            });
    }
    for occupants in out.trace.values_mut() {
        occupants.sort();
    }
    out
}
