//! Two-phase borrow tracking.
//!
//! Certain mutable borrows are reserved at one location and activated at a
//! later one: in `push(&mut v, len(v))` the `&mut v` is reserved before the
//! argument list is evaluated and activated when `push` begins executing.
//! Between reservation and activation only shared reads of the borrowed
//! place are admitted.
//!
//! Records live in a side table keyed by source location; a per-local index
//! maps each place to the records that touch it. Activation is a write to
//! the record, not an event.

use std::collections::{HashMap, HashSet};

use indexmap::IndexMap;

use crate::borrowck::BorrowKind;
use crate::hash::Hash64;

/// A source location, 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Location {
    pub line: u32,
    pub column: u32,
}

impl Location {
    pub fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }

    /// Stable map key for this location.
    pub fn key(self) -> Hash64 {
        let mut key = Hash64::new((self.line as u64) << 32);
        key ^= self.column as u64;
        key
    }
}

/// Activation state of a borrow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TwoPhaseActivation {
    /// Reservation and activation coincide; an ordinary borrow.
    NotTwoPhase,
    /// Reserved but not yet live; only shared reads of the place are
    /// admitted.
    NotActivated,
    /// Live-mutable from this point on; any overlapping borrow conflicts.
    ActivatedAt(Location),
}

#[derive(Debug, Clone)]
pub struct BorrowData {
    /// Where the borrow is reserved. For ordinary borrows this is also where
    /// it becomes live.
    pub reserve_location: Location,
    pub activation_location: TwoPhaseActivation,
    pub kind: BorrowKind,
    /// The place being borrowed.
    pub borrowed_place: String,
    /// The binding or temporary holding the reference.
    pub assigned_place: String,
}

impl BorrowData {
    pub fn is_activated(&self) -> bool {
        matches!(
            self.activation_location,
            TwoPhaseActivation::NotTwoPhase | TwoPhaseActivation::ActivatedAt(_)
        )
    }
}

/// Index of a borrow record within its [`BorrowSet`].
pub type BorrowIndex = usize;

/// Side table of borrow records for one checker run.
///
/// `location_map` keeps every record for the whole run (the audit view);
/// `local_map` holds only the records currently live for each place and is
/// what conflict checks consult. Released borrows leave `local_map` but stay
/// in `location_map`.
#[derive(Debug, Default)]
pub struct BorrowSet {
    location_map: IndexMap<Hash64, BorrowData>,
    /// Activation location key -> records activated there.
    activation_map: HashMap<Hash64, Vec<BorrowIndex>>,
    /// Borrowed place -> live record indices.
    local_map: HashMap<String, HashSet<BorrowIndex>>,
}

impl BorrowSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.location_map.clear();
        self.activation_map.clear();
        self.local_map.clear();
    }

    /// Record a borrow and mark it live for its place.
    pub fn reserve(&mut self, borrow: BorrowData) -> BorrowIndex {
        let key = borrow.reserve_location.key();
        let place = borrow.borrowed_place.clone();
        let (index, _) = self.location_map.insert_full(key, borrow);
        self.local_map.entry(place).or_default().insert(index);
        index
    }

    /// Flip a reserved borrow to live-mutable at `location`.
    pub fn activate(&mut self, index: BorrowIndex, location: Location) {
        if let Some((_, data)) = self.location_map.get_index_mut(index) {
            debug_assert_eq!(data.activation_location, TwoPhaseActivation::NotActivated);
            data.activation_location = TwoPhaseActivation::ActivatedAt(location);
        }
        self.activation_map
            .entry(location.key())
            .or_default()
            .push(index);
    }

    /// Drop a borrow from the live index. The record itself stays on file.
    pub fn release(&mut self, index: BorrowIndex) {
        if let Some((_, data)) = self.location_map.get_index(index) {
            if let Some(live) = self.local_map.get_mut(&data.borrowed_place) {
                live.remove(&index);
            }
        }
    }

    /// Release every live borrow held by one of `assignees`. Used on scope
    /// exit, when the borrowing bindings die.
    pub fn release_assigned_to(&mut self, assignees: &[String]) {
        let dead: Vec<BorrowIndex> = self
            .location_map
            .values()
            .enumerate()
            .filter(|(_, data)| assignees.contains(&data.assigned_place))
            .map(|(index, _)| index)
            .collect();
        for index in dead {
            self.release(index);
        }
    }

    pub fn get(&self, index: BorrowIndex) -> Option<&BorrowData> {
        self.location_map.get_index(index).map(|(_, data)| data)
    }

    /// Live borrow records touching `place`.
    pub fn live_borrows_of<'a>(
        &'a self,
        place: &str,
    ) -> impl Iterator<Item = (BorrowIndex, &'a BorrowData)> {
        self.local_map
            .get(place)
            .into_iter()
            .flat_map(|set| set.iter())
            .filter_map(|&index| self.get(index).map(|data| (index, data)))
    }

    /// Records activated at `location`.
    pub fn activations_at(&self, location: Location) -> &[BorrowIndex] {
        self.activation_map
            .get(&location.key())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.location_map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.location_map.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mutable_at(line: u32, col: u32, place: &str) -> BorrowData {
        BorrowData {
            reserve_location: Location::new(line, col),
            activation_location: TwoPhaseActivation::NotActivated,
            kind: BorrowKind::Mutable,
            borrowed_place: place.to_string(),
            assigned_place: "<call>".to_string(),
        }
    }

    #[test]
    fn location_keys_are_distinct() {
        let a = Location::new(1, 2).key();
        let b = Location::new(2, 1).key();
        let c = Location::new(1, 3).key();
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_eq!(a, Location::new(1, 2).key());
    }

    #[test]
    fn reserve_then_activate() {
        let mut set = BorrowSet::new();
        let idx = set.reserve(mutable_at(3, 7, "v"));

        let data = set.get(idx).unwrap();
        assert!(!data.is_activated());

        let call_site = Location::new(3, 1);
        set.activate(idx, call_site);
        let data = set.get(idx).unwrap();
        assert_eq!(
            data.activation_location,
            TwoPhaseActivation::ActivatedAt(call_site)
        );
        assert!(data.is_activated());
        assert_eq!(set.activations_at(call_site), &[idx]);
    }

    #[test]
    fn release_removes_from_live_index_only() {
        let mut set = BorrowSet::new();
        let idx = set.reserve(mutable_at(1, 1, "v"));
        assert_eq!(set.live_borrows_of("v").count(), 1);

        set.release(idx);
        assert_eq!(set.live_borrows_of("v").count(), 0);
        // Still on file for the audit view.
        assert!(set.get(idx).is_some());
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn release_assigned_to_frees_scope_borrows() {
        let mut set = BorrowSet::new();
        let mut by_y = mutable_at(1, 1, "x");
        by_y.assigned_place = "y".to_string();
        set.reserve(by_y);
        let mut by_z = mutable_at(2, 1, "x");
        by_z.assigned_place = "z".to_string();
        set.reserve(by_z);

        set.release_assigned_to(&["y".to_string()]);
        let live: Vec<String> = set
            .live_borrows_of("x")
            .map(|(_, d)| d.assigned_place.clone())
            .collect();
        assert_eq!(live, vec!["z".to_string()]);
    }
}
