//! # Summary
//!
//! This module implements the vector clock used to order critical section
//! requests. A `Clock` is owned by exactly one process and is mutated only
//! through `tick` (local event) and `merge` (externally triggered event).
//! Whenever a clock leaves the process it does so as a `Timestamp`, which is
//! a plain value: later local mutations are never observed by messages
//! already in flight.

use std::cmp;
use std::fmt;

use serde_derive::{Deserialize, Serialize};

/// Outcome of comparing two timestamps under the happens-before order.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Causality {
    /// Every component is `<=`, at least one strictly.
    Before,

    /// Every component is `>=`, at least one strictly.
    After,

    /// Some components are smaller and others larger.
    Concurrent,

    /// All components match.
    Equal,
}

impl Causality {
    /// Result of the comparison with its arguments swapped.
    pub fn reverse(self) -> Self {
        match self {
        | Causality::Before => Causality::After,
        | Causality::After => Causality::Before,
        | other => other,
        }
    }
}

/// Immutable snapshot of a vector clock, indexed by process ID.
#[derive(Serialize, Deserialize)]
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct Timestamp(Vec<u64>);

impl Timestamp {
    /// All-zero timestamp for a system of `count` processes.
    pub fn zero(count: usize) -> Self {
        Timestamp(vec![0; count])
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Component for process `id`; slots past the end read as zero.
    pub fn get(&self, id: usize) -> u64 {
        self.0.get(id).copied().unwrap_or(0)
    }

    /// Sum of all components. Strictly increases along happens-before,
    /// so it doubles as a Lamport clock.
    pub fn lamport(&self) -> u64 {
        self.0.iter().sum()
    }

    pub fn as_slice(&self) -> &[u64] {
        &self.0
    }

    /// Compares two timestamps under the happens-before partial order.
    pub fn compare(&self, other: &Timestamp) -> Causality {
        let len = cmp::max(self.len(), other.len());
        let mut smaller = false;
        let mut larger = false;
        for i in 0..len {
            match self.get(i).cmp(&other.get(i)) {
            | cmp::Ordering::Less => smaller = true,
            | cmp::Ordering::Greater => larger = true,
            | cmp::Ordering::Equal => (),
            }
        }
        match (smaller, larger) {
        | (false, false) => Causality::Equal,
        | (true, false) => Causality::Before,
        | (false, true) => Causality::After,
        | (true, true) => Causality::Concurrent,
        }
    }
}

impl From<Vec<u64>> for Timestamp {
    fn from(ticks: Vec<u64>) -> Self {
        Timestamp(ticks)
    }
}

impl PartialOrd for Timestamp {
    fn partial_cmp(&self, other: &Self) -> Option<cmp::Ordering> {
        match self.compare(other) {
        | Causality::Before => Some(cmp::Ordering::Less),
        | Causality::After => Some(cmp::Ordering::Greater),
        | Causality::Equal => Some(cmp::Ordering::Equal),
        | Causality::Concurrent => None,
        }
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(fmt, "[")?;
        for (i, tick) in self.0.iter().enumerate() {
            if i > 0 { write!(fmt, ", ")?; }
            write!(fmt, "{}", tick)?;
        }
        write!(fmt, "]")
    }
}

/// Vector clock exclusively owned by process `id`.
#[derive(Clone, Debug)]
pub struct Clock {
    id: usize,
    ticks: Timestamp,
}

impl Clock {
    /// Zeroed clock for process `id` in a system of `count` processes.
    pub fn new(id: usize, count: usize) -> Self {
        assert!(id < count, "[INTERNAL ERROR]: process {} outside of {} slots", id, count);
        Clock {
            id,
            ticks: Timestamp::zero(count),
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    /// Current value of the owner's own slot.
    pub fn own(&self) -> u64 {
        self.ticks.get(self.id)
    }

    /// Records a locally initiated event.
    pub fn tick(&mut self) {
        self.ticks.0[self.id] += 1;
    }

    /// Records the receipt of a message stamped with `other`.
    pub fn merge(&mut self, other: &Timestamp) {
        self.tick();
        for (mine, theirs) in self.ticks.0.iter_mut().zip(other.0.iter()) {
            *mine = cmp::max(*mine, *theirs);
        }
    }

    /// Copy of the current value, safe to put in an outgoing message.
    pub fn snapshot(&self) -> Timestamp {
        self.ticks.clone()
    }
}

impl fmt::Display for Clock {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(fmt, "P{}@{}", self.id, self.ticks)
    }
}

#[cfg(test)]
mod tests {

    use super::*;

    fn ts(ticks: &[u64]) -> Timestamp {
        Timestamp::from(ticks.to_vec())
    }

    #[test]
    fn tick_advances_only_own_slot() {
        let mut clock = Clock::new(1, 3);
        clock.tick();
        clock.tick();
        assert_eq!(clock.snapshot(), ts(&[0, 2, 0]));
        assert_eq!(clock.own(), 2);
    }

    #[test]
    fn merge_ticks_then_takes_maximum() {
        let mut clock = Clock::new(0, 3);
        clock.tick();
        clock.merge(&ts(&[5, 3, 1]));
        // Own slot is bumped to 2 first, then loses to the larger 5.
        assert_eq!(clock.snapshot(), ts(&[5, 3, 1]));

        let mut clock = Clock::new(2, 3);
        clock.merge(&ts(&[1, 0, 0]));
        assert_eq!(clock.snapshot(), ts(&[1, 0, 1]));
    }

    #[test]
    fn merge_never_decreases_any_component() {
        let mut clock = Clock::new(0, 3);
        clock.merge(&ts(&[0, 7, 4]));
        let before = clock.snapshot();
        clock.merge(&ts(&[0, 1, 1]));
        let after = clock.snapshot();
        for i in 0..3 {
            assert!(after.get(i) >= before.get(i));
        }
        assert_eq!(after.get(0), before.get(0) + 1);
    }

    #[test]
    fn snapshot_is_detached_from_later_events() {
        let mut clock = Clock::new(0, 2);
        let snapshot = clock.snapshot();
        clock.tick();
        assert_eq!(snapshot, ts(&[0, 0]));
        assert_eq!(clock.snapshot(), ts(&[1, 0]));
    }

    #[test]
    fn compare_classifies_pairs() {
        assert_eq!(ts(&[1, 2, 3]).compare(&ts(&[1, 2, 3])), Causality::Equal);
        assert_eq!(ts(&[1, 2, 3]).compare(&ts(&[2, 2, 3])), Causality::Before);
        assert_eq!(ts(&[2, 2, 3]).compare(&ts(&[1, 2, 3])), Causality::After);
        assert_eq!(ts(&[1, 0, 0]).compare(&ts(&[0, 0, 1])), Causality::Concurrent);
    }

    #[test]
    fn compare_is_antisymmetric() {
        let samples = [
            ts(&[0, 0, 0]),
            ts(&[1, 0, 0]),
            ts(&[0, 1, 0]),
            ts(&[1, 1, 0]),
            ts(&[2, 0, 1]),
            ts(&[1, 1, 1]),
        ];
        for a in &samples {
            assert_eq!(a.compare(a), Causality::Equal);
            for b in &samples {
                assert_eq!(a.compare(b), b.compare(a).reverse());
            }
        }
    }

    #[test]
    fn partial_order_matches_compare() {
        assert!(ts(&[1, 0]) < ts(&[1, 1]));
        assert!(ts(&[2, 1]) > ts(&[1, 1]));
        assert_eq!(ts(&[1, 0]).partial_cmp(&ts(&[0, 1])), None);
    }

    #[test]
    fn lamport_sum_follows_happens_before() {
        let a = ts(&[1, 0, 2]);
        let b = ts(&[1, 1, 2]);
        assert_eq!(a.compare(&b), Causality::Before);
        assert!(a.lamport() < b.lamport());
    }

    #[test]
    fn display_lists_components() {
        assert_eq!(ts(&[1, 0, 3]).to_string(), "[1, 0, 3]");
        assert_eq!(Clock::new(1, 2).to_string(), "P1@[0, 0]");
    }
}
