//! Recording of classified faults against the branch, crate or slot they
//! belong to.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::error::{Fault, Scope};
use crate::types::Cnaf;

/// Destination for faults found while running CAMAC operations.
///
/// `record` is called once per classified fault, from the thread running
/// the transaction, while the branch is locked.
pub trait ErrorLog: Send + Sync {
    fn record(&self, cnaf: Cnaf, fault: Fault);
}

/// Discards every fault.
#[derive(Debug, Default, Copy, Clone)]
pub struct NoErrorLog;

impl ErrorLog for NoErrorLog {
    fn record(&self, _cnaf: Cnaf, _fault: Fault) {}
}

/// Where a fault was charged: the branch, a crate on it, or a slot in a crate.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Location {
    Branch(u8),
    Crate(u8, u8),
    Slot(u8, u8, u8),
}

impl Location {
    pub fn of(cnaf: Cnaf, scope: Scope) -> Self {
        match scope {
            Scope::Branch => Location::Branch(cnaf.branch()),
            Scope::Crate => Location::Crate(cnaf.branch(), cnaf.crate_number()),
            Scope::Slot => Location::Slot(cnaf.branch(), cnaf.crate_number(), cnaf.slot()),
        }
    }
}

/// Fault counters since the last clear, and since start.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct Tally {
    pub current: u32,
    pub total: u32,
}

/// Saturating fault counters per location and fault kind.
#[derive(Debug, Default)]
pub struct ErrorTally {
    counts: Mutex<HashMap<(Location, Fault), Tally>>,
}

impl ErrorTally {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self, location: Location, fault: Fault) -> Tally {
        self.lock().get(&(location, fault)).copied().unwrap_or_default()
    }

    /// Sum of current counts for every fault charged to `location`.
    pub fn current_at(&self, location: Location) -> u32 {
        self.lock()
            .iter()
            .filter(|((loc, _), _)| *loc == location)
            .fold(0u32, |acc, (_, t)| acc.saturating_add(t.current))
    }

    /// Reset the current counts, keeping the totals.
    pub fn clear_current(&self) {
        for tally in self.lock().values_mut() {
            tally.current = 0;
        }
    }

    /// All non-zero counters, sorted by location.
    pub fn snapshot(&self) -> Vec<(Location, Fault, Tally)> {
        let mut all: Vec<_> = self
            .lock()
            .iter()
            .map(|(&(loc, fault), &tally)| (loc, fault, tally))
            .collect();
        all.sort_by_key(|(loc, fault, _)| (sort_key(*loc), *fault as u8));
        all
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<(Location, Fault), Tally>> {
        // A panic while holding the lock can't leave a count half-updated.
        self.counts.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn sort_key(loc: Location) -> (u8, u8, u8, u8) {
    match loc {
        Location::Branch(b) => (b, 0, 0, 0),
        Location::Crate(b, c) => (b, 1, c, 0),
        Location::Slot(b, c, n) => (b, 2, c, n),
    }
}

impl ErrorLog for ErrorTally {
    fn record(&self, cnaf: Cnaf, fault: Fault) {
        let location = Location::of(cnaf, fault.scope());
        let mut counts = self.lock();
        let tally = counts.entry((location, fault)).or_default();
        tally.current = tally.current.saturating_add(1);
        tally.total = tally.total.saturating_add(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{func, Channel};

    fn cnaf(c: u8, n: u8) -> Cnaf {
        Channel::new(1, c, n, 0).unwrap().with_function(func(0))
    }

    #[test]
    fn test_scoped_counts() {
        let log = ErrorTally::new();
        log.record(cnaf(2, 5), Fault::NoXResponse);
        log.record(cnaf(2, 5), Fault::NoXResponse);
        log.record(cnaf(3, 5), Fault::HardwareTimeout);
        log.record(cnaf(2, 7), Fault::CrateNotResponding);

        assert_eq!(
            log.count(Location::Slot(1, 2, 5), Fault::NoXResponse),
            Tally { current: 2, total: 2 }
        );
        // Branch faults are charged to the branch whatever the crate.
        assert_eq!(log.current_at(Location::Branch(1)), 1);
        assert_eq!(log.current_at(Location::Crate(1, 2)), 1);

        log.clear_current();
        log.record(cnaf(2, 5), Fault::NoXResponse);
        assert_eq!(
            log.count(Location::Slot(1, 2, 5), Fault::NoXResponse),
            Tally { current: 1, total: 3 }
        );

        let snap = log.snapshot();
        assert_eq!(snap.len(), 3);
        assert_eq!(snap[0].0, Location::Branch(1));
        assert_eq!(snap[2].0, Location::Slot(1, 2, 5));
    }

    #[test]
    fn test_saturation() {
        let log = ErrorTally::new();
        log.lock().insert(
            (Location::Branch(0), Fault::NotReady),
            Tally {
                current: u32::MAX,
                total: u32::MAX,
            },
        );
        log.record(Cnaf::from_bits(0), Fault::NotReady);
        assert_eq!(
            log.count(Location::Branch(0), Fault::NotReady).total,
            u32::MAX
        );
    }
}
