//! Double-touring detection.
//!
//! An initiator extending the same dependency with two different block
//! messages is equivocating. Every node records the first message it sees
//! per `(initiator, dependency)` pair and refuses to sign a second,
//! conflicting one.

use std::collections::HashMap;

use parking_lot::Mutex;
use thiserror::Error;

use crate::crypto::Address;
use crate::types::Hash;

#[derive(Debug, Error)]
#[error(
    "double-touring attempt detected: node {from} sent two different messages \
     ({first} and {second}) with dependency {dependency}"
)]
pub struct DoubleTouring {
    pub from: Address,
    pub dependency: Hash,
    pub first: Hash,
    pub second: Hash,
}

/// Tracks tour messages per `(sender, dependency)` pair. A trait so chain
/// tests can substitute a stub.
pub trait MessageTracker: Send + Sync {
    /// Records `(from, dependency) -> message` if unseen; errors with full
    /// evidence when a conflicting message is already recorded. Repeats of
    /// the same message are accepted (retries are legitimate).
    fn check_and_record(
        &self,
        from: Address,
        dependency: Hash,
        message: Hash,
    ) -> Result<(), DoubleTouring>;

    /// Drops every entry keyed by `dependency`.
    fn clear(&self, dependency: &Hash);
}

/// In-memory tracker. Its lock is independent of the chain lock and is
/// never held across I/O.
#[derive(Default)]
pub struct TourTracker {
    seen: Mutex<HashMap<(Address, Hash), Hash>>,
}

impl TourTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.seen.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.lock().is_empty()
    }
}

impl MessageTracker for TourTracker {
    fn check_and_record(
        &self,
        from: Address,
        dependency: Hash,
        message: Hash,
    ) -> Result<(), DoubleTouring> {
        let mut seen = self.seen.lock();
        if let Some(existing) = seen.get(&(from, dependency)).copied() {
            if existing != message {
                return Err(DoubleTouring { from, dependency, first: existing, second: message });
            }
            return Ok(());
        }
        seen.insert((from, dependency), message);
        Ok(())
    }

    fn clear(&self, dependency: &Hash) {
        self.seen.lock().retain(|(_, dep), _| dep != dependency);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::hash_bytes;

    fn addr(tag: u8) -> Address {
        Address([tag; 32])
    }

    #[test]
    fn conflicting_message_is_double_touring() {
        let tracker = TourTracker::new();
        let dep = hash_bytes(b"dep");

        tracker.check_and_record(addr(1), dep, hash_bytes(b"m1")).unwrap();
        let err = tracker
            .check_and_record(addr(1), dep, hash_bytes(b"m2"))
            .unwrap_err();
        assert_eq!(err.first, hash_bytes(b"m1"));
        assert_eq!(err.second, hash_bytes(b"m2"));
    }

    #[test]
    fn repeating_the_same_message_is_fine() {
        let tracker = TourTracker::new();
        let dep = hash_bytes(b"dep");
        let msg = hash_bytes(b"m1");

        tracker.check_and_record(addr(1), dep, msg).unwrap();
        tracker.check_and_record(addr(1), dep, msg).unwrap();
    }

    #[test]
    fn distinct_senders_and_dependencies_are_independent() {
        let tracker = TourTracker::new();
        let dep = hash_bytes(b"dep");

        tracker.check_and_record(addr(1), dep, hash_bytes(b"m1")).unwrap();
        tracker.check_and_record(addr(2), dep, hash_bytes(b"m2")).unwrap();
        tracker
            .check_and_record(addr(1), hash_bytes(b"other dep"), hash_bytes(b"m2"))
            .unwrap();
    }

    #[test]
    fn clear_allows_a_fresh_message() {
        let tracker = TourTracker::new();
        let dep = hash_bytes(b"dep");

        tracker.check_and_record(addr(1), dep, hash_bytes(b"m1")).unwrap();
        tracker.clear(&dep);
        tracker.check_and_record(addr(1), dep, hash_bytes(b"m3")).unwrap();
        assert_eq!(tracker.len(), 1);
    }
}
