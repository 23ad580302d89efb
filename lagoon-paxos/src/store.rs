//! Paxos instance store trait and in-memory implementation.
//!
//! The [`ConsensusInstanceStore`] holds one [`PaxosInstanceRecord`] per
//! instance: the ballot promised, the value accepted and the acceptors
//! taking part. Records are created lazily on first touch. Once the learner
//! has delivered an instance, the store may discard records below it;
//! [`InMemoryConsensusStore`] keeps a fixed window of delivered records.
//!
//! The store is shared by the acceptor, proposer and learner, and by every
//! snapshot taken from a context.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use lagoon_core::{MemberUri, Payload};
use serde::{Deserialize, Serialize};

use crate::settings::DEFAULT_RETAINED_DELIVERED_INSTANCES;
use crate::types::{Ballot, InstanceId};

/// State of a single Paxos instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaxosInstanceRecord {
    /// The instance this record belongs to.
    pub id: InstanceId,
    /// Highest ballot promised, if any.
    pub ballot: Option<Ballot>,
    /// Accepted value, if any.
    pub value: Option<Payload>,
    /// Acceptors participating in this instance.
    pub acceptors: Vec<MemberUri>,
}

impl PaxosInstanceRecord {
    /// A fresh record: nothing promised, nothing accepted.
    pub fn new(id: InstanceId) -> Self {
        Self {
            id,
            ballot: None,
            value: None,
            acceptors: Vec::new(),
        }
    }
}

/// Storage of Paxos instance records.
pub trait ConsensusInstanceStore: std::fmt::Debug {
    /// Fetch the record for `id`, creating an empty one if absent.
    fn get_instance(&mut self, id: InstanceId) -> &mut PaxosInstanceRecord;

    /// Read the record for `id` without creating it.
    fn instance(&self, id: InstanceId) -> Option<&PaxosInstanceRecord>;

    /// Record `ballot` as promised for `id`.
    fn promise(&mut self, id: InstanceId, ballot: Ballot);

    /// Record `value` as accepted for `id`.
    fn accept(&mut self, id: InstanceId, value: Payload);

    /// Signal that every instance up to `id` has been delivered.
    fn last_delivered(&mut self, id: InstanceId);

    /// Drop every record.
    fn clear(&mut self);

    /// Number of records held.
    fn len(&self) -> usize;

    /// True when no record is held.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Handle to the store shared between roles and snapshots.
pub type SharedStore = Rc<RefCell<dyn ConsensusInstanceStore>>;

/// In-memory implementation of [`ConsensusInstanceStore`].
///
/// Records live in a `BTreeMap` so pruning below a delivered instance is a
/// range split. The `retention` most recently delivered records are kept.
#[derive(Debug)]
pub struct InMemoryConsensusStore {
    records: BTreeMap<InstanceId, PaxosInstanceRecord>,
    retention: u64,
}

impl Default for InMemoryConsensusStore {
    fn default() -> Self {
        Self::with_retention(DEFAULT_RETAINED_DELIVERED_INSTANCES)
    }
}

impl InMemoryConsensusStore {
    /// Create an empty store with the default retention.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty store keeping `retention` delivered records.
    pub fn with_retention(retention: u64) -> Self {
        Self {
            records: BTreeMap::new(),
            retention,
        }
    }

    /// Wrap the store for sharing.
    pub fn shared(self) -> SharedStore {
        Rc::new(RefCell::new(self))
    }
}

impl ConsensusInstanceStore for InMemoryConsensusStore {
    fn get_instance(&mut self, id: InstanceId) -> &mut PaxosInstanceRecord {
        self.records
            .entry(id)
            .or_insert_with(|| PaxosInstanceRecord::new(id))
    }

    fn instance(&self, id: InstanceId) -> Option<&PaxosInstanceRecord> {
        self.records.get(&id)
    }

    fn promise(&mut self, id: InstanceId, ballot: Ballot) {
        self.get_instance(id).ballot = Some(ballot);
    }

    fn accept(&mut self, id: InstanceId, value: Payload) {
        self.get_instance(id).value = Some(value);
    }

    fn last_delivered(&mut self, id: InstanceId) {
        // Keep (id - retention, ..]
        let Some(first_kept) = (id.0 + 1).checked_sub(self.retention) else {
            return;
        };
        self.records = self.records.split_off(&InstanceId(first_kept));
    }

    fn clear(&mut self) {
        self.records.clear();
    }

    fn len(&self) -> usize {
        self.records.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_instance_creates_lazily() {
        let mut store = InMemoryConsensusStore::new();
        assert!(store.instance(InstanceId(3)).is_none());

        let record = store.get_instance(InstanceId(3));
        assert_eq!(record.id, InstanceId(3));
        assert!(record.ballot.is_none());
        assert!(record.value.is_none());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_promise_and_accept() {
        let mut store = InMemoryConsensusStore::new();
        store.promise(InstanceId(0), Ballot(1));
        store.accept(InstanceId(0), Payload::new(b"hello".to_vec()));

        let record = store.instance(InstanceId(0)).expect("should exist");
        assert_eq!(record.ballot, Some(Ballot(1)));
        assert_eq!(record.value, Some(Payload::new(b"hello".to_vec())));
    }

    #[test]
    fn test_last_delivered_prunes_outside_window() {
        let mut store = InMemoryConsensusStore::with_retention(2);
        for i in 0..8 {
            store.get_instance(InstanceId(i));
        }

        store.last_delivered(InstanceId(5));

        assert!(store.instance(InstanceId(3)).is_none());
        assert!(store.instance(InstanceId(4)).is_some());
        assert!(store.instance(InstanceId(5)).is_some());
        assert!(store.instance(InstanceId(7)).is_some());
        assert_eq!(store.len(), 4);
    }

    #[test]
    fn test_last_delivered_within_window_keeps_everything() {
        let mut store = InMemoryConsensusStore::with_retention(10);
        for i in 0..4 {
            store.get_instance(InstanceId(i));
        }
        store.last_delivered(InstanceId(3));
        assert_eq!(store.len(), 4);
    }

    #[test]
    fn test_clear() {
        let store = InMemoryConsensusStore::new().shared();
        store.borrow_mut().promise(InstanceId(1), Ballot(2));
        store.borrow_mut().clear();
        assert!(store.borrow().is_empty());
    }
}
