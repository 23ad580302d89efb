//! Acceptor role: promises ballots and accepts values per instance.
//!
//! ```text
//! On prepare(instance, ballot):
//!   if ballot >= promised[instance]:
//!     promised[instance] = ballot
//!   else:
//!     reject (stale ballot)
//!
//! On accept(instance, value):
//!   accepted[instance] = value
//! ```
//!
//! Whether an accept arrives under the promised ballot is checked by the
//! dispatcher before calling [`AcceptorContext::accept`]; this role only
//! guards the promise.

use lagoon_core::Payload;
use tracing::debug;

use crate::state::ContextCommon;
use crate::store::{PaxosInstanceRecord, SharedStore};
use crate::types::{Ballot, InstanceId, PaxosError};

/// Acceptor state for one member.
#[derive(Debug)]
pub struct AcceptorContext {
    common: ContextCommon,
    store: SharedStore,
}

impl AcceptorContext {
    /// Create the acceptor over `store`.
    pub fn new(common: ContextCommon, store: SharedStore) -> Self {
        Self { common, store }
    }

    /// Shared accessors.
    pub fn common(&self) -> &ContextCommon {
        &self.common
    }

    /// Fetch the record for `id`, creating it if absent.
    pub fn get_instance(&self, id: InstanceId) -> PaxosInstanceRecord {
        self.store.borrow_mut().get_instance(id).clone()
    }

    /// Promise `ballot` for `id`.
    ///
    /// # Errors
    ///
    /// Returns [`PaxosError::StaleBallot`] if a higher ballot was already
    /// promised for this instance.
    pub fn promise(&self, id: InstanceId, ballot: Ballot) -> Result<(), PaxosError> {
        let mut store = self.store.borrow_mut();
        if let Some(current) = store.get_instance(id).ballot {
            if ballot < current {
                debug!(
                    instance = %id,
                    ballot = %ballot,
                    promised = %current,
                    "rejecting promise with stale ballot"
                );
                return Err(PaxosError::StaleBallot {
                    instance: id,
                    current,
                    seen: ballot,
                });
            }
        }
        store.promise(id, ballot);
        debug!(instance = %id, ballot = %ballot, "promised");
        Ok(())
    }

    /// Accept `value` for `id`.
    pub fn accept(&self, id: InstanceId, value: Payload) {
        debug!(instance = %id, bytes = value.len(), "accepted value");
        self.store.borrow_mut().accept(id, value);
    }

    /// Forget every instance; called when the local member leaves.
    pub fn leave(&self) {
        self.store.borrow_mut().clear();
    }

    /// Copy sharing the same store, bound to `common`.
    pub fn snapshot(&self, common: ContextCommon) -> Self {
        Self::new(common, self.store.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::configuration::ClusterConfiguration;
    use crate::state::SharedClusterState;
    use crate::store::InMemoryConsensusStore;
    use lagoon_core::{InMemoryTimeouts, InlineExecutor, MemberId};
    use std::rc::Rc;
    use std::sync::Arc;

    fn make_acceptor() -> AcceptorContext {
        let state = SharedClusterState::new(MemberId(1), ClusterConfiguration::default()).shared();
        let common = ContextCommon::new(
            state,
            Rc::new(InMemoryTimeouts::new()),
            Arc::new(InlineExecutor),
        );
        AcceptorContext::new(common, InMemoryConsensusStore::new().shared())
    }

    #[test]
    fn test_promise_then_accept() {
        let acceptor = make_acceptor();
        acceptor
            .promise(InstanceId(0), Ballot(1))
            .expect("first promise");
        acceptor.accept(InstanceId(0), Payload::new(b"v".to_vec()));

        let record = acceptor.get_instance(InstanceId(0));
        assert_eq!(record.ballot, Some(Ballot(1)));
        assert_eq!(record.value, Some(Payload::new(b"v".to_vec())));
    }

    #[test]
    fn test_promise_equal_or_higher_ballot() {
        let acceptor = make_acceptor();
        acceptor.promise(InstanceId(0), Ballot(3)).expect("promise");
        acceptor.promise(InstanceId(0), Ballot(3)).expect("same ballot");
        acceptor.promise(InstanceId(0), Ballot(8)).expect("higher ballot");
        assert_eq!(acceptor.get_instance(InstanceId(0)).ballot, Some(Ballot(8)));
    }

    #[test]
    fn test_promise_stale_ballot_rejected() {
        let acceptor = make_acceptor();
        acceptor.promise(InstanceId(2), Ballot(5)).expect("promise");

        let err = acceptor
            .promise(InstanceId(2), Ballot(4))
            .expect_err("lower ballot must be rejected");
        assert!(matches!(
            err,
            PaxosError::StaleBallot {
                current: Ballot(5),
                seen: Ballot(4),
                ..
            }
        ));
        assert_eq!(acceptor.get_instance(InstanceId(2)).ballot, Some(Ballot(5)));

        // other instances are unaffected
        acceptor.promise(InstanceId(3), Ballot(1)).expect("promise");
    }

    #[test]
    fn test_leave_clears_store() {
        let acceptor = make_acceptor();
        acceptor.promise(InstanceId(0), Ballot(1)).expect("promise");
        acceptor.leave();
        assert_eq!(acceptor.get_instance(InstanceId(0)).ballot, None);
    }
}
