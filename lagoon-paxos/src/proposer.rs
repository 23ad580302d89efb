//! Proposer role: instance allocation, bookings and the pending queue.
//!
//! A proposer books an instance for every value it is driving through
//! Paxos. At most `max_concurrent_instances` can be booked at once; values
//! submitted while every slot is taken wait in the pending queue. The most
//! recently submitted value is proposed next.

use std::cell::RefCell;
use std::collections::{BTreeMap, VecDeque};

use lagoon_core::{MemberUri, Message};
use tracing::debug;

use crate::quorum;
use crate::settings::PaxosSettings;
use crate::state::ContextCommon;
use crate::store::{PaxosInstanceRecord, SharedStore};
use crate::types::{ConfigurationChange, InstanceId, PaxosError};

#[derive(Debug, Clone, Default)]
struct ProposerState {
    pending_values: VecDeque<Message>,
    booked_instances: BTreeMap<InstanceId, Message>,
}

/// Proposer state for one member.
#[derive(Debug)]
pub struct ProposerContext {
    common: ContextCommon,
    store: SharedStore,
    settings: PaxosSettings,
    inner: RefCell<ProposerState>,
}

impl ProposerContext {
    /// Create the proposer.
    pub fn new(common: ContextCommon, store: SharedStore, settings: PaxosSettings) -> Self {
        Self {
            common,
            store,
            settings,
            inner: RefCell::new(ProposerState::default()),
        }
    }

    /// Shared accessors.
    pub fn common(&self) -> &ContextCommon {
        &self.common
    }

    /// Allocate the next instance id.
    ///
    /// The id is always above the highest instance known to be learned in
    /// the cluster, and strictly above every id allocated before.
    pub fn new_instance_id(&self) -> InstanceId {
        let id = self.common.state().borrow_mut().allocate_instance_id();
        debug!(instance = %id, "allocated instance");
        id
    }

    /// Book `id` for `value`.
    ///
    /// # Errors
    ///
    /// Returns [`PaxosError::EmptyBookingValue`] if `value` carries no payload.
    pub fn book_instance(&self, id: InstanceId, value: Message) -> Result<(), PaxosError> {
        if value.is_empty() {
            return Err(PaxosError::EmptyBookingValue { instance: id });
        }
        self.inner.borrow_mut().booked_instances.insert(id, value);
        Ok(())
    }

    /// Release the booking of `id`, returning its value.
    pub fn unbook_instance(&self, id: InstanceId) -> Option<Message> {
        self.inner.borrow_mut().booked_instances.remove(&id)
    }

    /// Value booked for `id`.
    pub fn booked_instance(&self, id: InstanceId) -> Option<Message> {
        self.inner.borrow().booked_instances.get(&id).cloned()
    }

    /// Ids of every booked instance, ascending.
    pub fn booked_instance_ids(&self) -> Vec<InstanceId> {
        self.inner.borrow().booked_instances.keys().copied().collect()
    }

    /// Number of booked instances.
    pub fn booked_instance_count(&self) -> usize {
        self.inner.borrow().booked_instances.len()
    }

    /// Whether another instance may be booked.
    pub fn can_book_instance(&self) -> bool {
        self.booked_instance_count() < self.settings.max_concurrent_instances()
    }

    /// Queue `value` until a booking slot frees up. It is proposed before
    /// every value already queued.
    pub fn pending_value(&self, value: Message) {
        self.inner.borrow_mut().pending_values.push_front(value);
    }

    /// Take the next value to propose.
    pub fn pop_pending_value(&self) -> Option<Message> {
        self.inner.borrow_mut().pending_values.pop_front()
    }

    /// Whether values are waiting.
    pub fn has_pending_values(&self) -> bool {
        !self.inner.borrow().pending_values.is_empty()
    }

    /// Acks needed from `acceptors` for a value to be chosen.
    pub fn minimum_quorum_size(&self, acceptors: &[MemberUri]) -> usize {
        quorum::minimum_quorum_size(acceptors.len(), self.common.allowed_failures())
    }

    /// Rewrite the acceptor lists of booked instances for a membership change.
    ///
    /// Must run before `change` is applied to the configuration, since the
    /// member's previous address is looked up there. Applying the same
    /// change twice leaves the lists as after the first application.
    pub fn patch_booked_instances(&self, change: &ConfigurationChange) {
        let (member, joining_uri) = match change {
            ConfigurationChange::Join { member, uri } => (*member, Some(uri)),
            ConfigurationChange::Leave { member } => (*member, None),
            ConfigurationChange::Elected { .. } | ConfigurationChange::Unelected { .. } => return,
        };
        let previous = self.common.uri_for_id(member);

        let booked = self.booked_instance_ids();
        let mut store = self.store.borrow_mut();
        for id in booked {
            let record = store.get_instance(id);
            if record.acceptors.is_empty() {
                continue;
            }
            if let Some(previous) = &previous {
                record.acceptors.retain(|acceptor| acceptor != previous);
            }
            if let Some(uri) = joining_uri {
                if !record.acceptors.contains(uri) {
                    record.acceptors.push(uri.clone());
                }
            }
            debug!(instance = %id, member = %member, "patched booked instance acceptors");
        }
    }

    /// Record for `id`, created if absent.
    pub fn paxos_instance(&self, id: InstanceId) -> PaxosInstanceRecord {
        self.store.borrow_mut().get_instance(id).clone()
    }

    /// Drop queued and booked values and restart numbering at zero.
    pub fn leave(&self) {
        {
            let mut inner = self.inner.borrow_mut();
            inner.pending_values.clear();
            inner.booked_instances.clear();
        }
        self.common
            .state()
            .borrow_mut()
            .set_next_instance_id(InstanceId::FIRST);
        self.store.borrow_mut().clear();
    }

    /// Deep copy of the queue and bookings, sharing the store.
    pub fn snapshot(&self, common: ContextCommon) -> Self {
        Self {
            common,
            store: self.store.clone(),
            settings: self.settings.clone(),
            inner: RefCell::new(self.inner.borrow().clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::configuration::ClusterConfiguration;
    use crate::state::SharedClusterState;
    use crate::store::InMemoryConsensusStore;
    use lagoon_core::{InMemoryTimeouts, InlineExecutor, MemberId, NetworkAddress};
    use std::net::{IpAddr, Ipv4Addr};
    use std::rc::Rc;
    use std::sync::Arc;

    fn make_uri(port: u16) -> MemberUri {
        MemberUri::new(NetworkAddress::new(
            IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)),
            port,
        ))
    }

    fn value(bytes: &[u8]) -> Message {
        Message::new("broadcast", bytes)
    }

    fn make_proposer(members: u32) -> ProposerContext {
        let mut configuration = ClusterConfiguration::new("neo", Vec::new());
        for i in 1..=members {
            configuration.joined(MemberId(i), make_uri(5000 + i as u16));
        }
        let state = SharedClusterState::new(MemberId(1), configuration).shared();
        let common = ContextCommon::new(
            state,
            Rc::new(InMemoryTimeouts::new()),
            Arc::new(InlineExecutor),
        );
        ProposerContext::new(
            common,
            InMemoryConsensusStore::new().shared(),
            PaxosSettings::default(),
        )
    }

    #[test]
    fn test_new_instance_id_above_learned() {
        let proposer = make_proposer(3);
        assert_eq!(proposer.new_instance_id(), InstanceId(0));

        proposer
            .common()
            .state()
            .borrow_mut()
            .set_last_known_learned_instance_in_cluster(Some(InstanceId(41)), None);
        assert_eq!(proposer.new_instance_id(), InstanceId(42));
        assert_eq!(proposer.new_instance_id(), InstanceId(43));
    }

    #[test]
    fn test_book_empty_value_rejected() {
        let proposer = make_proposer(3);
        let err = proposer
            .book_instance(InstanceId(0), Message::new("broadcast", Vec::<u8>::new()))
            .expect_err("empty value must be rejected");
        assert!(matches!(
            err,
            PaxosError::EmptyBookingValue {
                instance: InstanceId(0)
            }
        ));
        assert_eq!(proposer.booked_instance_count(), 0);
    }

    #[test]
    fn test_booking_limit() {
        let proposer = make_proposer(3);
        for i in 0..10 {
            assert!(proposer.can_book_instance());
            proposer
                .book_instance(InstanceId(i), value(b"x"))
                .expect("book");
        }
        assert!(!proposer.can_book_instance());

        assert_eq!(proposer.unbook_instance(InstanceId(4)), Some(value(b"x")));
        assert!(proposer.can_book_instance());
        assert_eq!(proposer.booked_instance(InstanceId(4)), None);
    }

    #[test]
    fn test_pending_values_lifo() {
        let proposer = make_proposer(3);
        assert!(!proposer.has_pending_values());

        proposer.pending_value(value(b"A"));
        proposer.pending_value(value(b"B"));

        assert!(proposer.has_pending_values());
        assert_eq!(proposer.pop_pending_value(), Some(value(b"B")));
        assert_eq!(proposer.pop_pending_value(), Some(value(b"A")));
        assert_eq!(proposer.pop_pending_value(), None);
    }

    #[test]
    fn test_minimum_quorum_size() {
        let proposer = make_proposer(3);
        let five: Vec<_> = (1..=5).map(make_uri).collect();
        assert_eq!(proposer.minimum_quorum_size(&five), 4);
        assert_eq!(proposer.minimum_quorum_size(&five[..3]), 2);
        assert_eq!(proposer.minimum_quorum_size(&five[..2]), 2);
    }

    #[test]
    fn test_patch_booked_instances_join_is_idempotent() {
        let proposer = make_proposer(3);
        proposer
            .book_instance(InstanceId(7), value(b"x"))
            .expect("book");
        {
            let mut store = proposer.store.borrow_mut();
            store.get_instance(InstanceId(7)).acceptors =
                vec![make_uri(5001), make_uri(5002), make_uri(5003)];
        }

        // member 2 rejoins from a new address
        let change = ConfigurationChange::Join {
            member: MemberId(2),
            uri: make_uri(6002),
        };
        proposer.patch_booked_instances(&change);
        proposer.patch_booked_instances(&change);

        assert_eq!(
            proposer.paxos_instance(InstanceId(7)).acceptors,
            vec![make_uri(5001), make_uri(5003), make_uri(6002)]
        );
    }

    #[test]
    fn test_patch_booked_instances_leave() {
        let proposer = make_proposer(3);
        proposer
            .book_instance(InstanceId(1), value(b"x"))
            .expect("book");
        proposer
            .store
            .borrow_mut()
            .get_instance(InstanceId(1))
            .acceptors = vec![make_uri(5001), make_uri(5002), make_uri(5003)];

        proposer.patch_booked_instances(&ConfigurationChange::Leave {
            member: MemberId(3),
        });

        assert_eq!(
            proposer.paxos_instance(InstanceId(1)).acceptors,
            vec![make_uri(5001), make_uri(5002)]
        );
    }

    #[test]
    fn test_leave_resets_counter() {
        let proposer = make_proposer(3);
        proposer.new_instance_id();
        proposer.new_instance_id();
        proposer.pending_value(value(b"A"));
        proposer
            .book_instance(InstanceId(0), value(b"B"))
            .expect("book");

        proposer.leave();

        assert!(!proposer.has_pending_values());
        assert_eq!(proposer.booked_instance_count(), 0);
        assert_eq!(proposer.new_instance_id(), InstanceId(0));
    }
}
