//! Failure detection from gossiped suspicions.
//!
//! Every member keeps a set of members it suspects. Members gossip their
//! sets, so each member holds a suspicion graph: observer -> suspected set.
//! A node is **failed** when more than half of the members that are not
//! themselves failed suspect it:
//!
//! ```text
//! adjust    = 0 if node already failed, else 1
//! is_failed = |suspicions_of(node)| > (|members| - |failed| - adjust) / 2
//! ```
//!
//! Suspicions from failed members are ignored. The `adjust` term keeps a
//! node that is not yet failed from counting its own opinion in the
//! denominator.
//!
//! Transitions into and out of the failed set are announced to
//! [`HeartbeatListener`]s through the executor.
//!
//! The heartbeat role needs the cluster and learner roles, which are built
//! after it. Those references are set once by [`HeartbeatContext::wire`].

use std::cell::{OnceCell, RefCell};
use std::collections::{BTreeMap, BTreeSet};
use std::rc::{Rc, Weak};
use std::sync::Arc;

use lagoon_core::{Listeners, MemberId};
use tracing::{debug, info};

use crate::cluster::ClusterContext;
use crate::learner::LearnerContext;
use crate::state::ContextCommon;
use crate::types::{InstanceId, PaxosError};

/// Receives failure detector transitions.
#[allow(unused_variables)]
pub trait HeartbeatListener: Send + Sync {
    /// `member` is now considered failed.
    fn failed(&self, member: MemberId) {}

    /// `member` is no longer considered failed.
    fn alive(&self, member: MemberId) {}
}

#[derive(Debug, Clone, Default)]
struct HeartbeatState {
    failed: BTreeSet<MemberId>,
    suspicions: BTreeMap<MemberId, BTreeSet<MemberId>>,
}

impl HeartbeatState {
    fn suspicions_of(&self, members: &[MemberId], node: MemberId) -> Vec<MemberId> {
        members
            .iter()
            .copied()
            .filter(|member| !self.failed.contains(member))
            .filter(|member| {
                self.suspicions
                    .get(member)
                    .is_some_and(|suspected| suspected.contains(&node))
            })
            .collect()
    }

    fn is_failed(&self, members: &[MemberId], node: MemberId) -> bool {
        let suspicions = self.suspicions_of(members, node).len() as i64;
        let adjust = if self.failed.contains(&node) { 0 } else { 1 };
        let threshold = (members.len() as i64 - self.failed.len() as i64 - adjust) / 2;
        suspicions > threshold
    }

    /// Bring `node`'s membership in the failed set in line with the rule.
    fn reevaluate(&mut self, members: &[MemberId], node: MemberId) -> Option<Transition> {
        let failed = self.is_failed(members, node);
        if failed && self.failed.insert(node) {
            Some(Transition::Failed(node))
        } else if !failed && self.failed.remove(&node) {
            Some(Transition::Alive(node))
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Transition {
    Failed(MemberId),
    Alive(MemberId),
}

/// Failure detector state for one member.
pub struct HeartbeatContext {
    common: ContextCommon,
    inner: RefCell<HeartbeatState>,
    listeners: Listeners<dyn HeartbeatListener>,
    cluster: OnceCell<Weak<ClusterContext>>,
    learner: OnceCell<Weak<LearnerContext>>,
}

impl std::fmt::Debug for HeartbeatContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeartbeatContext")
            .field("state", &self.inner)
            .field("listeners", &self.listeners)
            .field("wired", &(self.cluster.get().is_some()))
            .finish()
    }
}

impl HeartbeatContext {
    /// Create an unwired heartbeat role.
    pub fn new(common: ContextCommon) -> Self {
        Self {
            common,
            inner: RefCell::new(HeartbeatState::default()),
            listeners: Listeners::new(),
            cluster: OnceCell::new(),
            learner: OnceCell::new(),
        }
    }

    /// Set the late-bound cluster and learner references.
    ///
    /// # Errors
    ///
    /// Returns [`PaxosError::AlreadyWired`] on a second call.
    pub fn wire(
        &self,
        cluster: &Rc<ClusterContext>,
        learner: &Rc<LearnerContext>,
    ) -> Result<(), PaxosError> {
        self.cluster
            .set(Rc::downgrade(cluster))
            .map_err(|_| PaxosError::AlreadyWired)?;
        self.learner
            .set(Rc::downgrade(learner))
            .map_err(|_| PaxosError::AlreadyWired)?;
        Ok(())
    }

    /// Shared accessors.
    pub fn common(&self) -> &ContextCommon {
        &self.common
    }

    /// Register a listener.
    pub fn add_listener(&self, listener: Arc<dyn HeartbeatListener>) {
        self.listeners.add(listener);
    }

    /// Unregister a listener.
    pub fn remove_listener(&self, listener: &Arc<dyn HeartbeatListener>) -> bool {
        self.listeners.remove(listener)
    }

    /// Reset the failed set when heartbeating (re)starts.
    pub fn started(&self) {
        self.inner.borrow_mut().failed.clear();
    }

    /// A heartbeat arrived from `node`: drop the local suspicion of it.
    ///
    /// Returns whether `node` was suspected by the local member.
    pub fn alive(&self, node: MemberId) -> bool {
        let me = self.common.my_id();
        let members = self.common.member_ids();
        let (suspected, transition) = {
            let mut inner = self.inner.borrow_mut();
            let suspected = inner
                .suspicions
                .entry(me)
                .or_default()
                .remove(&node);
            let transition = if !inner.is_failed(&members, node) && inner.failed.remove(&node) {
                Some(Transition::Alive(node))
            } else {
                None
            };
            (suspected, transition)
        };
        self.announce(transition);
        suspected
    }

    /// The local member stopped hearing from `node`.
    pub fn suspect(&self, node: MemberId) {
        let me = self.common.my_id();
        let members = self.common.member_ids();
        let transition = {
            let mut inner = self.inner.borrow_mut();
            if inner.suspicions.entry(me).or_default().insert(node) {
                info!(node = %node, "suspecting member");
            }
            if inner.is_failed(&members, node) && inner.failed.insert(node) {
                Some(Transition::Failed(node))
            } else {
                None
            }
        };
        self.announce(transition);
    }

    /// Replace the suspicion set gossiped by `from`.
    ///
    /// Every node added to or removed from the set is re-evaluated.
    pub fn suspicions(&self, from: MemberId, suspicions: BTreeSet<MemberId>) {
        let members = self.common.member_ids();
        let transitions: Vec<Transition> = {
            let mut inner = self.inner.borrow_mut();
            let previous = inner.suspicions.insert(from, suspicions.clone()).unwrap_or_default();
            let touched: BTreeSet<MemberId> = previous.union(&suspicions).copied().collect();
            debug!(from = %from, suspected = suspicions.len(), "received suspicions");
            touched
                .into_iter()
                .filter_map(|node| inner.reevaluate(&members, node))
                .collect()
        };
        for transition in transitions {
            self.announce(Some(transition));
        }
    }

    /// Members currently considered failed.
    pub fn failed(&self) -> BTreeSet<MemberId> {
        self.inner.borrow().failed.clone()
    }

    /// Members for which the failure rule does not hold, ascending.
    pub fn alive_members(&self) -> Vec<MemberId> {
        let members = self.common.member_ids();
        let inner = self.inner.borrow();
        members
            .iter()
            .copied()
            .filter(|member| !inner.is_failed(&members, *member))
            .collect()
    }

    /// Whether the failure rule holds for `node`.
    pub fn is_failed(&self, node: MemberId) -> bool {
        let members = self.common.member_ids();
        self.inner.borrow().is_failed(&members, node)
    }

    /// Non-failed members that suspect `node`.
    pub fn suspicions_of(&self, node: MemberId) -> Vec<MemberId> {
        let members = self.common.member_ids();
        self.inner.borrow().suspicions_of(&members, node)
    }

    /// Members suspected by `member`.
    pub fn suspicions_for(&self, member: MemberId) -> BTreeSet<MemberId> {
        self.inner
            .borrow()
            .suspicions
            .get(&member)
            .cloned()
            .unwrap_or_default()
    }

    /// Forget `node` entirely once it has left the cluster.
    pub fn server_left_cluster(&self, node: MemberId) {
        let mut inner = self.inner.borrow_mut();
        inner.failed.remove(&node);
        inner.suspicions.remove(&node);
        for suspected in inner.suspicions.values_mut() {
            suspected.remove(&node);
        }
    }

    /// Members other than the local one.
    ///
    /// # Errors
    ///
    /// Returns [`PaxosError::NotWired`] before [`wire`](Self::wire).
    pub fn other_instances(&self) -> Result<Vec<MemberId>, PaxosError> {
        Ok(self.cluster()?.other_instances())
    }

    /// Highest instance learned locally.
    ///
    /// # Errors
    ///
    /// Returns [`PaxosError::NotWired`] before [`wire`](Self::wire).
    pub fn last_learned_instance_id(&self) -> Result<Option<InstanceId>, PaxosError> {
        Ok(self.learner()?.last_learned_instance_id())
    }

    /// Highest instance known to be learned in the cluster.
    ///
    /// # Errors
    ///
    /// Returns [`PaxosError::NotWired`] before [`wire`](Self::wire).
    pub fn last_known_learned_instance_in_cluster(
        &self,
    ) -> Result<Option<InstanceId>, PaxosError> {
        Ok(self.learner()?.last_known_learned_instance_in_cluster())
    }

    /// Unwired copy with its own suspicion graph, failed set and listener list.
    pub fn snapshot(&self, common: ContextCommon) -> Self {
        Self {
            common,
            inner: RefCell::new(self.inner.borrow().clone()),
            listeners: self.listeners.snapshot(),
            cluster: OnceCell::new(),
            learner: OnceCell::new(),
        }
    }

    fn cluster(&self) -> Result<Rc<ClusterContext>, PaxosError> {
        self.cluster
            .get()
            .and_then(Weak::upgrade)
            .ok_or(PaxosError::NotWired("cluster"))
    }

    fn learner(&self) -> Result<Rc<LearnerContext>, PaxosError> {
        self.learner
            .get()
            .and_then(Weak::upgrade)
            .ok_or(PaxosError::NotWired("learner"))
    }

    fn announce(&self, transition: Option<Transition>) {
        match transition {
            Some(Transition::Failed(node)) => {
                info!(node = %node, "member failed");
                self.listeners
                    .notify(self.common.executor(), move |l| l.failed(node));
            }
            Some(Transition::Alive(node)) => {
                info!(node = %node, "member alive");
                self.listeners
                    .notify(self.common.executor(), move |l| l.alive(node));
            }
            None => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::configuration::ClusterConfiguration;
    use crate::state::SharedClusterState;
    use lagoon_core::{InMemoryTimeouts, InlineExecutor, MemberUri, NetworkAddress};
    use parking_lot::Mutex;
    use proptest::prelude::*;
    use std::net::{IpAddr, Ipv4Addr};

    fn make_uri(port: u16) -> MemberUri {
        MemberUri::new(NetworkAddress::new(
            IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)),
            port,
        ))
    }

    fn make_heartbeat(me: u32, members: u32) -> HeartbeatContext {
        let mut configuration = ClusterConfiguration::new("neo", Vec::new());
        for i in 1..=members {
            configuration.joined(MemberId(i), make_uri(5000 + i as u16));
        }
        let state = SharedClusterState::new(MemberId(me), configuration).shared();
        HeartbeatContext::new(ContextCommon::new(
            state,
            Rc::new(InMemoryTimeouts::new()),
            Arc::new(InlineExecutor),
        ))
    }

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<(bool, MemberId)>>,
    }

    impl HeartbeatListener for Recorder {
        fn failed(&self, member: MemberId) {
            self.events.lock().push((false, member));
        }

        fn alive(&self, member: MemberId) {
            self.events.lock().push((true, member));
        }
    }

    fn set(ids: &[u32]) -> BTreeSet<MemberId> {
        ids.iter().copied().map(MemberId).collect()
    }

    #[test]
    fn test_single_suspicion_does_not_fail() {
        let heartbeat = make_heartbeat(1, 5);
        heartbeat.suspect(MemberId(3));

        assert!(!heartbeat.is_failed(MemberId(3)));
        assert!(heartbeat.failed().is_empty());
        assert_eq!(heartbeat.suspicions_of(MemberId(3)), vec![MemberId(1)]);
    }

    #[test]
    fn test_majority_suspicion_fails_member() {
        let heartbeat = make_heartbeat(1, 5);
        let recorder = Arc::new(Recorder::default());
        heartbeat.add_listener(recorder.clone());

        heartbeat.suspect(MemberId(3));
        heartbeat.suspicions(MemberId(2), set(&[3]));
        assert!(!heartbeat.is_failed(MemberId(3)));

        // 3 suspicions > (5 - 0 - 1) / 2
        heartbeat.suspicions(MemberId(4), set(&[3]));
        assert!(heartbeat.is_failed(MemberId(3)));
        assert_eq!(heartbeat.failed(), set(&[3]));
        assert_eq!(
            heartbeat.alive_members(),
            vec![MemberId(1), MemberId(2), MemberId(4), MemberId(5)]
        );
        assert_eq!(*recorder.events.lock(), vec![(false, MemberId(3))]);
    }

    #[test]
    fn test_alive_returns_previous_suspicion() {
        let heartbeat = make_heartbeat(1, 3);
        assert!(!heartbeat.alive(MemberId(2)));
        heartbeat.suspect(MemberId(2));
        assert!(heartbeat.alive(MemberId(2)));
        assert!(heartbeat.suspicions_for(MemberId(1)).is_empty());
    }

    #[test]
    fn test_alive_clears_failure() {
        let heartbeat = make_heartbeat(1, 3);
        let recorder = Arc::new(Recorder::default());
        heartbeat.add_listener(recorder.clone());

        // 2 > (3 - 0 - 1) / 2
        heartbeat.suspect(MemberId(3));
        heartbeat.suspicions(MemberId(2), set(&[3]));
        assert_eq!(heartbeat.failed(), set(&[3]));

        heartbeat.suspicions(MemberId(2), BTreeSet::new());
        // the withdrawn suspicion alone brings 3 back: 1 > (3 - 1 - 0) / 2 is false
        assert!(heartbeat.failed().is_empty());

        heartbeat.suspicions(MemberId(2), set(&[3]));
        assert_eq!(heartbeat.failed(), set(&[3]));
        assert!(heartbeat.alive(MemberId(3)));
        assert!(heartbeat.failed().is_empty());

        assert_eq!(
            *recorder.events.lock(),
            vec![
                (false, MemberId(3)),
                (true, MemberId(3)),
                (false, MemberId(3)),
                (true, MemberId(3)),
            ]
        );
    }

    #[test]
    fn test_failed_members_opinions_ignored() {
        let heartbeat = make_heartbeat(1, 5);
        heartbeat.suspect(MemberId(5));
        heartbeat.suspicions(MemberId(2), set(&[5]));
        heartbeat.suspicions(MemberId(3), set(&[5]));
        assert_eq!(heartbeat.failed(), set(&[5]));

        // the failed member's own suspicions do not count
        heartbeat.suspicions(MemberId(5), set(&[4]));
        assert!(heartbeat.suspicions_of(MemberId(4)).is_empty());
        assert!(!heartbeat.is_failed(MemberId(4)));
    }

    #[test]
    fn test_server_left_cluster_purges() {
        let heartbeat = make_heartbeat(1, 3);
        heartbeat.suspect(MemberId(3));
        heartbeat.suspicions(MemberId(2), set(&[3]));
        heartbeat.suspicions(MemberId(3), set(&[2]));
        assert_eq!(heartbeat.failed(), set(&[3]));

        heartbeat.server_left_cluster(MemberId(3));

        assert!(heartbeat.failed().is_empty());
        assert!(heartbeat.suspicions_for(MemberId(1)).is_empty());
        assert!(heartbeat.suspicions_for(MemberId(3)).is_empty());
    }

    #[test]
    fn test_started_resets_failed() {
        let heartbeat = make_heartbeat(1, 3);
        heartbeat.suspect(MemberId(3));
        heartbeat.suspicions(MemberId(2), set(&[3]));
        heartbeat.started();
        assert!(heartbeat.failed().is_empty());
    }

    #[derive(Default)]
    struct FailuresOnly {
        failed: Mutex<Vec<MemberId>>,
    }

    impl HeartbeatListener for FailuresOnly {
        fn failed(&self, member: MemberId) {
            self.failed.lock().push(member);
        }
    }

    #[test]
    fn test_listener_may_skip_callbacks() {
        let heartbeat = make_heartbeat(1, 3);
        let listener = Arc::new(FailuresOnly::default());
        heartbeat.add_listener(listener.clone());

        heartbeat.suspect(MemberId(3));
        heartbeat.suspicions(MemberId(2), set(&[3]));
        assert!(heartbeat.alive(MemberId(3)));

        assert!(heartbeat.failed().is_empty());
        assert_eq!(*listener.failed.lock(), vec![MemberId(3)]);
    }

    #[test]
    fn test_unwired_references() {
        let heartbeat = make_heartbeat(1, 3);
        assert!(matches!(
            heartbeat.other_instances(),
            Err(PaxosError::NotWired("cluster"))
        ));
        assert!(matches!(
            heartbeat.last_learned_instance_id(),
            Err(PaxosError::NotWired("learner"))
        ));
    }

    #[derive(Debug, Clone)]
    enum Op {
        Suspect(u32),
        Alive(u32),
        Suspicions(u32, Vec<u32>),
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            (2u32..=5).prop_map(Op::Suspect),
            (2u32..=5).prop_map(Op::Alive),
            (2u32..=5, prop::collection::vec(1u32..=5, 0..4))
                .prop_map(|(from, set)| Op::Suspicions(from, set)),
        ]
    }

    /// Suspicion graph kept beside the heartbeat under test.
    ///
    /// A node counts as failed when strictly more than half of the other
    /// members that are not failed suspect it.
    #[derive(Default)]
    struct Model {
        graph: BTreeMap<u32, BTreeSet<u32>>,
        failed: BTreeSet<u32>,
        events: Vec<(bool, MemberId)>,
    }

    impl Model {
        fn rule(&self, members: u32, node: u32) -> bool {
            let judges: Vec<u32> = (1..=members)
                .filter(|m| *m != node && !self.failed.contains(m))
                .collect();
            let suspecting = judges
                .iter()
                .filter(|m| self.graph.get(*m).is_some_and(|s| s.contains(&node)))
                .count();
            2 * suspecting > judges.len()
        }

        fn settle(&mut self, members: u32, node: u32, may_fail: bool, may_recover: bool) {
            let failed = self.rule(members, node);
            if failed && may_fail && self.failed.insert(node) {
                self.events.push((false, MemberId(node)));
            } else if !failed && may_recover && self.failed.remove(&node) {
                self.events.push((true, MemberId(node)));
            }
        }
    }

    proptest! {
        #[test]
        fn test_failure_rule_holds(ops in prop::collection::vec(op_strategy(), 1..40)) {
            const MEMBERS: u32 = 5;
            let heartbeat = make_heartbeat(1, MEMBERS);
            let recorder = Arc::new(Recorder::default());
            heartbeat.add_listener(recorder.clone());
            let mut model = Model::default();

            for op in ops {
                match op {
                    Op::Suspect(node) => {
                        heartbeat.suspect(MemberId(node));
                        model.graph.entry(1).or_default().insert(node);
                        model.settle(MEMBERS, node, true, false);
                    }
                    Op::Alive(node) => {
                        let suspected = heartbeat.alive(MemberId(node));
                        let expected = model.graph.entry(1).or_default().remove(&node);
                        prop_assert_eq!(suspected, expected);
                        model.settle(MEMBERS, node, false, true);
                    }
                    Op::Suspicions(from, nodes) => {
                        let nodes: BTreeSet<u32> = nodes.into_iter().filter(|n| *n != from).collect();
                        heartbeat.suspicions(MemberId(from), nodes.iter().copied().map(MemberId).collect());
                        let previous = model.graph.insert(from, nodes.clone()).unwrap_or_default();
                        for node in previous.union(&nodes).copied().collect::<Vec<_>>() {
                            model.settle(MEMBERS, node, true, true);
                        }
                    }
                }

                let expected: BTreeSet<MemberId> = model.failed.iter().copied().map(MemberId).collect();
                prop_assert_eq!(heartbeat.failed(), expected);
                prop_assert_eq!(&*recorder.events.lock(), &model.events);
                for node in 1..=MEMBERS {
                    prop_assert_eq!(heartbeat.is_failed(MemberId(node)), model.rule(MEMBERS, node));
                }
            }
        }
    }
}
