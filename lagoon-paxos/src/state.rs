//! State shared by every role of a context.
//!
//! [`SharedClusterState`] is owned by one [`PaxosContext`](crate::PaxosContext)
//! and handed to its roles as an `Rc<RefCell<_>>`. Roles are driven by a
//! single dispatcher thread, one message at a time, so borrows never
//! overlap as long as no role holds a borrow across a call into another
//! role.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;
use std::sync::Arc;

use lagoon_core::{Executor, MemberId, MemberUri, Message, Timeouts};

use crate::configuration::ClusterConfiguration;
use crate::types::InstanceId;

/// Identity, configuration and instance counters of the local member.
#[derive(Debug, Clone)]
pub struct SharedClusterState {
    me: MemberId,
    bound_at: Option<MemberUri>,
    configuration: ClusterConfiguration,
    last_known_learned_instance_in_cluster: Option<InstanceId>,
    last_known_alive_up_to_date_instance: Option<MemberId>,
    next_instance_id: InstanceId,
}

/// Handle to the state shared by the roles of one context.
pub type SharedState = Rc<RefCell<SharedClusterState>>;

impl SharedClusterState {
    /// Create the state of member `me`.
    pub fn new(me: MemberId, configuration: ClusterConfiguration) -> Self {
        Self {
            me,
            bound_at: None,
            configuration,
            last_known_learned_instance_in_cluster: None,
            last_known_alive_up_to_date_instance: None,
            next_instance_id: InstanceId::FIRST,
        }
    }

    /// Wrap the state for sharing.
    pub fn shared(self) -> SharedState {
        Rc::new(RefCell::new(self))
    }

    /// Local member id.
    pub fn me(&self) -> MemberId {
        self.me
    }

    /// Address the local member is bound at.
    pub fn bound_at(&self) -> Option<&MemberUri> {
        self.bound_at.as_ref()
    }

    /// Record the bound address.
    pub fn set_bound_at(&mut self, uri: MemberUri) {
        self.bound_at = Some(uri);
    }

    /// Current configuration.
    pub fn configuration(&self) -> &ClusterConfiguration {
        &self.configuration
    }

    /// Mutable access to the configuration.
    pub fn configuration_mut(&mut self) -> &mut ClusterConfiguration {
        &mut self.configuration
    }

    /// Replace the configuration.
    pub fn set_configuration(&mut self, configuration: ClusterConfiguration) {
        self.configuration = configuration;
    }

    /// Highest instance known to be learned anywhere in the cluster.
    pub fn last_known_learned_instance_in_cluster(&self) -> Option<InstanceId> {
        self.last_known_learned_instance_in_cluster
    }

    /// Member that reported the learned maximum, if it came from a peer.
    pub fn last_known_alive_up_to_date_instance(&self) -> Option<MemberId> {
        self.last_known_alive_up_to_date_instance
    }

    /// Raise the cluster-wide learned maximum to `id`, attributed to `from`.
    ///
    /// Lower values are ignored. `None` clears both the maximum and its
    /// attribution.
    pub fn set_last_known_learned_instance_in_cluster(
        &mut self,
        id: Option<InstanceId>,
        from: Option<MemberId>,
    ) {
        let Some(id) = id else {
            self.last_known_learned_instance_in_cluster = None;
            self.last_known_alive_up_to_date_instance = None;
            return;
        };
        if self
            .last_known_learned_instance_in_cluster
            .is_some_and(|current| current > id)
        {
            return;
        }
        self.last_known_learned_instance_in_cluster = Some(id);
        if from.is_some() {
            self.last_known_alive_up_to_date_instance = from;
        }
    }

    /// Next instance id this member would propose in.
    pub fn next_instance_id(&self) -> InstanceId {
        self.next_instance_id
    }

    /// Overwrite the next instance id.
    pub fn set_next_instance_id(&mut self, id: InstanceId) {
        self.next_instance_id = id;
    }

    /// Allocate an instance id above everything learned in the cluster.
    pub fn allocate_instance_id(&mut self) -> InstanceId {
        if let Some(learned) = self.last_known_learned_instance_in_cluster {
            if self.next_instance_id <= learned {
                self.next_instance_id = learned.next();
            }
        }
        let id = self.next_instance_id;
        self.next_instance_id = id.next();
        id
    }
}

/// Collaborators and configuration accessors common to every role.
#[derive(Clone)]
pub struct ContextCommon {
    state: SharedState,
    timeouts: Rc<dyn Timeouts>,
    executor: Arc<dyn Executor>,
}

impl std::fmt::Debug for ContextCommon {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextCommon")
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl ContextCommon {
    /// Bundle the shared state with the timeout service and executor.
    pub fn new(state: SharedState, timeouts: Rc<dyn Timeouts>, executor: Arc<dyn Executor>) -> Self {
        Self {
            state,
            timeouts,
            executor,
        }
    }

    /// The shared state handle.
    pub fn state(&self) -> &SharedState {
        &self.state
    }

    /// Executor running listener notifications.
    pub fn executor(&self) -> &dyn Executor {
        &*self.executor
    }

    /// Local member id.
    pub fn my_id(&self) -> MemberId {
        self.state.borrow().me()
    }

    /// Whether `member` is the local member.
    pub fn is_me(&self, member: MemberId) -> bool {
        self.my_id() == member
    }

    /// Address the local member is bound at.
    pub fn bound_at(&self) -> Option<MemberUri> {
        self.state.borrow().bound_at().cloned()
    }

    /// Copy of the current configuration.
    pub fn configuration(&self) -> ClusterConfiguration {
        self.state.borrow().configuration().clone()
    }

    /// Current member ids, ascending.
    pub fn member_ids(&self) -> Vec<MemberId> {
        self.state.borrow().configuration().member_ids()
    }

    /// Current member addresses, ordered by id.
    pub fn member_uris(&self) -> Vec<MemberUri> {
        self.state.borrow().configuration().member_uris()
    }

    /// Current membership map.
    pub fn members(&self) -> BTreeMap<MemberId, MemberUri> {
        self.state.borrow().configuration().members().clone()
    }

    /// Tolerated failures of the current configuration.
    pub fn allowed_failures(&self) -> usize {
        self.state.borrow().configuration().allowed_failures()
    }

    /// The acceptor set: the first `2f + 1` members.
    pub fn acceptors(&self) -> Vec<MemberUri> {
        let state = self.state.borrow();
        let configuration = state.configuration();
        let count = 2 * configuration.allowed_failures() + 1;
        configuration.members().values().take(count).cloned().collect()
    }

    /// Address of the coordinator, if one is elected and known.
    pub fn coordinator(&self) -> Option<MemberUri> {
        let state = self.state.borrow();
        let configuration = state.configuration();
        configuration
            .elected_member(ClusterConfiguration::COORDINATOR)
            .and_then(|id| configuration.uri_for_id(id))
            .cloned()
    }

    /// Address of `member`.
    pub fn uri_for_id(&self, member: MemberId) -> Option<MemberUri> {
        self.state.borrow().configuration().uri_for_id(member).cloned()
    }

    /// Member bound at `uri`.
    pub fn id_for_uri(&self, uri: &MemberUri) -> Option<MemberId> {
        self.state.borrow().configuration().id_for_uri(uri)
    }

    /// Arm the timeout `key`.
    pub fn set_timeout(&self, key: impl Into<String>, message: Message) {
        self.timeouts.set_timeout(key.into(), message);
    }

    /// Cancel the timeout `key`.
    pub fn cancel_timeout(&self, key: &str) {
        self.timeouts.cancel_timeout(key);
    }

    /// Cancel every armed timeout.
    pub fn cancel_all_timeouts(&self) {
        self.timeouts.cancel_all_timeouts();
    }
}
