//! Cluster role: membership of the local member and its peers.
//!
//! ```text
//! created(name)  ──> single-member cluster containing only this member
//! joining(..)    ──> joined()  ──> ... ──> left()
//! ```
//!
//! Peer joins are announced to [`ClusterListener`]s only once the local
//! member is itself part of the configuration. When several members join at
//! once, join results may arrive before our own; those are applied silently.
//!
//! Role changes carry an optional [`ElectorStamp`]. For each elector the
//! last applied version is remembered, and results carrying a lower
//! version are dropped. An elector restarts its count at 1, so version 1 is
//! always applied, and a member leaving forgets its count.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;
use std::sync::Arc;

use lagoon_core::{Listeners, MemberId, MemberUri};
use tracing::{debug, info, warn};

use crate::configuration::ClusterConfiguration;
use crate::heartbeat::HeartbeatContext;
use crate::learner::LearnerContext;
use crate::state::ContextCommon;
use crate::types::{
    ConfigurationChange, ConfigurationRequest, ConfigurationResponse, ElectorStamp, InstanceId,
    PaxosError,
};

/// Receives membership and role events.
#[allow(unused_variables)]
pub trait ClusterListener: Send + Sync {
    /// The local member entered the cluster with `configuration`.
    fn entered_cluster(&self, configuration: &ClusterConfiguration) {}

    /// The local member left the cluster.
    fn left_cluster(&self) {}

    /// `member` joined at `uri`.
    fn joined_cluster(&self, member: MemberId, uri: &MemberUri) {}

    /// `member` left; `uri` is its last known address.
    fn member_left(&self, member: MemberId, uri: Option<&MemberUri>) {}

    /// `member` was elected to `role`.
    fn elected(&self, role: &str, member: MemberId, uri: Option<&MemberUri>) {}

    /// `member` no longer holds `role`.
    fn unelected(&self, role: &str, member: MemberId, uri: Option<&MemberUri>) {}
}

#[derive(Debug, Clone, Default)]
struct ClusterState {
    joining_instances: Vec<MemberUri>,
    discovered_instances: Vec<ConfigurationRequest>,
    join_denied: Option<ConfigurationResponse>,
    currently_joining: BTreeMap<MemberId, MemberUri>,
    elector_versions: BTreeMap<MemberId, u64>,
}

/// Membership state for one member.
pub struct ClusterContext {
    common: ContextCommon,
    learner: Rc<LearnerContext>,
    heartbeat: Rc<HeartbeatContext>,
    listeners: Listeners<dyn ClusterListener>,
    inner: RefCell<ClusterState>,
}

impl std::fmt::Debug for ClusterContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterContext")
            .field("me", &self.common.my_id())
            .field("bound_at", &self.common.bound_at())
            .field("state", &self.inner)
            .finish_non_exhaustive()
    }
}

impl ClusterContext {
    /// Create the cluster role.
    pub fn new(
        common: ContextCommon,
        learner: Rc<LearnerContext>,
        heartbeat: Rc<HeartbeatContext>,
    ) -> Self {
        Self {
            common,
            learner,
            heartbeat,
            listeners: Listeners::new(),
            inner: RefCell::new(ClusterState::default()),
        }
    }

    /// Shared accessors.
    pub fn common(&self) -> &ContextCommon {
        &self.common
    }

    /// Register a listener.
    pub fn add_listener(&self, listener: Arc<dyn ClusterListener>) {
        self.listeners.add(listener);
    }

    /// Unregister a listener.
    pub fn remove_listener(&self, listener: &Arc<dyn ClusterListener>) -> bool {
        self.listeners.remove(listener)
    }

    /// Record the address the local member is bound at.
    pub fn set_bound_at(&self, uri: MemberUri) {
        self.common.state().borrow_mut().set_bound_at(uri);
    }

    /// Copy of the current configuration.
    pub fn configuration(&self) -> ClusterConfiguration {
        self.common.configuration()
    }

    /// Bootstrap a new cluster named `name` containing only this member.
    ///
    /// # Errors
    ///
    /// Returns [`PaxosError::NotBound`] if no address was bound yet.
    pub fn created(&self, name: &str) -> Result<(), PaxosError> {
        let bound_at = self.common.bound_at().ok_or(PaxosError::NotBound)?;
        {
            let mut state = self.common.state().borrow_mut();
            let allowed_failures = state.configuration().allowed_failures();
            state.set_configuration(
                ClusterConfiguration::new(name, vec![bound_at])
                    .with_allowed_failures(allowed_failures),
            );
        }
        info!(cluster = name, "created cluster");
        self.joined()
    }

    /// Start joining `name` through `candidates`.
    pub fn joining(&self, name: &str, candidates: Vec<MemberUri>) {
        info!(cluster = name, candidates = candidates.len(), "joining cluster");
        let mut inner = self.inner.borrow_mut();
        inner.joining_instances = candidates;
        inner.discovered_instances.clear();
        inner.join_denied = None;
    }

    /// Adopt the membership and roles received while joining.
    pub fn acquired_configuration(
        &self,
        members: BTreeMap<MemberId, MemberUri>,
        roles: BTreeMap<String, MemberId>,
    ) {
        let mut state = self.common.state().borrow_mut();
        let configuration = state.configuration_mut();
        configuration.set_members(members);
        configuration.set_roles(roles);
    }

    /// The local member is now part of the cluster.
    ///
    /// # Errors
    ///
    /// Returns [`PaxosError::NotBound`] if no address was bound yet.
    pub fn joined(&self) -> Result<(), PaxosError> {
        let me = self.common.my_id();
        let bound_at = self.common.bound_at().ok_or(PaxosError::NotBound)?;
        let configuration = {
            let mut state = self.common.state().borrow_mut();
            state.configuration_mut().joined(me, bound_at);
            state.configuration().clone()
        };
        info!(me = %me, cluster = configuration.name(), "entered cluster");
        self.listeners
            .notify(self.common.executor(), move |l| {
                l.entered_cluster(&configuration)
            });
        Ok(())
    }

    /// The local member left the cluster.
    pub fn left(&self) {
        self.common.cancel_all_timeouts();
        self.common
            .state()
            .borrow_mut()
            .configuration_mut()
            .left_all();
        info!(me = %self.common.my_id(), "left cluster");
        self.listeners
            .notify(self.common.executor(), |l| l.left_cluster());
    }

    /// Peer `member` joined at `uri`.
    pub fn joined_member(&self, member: MemberId, uri: MemberUri) {
        let me = self.common.my_id();
        let in_cluster = {
            let mut state = self.common.state().borrow_mut();
            state.configuration_mut().joined(member, uri.clone());
            state.configuration().members().contains_key(&me)
        };
        self.inner.borrow_mut().currently_joining.remove(&member);

        if in_cluster {
            info!(member = %member, uri = %uri, "member joined");
            self.listeners
                .notify(self.common.executor(), move |l| l.joined_cluster(member, &uri));
        } else {
            debug!(member = %member, "member joined before us, not announcing");
        }
    }

    /// Peer `member` left.
    pub fn member_left(&self, member: MemberId) {
        let uri = self
            .common
            .state()
            .borrow_mut()
            .configuration_mut()
            .left(member);
        self.inner.borrow_mut().elector_versions.remove(&member);
        info!(member = %member, "member left");
        self.listeners.notify(self.common.executor(), move |l| {
            l.member_left(member, uri.as_ref())
        });
    }

    /// `member` was elected to `role`.
    ///
    /// Returns `false` if the result was stale and dropped.
    pub fn elected(&self, role: &str, member: MemberId, stamp: Option<ElectorStamp>) -> bool {
        if !self.accept_stamp(role, stamp) {
            return false;
        }
        let uri = {
            let mut state = self.common.state().borrow_mut();
            state.configuration_mut().elected(role, member);
            state.configuration().uri_for_id(member).cloned()
        };
        info!(role = role, member = %member, "elected");
        let role = role.to_string();
        self.listeners.notify(self.common.executor(), move |l| {
            l.elected(&role, member, uri.as_ref())
        });
        true
    }

    /// `member` no longer holds `role`.
    ///
    /// Returns `false` if the result was stale and dropped.
    pub fn unelected(&self, role: &str, member: MemberId, stamp: Option<ElectorStamp>) -> bool {
        if !self.accept_stamp(role, stamp) {
            return false;
        }
        let uri = {
            let mut state = self.common.state().borrow_mut();
            state.configuration_mut().unelected(role);
            state.configuration().uri_for_id(member).cloned()
        };
        info!(role = role, member = %member, "unelected");
        let role = role.to_string();
        self.listeners.notify(self.common.executor(), move |l| {
            l.unelected(&role, member, uri.as_ref())
        });
        true
    }

    /// Apply an agreed configuration change.
    pub fn apply_change(&self, change: &ConfigurationChange) {
        match change {
            ConfigurationChange::Join { member, uri } => self.joined_member(*member, uri.clone()),
            ConfigurationChange::Leave { member } => self.member_left(*member),
            ConfigurationChange::Elected {
                role,
                member,
                stamp,
            } => {
                self.elected(role, *member, *stamp);
            }
            ConfigurationChange::Unelected {
                role,
                member,
                stamp,
            } => {
                self.unelected(role, *member, *stamp);
            }
        }
    }

    /// Whether the local member holds `role`.
    pub fn is_elected_as(&self, role: &str) -> bool {
        self.common
            .state()
            .borrow()
            .configuration()
            .elected_member(role)
            == Some(self.common.my_id())
    }

    /// Whether the configuration has any member.
    pub fn is_in_cluster(&self) -> bool {
        !self.common.state().borrow().configuration().members().is_empty()
    }

    /// Addresses contacted by the current join attempt.
    pub fn joining_instances(&self) -> Vec<MemberUri> {
        self.inner.borrow().joining_instances.clone()
    }

    /// Record a member discovered while joining.
    pub fn discovered_instance(&self, request: ConfigurationRequest) {
        self.inner.borrow_mut().discovered_instances.push(request);
    }

    /// Members discovered by the current join attempt.
    pub fn discovered_instances(&self) -> Vec<ConfigurationRequest> {
        self.inner.borrow().discovered_instances.clone()
    }

    /// The cluster refused our join.
    pub fn join_denied(&self, response: ConfigurationResponse) {
        warn!(cluster = %response.cluster_name, "join denied");
        self.inner.borrow_mut().join_denied = Some(response);
    }

    /// Whether the current join attempt was denied.
    pub fn has_join_been_denied(&self) -> bool {
        self.inner.borrow().join_denied.is_some()
    }

    /// The configuration sent along with the denial.
    ///
    /// # Errors
    ///
    /// Returns [`PaxosError::JoinNotDenied`] if no join was denied.
    pub fn join_denied_configuration_response(&self) -> Result<ConfigurationResponse, PaxosError> {
        self.inner
            .borrow()
            .join_denied
            .clone()
            .ok_or(PaxosError::JoinNotDenied)
    }

    /// Members other than the local one.
    pub fn other_instances(&self) -> Vec<MemberId> {
        let me = self.common.my_id();
        self.common
            .member_ids()
            .into_iter()
            .filter(|member| *member != me)
            .collect()
    }

    /// Remember that `member` is joining from `uri`.
    pub fn instance_is_joining(&self, member: MemberId, uri: MemberUri) {
        self.inner.borrow_mut().currently_joining.insert(member, uri);
    }

    /// Whether `member` is already joining from an address other than `uri`.
    pub fn is_instance_joining_from_different_uri(&self, member: MemberId, uri: &MemberUri) -> bool {
        self.inner
            .borrow()
            .currently_joining
            .get(&member)
            .is_some_and(|joining| joining != uri)
    }

    /// Human-readable name: the `name` parameter of the bound address, else the id.
    pub fn my_name(&self) -> String {
        self.common
            .bound_at()
            .and_then(|uri| uri.param("name").map(str::to_string))
            .unwrap_or_else(|| self.common.my_id().to_string())
    }

    /// A join handshake reported `id` as the latest instance in the cluster.
    pub fn discovered_last_received_instance_id(&self, id: InstanceId) {
        self.learner.set_last_delivered_instance_id(id);
        self.learner.learned_instance_id(id);
        self.learner.set_next_instance_id(id.next());
    }

    /// Whether the failure detector has not failed `member`.
    pub fn is_currently_alive(&self, member: MemberId) -> bool {
        !self.heartbeat.failed().contains(&member)
    }

    /// Last instance delivered locally.
    pub fn last_delivered_instance_id(&self) -> Option<InstanceId> {
        self.learner.last_delivered_instance_id()
    }

    /// Deep copy of the join bookkeeping and listener list.
    pub fn snapshot(
        &self,
        common: ContextCommon,
        learner: Rc<LearnerContext>,
        heartbeat: Rc<HeartbeatContext>,
    ) -> Self {
        Self {
            common,
            learner,
            heartbeat,
            listeners: self.listeners.snapshot(),
            inner: RefCell::new(self.inner.borrow().clone()),
        }
    }

    fn accept_stamp(&self, role: &str, stamp: Option<ElectorStamp>) -> bool {
        let Some(stamp) = stamp else {
            return true;
        };
        let mut inner = self.inner.borrow_mut();
        let last = inner.elector_versions.entry(stamp.elector).or_insert(0);
        // Version 1 is the first result of a restarted elector.
        if stamp.version > 1 && stamp.version < *last {
            warn!(
                role = role,
                elector = %stamp.elector,
                version = stamp.version,
                last_version = *last,
                "dropping stale election result"
            );
            return false;
        }
        *last = stamp.version;
        true
    }
}
