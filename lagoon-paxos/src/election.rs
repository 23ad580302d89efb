//! Election role: per-role leader election.
//!
//! The elector (the alive member with the smallest id) opens an
//! [`ElectionRound`] for a role and collects one vote per suggested
//! candidate. Once as many votes as there are non-failed members have been
//! recorded, the round is consumed and a [`WinnerStrategy`] picks the
//! winner among the electable candidates, best credentials first.
//!
//! | Strategy | Winner |
//! |---|---|
//! | `Majority` | best candidate |
//! | `Promote(n)` | `n`, if it is an electable candidate |
//! | `Demote(n)` | best candidate other than `n` |
//!
//! Credentials are any `Ord` type, greater meaning better. The default,
//! [`ElectionCredentials`], ranks by committed transactions.

use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;

use lagoon_core::MemberId;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::cluster::ClusterContext;
use crate::heartbeat::HeartbeatContext;
use crate::quorum;
use crate::state::ContextCommon;
use crate::types::ElectorStamp;

/// A role members can be elected to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ElectionRole {
    name: String,
}

impl ElectionRole {
    /// Create a role.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    /// Role name.
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// What a member offers when suggesting a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElectionCredentials {
    /// Last transaction committed by the candidate.
    pub last_committed_tx: u64,
    /// Whether the candidate currently holds the role.
    pub currently_elected: bool,
    /// The candidate.
    pub member: MemberId,
}

impl Ord for ElectionCredentials {
    /// Better credentials compare greater: more transactions, then the
    /// current holder, then the lower member id.
    fn cmp(&self, other: &Self) -> Ordering {
        self.last_committed_tx
            .cmp(&other.last_committed_tx)
            .then(self.currently_elected.cmp(&other.currently_elected))
            .then(other.member.cmp(&self.member))
    }
}

impl PartialOrd for ElectionCredentials {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Credentials attached to a vote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum VoteCredentials<C = ElectionCredentials> {
    /// Blank vote: the suggesting member cannot take the role.
    NotElectable,
    /// The candidate's credentials.
    Electable(C),
}

/// Supplies this member's credentials for a role.
pub trait ElectionCredentialsProvider<C = ElectionCredentials> {
    /// Credentials for `role`.
    fn credentials(&self, role: &str) -> VoteCredentials<C>;
}

/// The latest vote for one suggested candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vote<C = ElectionCredentials> {
    /// The suggested winner.
    pub suggested: MemberId,
    /// Its credentials.
    pub credentials: VoteCredentials<C>,
}

/// How a round picks its winner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WinnerStrategy {
    /// Best credentials win.
    Majority,
    /// Only the given member may win.
    Promote(MemberId),
    /// Anyone but the given member may win.
    Demote(MemberId),
}

impl WinnerStrategy {
    /// Pick a winner from `votes`, or `None` if no candidate qualifies.
    pub fn pick_winner<'a, C: Ord + 'a>(
        &self,
        votes: impl IntoIterator<Item = &'a Vote<C>>,
    ) -> Option<MemberId> {
        let mut ranked: Vec<&Vote<C>> = votes
            .into_iter()
            .filter(|vote| matches!(vote.credentials, VoteCredentials::Electable(_)))
            .collect();
        ranked.sort_by(|a, b| b.credentials.cmp(&a.credentials));

        let mut candidates = ranked.into_iter().map(|vote| vote.suggested);
        match *self {
            WinnerStrategy::Majority => candidates.next(),
            WinnerStrategy::Promote(node) => candidates.find(|candidate| *candidate == node),
            WinnerStrategy::Demote(node) => candidates.find(|candidate| *candidate != node),
        }
    }
}

/// An election in progress for one role.
#[derive(Debug, Clone)]
pub struct ElectionRound<C = ElectionCredentials> {
    strategy: WinnerStrategy,
    votes: BTreeMap<MemberId, Vote<C>>,
}

impl<C: Ord> ElectionRound<C> {
    /// Open a round.
    pub fn new(strategy: WinnerStrategy) -> Self {
        Self {
            strategy,
            votes: BTreeMap::new(),
        }
    }

    /// The strategy of this round.
    pub fn strategy(&self) -> WinnerStrategy {
        self.strategy
    }

    /// Votes recorded so far, keyed by suggested candidate.
    pub fn votes(&self) -> &BTreeMap<MemberId, Vote<C>> {
        &self.votes
    }

    fn pick_winner(&self) -> Option<MemberId> {
        self.strategy.pick_winner(self.votes.values())
    }
}

#[derive(Clone)]
struct ElectionState<C> {
    elections: BTreeMap<String, ElectionRound<C>>,
    credentials_provider: Option<Rc<dyn ElectionCredentialsProvider<C>>>,
    elector_version: u64,
}

impl<C> Default for ElectionState<C> {
    fn default() -> Self {
        Self {
            elections: BTreeMap::new(),
            credentials_provider: None,
            elector_version: 0,
        }
    }
}

/// Election state for one member, ranking candidates by `C`.
pub struct ElectionContext<C = ElectionCredentials> {
    common: ContextCommon,
    cluster: Rc<ClusterContext>,
    heartbeat: Rc<HeartbeatContext>,
    roles: Vec<ElectionRole>,
    inner: RefCell<ElectionState<C>>,
}

impl<C: std::fmt::Debug> std::fmt::Debug for ElectionContext<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("ElectionContext")
            .field("roles", &self.roles)
            .field("elections", &inner.elections)
            .field("elector_version", &inner.elector_version)
            .finish_non_exhaustive()
    }
}

impl<C: Ord + Clone> ElectionContext<C> {
    /// Create the election role for `roles`.
    pub fn new(
        common: ContextCommon,
        cluster: Rc<ClusterContext>,
        heartbeat: Rc<HeartbeatContext>,
        roles: Vec<ElectionRole>,
    ) -> Self {
        Self {
            common,
            cluster,
            heartbeat,
            roles,
            inner: RefCell::new(ElectionState::default()),
        }
    }

    /// Shared accessors.
    pub fn common(&self) -> &ContextCommon {
        &self.common
    }

    /// Install the provider of this member's credentials.
    pub fn set_credentials_provider(&self, provider: Rc<dyn ElectionCredentialsProvider<C>>) {
        self.inner.borrow_mut().credentials_provider = Some(provider);
    }

    /// This member's credentials for `role`; blank without a provider.
    pub fn credentials_for_role(&self, role: &str) -> VoteCredentials<C> {
        let provider = self.inner.borrow().credentials_provider.clone();
        match provider {
            Some(provider) => provider.credentials(role),
            None => VoteCredentials::NotElectable,
        }
    }

    /// A brand new cluster: the creator takes every role.
    pub fn created(&self) {
        let me = self.common.my_id();
        for role in &self.roles {
            self.cluster.elected(role.name(), me, None);
        }
    }

    /// Roles elections are held for.
    pub fn possible_roles(&self) -> &[ElectionRole] {
        &self.roles
    }

    /// Roles held by `member`.
    pub fn roles_of(&self, member: MemberId) -> Vec<String> {
        self.common
            .state()
            .borrow()
            .configuration()
            .roles_of(member)
    }

    /// Current holder of `role`.
    pub fn elected(&self, role: &str) -> Option<MemberId> {
        self.common
            .state()
            .borrow()
            .configuration()
            .elected_member(role)
    }

    /// Strip `node` of every role it holds. Returns those roles.
    pub fn node_failed(&self, node: MemberId) -> Vec<String> {
        let roles = self.roles_of(node);
        {
            let mut state = self.common.state().borrow_mut();
            for role in &roles {
                state.configuration_mut().unelected(role);
            }
        }
        if !roles.is_empty() {
            info!(node = %node, roles = ?roles, "demoted failed member");
        }
        roles
    }

    /// Clear the holder of `role`.
    pub fn unelect(&self, role: &str) {
        self.common
            .state()
            .borrow_mut()
            .configuration_mut()
            .unelected(role);
    }

    /// Whether a round is open for `role`.
    pub fn is_election_process_in_progress(&self, role: &str) -> bool {
        self.inner.borrow().elections.contains_key(role)
    }

    /// Open a round for `role` won by the best credentials.
    pub fn start_election_process(&self, role: &str) {
        info!(role = role, "starting election");
        self.open_round(role, WinnerStrategy::Majority);
    }

    /// Open a round for `role` that only `node` can win.
    pub fn start_promotion_process(&self, role: &str, node: MemberId) {
        info!(role = role, node = %node, "starting promotion");
        self.open_round(role, WinnerStrategy::Promote(node));
    }

    /// Open a round for `role` that `node` cannot win.
    pub fn start_demotion_process(&self, role: &str, node: MemberId) {
        info!(role = role, node = %node, "starting demotion");
        self.open_round(role, WinnerStrategy::Demote(node));
    }

    /// Record the latest vote suggesting `suggested` for `role`.
    ///
    /// Ignored when no round is open for the role.
    pub fn voted(&self, role: &str, suggested: MemberId, credentials: VoteCredentials<C>) {
        let mut inner = self.inner.borrow_mut();
        if let Some(round) = inner.elections.get_mut(role) {
            round.votes.insert(
                suggested,
                Vote {
                    suggested,
                    credentials,
                },
            );
            debug!(role = role, suggested = %suggested, votes = round.votes.len(), "vote recorded");
        }
    }

    /// The winner for `role`, once exactly the needed number of votes is in.
    ///
    /// Resolving consumes the round, even when no candidate qualifies.
    pub fn election_winner(&self, role: &str) -> Option<MemberId> {
        let needed = self.needed_vote_count();
        let round = {
            let mut inner = self.inner.borrow_mut();
            if inner.elections.get(role)?.votes.len() != needed {
                return None;
            }
            inner.elections.remove(role)?
        };
        let winner = round.pick_winner();
        info!(role = role, winner = ?winner, "election resolved");
        winner
    }

    /// Votes recorded for `role`.
    pub fn vote_count(&self, role: &str) -> usize {
        self.inner
            .borrow()
            .elections
            .get(role)
            .map_or(0, |round| round.votes.len())
    }

    /// Votes needed to resolve a round: members that are not failed.
    pub fn needed_vote_count(&self) -> usize {
        self.common
            .member_ids()
            .len()
            .saturating_sub(self.heartbeat.failed().len())
    }

    /// Drop the round for `role`.
    pub fn cancel_election(&self, role: &str) {
        self.inner.borrow_mut().elections.remove(role);
    }

    /// Roles nobody holds.
    pub fn roles_requiring_election(&self) -> Vec<String> {
        let state = self.common.state().borrow();
        self.roles
            .iter()
            .filter(|role| state.configuration().elected_member(role.name()).is_none())
            .map(|role| role.name().to_string())
            .collect()
    }

    /// Whether a majority of members is available for an election.
    pub fn election_ok(&self) -> bool {
        let total = self.common.member_ids().len();
        let available = total.saturating_sub(self.heartbeat.failed().len());
        quorum::is_quorum(available, total)
    }

    /// Whether the local member is part of a cluster.
    pub fn is_in_cluster(&self) -> bool {
        self.cluster.is_in_cluster()
    }

    /// Members the failure detector considers alive.
    pub fn alive(&self) -> Vec<MemberId> {
        self.heartbeat.alive_members()
    }

    /// Members in the failed set.
    pub fn failed(&self) -> BTreeSet<MemberId> {
        self.heartbeat.failed()
    }

    /// Whether `member` is in the failed set.
    pub fn is_failed(&self, member: MemberId) -> bool {
        self.heartbeat.failed().contains(&member)
    }

    /// Whether the local member runs elections: the smallest alive id.
    pub fn is_elector(&self) -> bool {
        self.alive().into_iter().min() == Some(self.common.my_id())
    }

    /// Whether `current` already has a vote in the round for `role`.
    pub fn has_currently_elected_voted(&self, role: &str, current: MemberId) -> bool {
        self.inner
            .borrow()
            .elections
            .get(role)
            .is_some_and(|round| round.votes.contains_key(&current))
    }

    /// Stamp for the next result announced by this member.
    pub fn next_elector_stamp(&self) -> ElectorStamp {
        let mut inner = self.inner.borrow_mut();
        inner.elector_version += 1;
        ElectorStamp::new(self.common.my_id(), inner.elector_version)
    }

    /// Deep copy of the open rounds.
    pub fn snapshot(
        &self,
        common: ContextCommon,
        cluster: Rc<ClusterContext>,
        heartbeat: Rc<HeartbeatContext>,
    ) -> Self {
        Self {
            common,
            cluster,
            heartbeat,
            roles: self.roles.clone(),
            inner: RefCell::new(self.inner.borrow().clone()),
        }
    }

    fn open_round(&self, role: &str, strategy: WinnerStrategy) {
        self.inner
            .borrow_mut()
            .elections
            .insert(role.to_string(), ElectionRound::new(strategy));
    }
}
