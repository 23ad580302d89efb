//! Composition root: one member's roles built around one shared state.
//!
//! ```text
//!              SharedClusterState          ConsensusInstanceStore
//!                      │                     │
//!   ┌────────┬─────────┼─────────┬───────────┼────────────┐
//!   ▼        ▼         ▼         ▼           ▼            ▼
//! acceptor proposer heartbeat  learner ─► cluster ─► election   atomic broadcast
//!                      ▲  │        ▲         │
//!                      │  └─ weak ─┴─────────┘   (wired after construction)
//!                      └─────── strong ──────────
//! ```
//!
//! Roles are constructed in dependency order. The heartbeat needs the
//! cluster and learner, which are built after it, so it receives weak
//! references to them in a final wiring step.

use std::rc::Rc;
use std::sync::Arc;

use lagoon_core::{Executor, InMemoryTimeouts, InlineExecutor, MemberId, MemberUri, Timeouts};
use tracing::debug;

use crate::acceptor::AcceptorContext;
use crate::atomic_broadcast::AtomicBroadcastContext;
use crate::cluster::ClusterContext;
use crate::configuration::ClusterConfiguration;
use crate::election::{ElectionContext, ElectionRole};
use crate::heartbeat::HeartbeatContext;
use crate::learner::LearnerContext;
use crate::proposer::ProposerContext;
use crate::settings::PaxosSettings;
use crate::state::{ContextCommon, SharedClusterState};
use crate::store::{InMemoryConsensusStore, SharedStore};
use crate::types::PaxosError;

/// All roles of one member.
#[derive(Debug)]
pub struct PaxosContext {
    common: ContextCommon,
    store: SharedStore,
    settings: PaxosSettings,
    acceptor: Rc<AcceptorContext>,
    proposer: Rc<ProposerContext>,
    heartbeat: Rc<HeartbeatContext>,
    learner: Rc<LearnerContext>,
    cluster: Rc<ClusterContext>,
    election: Rc<ElectionContext>,
    atomic_broadcast: Rc<AtomicBroadcastContext>,
}

impl PaxosContext {
    /// Start building the context of member `me`.
    pub fn builder(me: MemberId) -> PaxosContextBuilder {
        PaxosContextBuilder::new(me)
    }

    /// Accessors shared by every role.
    pub fn common(&self) -> &ContextCommon {
        &self.common
    }

    /// The instance store.
    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    /// Tuning knobs this context was built with.
    pub fn settings(&self) -> &PaxosSettings {
        &self.settings
    }

    /// The acceptor role.
    pub fn acceptor(&self) -> &Rc<AcceptorContext> {
        &self.acceptor
    }

    /// The proposer role.
    pub fn proposer(&self) -> &Rc<ProposerContext> {
        &self.proposer
    }

    /// The heartbeat role.
    pub fn heartbeat(&self) -> &Rc<HeartbeatContext> {
        &self.heartbeat
    }

    /// The learner role.
    pub fn learner(&self) -> &Rc<LearnerContext> {
        &self.learner
    }

    /// The cluster role.
    pub fn cluster(&self) -> &Rc<ClusterContext> {
        &self.cluster
    }

    /// The election role.
    pub fn election(&self) -> &Rc<ElectionContext> {
        &self.election
    }

    /// The atomic broadcast role.
    pub fn atomic_broadcast(&self) -> &Rc<AtomicBroadcastContext> {
        &self.atomic_broadcast
    }

    /// Isolated copy of this context.
    ///
    /// Shared state, suspicions, votes, bookings, joining bookkeeping and
    /// listener lists are copied, so later changes on either side stay
    /// invisible to the other. The instance store is shared.
    ///
    /// # Errors
    ///
    /// Returns an error if the copied heartbeat cannot be wired.
    pub fn snapshot(
        &self,
        timeouts: Rc<dyn Timeouts>,
        executor: Arc<dyn Executor>,
    ) -> Result<Self, PaxosError> {
        let state = self.common.state().borrow().clone().shared();
        let common = ContextCommon::new(state, timeouts, executor);

        let acceptor = Rc::new(self.acceptor.snapshot(common.clone()));
        let proposer = Rc::new(self.proposer.snapshot(common.clone()));
        let heartbeat = Rc::new(self.heartbeat.snapshot(common.clone()));
        let learner = Rc::new(self.learner.snapshot(common.clone(), heartbeat.clone()));
        let cluster = Rc::new(self.cluster.snapshot(
            common.clone(),
            learner.clone(),
            heartbeat.clone(),
        ));
        let election = Rc::new(self.election.snapshot(
            common.clone(),
            cluster.clone(),
            heartbeat.clone(),
        ));
        let atomic_broadcast = Rc::new(self.atomic_broadcast.snapshot(common.clone()));
        heartbeat.wire(&cluster, &learner)?;

        debug!(me = %common.my_id(), "context snapshot taken");
        Ok(Self {
            common,
            store: self.store.clone(),
            settings: self.settings.clone(),
            acceptor,
            proposer,
            heartbeat,
            learner,
            cluster,
            election,
            atomic_broadcast,
        })
    }
}

/// Builder for [`PaxosContext`].
///
/// # Example
///
/// ```rust
/// use lagoon_core::MemberId;
/// use lagoon_paxos::{ElectionRole, PaxosContext};
///
/// let context = PaxosContext::builder(MemberId(1))
///     .roles(vec![ElectionRole::new("coordinator")])
///     .build()
///     .expect("context");
/// assert_eq!(context.common().my_id(), MemberId(1));
/// ```
pub struct PaxosContextBuilder {
    me: MemberId,
    bound_at: Option<MemberUri>,
    configuration: ClusterConfiguration,
    roles: Vec<ElectionRole>,
    settings: PaxosSettings,
    store: Option<SharedStore>,
    timeouts: Option<Rc<dyn Timeouts>>,
    executor: Option<Arc<dyn Executor>>,
}

impl PaxosContextBuilder {
    fn new(me: MemberId) -> Self {
        Self {
            me,
            bound_at: None,
            configuration: ClusterConfiguration::default(),
            roles: Vec::new(),
            settings: PaxosSettings::default(),
            store: None,
            timeouts: None,
            executor: None,
        }
    }

    /// Address the local member is bound at.
    pub fn bound_at(mut self, uri: MemberUri) -> Self {
        self.bound_at = Some(uri);
        self
    }

    /// Initial cluster configuration.
    pub fn configuration(mut self, configuration: ClusterConfiguration) -> Self {
        self.configuration = configuration;
        self
    }

    /// Roles elections are held for.
    pub fn roles(mut self, roles: Vec<ElectionRole>) -> Self {
        self.roles = roles;
        self
    }

    /// Tuning knobs.
    pub fn settings(mut self, settings: PaxosSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Instance store. Defaults to an [`InMemoryConsensusStore`] retaining
    /// as many delivered instances as the settings ask for.
    pub fn store(mut self, store: SharedStore) -> Self {
        self.store = Some(store);
        self
    }

    /// Timeout service. Defaults to [`InMemoryTimeouts`].
    pub fn timeouts(mut self, timeouts: Rc<dyn Timeouts>) -> Self {
        self.timeouts = Some(timeouts);
        self
    }

    /// Executor for listener notifications. Defaults to [`InlineExecutor`].
    pub fn executor(mut self, executor: Arc<dyn Executor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Build the roles and wire them together.
    ///
    /// # Errors
    ///
    /// Returns an error if the heartbeat cannot be wired.
    pub fn build(self) -> Result<PaxosContext, PaxosError> {
        let mut state = SharedClusterState::new(self.me, self.configuration);
        if let Some(uri) = self.bound_at {
            state.set_bound_at(uri);
        }
        let store = self.store.unwrap_or_else(|| {
            InMemoryConsensusStore::with_retention(self.settings.retained_delivered_instances())
                .shared()
        });
        let timeouts = self
            .timeouts
            .unwrap_or_else(|| Rc::new(InMemoryTimeouts::new()));
        let executor = self.executor.unwrap_or_else(|| Arc::new(InlineExecutor));
        let common = ContextCommon::new(state.shared(), timeouts, executor);

        let acceptor = Rc::new(AcceptorContext::new(common.clone(), store.clone()));
        let proposer = Rc::new(ProposerContext::new(
            common.clone(),
            store.clone(),
            self.settings.clone(),
        ));
        let heartbeat = Rc::new(HeartbeatContext::new(common.clone()));
        let learner = Rc::new(LearnerContext::new(
            common.clone(),
            store.clone(),
            heartbeat.clone(),
        ));
        let cluster = Rc::new(ClusterContext::new(
            common.clone(),
            learner.clone(),
            heartbeat.clone(),
        ));
        let election = Rc::new(ElectionContext::new(
            common.clone(),
            cluster.clone(),
            heartbeat.clone(),
            self.roles,
        ));
        let atomic_broadcast = Rc::new(AtomicBroadcastContext::new(common.clone()));
        heartbeat.wire(&cluster, &learner)?;

        debug!(me = %self.me, "context built");
        Ok(PaxosContext {
            common,
            store,
            settings: self.settings,
            acceptor,
            proposer,
            heartbeat,
            learner,
            cluster,
            election,
            atomic_broadcast,
        })
    }
}
