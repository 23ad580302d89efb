//! Learner role: learned and delivered instance tracking.
//!
//! ```text
//! learned_instance_id(i):    last_learned = max(last_learned, i)
//!                            cluster_max  = max(cluster_max, last_learned)
//! set_last_delivered(i):     last_delivered = i; store may prune below i
//! has_delivered_all_known:   last_delivered == cluster_max
//! ```

use std::cell::RefCell;
use std::rc::Rc;

use lagoon_core::{JsonCodec, MemberId, Payload, PayloadCodec};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::heartbeat::HeartbeatContext;
use crate::state::ContextCommon;
use crate::store::{PaxosInstanceRecord, SharedStore};
use crate::types::{InstanceId, PaxosError};

#[derive(Debug, Clone, Default)]
struct LearnerState {
    last_delivered_instance_id: Option<InstanceId>,
    last_learned_instance_id: Option<InstanceId>,
    last_learn_miss: Option<InstanceId>,
}

/// Learner state for one member.
#[derive(Debug)]
pub struct LearnerContext {
    common: ContextCommon,
    store: SharedStore,
    heartbeat: Rc<HeartbeatContext>,
    codec: JsonCodec,
    inner: RefCell<LearnerState>,
}

impl LearnerContext {
    /// Create the learner.
    pub fn new(common: ContextCommon, store: SharedStore, heartbeat: Rc<HeartbeatContext>) -> Self {
        Self {
            common,
            store,
            heartbeat,
            codec: JsonCodec,
            inner: RefCell::new(LearnerState::default()),
        }
    }

    /// Shared accessors.
    pub fn common(&self) -> &ContextCommon {
        &self.common
    }

    /// Last instance fully applied locally.
    pub fn last_delivered_instance_id(&self) -> Option<InstanceId> {
        self.inner.borrow().last_delivered_instance_id
    }

    /// Mark `id` as delivered and let the store prune below it.
    pub fn set_last_delivered_instance_id(&self, id: InstanceId) {
        self.inner.borrow_mut().last_delivered_instance_id = Some(id);
        self.store.borrow_mut().last_delivered(id);
    }

    /// Highest instance learned locally.
    pub fn last_learned_instance_id(&self) -> Option<InstanceId> {
        self.inner.borrow().last_learned_instance_id
    }

    /// Record that `id` was learned.
    pub fn learned_instance_id(&self, id: InstanceId) {
        let learned = {
            let mut inner = self.inner.borrow_mut();
            let learned = inner.last_learned_instance_id.map_or(id, |last| last.max(id));
            inner.last_learned_instance_id = Some(learned);
            learned
        };
        let mut state = self.common.state().borrow_mut();
        if state
            .last_known_learned_instance_in_cluster()
            .map_or(true, |known| learned > known)
        {
            debug!(instance = %learned, "raising cluster learned maximum");
            state.set_last_known_learned_instance_in_cluster(Some(learned), None);
        }
    }

    /// Whether everything known to be learned in the cluster was delivered.
    pub fn has_delivered_all_known_instances(&self) -> bool {
        self.last_delivered_instance_id() == self.last_known_learned_instance_in_cluster()
    }

    /// Reset learning progress when the local member leaves.
    pub fn leave(&self) {
        {
            let mut inner = self.inner.borrow_mut();
            inner.last_delivered_instance_id = None;
            inner.last_learned_instance_id = None;
        }
        self.common
            .state()
            .borrow_mut()
            .set_last_known_learned_instance_in_cluster(None, None);
    }

    /// Record for `id`, created if absent.
    pub fn paxos_instance(&self, id: InstanceId) -> PaxosInstanceRecord {
        self.store.borrow_mut().get_instance(id).clone()
    }

    /// Report that the value of `id` could not be retrieved.
    ///
    /// Repeated reports for the same instance are logged once. Returns
    /// whether this report was logged.
    pub fn notify_learn_miss(&self, id: InstanceId) -> bool {
        let mut inner = self.inner.borrow_mut();
        if inner.last_learn_miss == Some(id) {
            return false;
        }
        warn!(
            instance = %id,
            "no learned value for instance; the value may have been pruned from every member"
        );
        inner.last_learn_miss = Some(id);
        true
    }

    /// Highest instance known to be learned in the cluster.
    pub fn last_known_learned_instance_in_cluster(&self) -> Option<InstanceId> {
        self.common
            .state()
            .borrow()
            .last_known_learned_instance_in_cluster()
    }

    /// Record a learned maximum reported by `from`.
    pub fn set_last_known_learned_instance_in_cluster(
        &self,
        id: Option<InstanceId>,
        from: Option<MemberId>,
    ) {
        self.common
            .state()
            .borrow_mut()
            .set_last_known_learned_instance_in_cluster(id, from);
    }

    /// Member that reported the cluster learned maximum.
    pub fn last_known_alive_up_to_date_instance(&self) -> Option<MemberId> {
        self.common
            .state()
            .borrow()
            .last_known_alive_up_to_date_instance()
    }

    /// Overwrite the next instance id to propose in.
    pub fn set_next_instance_id(&self, id: InstanceId) {
        self.common.state().borrow_mut().set_next_instance_id(id);
    }

    /// Members the failure detector considers alive.
    pub fn alive(&self) -> Vec<MemberId> {
        self.heartbeat.alive_members()
    }

    /// Encode a broadcast value.
    ///
    /// # Errors
    ///
    /// Returns [`PaxosError::Codec`] if serialization fails.
    pub fn encode_payload<T: Serialize>(&self, value: &T) -> Result<Payload, PaxosError> {
        Ok(self.codec.encode(value)?)
    }

    /// Decode a broadcast value.
    ///
    /// # Errors
    ///
    /// Returns [`PaxosError::Codec`] if the payload does not decode as `T`.
    pub fn decode_payload<T: DeserializeOwned>(&self, payload: &Payload) -> Result<T, PaxosError> {
        Ok(self.codec.decode(payload)?)
    }

    /// Copy of the learner counters, sharing the store.
    pub fn snapshot(&self, common: ContextCommon, heartbeat: Rc<HeartbeatContext>) -> Self {
        Self {
            common,
            store: self.store.clone(),
            heartbeat,
            codec: self.codec,
            inner: RefCell::new(self.inner.borrow().clone()),
        }
    }
}
