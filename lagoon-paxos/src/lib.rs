//! # Lagoon Paxos: Multi-Paxos context layer
//!
//! This crate holds the per-member state behind a Multi-Paxos cluster:
//! membership, failure detection, per-role leader election and the
//! bookkeeping of the classical Paxos roles. It does not send messages or
//! run state machines. A dispatcher drives it one message at a time and
//! reads back what to do next.
//!
//! ## Roles
//!
//! | Role | Owns |
//! |---|---|
//! | [`AcceptorContext`] | promised ballots and accepted values |
//! | [`ProposerContext`] | instance allocation, bookings, pending values |
//! | [`LearnerContext`] | learned and delivered instance ids |
//! | [`HeartbeatContext`] | suspicions and the failed set |
//! | [`ClusterContext`] | membership, joins, elected roles |
//! | [`ElectionContext`] | election rounds and votes |
//! | [`AtomicBroadcastContext`] | broadcast subscribers |
//!
//! All roles of one member share a single [`SharedClusterState`] and a
//! single [`ConsensusInstanceStore`], and are assembled by
//! [`PaxosContext::builder`].
//!
//! ## Threading
//!
//! Role state is single-threaded (`Rc`/`RefCell`). The only asynchronous
//! boundary is the [`Executor`](lagoon_core::Executor) listener
//! notifications are submitted to.
//!
//! ## Crate Organization
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`types`] | `InstanceId`, `Ballot`, configuration changes, `PaxosError` |
//! | [`configuration`] | `ClusterConfiguration`: members and elected roles |
//! | [`store`] | `ConsensusInstanceStore` trait and in-memory implementation |
//! | [`state`] | `SharedClusterState` and the `ContextCommon` accessors |
//! | [`quorum`] | quorum arithmetic |
//! | [`context`] | `PaxosContext` composition root |

#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]

pub mod acceptor;
pub mod atomic_broadcast;
pub mod cluster;
pub mod configuration;
pub mod context;
pub mod election;
pub mod heartbeat;
pub mod learner;
pub mod proposer;
pub mod quorum;
pub mod settings;
pub mod state;
pub mod store;
pub mod types;

pub use acceptor::AcceptorContext;
pub use atomic_broadcast::{AtomicBroadcastContext, AtomicBroadcastListener};
pub use cluster::{ClusterContext, ClusterListener};
pub use configuration::ClusterConfiguration;
pub use context::{PaxosContext, PaxosContextBuilder};
pub use election::{
    ElectionContext, ElectionCredentials, ElectionCredentialsProvider, ElectionRole,
    ElectionRound, Vote, VoteCredentials, WinnerStrategy,
};
pub use heartbeat::{HeartbeatContext, HeartbeatListener};
pub use learner::LearnerContext;
pub use proposer::ProposerContext;
pub use settings::{PaxosSettings, PaxosSettingsBuilder};
pub use state::{ContextCommon, SharedClusterState, SharedState};
pub use store::{ConsensusInstanceStore, InMemoryConsensusStore, PaxosInstanceRecord, SharedStore};
pub use types::{
    Ballot, ConfigurationChange, ConfigurationRequest, ConfigurationResponse, ElectorStamp,
    InstanceId, PaxosError,
};
