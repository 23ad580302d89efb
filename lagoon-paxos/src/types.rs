//! Core types for the Multi-Paxos context layer.
//!
//! - [`InstanceId`]: one consensus slot in the atomic broadcast order
//! - [`Ballot`]: orders competing proposals within one instance
//! - [`ElectorStamp`]: versioned origin of an election result
//! - [`ConfigurationChange`]: membership / role change carried as a broadcast value
//! - [`ConfigurationRequest`] / [`ConfigurationResponse`]: join handshake values
//! - [`PaxosError`]: error type for contract violations

use std::collections::BTreeMap;

use lagoon_core::{CodecError, MemberId, MemberUri};
use serde::{Deserialize, Serialize};

/// Instance id: the sequence number of one Paxos consensus round.
///
/// Every agreed value occupies exactly one instance, so instance ids also
/// give the delivery order of the atomic broadcast.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct InstanceId(pub u64);

impl InstanceId {
    /// The first instance of a fresh cluster.
    pub const FIRST: Self = Self(0);

    /// Create an instance id.
    pub const fn new(n: u64) -> Self {
        Self(n)
    }

    /// The following instance.
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl std::fmt::Display for InstanceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "instance({})", self.0)
    }
}

/// Ballot number used to order proposals within one instance.
///
/// An acceptor never promises a ballot lower than one it already promised
/// for the same instance.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct Ballot(pub u64);

impl Ballot {
    /// Create a ballot.
    pub const fn new(n: u64) -> Self {
        Self(n)
    }

    /// The next higher ballot.
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl std::fmt::Display for Ballot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ballot({})", self.0)
    }
}

/// Identifies which elector produced an election result, and when.
///
/// Each elector bumps its version for every result it announces, so a
/// receiver can drop results older than the last one it applied from the
/// same elector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ElectorStamp {
    /// Member that ran the election.
    pub elector: MemberId,
    /// That elector's version counter at announcement time.
    pub version: u64,
}

impl ElectorStamp {
    /// Create a stamp.
    pub const fn new(elector: MemberId, version: u64) -> Self {
        Self { elector, version }
    }
}

/// A change to the cluster configuration, agreed on as a broadcast value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigurationChange {
    /// `member` joins, bound at `uri`.
    Join {
        /// The joining member.
        member: MemberId,
        /// Address the joining member is bound at.
        uri: MemberUri,
    },
    /// `member` leaves the cluster.
    Leave {
        /// The leaving member.
        member: MemberId,
    },
    /// `member` now holds `role`.
    Elected {
        /// Role name.
        role: String,
        /// New holder.
        member: MemberId,
        /// Origin of the result; `None` disables the staleness check.
        stamp: Option<ElectorStamp>,
    },
    /// `member` no longer holds `role`.
    Unelected {
        /// Role name.
        role: String,
        /// Previous holder.
        member: MemberId,
        /// Origin of the result; `None` disables the staleness check.
        stamp: Option<ElectorStamp>,
    },
}

/// A member asking to join, as seen by the members it contacts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigurationRequest {
    /// Logical id of the joining member.
    pub joining_id: MemberId,
    /// Address it is bound at.
    pub joining_uri: MemberUri,
}

/// The configuration a cluster member hands to a joining member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigurationResponse {
    /// Current members.
    pub members: BTreeMap<MemberId, MemberUri>,
    /// Current role holders.
    pub roles: BTreeMap<String, MemberId>,
    /// Latest instance the responder has received, if any.
    pub latest_received_instance: Option<InstanceId>,
    /// Name of the cluster.
    pub cluster_name: String,
}

/// Errors surfaced by the context layer.
///
/// These are contract violations by the caller; normal protocol outcomes
/// (no winner yet, failed members, learn misses) are never errors.
#[derive(Debug, thiserror::Error)]
pub enum PaxosError {
    /// A proposer tried to book an instance without a value.
    #[error("cannot book {instance} with an empty value")]
    EmptyBookingValue {
        /// The instance being booked.
        instance: InstanceId,
    },

    /// A promise was requested for a ballot below the one already promised.
    #[error("stale ballot for {instance}: promised {current}, got {seen}")]
    StaleBallot {
        /// The instance.
        instance: InstanceId,
        /// The ballot already promised.
        current: Ballot,
        /// The lower ballot that was offered.
        seen: Ballot,
    },

    /// The local member has no bound address yet.
    #[error("member is not bound to an address")]
    NotBound,

    /// A late-bound role reference was used before the context was wired.
    #[error("{0} reference used before wiring")]
    NotWired(&'static str),

    /// The context was wired twice.
    #[error("context already wired")]
    AlreadyWired,

    /// The denied-join response was read although no join was denied.
    #[error("join has not been denied")]
    JoinNotDenied,

    /// Payload serialization failed.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instance_id_ordering() {
        assert!(InstanceId::new(1) < InstanceId::new(2));
        assert_eq!(InstanceId::FIRST.next(), InstanceId::new(1));
        assert_eq!(InstanceId::new(7).to_string(), "instance(7)");
    }

    #[test]
    fn test_ballot_ordering() {
        assert!(Ballot::new(3) > Ballot::default());
        assert_eq!(Ballot::new(3).next(), Ballot::new(4));
        assert_eq!(Ballot::new(3).to_string(), "ballot(3)");
    }

    #[test]
    fn test_error_display() {
        let err = PaxosError::StaleBallot {
            instance: InstanceId::new(4),
            current: Ballot::new(5),
            seen: Ballot::new(2),
        };
        assert_eq!(
            err.to_string(),
            "stale ballot for instance(4): promised ballot(5), got ballot(2)"
        );
        assert_eq!(
            PaxosError::NotWired("cluster").to_string(),
            "cluster reference used before wiring"
        );
    }
}
