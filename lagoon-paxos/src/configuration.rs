//! Cluster configuration: membership and elected roles.

use std::collections::BTreeMap;

use lagoon_core::{MemberId, MemberUri};
use serde::{Deserialize, Serialize};

/// Default number of failures a cluster tolerates.
pub const DEFAULT_ALLOWED_FAILURES: usize = 1;

/// Current membership and role assignments of a cluster.
///
/// Members are kept in id order, so [`member_uris`](Self::member_uris)
/// returns a deterministic list. A member holds any number of roles; a role
/// is held by at most one member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterConfiguration {
    name: String,
    allowed_failures: usize,
    candidates: Vec<MemberUri>,
    members: BTreeMap<MemberId, MemberUri>,
    roles: BTreeMap<String, MemberId>,
}

impl ClusterConfiguration {
    /// Name of the coordinator role.
    pub const COORDINATOR: &'static str = "coordinator";

    /// Create an empty configuration for cluster `name`.
    pub fn new(name: impl Into<String>, candidates: Vec<MemberUri>) -> Self {
        Self {
            name: name.into(),
            allowed_failures: DEFAULT_ALLOWED_FAILURES,
            candidates,
            members: BTreeMap::new(),
            roles: BTreeMap::new(),
        }
    }

    /// Set the number of tolerated failures.
    pub fn with_allowed_failures(mut self, allowed_failures: usize) -> Self {
        self.allowed_failures = allowed_failures;
        self
    }

    /// Cluster name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of failures the cluster tolerates (`f`).
    pub fn allowed_failures(&self) -> usize {
        self.allowed_failures
    }

    /// Addresses contacted when joining.
    pub fn candidates(&self) -> &[MemberUri] {
        &self.candidates
    }

    /// Record that `member` is bound at `uri`.
    ///
    /// Returns `false` if the member was already known at that address.
    pub fn joined(&mut self, member: MemberId, uri: MemberUri) -> bool {
        if self.members.get(&member) == Some(&uri) {
            return false;
        }
        self.members.insert(member, uri);
        true
    }

    /// Remove `member` and every role it held. Returns its former address.
    pub fn left(&mut self, member: MemberId) -> Option<MemberUri> {
        self.roles.retain(|_, holder| *holder != member);
        self.members.remove(&member)
    }

    /// Forget every member and role.
    pub fn left_all(&mut self) {
        self.members.clear();
        self.roles.clear();
    }

    /// Assign `role` to `member`.
    pub fn elected(&mut self, role: impl Into<String>, member: MemberId) {
        self.roles.insert(role.into(), member);
    }

    /// Clear the holder of `role`. Returns the former holder.
    pub fn unelected(&mut self, role: &str) -> Option<MemberId> {
        self.roles.remove(role)
    }

    /// Current holder of `role`.
    pub fn elected_member(&self, role: &str) -> Option<MemberId> {
        self.roles.get(role).copied()
    }

    /// Roles held by `member`, sorted by name.
    pub fn roles_of(&self, member: MemberId) -> Vec<String> {
        self.roles
            .iter()
            .filter(|(_, holder)| **holder == member)
            .map(|(role, _)| role.clone())
            .collect()
    }

    /// Member ids in ascending order.
    pub fn member_ids(&self) -> Vec<MemberId> {
        self.members.keys().copied().collect()
    }

    /// Member addresses, ordered by member id.
    pub fn member_uris(&self) -> Vec<MemberUri> {
        self.members.values().cloned().collect()
    }

    /// The membership map.
    pub fn members(&self) -> &BTreeMap<MemberId, MemberUri> {
        &self.members
    }

    /// The role map.
    pub fn roles(&self) -> &BTreeMap<String, MemberId> {
        &self.roles
    }

    /// Address of `member`.
    pub fn uri_for_id(&self, member: MemberId) -> Option<&MemberUri> {
        self.members.get(&member)
    }

    /// Member bound at `uri`.
    pub fn id_for_uri(&self, uri: &MemberUri) -> Option<MemberId> {
        self.members
            .iter()
            .find(|(_, bound)| *bound == uri)
            .map(|(id, _)| *id)
    }

    /// Replace the membership map.
    pub fn set_members(&mut self, members: BTreeMap<MemberId, MemberUri>) {
        self.members = members;
    }

    /// Replace the role map.
    pub fn set_roles(&mut self, roles: BTreeMap<String, MemberId>) {
        self.roles = roles;
    }
}

impl Default for ClusterConfiguration {
    fn default() -> Self {
        Self::new("", Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lagoon_core::NetworkAddress;
    use std::net::{IpAddr, Ipv4Addr};

    fn make_uri(port: u16) -> MemberUri {
        MemberUri::new(NetworkAddress::new(
            IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)),
            port,
        ))
    }

    #[test]
    fn test_joined_same_uri_is_noop() {
        let mut config = ClusterConfiguration::new("neo", Vec::new());
        assert!(config.joined(MemberId(1), make_uri(5001)));
        assert!(!config.joined(MemberId(1), make_uri(5001)));
        assert!(config.joined(MemberId(1), make_uri(6001)));
        assert_eq!(config.uri_for_id(MemberId(1)), Some(&make_uri(6001)));
    }

    #[test]
    fn test_left_drops_roles() {
        let mut config = ClusterConfiguration::new("neo", Vec::new());
        config.joined(MemberId(1), make_uri(5001));
        config.joined(MemberId(2), make_uri(5002));
        config.elected(ClusterConfiguration::COORDINATOR, MemberId(1));
        config.elected("backup", MemberId(1));
        config.elected("monitor", MemberId(2));

        assert_eq!(
            config.roles_of(MemberId(1)),
            vec!["backup".to_string(), "coordinator".to_string()]
        );

        assert_eq!(config.left(MemberId(1)), Some(make_uri(5001)));
        assert!(config.roles_of(MemberId(1)).is_empty());
        assert_eq!(config.elected_member("monitor"), Some(MemberId(2)));
        assert_eq!(config.member_ids(), vec![MemberId(2)]);
    }

    #[test]
    fn test_lookup_by_uri() {
        let mut config = ClusterConfiguration::new("neo", Vec::new());
        config.joined(MemberId(3), make_uri(5003));
        config.joined(MemberId(1), make_uri(5001));

        assert_eq!(config.id_for_uri(&make_uri(5003)), Some(MemberId(3)));
        assert_eq!(config.id_for_uri(&make_uri(9999)), None);
        assert_eq!(config.member_uris(), vec![make_uri(5001), make_uri(5003)]);
    }

    #[test]
    fn test_left_all() {
        let mut config = ClusterConfiguration::new("neo", vec![make_uri(5001)]);
        config.joined(MemberId(1), make_uri(5001));
        config.elected(ClusterConfiguration::COORDINATOR, MemberId(1));
        config.left_all();

        assert!(config.members().is_empty());
        assert!(config.roles().is_empty());
        assert_eq!(config.candidates(), &[make_uri(5001)]);
        assert_eq!(config.allowed_failures(), DEFAULT_ALLOWED_FAILURES);
    }
}
