//! Shared helpers for the cluster scenario tests.

#![allow(dead_code)]

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;

use lagoon_core::{MemberId, MemberUri, NetworkAddress, Payload};
use lagoon_paxos::{
    AtomicBroadcastListener, ClusterConfiguration, ClusterListener, ElectionRole,
    HeartbeatListener, PaxosContext,
};
use parking_lot::Mutex;

pub const COORDINATOR: &str = "coordinator";

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_test_writer()
        .try_init();
}

pub fn make_uri(port: u16) -> MemberUri {
    MemberUri::new(NetworkAddress::new(
        IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)),
        port,
    ))
}

pub fn member_uri(member: u32) -> MemberUri {
    make_uri(5000 + member as u16)
}

/// Configuration with members `1..=members`, `holder` elected coordinator.
pub fn configuration(members: u32, holder: Option<u32>) -> ClusterConfiguration {
    let mut configuration = ClusterConfiguration::new("neo", Vec::new());
    for i in 1..=members {
        configuration.joined(MemberId(i), member_uri(i));
    }
    if let Some(holder) = holder {
        configuration.elected(COORDINATOR, MemberId(holder));
    }
    configuration
}

/// Context of member `me` in a cluster of `members`.
pub fn member_context(me: u32, members: u32, holder: Option<u32>) -> PaxosContext {
    PaxosContext::builder(MemberId(me))
        .bound_at(member_uri(me))
        .configuration(configuration(members, holder))
        .roles(vec![ElectionRole::new(COORDINATOR)])
        .build()
        .expect("build context")
}

/// Records every listener callback as a line of text.
#[derive(Default)]
pub struct EventLog {
    events: Mutex<Vec<String>>,
}

impl EventLog {
    pub fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }

    fn push(&self, event: String) {
        self.events.lock().push(event);
    }
}

impl ClusterListener for EventLog {
    fn entered_cluster(&self, configuration: &ClusterConfiguration) {
        self.push(format!("entered {}", configuration.name()));
    }

    fn left_cluster(&self) {
        self.push("left".to_string());
    }

    fn joined_cluster(&self, member: MemberId, uri: &MemberUri) {
        self.push(format!("joined {} {}", member, uri));
    }

    fn member_left(&self, member: MemberId, _uri: Option<&MemberUri>) {
        self.push(format!("member_left {}", member));
    }

    fn elected(&self, role: &str, member: MemberId, _uri: Option<&MemberUri>) {
        self.push(format!("elected {} {}", role, member));
    }

    fn unelected(&self, role: &str, member: MemberId, _uri: Option<&MemberUri>) {
        self.push(format!("unelected {} {}", role, member));
    }
}

impl HeartbeatListener for EventLog {
    fn failed(&self, member: MemberId) {
        self.push(format!("failed {}", member));
    }

    fn alive(&self, member: MemberId) {
        self.push(format!("alive {}", member));
    }
}

impl AtomicBroadcastListener for EventLog {
    fn receive(&self, value: &Payload) {
        self.push(format!("receive {}", String::from_utf8_lossy(value.as_bytes())));
    }
}

pub fn log() -> Arc<EventLog> {
    Arc::new(EventLog::default())
}
