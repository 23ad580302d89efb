//! Identity and addressing types for cluster members.
//!
//! - [`MemberId`]: logical identity of a cluster member, stable across restarts
//! - [`NetworkAddress`]: IP address + port
//! - [`MemberUri`]: the address a member is bound at, with a scheme and
//!   optional query parameters (`cluster://10.0.0.1:5001?name=alpha`)

use std::collections::BTreeMap;
use std::net::IpAddr;

use serde::{Deserialize, Serialize};

/// Logical identity of a cluster member.
///
/// Member ids are totally ordered; the smallest alive id acts as elector.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct MemberId(pub u32);

impl MemberId {
    /// Create a member id.
    pub const fn new(id: u32) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for MemberId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Network address (IPv4/IPv6 + port).
///
/// # Examples
///
/// ```
/// use lagoon_core::NetworkAddress;
/// use std::net::{IpAddr, Ipv4Addr};
///
/// let addr = NetworkAddress::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 5001);
/// assert_eq!(addr.to_string(), "127.0.0.1:5001");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NetworkAddress {
    /// IP address (IPv4 or IPv6).
    pub ip: IpAddr,
    /// Port number.
    pub port: u16,
}

impl NetworkAddress {
    /// Create a new network address.
    pub fn new(ip: IpAddr, port: u16) -> Self {
        Self { ip, port }
    }

    /// Parse from `ip:port`, or `[ip]:port` for IPv6.
    ///
    /// # Errors
    ///
    /// Returns an error if the IP or the port cannot be parsed.
    pub fn parse(s: &str) -> Result<Self, NetworkAddressParseError> {
        let (ip_str, port_str) = match s.strip_prefix('[') {
            Some(bracketed) => {
                let (ip, rest) = bracketed
                    .split_once(']')
                    .ok_or(NetworkAddressParseError::InvalidIp)?;
                let port = rest
                    .strip_prefix(':')
                    .ok_or(NetworkAddressParseError::MissingPort)?;
                (ip, port)
            }
            None => s
                .rsplit_once(':')
                .ok_or(NetworkAddressParseError::MissingPort)?,
        };

        let ip: IpAddr = ip_str
            .parse()
            .map_err(|_| NetworkAddressParseError::InvalidIp)?;
        let port: u16 = port_str
            .parse()
            .map_err(|_| NetworkAddressParseError::InvalidPort)?;
        Ok(Self::new(ip, port))
    }
}

impl std::fmt::Display for NetworkAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.ip {
            IpAddr::V4(ip) => write!(f, "{}:{}", ip, self.port),
            IpAddr::V6(ip) => write!(f, "[{}]:{}", ip, self.port),
        }
    }
}

/// Error parsing a network address from string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NetworkAddressParseError {
    /// The IP address could not be parsed.
    #[error("invalid IP address")]
    InvalidIp,
    /// The port number could not be parsed.
    #[error("invalid port number")]
    InvalidPort,
    /// No port separator (`:`) found in the input.
    #[error("missing port separator")]
    MissingPort,
}

/// Default scheme used by [`MemberUri::new`].
pub const CLUSTER_SCHEME: &str = "cluster";

/// The URI a cluster member is bound at.
///
/// Query parameters carry optional metadata about the member; the `name`
/// parameter is used as the human-readable member name.
///
/// ```
/// use lagoon_core::MemberUri;
///
/// let uri = MemberUri::parse("cluster://10.0.0.1:5001?name=alpha").unwrap();
/// assert_eq!(uri.param("name"), Some("alpha"));
/// assert_eq!(uri.address().port, 5001);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MemberUri {
    scheme: String,
    address: NetworkAddress,
    params: BTreeMap<String, String>,
}

impl MemberUri {
    /// Create a `cluster://` URI for the given address, without parameters.
    pub fn new(address: NetworkAddress) -> Self {
        Self {
            scheme: CLUSTER_SCHEME.to_string(),
            address,
            params: BTreeMap::new(),
        }
    }

    /// Return a copy of this URI with the query parameter `key` set to `value`.
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// Parse `scheme://address[?key=value&...]`.
    ///
    /// # Errors
    ///
    /// Returns [`UriParseError::MissingScheme`] if there is no `scheme://`
    /// prefix, or an address error if the authority part is malformed.
    pub fn parse(s: &str) -> Result<Self, UriParseError> {
        let (scheme, rest) = s.split_once("://").ok_or(UriParseError::MissingScheme)?;
        if scheme.is_empty() {
            return Err(UriParseError::MissingScheme);
        }

        let (authority, query) = match rest.split_once('?') {
            Some((authority, query)) => (authority, Some(query)),
            None => (rest, None),
        };
        let address = NetworkAddress::parse(authority.trim_end_matches('/'))?;

        let mut params = BTreeMap::new();
        for pair in query.into_iter().flat_map(|q| q.split('&')) {
            if pair.is_empty() {
                continue;
            }
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            params.insert(key.to_string(), value.to_string());
        }

        Ok(Self {
            scheme: scheme.to_string(),
            address,
            params,
        })
    }

    /// The URI scheme, e.g. `cluster`.
    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    /// The network address part of the URI.
    pub fn address(&self) -> &NetworkAddress {
        &self.address
    }

    /// Look up a query parameter.
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }
}

impl std::fmt::Display for MemberUri {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}://{}", self.scheme, self.address)?;
        let mut separator = '?';
        for (key, value) in &self.params {
            write!(f, "{}{}={}", separator, key, value)?;
            separator = '&';
        }
        Ok(())
    }
}

impl std::str::FromStr for MemberUri {
    type Err = UriParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Error parsing a [`MemberUri`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UriParseError {
    /// The input has no `scheme://` prefix.
    #[error("missing URI scheme")]
    MissingScheme,
    /// The authority part is not a valid network address.
    #[error("invalid member address: {0}")]
    Address(#[from] NetworkAddressParseError),
}
