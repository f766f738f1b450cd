//! Match predicates attached to filters
//!
//! A [`Condition`] is an immutable value describing one predicate. Within one
//! filter, conditions on the same [`ConditionField`] are OR-ed by the engine and
//! conditions on different fields are AND-ed. Rules rely on that asymmetry: an
//! OR over networks fits in one filter, a disjunction across fields needs one
//! filter per branch.

use crate::core::error::{Error, Result};
use ipnetwork::IpNetwork;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::path::PathBuf;
use std::str::FromStr;

/// Transport protocol
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
    strum::AsRefStr,
)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[strum(serialize = "tcp")]
    Tcp,
    #[strum(serialize = "udp")]
    Udp,
}

impl Protocol {
    /// IANA protocol number
    pub const fn number(self) -> u8 {
        match self {
            Protocol::Tcp => 6,
            Protocol::Udp => 17,
        }
    }
}

/// Comparison polarity of a condition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum MatchType {
    #[default]
    Equal,
    NotEqual,
}

impl MatchType {
    /// Applies the polarity to a raw comparison result
    pub const fn apply(self, equal: bool) -> bool {
        match self {
            MatchType::Equal => equal,
            MatchType::NotEqual => !equal,
        }
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, strum::Display,
)]
pub enum AddressFamily {
    #[strum(serialize = "IPv4")]
    Ipv4,
    #[strum(serialize = "IPv6")]
    Ipv6,
}

impl AddressFamily {
    pub const fn of(addr: &IpAddr) -> Self {
        match addr {
            IpAddr::V4(_) => AddressFamily::Ipv4,
            IpAddr::V6(_) => AddressFamily::Ipv6,
        }
    }

    pub const fn of_network(network: &IpNetwork) -> Self {
        match network {
            IpNetwork::V4(_) => AddressFamily::Ipv4,
            IpNetwork::V6(_) => AddressFamily::Ipv6,
        }
    }
}

/// Class of inbound ICMP error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display)]
pub enum IcmpClass {
    /// ICMP Time Exceeded (TTL / hop limit reached zero in transit)
    #[strum(serialize = "time-exceeded")]
    TimeExceeded,
}

impl IcmpClass {
    /// ICMP type number for the given family
    pub const fn icmp_type(self, family: AddressFamily) -> u8 {
        match (self, family) {
            (IcmpClass::TimeExceeded, AddressFamily::Ipv4) => 11,
            (IcmpClass::TimeExceeded, AddressFamily::Ipv6) => 3,
        }
    }
}

/// Field a condition tests. Conditions sharing a field are OR-ed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, strum::Display)]
pub enum ConditionField {
    Protocol,
    LocalPort,
    RemotePort,
    LocalAddress,
    RemoteAddress,
    Interface,
    Application,
    Loopback,
    IcmpType,
}

/// A single match predicate
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Condition {
    Protocol(Protocol),
    PortLocal(u16),
    PortRemote(u16),
    IpLocal(IpNetwork),
    IpRemote(IpNetwork),
    InterfaceAlias { alias: String, match_type: MatchType },
    Application(PathBuf),
    Loopback(MatchType),
    IcmpError(IcmpClass),
}

impl Condition {
    /// Remote host or network condition
    pub fn ip_remote(target: impl Into<IpNetwork>) -> Self {
        Condition::IpRemote(target.into())
    }

    /// Local host or network condition
    pub fn ip_local(target: impl Into<IpNetwork>) -> Self {
        Condition::IpLocal(target.into())
    }

    pub fn interface(alias: impl Into<String>, match_type: MatchType) -> Self {
        Condition::InterfaceAlias {
            alias: alias.into(),
            match_type,
        }
    }

    pub fn application(path: impl Into<PathBuf>) -> Self {
        Condition::Application(path.into())
    }

    pub const fn field(&self) -> ConditionField {
        match self {
            Condition::Protocol(_) => ConditionField::Protocol,
            Condition::PortLocal(_) => ConditionField::LocalPort,
            Condition::PortRemote(_) => ConditionField::RemotePort,
            Condition::IpLocal(_) => ConditionField::LocalAddress,
            Condition::IpRemote(_) => ConditionField::RemoteAddress,
            Condition::InterfaceAlias { .. } => ConditionField::Interface,
            Condition::Application(_) => ConditionField::Application,
            Condition::Loopback(_) => ConditionField::Loopback,
            Condition::IcmpError(_) => ConditionField::IcmpType,
        }
    }

    /// Address family the condition is bound to, if any
    pub const fn family(&self) -> Option<AddressFamily> {
        match self {
            Condition::IpLocal(net) | Condition::IpRemote(net) => {
                Some(AddressFamily::of_network(net))
            }
            Condition::Protocol(_)
            | Condition::PortLocal(_)
            | Condition::PortRemote(_)
            | Condition::InterfaceAlias { .. }
            | Condition::Application(_)
            | Condition::Loopback(_)
            | Condition::IcmpError(_) => None,
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Condition::Protocol(p) => write!(f, "protocol == {p}"),
            Condition::PortLocal(p) => write!(f, "local port == {p}"),
            Condition::PortRemote(p) => write!(f, "remote port == {p}"),
            Condition::IpLocal(net) => write!(f, "local address in {net}"),
            Condition::IpRemote(net) => write!(f, "remote address in {net}"),
            Condition::InterfaceAlias { alias, match_type } => match match_type {
                MatchType::Equal => write!(f, "interface == {alias}"),
                MatchType::NotEqual => write!(f, "interface != {alias}"),
            },
            Condition::Application(path) => write!(f, "application == {}", path.display()),
            Condition::Loopback(MatchType::Equal) => write!(f, "loopback"),
            Condition::Loopback(MatchType::NotEqual) => write!(f, "not loopback"),
            Condition::IcmpError(class) => write!(f, "icmp error == {class}"),
        }
    }
}

/// Remote socket plus transport protocol, written `ADDR:PORT/PROTO`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    pub address: SocketAddr,
    pub protocol: Protocol,
}

impl Endpoint {
    pub const fn new(address: SocketAddr, protocol: Protocol) -> Self {
        Self { address, protocol }
    }

    pub const fn family(&self) -> AddressFamily {
        match self.address {
            SocketAddr::V4(_) => AddressFamily::Ipv4,
            SocketAddr::V6(_) => AddressFamily::Ipv6,
        }
    }

    /// Remote address, remote port and protocol conditions for this endpoint
    pub fn conditions(&self) -> [Condition; 3] {
        [
            Condition::ip_remote(self.address.ip()),
            Condition::PortRemote(self.address.port()),
            Condition::Protocol(self.protocol),
        ]
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.address, self.protocol)
    }
}

impl FromStr for Endpoint {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (address, protocol) = s.rsplit_once('/').ok_or_else(|| {
            Error::InvalidArgument(format!("endpoint '{s}' must be written ADDR:PORT/PROTO"))
        })?;
        let address = address
            .parse::<SocketAddr>()
            .map_err(|e| Error::InvalidArgument(format!("endpoint address '{address}': {e}")))?;
        let protocol = protocol
            .to_lowercase()
            .parse::<Protocol>()
            .map_err(|_| Error::InvalidArgument(format!("unknown protocol '{protocol}'")))?;
        Ok(Self { address, protocol })
    }
}

/// Address family extent a rule is asked to cover
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IpExtent {
    Ipv4Only,
    Ipv6Only,
    Ipv4AndIpv6,
}

/// Addresses partitioned by family, order preserved within each list
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SplitAddresses {
    pub ipv4: Vec<Ipv4Addr>,
    pub ipv6: Vec<Ipv6Addr>,
}

/// Partitions a host list by address family.
///
/// # Errors
///
/// Returns [`Error::InvalidArgument`] when `addresses` is empty.
pub fn split_addresses(addresses: &[IpAddr]) -> Result<SplitAddresses> {
    if addresses.is_empty() {
        return Err(Error::InvalidArgument(
            "address list must contain at least one host".to_string(),
        ));
    }

    let mut split = SplitAddresses::default();
    for address in addresses {
        match address {
            IpAddr::V4(v4) => split.ipv4.push(*v4),
            IpAddr::V6(v6) => split.ipv6.push(*v6),
        }
    }
    Ok(split)
}
