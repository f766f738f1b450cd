//! Reference filter arbitration
//!
//! Decides what an engine would do with a piece of traffic given a set of
//! installed filters. [`MemoryEngine`](crate::core::memory::MemoryEngine)
//! evaluates its committed state with it and the policy tests use it to check
//! leak properties without a kernel.
//!
//! Only filters on the traffic's layer take part. Within one sublayer the
//! matching filter with the highest weight decides, Block winning a tie.
//! Across sublayers any Block overrides; if no sublayer blocks, any Permit
//! lets the traffic through. Traffic no filter matches is [`Verdict::Unmatched`]
//! and the engine's own default applies.

use crate::core::condition::{AddressFamily, Condition, ConditionField, IcmpClass, Protocol};
use crate::core::filter::{Action, Direction, FilterSpec, Layer, Sublayer};
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::path::PathBuf;

/// Outcome of arbitration
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum Verdict {
    #[strum(serialize = "permit")]
    Permit,
    #[strum(serialize = "block")]
    Block,
    /// No installed filter had an opinion
    #[strum(serialize = "unmatched")]
    Unmatched,
}

/// One connection attempt or inbound ICMP error, as the engine would see it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Traffic {
    pub direction: Direction,
    pub protocol: Option<Protocol>,
    pub local_address: Option<IpAddr>,
    pub remote_address: IpAddr,
    pub local_port: Option<u16>,
    pub remote_port: Option<u16>,
    pub interface: Option<String>,
    pub application: Option<PathBuf>,
    pub loopback: bool,
    pub icmp: Option<IcmpClass>,
}

impl Traffic {
    /// Outbound connection to `remote:port`
    pub fn outbound(protocol: Protocol, remote: IpAddr, port: u16) -> Self {
        Self {
            direction: Direction::Outbound,
            protocol: Some(protocol),
            local_address: None,
            remote_address: remote,
            local_port: None,
            remote_port: Some(port),
            interface: None,
            application: None,
            loopback: false,
            icmp: None,
        }
    }

    /// Inbound connection from `remote` to local `port`
    pub fn inbound(protocol: Protocol, remote: IpAddr, port: u16) -> Self {
        Self {
            direction: Direction::Inbound,
            local_port: Some(port),
            remote_port: None,
            ..Self::outbound(protocol, remote, 0)
        }
    }

    /// Inbound ICMP error from `remote`
    pub fn icmp_error(class: IcmpClass, remote: IpAddr) -> Self {
        Self {
            direction: Direction::Inbound,
            protocol: None,
            remote_port: None,
            icmp: Some(class),
            ..Self::outbound(Protocol::Udp, remote, 0)
        }
    }

    #[must_use]
    pub fn on_interface(mut self, alias: impl Into<String>) -> Self {
        self.interface = Some(alias.into());
        self
    }

    #[must_use]
    pub fn from_application(mut self, path: impl Into<PathBuf>) -> Self {
        self.application = Some(path.into());
        self
    }

    #[must_use]
    pub fn with_local_port(mut self, port: u16) -> Self {
        self.local_port = Some(port);
        self
    }

    #[must_use]
    pub fn with_remote_port(mut self, port: u16) -> Self {
        self.remote_port = Some(port);
        self
    }

    #[must_use]
    pub fn over_loopback(mut self) -> Self {
        self.loopback = true;
        self.interface = Some("lo".to_string());
        self
    }

    pub const fn family(&self) -> AddressFamily {
        AddressFamily::of(&self.remote_address)
    }

    /// Enforcement point this traffic is evaluated at
    pub const fn layer(&self) -> Layer {
        let family = self.family();
        if self.icmp.is_some() {
            return Layer::icmp_error(family);
        }
        match self.direction {
            Direction::Outbound => Layer::outbound(family),
            Direction::Inbound => Layer::inbound(family),
        }
    }
}

fn condition_matches(condition: &Condition, traffic: &Traffic) -> bool {
    match condition {
        Condition::Protocol(p) => traffic.protocol == Some(*p),
        Condition::PortLocal(port) => traffic.local_port == Some(*port),
        Condition::PortRemote(port) => traffic.remote_port == Some(*port),
        Condition::IpLocal(net) => traffic.local_address.is_some_and(|a| net.contains(a)),
        Condition::IpRemote(net) => net.contains(traffic.remote_address),
        Condition::InterfaceAlias { alias, match_type } => {
            match_type.apply(traffic.interface.as_deref() == Some(alias.as_str()))
        }
        Condition::Application(path) => traffic.application.as_ref() == Some(path),
        Condition::Loopback(match_type) => match_type.apply(traffic.loopback),
        Condition::IcmpError(class) => traffic.icmp == Some(*class),
    }
}

/// Same-field conditions are OR-ed, distinct fields AND-ed.
/// A filter without conditions matches everything on its layer.
pub fn filter_matches(filter: &FilterSpec, traffic: &Traffic) -> bool {
    if filter.layer != traffic.layer() {
        return false;
    }

    let mut fields: BTreeMap<ConditionField, bool> = BTreeMap::new();
    for condition in &filter.conditions {
        let hit = condition_matches(condition, traffic);
        fields
            .entry(condition.field())
            .and_modify(|any| *any |= hit)
            .or_insert(hit);
    }
    fields.values().all(|any| *any)
}

/// Arbitrates `traffic` against `filters`
pub fn resolve<'a>(filters: impl IntoIterator<Item = &'a FilterSpec>, traffic: &Traffic) -> Verdict {
    // winner per sublayer: (weight, action)
    let mut winners: BTreeMap<Sublayer, &FilterSpec> = BTreeMap::new();

    for filter in filters {
        if !filter_matches(filter, traffic) {
            continue;
        }
        winners
            .entry(filter.sublayer)
            .and_modify(|current| {
                let outranks = filter.weight > current.weight
                    || (filter.weight == current.weight && filter.action == Action::Block);
                if outranks {
                    *current = filter;
                }
            })
            .or_insert(filter);
    }

    if winners.values().any(|f| f.action == Action::Block) {
        Verdict::Block
    } else if winners.is_empty() {
        Verdict::Unmatched
    } else {
        Verdict::Permit
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::condition::MatchType;
    use crate::core::filter::{FilterBuilder, Weight};
    use crate::core::identity::identity_for;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    fn filter(name: &str, layer: Layer) -> FilterBuilder {
        FilterBuilder::new(identity_for(name), layer)
    }

    #[test]
    fn test_traffic_layers() {
        assert_eq!(
            Traffic::outbound(Protocol::Tcp, ip("1.1.1.1"), 443).layer(),
            Layer::ConnectV4
        );
        assert_eq!(
            Traffic::inbound(Protocol::Tcp, ip("fe80::1"), 22).layer(),
            Layer::RecvAcceptV6
        );
        assert_eq!(
            Traffic::icmp_error(IcmpClass::TimeExceeded, ip("10.0.0.1")).layer(),
            Layer::IcmpErrorV4
        );
    }

    #[test]
    fn test_same_field_or_different_field_and() {
        let spec = filter("f", Layer::ConnectV4)
            .condition(Condition::ip_remote(ip("10.0.0.1")))
            .condition(Condition::ip_remote(ip("10.0.0.2")))
            .condition(Condition::PortRemote(53))
            .build();

        assert!(filter_matches(
            &spec,
            &Traffic::outbound(Protocol::Udp, ip("10.0.0.2"), 53)
        ));
        assert!(!filter_matches(
            &spec,
            &Traffic::outbound(Protocol::Udp, ip("10.0.0.2"), 80)
        ));
        assert!(!filter_matches(
            &spec,
            &Traffic::outbound(Protocol::Udp, ip("10.0.0.3"), 53)
        ));
    }

    #[test]
    fn test_not_equal_interface() {
        let spec = filter("f", Layer::ConnectV4)
            .condition(Condition::interface("wg0", MatchType::NotEqual))
            .build();
        let base = Traffic::outbound(Protocol::Udp, ip("8.8.8.8"), 53);

        assert!(filter_matches(&spec, &base.clone().on_interface("eth0")));
        assert!(!filter_matches(&spec, &base.on_interface("wg0")));
    }

    #[test]
    fn test_highest_weight_wins_within_sublayer() {
        let block = filter("block", Layer::ConnectV4).weight(Weight::Min).block().build();
        let permit = filter("permit", Layer::ConnectV4)
            .weight(Weight::Medium)
            .permit()
            .build();
        let traffic = Traffic::outbound(Protocol::Tcp, ip("1.1.1.1"), 443);

        assert_eq!(resolve([&block, &permit], &traffic), Verdict::Permit);
        assert_eq!(resolve([&block], &traffic), Verdict::Block);
    }

    #[test]
    fn test_block_wins_weight_tie() {
        let block = filter("block", Layer::ConnectV4).block().build();
        let permit = filter("permit", Layer::ConnectV4).permit().build();
        let traffic = Traffic::outbound(Protocol::Tcp, ip("1.1.1.1"), 443);

        assert_eq!(resolve([&permit, &block], &traffic), Verdict::Block);
    }

    #[test]
    fn test_block_in_any_sublayer_overrides() {
        let permit = filter("permit", Layer::ConnectV4)
            .weight(Weight::Max)
            .permit()
            .build();
        let dns_block = filter("dns", Layer::ConnectV4)
            .sublayer(Sublayer::Dns)
            .weight(Weight::Min)
            .block()
            .condition(Condition::PortRemote(53))
            .build();

        let dns = Traffic::outbound(Protocol::Udp, ip("8.8.8.8"), 53);
        let web = Traffic::outbound(Protocol::Tcp, ip("8.8.8.8"), 443);
        assert_eq!(resolve([&permit, &dns_block], &dns), Verdict::Block);
        assert_eq!(resolve([&permit, &dns_block], &web), Verdict::Permit);
    }

    #[test]
    fn test_other_layers_ignored() {
        let block = filter("block", Layer::ConnectV6).block().build();
        let traffic = Traffic::outbound(Protocol::Tcp, ip("1.1.1.1"), 443);
        assert_eq!(resolve([&block], &traffic), Verdict::Unmatched);
    }
}
