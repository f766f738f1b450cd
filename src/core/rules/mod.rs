//! Rule catalog
//!
//! Each rule turns one security intent into one or more [`FilterSpec`]s and
//! hands them to a [`FilterInstaller`]. The catalog is closed: [`Rule`] is an
//! enum over every rule payload and dispatch is an exhaustive `match`.
//!
//! A rule stops at the first filter the installer refuses and reports the
//! failure. It never undoes filters it already emitted; rolling back is the
//! transaction coordinator's job.
//!
//! | Rule | Filters |
//! |---|---|
//! | [`BlockAll`] | 4, weight Min |
//! | [`PermitDhcp`] | 4 (request/response × v4/v6) |
//! | [`PermitDhcpServer`] | 2, IPv4 only |
//! | [`PermitDns`] | 2 |
//! | [`PermitEndpoint`] | 1 |
//! | [`PermitIcmpTtl`] | 2, weight Max |
//! | [`PermitLan`] | 4 |
//! | [`PermitLanService`] | 2 |
//! | [`PermitLoopback`] | 4 |
//! | [`PermitVpnRelay`] | 1 |
//! | [`PermitVpnTunnel`] | 4 |
//! | [`dns::BlockAll`] | 2 |
//! | [`nontunneldns::BlockAll`] | 2 |
//! | [`tunneldns::BlockAll`] | 2 |
//! | [`tunneldns::PermitSelected`] | 2 per address family present |

pub mod block_all;
pub mod dns;
pub mod nontunneldns;
pub mod permit_dhcp;
pub mod permit_dns;
pub mod permit_endpoint;
pub mod permit_icmp_ttl;
pub mod permit_lan;
pub mod permit_loopback;
pub mod permit_vpn_relay;
pub mod permit_vpn_tunnel;
pub mod tunneldns;

pub use block_all::BlockAll;
pub use permit_dhcp::{PermitDhcp, PermitDhcpServer};
pub use permit_dns::PermitDns;
pub use permit_endpoint::PermitEndpoint;
pub use permit_icmp_ttl::PermitIcmpTtl;
pub use permit_lan::{PermitLan, PermitLanService};
pub use permit_loopback::PermitLoopback;
pub use permit_vpn_relay::PermitVpnRelay;
pub use permit_vpn_tunnel::PermitVpnTunnel;

use crate::core::condition::Condition;
use crate::core::error::{Error, Result};
use crate::core::filter::FilterSpec;
use ipnetwork::IpNetwork;

/// Sink for the filters a rule emits
pub trait FilterInstaller {
    /// Adds one filter, failing fast on refusal
    fn add_filter(&mut self, filter: &FilterSpec) -> Result<()>;
}

/// Collects filters without touching an engine
impl FilterInstaller for Vec<FilterSpec> {
    fn add_filter(&mut self, filter: &FilterSpec) -> Result<()> {
        self.push(filter.clone());
        Ok(())
    }
}

/// Every rule the policy state machine can compose
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rule {
    BlockAll(BlockAll),
    PermitDhcp(PermitDhcp),
    PermitDhcpServer(PermitDhcpServer),
    PermitDns(PermitDns),
    PermitEndpoint(PermitEndpoint),
    PermitIcmpTtl(PermitIcmpTtl),
    PermitLan(PermitLan),
    PermitLanService(PermitLanService),
    PermitLoopback(PermitLoopback),
    PermitVpnRelay(PermitVpnRelay),
    PermitVpnTunnel(PermitVpnTunnel),
    DnsBlockAll(dns::BlockAll),
    NonTunnelDnsBlockAll(nontunneldns::BlockAll),
    TunnelDnsBlockAll(tunneldns::BlockAll),
    TunnelDnsPermitSelected(tunneldns::PermitSelected),
}

impl Rule {
    pub fn apply(&self, installer: &mut dyn FilterInstaller) -> Result<()> {
        match self {
            Rule::BlockAll(rule) => rule.apply(installer),
            Rule::PermitDhcp(rule) => rule.apply(installer),
            Rule::PermitDhcpServer(rule) => rule.apply(installer),
            Rule::PermitDns(rule) => rule.apply(installer),
            Rule::PermitEndpoint(rule) => rule.apply(installer),
            Rule::PermitIcmpTtl(rule) => rule.apply(installer),
            Rule::PermitLan(rule) => rule.apply(installer),
            Rule::PermitLanService(rule) => rule.apply(installer),
            Rule::PermitLoopback(rule) => rule.apply(installer),
            Rule::PermitVpnRelay(rule) => rule.apply(installer),
            Rule::PermitVpnTunnel(rule) => rule.apply(installer),
            Rule::DnsBlockAll(rule) => rule.apply(installer),
            Rule::NonTunnelDnsBlockAll(rule) => rule.apply(installer),
            Rule::TunnelDnsBlockAll(rule) => rule.apply(installer),
            Rule::TunnelDnsPermitSelected(rule) => rule.apply(installer),
        }
    }

    /// Expands the rule into its filters without an engine
    pub fn compile(&self) -> Result<Vec<FilterSpec>> {
        let mut filters = Vec::new();
        self.apply(&mut filters)?;
        Ok(filters)
    }

    pub const fn name(&self) -> &'static str {
        match self {
            Rule::BlockAll(_) => "BlockAll",
            Rule::PermitDhcp(_) => "PermitDhcp",
            Rule::PermitDhcpServer(_) => "PermitDhcpServer",
            Rule::PermitDns(_) => "PermitDns",
            Rule::PermitEndpoint(_) => "PermitEndpoint",
            Rule::PermitIcmpTtl(_) => "PermitIcmpTtl",
            Rule::PermitLan(_) => "PermitLan",
            Rule::PermitLanService(_) => "PermitLanService",
            Rule::PermitLoopback(_) => "PermitLoopback",
            Rule::PermitVpnRelay(_) => "PermitVpnRelay",
            Rule::PermitVpnTunnel(_) => "PermitVpnTunnel",
            Rule::DnsBlockAll(_) => "dns::BlockAll",
            Rule::NonTunnelDnsBlockAll(_) => "nontunneldns::BlockAll",
            Rule::TunnelDnsBlockAll(_) => "tunneldns::BlockAll",
            Rule::TunnelDnsPermitSelected(_) => "tunneldns::PermitSelected",
        }
    }
}

macro_rules! impl_from_rule {
    ($($variant:ident => $payload:ty),+ $(,)?) => {
        $(
            impl From<$payload> for Rule {
                fn from(rule: $payload) -> Self {
                    Rule::$variant(rule)
                }
            }
        )+
    };
}

impl_from_rule! {
    BlockAll => BlockAll,
    PermitDhcp => PermitDhcp,
    PermitDhcpServer => PermitDhcpServer,
    PermitDns => PermitDns,
    PermitEndpoint => PermitEndpoint,
    PermitIcmpTtl => PermitIcmpTtl,
    PermitLan => PermitLan,
    PermitLanService => PermitLanService,
    PermitLoopback => PermitLoopback,
    PermitVpnRelay => PermitVpnRelay,
    PermitVpnTunnel => PermitVpnTunnel,
    DnsBlockAll => dns::BlockAll,
    NonTunnelDnsBlockAll => nontunneldns::BlockAll,
    TunnelDnsBlockAll => tunneldns::BlockAll,
    TunnelDnsPermitSelected => tunneldns::PermitSelected,
}

/// Parses a fixed network table, one remote-address condition per entry
pub(crate) fn remote_networks(networks: &[&str]) -> Result<Vec<Condition>> {
    networks
        .iter()
        .map(|net| {
            net.parse::<IpNetwork>()
                .map(Condition::IpRemote)
                .map_err(|e| Error::CatalogViolation(format!("bad network literal {net}: {e}")))
        })
        .collect()
}

pub(crate) const DNS_PORT: u16 = 53;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::filter::Layer;

    #[test]
    fn test_compile_collects_all_filters() {
        let filters = Rule::from(BlockAll).compile().unwrap();
        assert_eq!(filters.len(), 4);
        assert!(filters.iter().any(|f| f.layer == Layer::RecvAcceptV6));
    }

    #[test]
    fn test_remote_networks_rejects_garbage() {
        assert!(remote_networks(&["10.0.0.0/8"]).is_ok());
        assert!(matches!(
            remote_networks(&["not-a-network"]),
            Err(Error::CatalogViolation(_))
        ));
    }

    #[test]
    fn test_rule_names_are_distinct() {
        let rules: Vec<Rule> = vec![
            BlockAll.into(),
            PermitLoopback.into(),
            dns::BlockAll.into(),
            tunneldns::BlockAll::new("wg0").unwrap().into(),
        ];
        let names: std::collections::HashSet<_> = rules.iter().map(Rule::name).collect();
        assert_eq!(names.len(), rules.len());
    }
}
