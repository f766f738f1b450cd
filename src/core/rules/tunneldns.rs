//! DNS rules for traffic inside the tunnel
//!
//! [`BlockAll`] closes port 53 on the tunnel interface and [`PermitSelected`]
//! reopens it for the configured resolvers only. Both live in the DNS
//! sublayer; the permit carries weight Max so it outranks the block.

use super::{DNS_PORT, FilterInstaller};
use crate::core::condition::{Condition, MatchType, Protocol, split_addresses};
use crate::core::error::{Error, Result};
use crate::core::filter::{FilterBuilder, Layer, Sublayer, Weight};
use crate::core::identity::ObjectName;
use std::net::IpAddr;

fn require_alias(alias: String) -> Result<String> {
    if alias.is_empty() {
        return Err(Error::InvalidArgument(
            "tunnel interface alias must not be empty".to_string(),
        ));
    }
    Ok(alias)
}

/// Blocks DNS inside the tunnel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockAll {
    tunnel_alias: String,
}

impl BlockAll {
    /// # Errors
    ///
    /// [`Error::InvalidArgument`] when the alias is empty.
    pub fn new(tunnel_alias: impl Into<String>) -> Result<Self> {
        Ok(Self {
            tunnel_alias: require_alias(tunnel_alias.into())?,
        })
    }

    pub fn tunnel_alias(&self) -> &str {
        &self.tunnel_alias
    }

    pub fn apply(&self, installer: &mut dyn FilterInstaller) -> Result<()> {
        let mut filter = FilterBuilder::new(
            ObjectName::TunnelDnsBlockAllIpv4.identity(),
            Layer::ConnectV4,
        );
        filter
            .name("Block DNS inside the tunnel (IPv4)")
            .description("This filter is part of a rule that restricts DNS inside the VPN tunnel")
            .sublayer(Sublayer::Dns)
            .weight(Weight::Medium)
            .block()
            .condition(Condition::PortRemote(DNS_PORT))
            .condition(Condition::interface(self.tunnel_alias.clone(), MatchType::Equal));
        installer.add_filter(&filter.build())?;

        filter
            .key(ObjectName::TunnelDnsBlockAllIpv6.identity())
            .name("Block DNS inside the tunnel (IPv6)")
            .reset(Layer::ConnectV6)
            .condition(Condition::PortRemote(DNS_PORT))
            .condition(Condition::interface(self.tunnel_alias.clone(), MatchType::Equal));
        installer.add_filter(&filter.build())
    }
}

/// Permits DNS inside the tunnel to the given resolvers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermitSelected {
    tunnel_alias: String,
    hosts: Vec<IpAddr>,
}

impl PermitSelected {
    /// # Errors
    ///
    /// [`Error::InvalidArgument`] when the alias or the host list is empty.
    pub fn new(tunnel_alias: impl Into<String>, hosts: Vec<IpAddr>) -> Result<Self> {
        let tunnel_alias = require_alias(tunnel_alias.into())?;
        // validated here so apply never sees an empty list
        split_addresses(&hosts)?;
        Ok(Self {
            tunnel_alias,
            hosts,
        })
    }

    pub fn hosts(&self) -> &[IpAddr] {
        &self.hosts
    }

    pub fn apply(&self, installer: &mut dyn FilterInstaller) -> Result<()> {
        let split = split_addresses(&self.hosts)?;

        let families = [
            (
                Layer::ConnectV4,
                "IPv4",
                [
                    ObjectName::TunnelDnsPermitUdpIpv4,
                    ObjectName::TunnelDnsPermitTcpIpv4,
                ],
                split
                    .ipv4
                    .iter()
                    .map(|a| Condition::ip_remote(IpAddr::V4(*a)))
                    .collect::<Vec<_>>(),
            ),
            (
                Layer::ConnectV6,
                "IPv6",
                [
                    ObjectName::TunnelDnsPermitUdpIpv6,
                    ObjectName::TunnelDnsPermitTcpIpv6,
                ],
                split
                    .ipv6
                    .iter()
                    .map(|a| Condition::ip_remote(IpAddr::V6(*a)))
                    .collect::<Vec<_>>(),
            ),
        ];

        let mut filter = FilterBuilder::new(
            ObjectName::TunnelDnsPermitUdpIpv4.identity(),
            Layer::ConnectV4,
        );
        filter
            .description("This filter is part of a rule that permits DNS to selected resolvers inside the VPN tunnel")
            .sublayer(Sublayer::Dns)
            .weight(Weight::Max)
            .permit();

        for (layer, family, objects, hosts) in families {
            if hosts.is_empty() {
                continue;
            }
            for (object, protocol) in objects.into_iter().zip([Protocol::Udp, Protocol::Tcp]) {
                filter
                    .key(object.identity())
                    .name(format!("Permit DNS to selected resolvers over {protocol} ({family})"))
                    .reset(layer)
                    .condition(Condition::interface(self.tunnel_alias.clone(), MatchType::Equal))
                    .condition(Condition::PortRemote(DNS_PORT))
                    .condition(Condition::Protocol(protocol))
                    .conditions(hosts.iter().cloned());
                installer.add_filter(&filter.build())?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::filter::{Action, FilterSpec};

    fn hosts(list: &[&str]) -> Vec<IpAddr> {
        list.iter().map(|h| h.parse().unwrap()).collect()
    }

    #[test]
    fn test_block_requires_alias() {
        assert!(matches!(BlockAll::new(""), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_permit_single_ipv4_host() {
        let rule = PermitSelected::new("wg0", hosts(&["10.0.0.1"])).unwrap();
        let mut filters: Vec<FilterSpec> = Vec::new();
        rule.apply(&mut filters).unwrap();

        assert_eq!(filters.len(), 2);
        for filter in &filters {
            assert_eq!(filter.layer, Layer::ConnectV4);
            assert_eq!(filter.action, Action::Permit);
            assert_eq!(filter.weight, Weight::Max);
            assert_eq!(filter.sublayer, Sublayer::Dns);
            assert!(
                filter
                    .conditions
                    .contains(&Condition::interface("wg0", MatchType::Equal))
            );
            assert!(filter.conditions.contains(&Condition::PortRemote(53)));
        }
        assert!(filters[0].conditions.contains(&Condition::Protocol(Protocol::Udp)));
        assert!(filters[1].conditions.contains(&Condition::Protocol(Protocol::Tcp)));
    }

    #[test]
    fn test_permit_dual_stack_hosts() {
        let rule =
            PermitSelected::new("wg0", hosts(&["10.64.0.1", "fc00:bbbb:bbbb:bb01::1", "10.64.0.2"]))
                .unwrap();
        let filters = crate::core::rules::Rule::from(rule).compile().unwrap();

        assert_eq!(filters.len(), 4);
        assert!(filters.iter().all(|f| f.family_mismatch().is_none()));
        let v4_hosts = filters[0]
            .conditions
            .iter()
            .filter(|c| matches!(c, Condition::IpRemote(_)))
            .count();
        assert_eq!(v4_hosts, 2);
    }

    #[test]
    fn test_permit_rejects_empty_input() {
        assert!(matches!(
            PermitSelected::new("wg0", vec![]),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            PermitSelected::new("", hosts(&["10.0.0.1"])),
            Err(Error::InvalidArgument(_))
        ));
    }
}
