use super::{FilterInstaller, remote_networks};
use crate::core::error::Result;
use crate::core::filter::{FilterBuilder, Layer};
use crate::core::identity::ObjectName;

/// Private and link-local unicast ranges (RFC 1918, RFC 3927)
const LAN_UNICAST_V4: [&str; 4] = [
    "10.0.0.0/8",
    "172.16.0.0/12",
    "192.168.0.0/16",
    "169.254.0.0/16",
];
/// Link-local and unique local (RFC 4193)
const LAN_UNICAST_V6: [&str; 2] = ["fe80::/10", "fc00::/7"];

/// Local network control block, SSDP, mDNS and limited broadcast
const LAN_MULTICAST_V4: [&str; 4] = [
    "224.0.0.0/24",
    "239.255.255.250/32",
    "239.255.255.251/32",
    "255.255.255.255/32",
];
/// Interface-local through site-local multicast scopes
const LAN_MULTICAST_V6: [&str; 5] = [
    "ff01::/16",
    "ff02::/16",
    "ff03::/16",
    "ff04::/16",
    "ff05::/16",
];

/// Permits outbound traffic to the local network
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PermitLan;

impl PermitLan {
    pub fn apply(&self, installer: &mut dyn FilterInstaller) -> Result<()> {
        let mut filter = FilterBuilder::new(
            ObjectName::PermitLanOutboundIpv4.identity(),
            Layer::ConnectV4,
        );
        filter
            .name("Permit outbound LAN traffic (IPv4)")
            .description("This filter is part of a rule that permits LAN traffic")
            .permit()
            .conditions(remote_networks(&LAN_UNICAST_V4)?);
        installer.add_filter(&filter.build())?;

        filter
            .key(ObjectName::PermitLanOutboundIpv6.identity())
            .name("Permit outbound LAN traffic (IPv6)")
            .reset(Layer::ConnectV6)
            .conditions(remote_networks(&LAN_UNICAST_V6)?);
        installer.add_filter(&filter.build())?;

        filter
            .key(ObjectName::PermitLanOutboundMulticastIpv4.identity())
            .name("Permit outbound LAN multicast (IPv4)")
            .reset(Layer::ConnectV4)
            .conditions(remote_networks(&LAN_MULTICAST_V4)?);
        installer.add_filter(&filter.build())?;

        filter
            .key(ObjectName::PermitLanOutboundMulticastIpv6.identity())
            .name("Permit outbound LAN multicast (IPv6)")
            .reset(Layer::ConnectV6)
            .conditions(remote_networks(&LAN_MULTICAST_V6)?);
        installer.add_filter(&filter.build())
    }
}

/// Permits inbound connections from the local network, e.g. for file sharing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PermitLanService;

impl PermitLanService {
    pub fn apply(&self, installer: &mut dyn FilterInstaller) -> Result<()> {
        let mut filter = FilterBuilder::new(
            ObjectName::PermitLanServiceInboundIpv4.identity(),
            Layer::RecvAcceptV4,
        );
        filter
            .name("Permit inbound LAN connections (IPv4)")
            .description("This filter is part of a rule that permits hosting services on the LAN")
            .permit()
            .conditions(remote_networks(&LAN_UNICAST_V4)?);
        installer.add_filter(&filter.build())?;

        filter
            .key(ObjectName::PermitLanServiceInboundIpv6.identity())
            .name("Permit inbound LAN connections (IPv6)")
            .reset(Layer::RecvAcceptV6)
            .conditions(remote_networks(&LAN_UNICAST_V6)?);
        installer.add_filter(&filter.build())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::condition::Condition;
    use crate::core::filter::FilterSpec;

    #[test]
    fn test_lan_tables_parse_and_match_family() {
        let mut filters: Vec<FilterSpec> = Vec::new();
        PermitLan.apply(&mut filters).unwrap();
        PermitLanService.apply(&mut filters).unwrap();

        assert_eq!(filters.len(), 6);
        assert!(filters.iter().all(|f| f.family_mismatch().is_none()));
    }

    #[test]
    fn test_multicast_v6_covers_five_scopes() {
        let mut filters: Vec<FilterSpec> = Vec::new();
        PermitLan.apply(&mut filters).unwrap();

        let scopes = filters[3]
            .conditions
            .iter()
            .filter(|c| matches!(c, Condition::IpRemote(_)))
            .count();
        assert_eq!(scopes, 5);
    }

    #[test]
    fn test_lan_service_is_inbound() {
        let mut filters: Vec<FilterSpec> = Vec::new();
        PermitLanService.apply(&mut filters).unwrap();
        assert_eq!(filters[0].layer, Layer::RecvAcceptV4);
        assert_eq!(filters[1].layer, Layer::RecvAcceptV6);
    }
}
