use super::{FilterInstaller, remote_networks};
use crate::core::condition::{Condition, IpExtent, Protocol};
use crate::core::error::{Error, Result};
use crate::core::filter::{FilterBuilder, Layer};
use crate::core::identity::ObjectName;

const DHCPV4_CLIENT_PORT: u16 = 68;
const DHCPV4_SERVER_PORT: u16 = 67;
const DHCPV6_CLIENT_PORT: u16 = 546;
const DHCPV6_SERVER_PORT: u16 = 547;

/// All_DHCP_Relay_Agents_and_Servers and All_DHCP_Servers
const DHCPV6_SERVER_GROUPS: [&str; 2] = ["ff02::1:2/128", "ff05::1:3/128"];
const LINK_LOCAL_V6: &str = "fe80::/10";

/// Lets this host obtain an address lease while everything else is blocked
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PermitDhcp;

impl PermitDhcp {
    pub fn apply(&self, installer: &mut dyn FilterInstaller) -> Result<()> {
        let mut filter = FilterBuilder::new(
            ObjectName::PermitDhcpOutboundRequestIpv4.identity(),
            Layer::ConnectV4,
        );
        filter
            .name("Permit outbound DHCP requests (IPv4)")
            .description("This filter is part of a rule that permits DHCP client traffic")
            .permit()
            .condition(Condition::Protocol(Protocol::Udp))
            .condition(Condition::PortLocal(DHCPV4_CLIENT_PORT))
            .condition(Condition::PortRemote(DHCPV4_SERVER_PORT));
        installer.add_filter(&filter.build())?;

        filter
            .key(ObjectName::PermitDhcpInboundResponseIpv4.identity())
            .name("Permit inbound DHCP responses (IPv4)")
            .reset(Layer::RecvAcceptV4)
            .condition(Condition::Protocol(Protocol::Udp))
            .condition(Condition::PortLocal(DHCPV4_CLIENT_PORT))
            .condition(Condition::PortRemote(DHCPV4_SERVER_PORT));
        installer.add_filter(&filter.build())?;

        filter
            .key(ObjectName::PermitDhcpOutboundRequestIpv6.identity())
            .name("Permit outbound DHCP requests (IPv6)")
            .reset(Layer::ConnectV6)
            .condition(Condition::Protocol(Protocol::Udp))
            .conditions(remote_networks(&DHCPV6_SERVER_GROUPS)?)
            .condition(Condition::PortLocal(DHCPV6_CLIENT_PORT))
            .condition(Condition::PortRemote(DHCPV6_SERVER_PORT));
        installer.add_filter(&filter.build())?;

        filter
            .key(ObjectName::PermitDhcpInboundResponseIpv6.identity())
            .name("Permit inbound DHCP responses (IPv6)")
            .reset(Layer::RecvAcceptV6)
            .condition(Condition::Protocol(Protocol::Udp))
            .conditions(remote_networks(&[LINK_LOCAL_V6])?)
            .condition(Condition::PortLocal(DHCPV6_CLIENT_PORT))
            .condition(Condition::PortRemote(DHCPV6_SERVER_PORT));
        installer.add_filter(&filter.build())
    }
}

/// Lets this host serve DHCP on the LAN (e.g. connection sharing)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PermitDhcpServer {
    extent: IpExtent,
}

impl PermitDhcpServer {
    /// Only [`IpExtent::Ipv4Only`] is supported.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidArgument`] for any other extent.
    pub fn with_extent(extent: IpExtent) -> Result<Self> {
        match extent {
            IpExtent::Ipv4Only => Ok(Self { extent }),
            IpExtent::Ipv6Only | IpExtent::Ipv4AndIpv6 => Err(Error::InvalidArgument(format!(
                "DHCP server permit supports IPv4 only, got {extent:?}"
            ))),
        }
    }

    pub const fn extent(&self) -> IpExtent {
        self.extent
    }

    pub fn apply(&self, installer: &mut dyn FilterInstaller) -> Result<()> {
        let mut filter = FilterBuilder::new(
            ObjectName::PermitDhcpServerInboundRequestIpv4.identity(),
            Layer::RecvAcceptV4,
        );
        filter
            .name("Permit inbound DHCP requests (IPv4)")
            .description("This filter is part of a rule that permits hosting a DHCP server")
            .permit()
            .condition(Condition::Protocol(Protocol::Udp))
            .condition(Condition::PortLocal(DHCPV4_SERVER_PORT))
            .condition(Condition::PortRemote(DHCPV4_CLIENT_PORT));
        installer.add_filter(&filter.build())?;

        filter
            .key(ObjectName::PermitDhcpServerOutboundResponseIpv4.identity())
            .name("Permit outbound DHCP responses (IPv4)")
            .reset(Layer::ConnectV4)
            .condition(Condition::Protocol(Protocol::Udp))
            .condition(Condition::PortLocal(DHCPV4_SERVER_PORT))
            .condition(Condition::PortRemote(DHCPV4_CLIENT_PORT));
        installer.add_filter(&filter.build())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::filter::{Action, FilterSpec};

    #[test]
    fn test_dhcp_client_filters() {
        let mut filters: Vec<FilterSpec> = Vec::new();
        PermitDhcp.apply(&mut filters).unwrap();

        assert_eq!(filters.len(), 4);
        assert!(filters.iter().all(|f| f.action == Action::Permit));
        assert!(filters.iter().all(|f| f.family_mismatch().is_none()));
        assert!(
            filters[0]
                .conditions
                .contains(&Condition::PortRemote(DHCPV4_SERVER_PORT))
        );
        // Two server multicast groups OR-ed in one filter
        let remote_nets = filters[2]
            .conditions
            .iter()
            .filter(|c| matches!(c, Condition::IpRemote(_)))
            .count();
        assert_eq!(remote_nets, 2);
    }

    #[test]
    fn test_dhcp_server_rejects_non_ipv4_extent() {
        assert!(matches!(
            PermitDhcpServer::with_extent(IpExtent::Ipv6Only),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            PermitDhcpServer::with_extent(IpExtent::Ipv4AndIpv6),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_dhcp_server_request_in_response_out() {
        let rule = PermitDhcpServer::with_extent(IpExtent::Ipv4Only).unwrap();
        let mut filters: Vec<FilterSpec> = Vec::new();
        rule.apply(&mut filters).unwrap();

        assert_eq!(filters.len(), 2);
        assert_eq!(filters[0].layer, Layer::RecvAcceptV4);
        assert_eq!(filters[1].layer, Layer::ConnectV4);
        assert!(
            filters[1]
                .conditions
                .contains(&Condition::PortLocal(DHCPV4_SERVER_PORT))
        );
    }
}
