use super::FilterInstaller;
use crate::core::condition::{AddressFamily, Condition, Endpoint};
use crate::core::error::Result;
use crate::core::filter::{FilterBuilder, Layer};
use crate::core::identity::ObjectName;
use std::path::PathBuf;

/// Permits the tunnel client to reach the VPN relay.
///
/// When `clients` is non-empty only those executables may use the relay
/// endpoint; other processes fall through to the block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermitVpnRelay {
    relay: Endpoint,
    clients: Vec<PathBuf>,
}

impl PermitVpnRelay {
    pub fn new(relay: Endpoint, clients: Vec<PathBuf>) -> Self {
        Self { relay, clients }
    }

    pub const fn relay(&self) -> &Endpoint {
        &self.relay
    }

    pub fn apply(&self, installer: &mut dyn FilterInstaller) -> Result<()> {
        let id = match self.relay.family() {
            AddressFamily::Ipv4 => ObjectName::PermitVpnRelayIpv4,
            AddressFamily::Ipv6 => ObjectName::PermitVpnRelayIpv6,
        }
        .identity();

        let mut filter = FilterBuilder::new(id, Layer::outbound(self.relay.family()));
        filter
            .name(format!("Permit outbound connections to VPN relay {}", self.relay))
            .description("This filter is part of a rule that permits communication with a VPN relay")
            .permit()
            .conditions(self.relay.conditions())
            .conditions(self.clients.iter().cloned().map(Condition::Application));
        installer.add_filter(&filter.build())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::filter::{Action, FilterSpec};

    #[test]
    fn test_single_filter_on_relay_family() {
        let rule = PermitVpnRelay::new(
            "185.65.135.1:51820/udp".parse().unwrap(),
            vec![PathBuf::from("/usr/bin/wireguard-go")],
        );
        let mut filters: Vec<FilterSpec> = Vec::new();
        rule.apply(&mut filters).unwrap();

        assert_eq!(filters.len(), 1);
        let filter = &filters[0];
        assert_eq!(filter.layer, Layer::ConnectV4);
        assert_eq!(filter.action, Action::Permit);
        assert_eq!(filter.id, ObjectName::PermitVpnRelayIpv4.identity());
        assert!(filter.conditions.contains(&Condition::PortRemote(51820)));
        assert!(
            filter
                .conditions
                .contains(&Condition::application("/usr/bin/wireguard-go"))
        );
    }

    #[test]
    fn test_ipv6_relay() {
        let rule = PermitVpnRelay::new("[2a03:1b20:1::1]:51820/udp".parse().unwrap(), vec![]);
        let filters = crate::core::rules::Rule::from(rule).compile().unwrap();
        assert_eq!(filters[0].layer, Layer::ConnectV6);
        assert!(filters[0].family_mismatch().is_none());
    }
}
