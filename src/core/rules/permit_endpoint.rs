use super::FilterInstaller;
use crate::core::condition::{AddressFamily, Condition, Endpoint};
use crate::core::error::Result;
use crate::core::filter::{FilterBuilder, Layer};
use crate::core::identity::ObjectName;
use std::path::PathBuf;

/// Permits traffic to a single endpoint, e.g. the VPN provider's API while
/// the tunnel is down. Optionally restricted to a set of client applications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermitEndpoint {
    endpoint: Endpoint,
    clients: Vec<PathBuf>,
}

impl PermitEndpoint {
    /// An empty `clients` list permits any application
    pub fn new(endpoint: Endpoint, clients: Vec<PathBuf>) -> Self {
        Self { endpoint, clients }
    }

    pub const fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn apply(&self, installer: &mut dyn FilterInstaller) -> Result<()> {
        let (id, layer) = match self.endpoint.family() {
            AddressFamily::Ipv4 => (ObjectName::PermitEndpointIpv4.identity(), Layer::ConnectV4),
            AddressFamily::Ipv6 => (ObjectName::PermitEndpointIpv6.identity(), Layer::ConnectV6),
        };

        let mut filter = FilterBuilder::new(id, layer);
        filter
            .name(format!("Permit outbound connections to {}", self.endpoint))
            .description("This filter is part of a rule that permits traffic to a specific endpoint")
            .permit()
            .conditions(self.endpoint.conditions())
            .conditions(self.clients.iter().cloned().map(Condition::Application));
        installer.add_filter(&filter.build())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::condition::{ConditionField, Protocol};
    use crate::core::filter::FilterSpec;

    #[test]
    fn test_layer_follows_endpoint_family() {
        let v6 = PermitEndpoint::new("[2a03:1b20::1]:443/tcp".parse().unwrap(), vec![]);
        let mut filters: Vec<FilterSpec> = Vec::new();
        v6.apply(&mut filters).unwrap();

        assert_eq!(filters.len(), 1);
        assert_eq!(filters[0].layer, Layer::ConnectV6);
        assert!(filters[0].conditions.contains(&Condition::Protocol(Protocol::Tcp)));
        assert!(filters[0].conditions.contains(&Condition::PortRemote(443)));
    }

    #[test]
    fn test_clients_form_an_or_set() {
        let rule = PermitEndpoint::new(
            "45.83.223.196:443/tcp".parse().unwrap(),
            vec![
                PathBuf::from("/opt/vpn/daemon"),
                PathBuf::from("/opt/vpn/problem-report"),
            ],
        );
        let filters = crate::core::rules::Rule::from(rule).compile().unwrap();

        let apps = filters[0]
            .conditions
            .iter()
            .filter(|c| c.field() == ConditionField::Application)
            .count();
        assert_eq!(filters[0].layer, Layer::ConnectV4);
        assert_eq!(apps, 2);
    }
}
