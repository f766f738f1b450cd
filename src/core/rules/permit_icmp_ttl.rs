use super::FilterInstaller;
use crate::core::condition::{Condition, IcmpClass};
use crate::core::error::{Error, Result};
use crate::core::filter::{FilterBuilder, Layer, Weight};
use crate::core::identity::ObjectName;
use std::path::PathBuf;

/// Permits inbound ICMP Time Exceeded for the relay client processes.
///
/// Path MTU and route probing by the tunnel client depend on these errors
/// arriving, so the permit carries weight Max to win over broad blocks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermitIcmpTtl {
    relay_clients: Vec<PathBuf>,
}

impl PermitIcmpTtl {
    /// # Errors
    ///
    /// [`Error::InvalidArgument`] when `relay_clients` is empty.
    pub fn new(relay_clients: Vec<PathBuf>) -> Result<Self> {
        if relay_clients.is_empty() {
            return Err(Error::InvalidArgument(
                "ICMP TTL permit requires at least one relay client".to_string(),
            ));
        }
        Ok(Self { relay_clients })
    }

    pub fn apply(&self, installer: &mut dyn FilterInstaller) -> Result<()> {
        let clients = || self.relay_clients.iter().cloned().map(Condition::Application);

        let mut filter =
            FilterBuilder::new(ObjectName::PermitIcmpTtlIpv4.identity(), Layer::IcmpErrorV4);
        filter
            .name("Permit inbound ICMP TTL exceeded for relay clients (IPv4)")
            .description("This filter is part of a rule that permits ICMP errors for relay clients")
            .weight(Weight::Max)
            .permit()
            .condition(Condition::IcmpError(IcmpClass::TimeExceeded))
            .conditions(clients());
        installer.add_filter(&filter.build())?;

        filter
            .key(ObjectName::PermitIcmpTtlIpv6.identity())
            .name("Permit inbound ICMP TTL exceeded for relay clients (IPv6)")
            .reset(Layer::IcmpErrorV6)
            .condition(Condition::IcmpError(IcmpClass::TimeExceeded))
            .conditions(clients());
        installer.add_filter(&filter.build())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::filter::FilterSpec;

    #[test]
    fn test_requires_clients() {
        assert!(matches!(
            PermitIcmpTtl::new(vec![]),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_max_weight_on_both_families() {
        let rule = PermitIcmpTtl::new(vec![
            PathBuf::from("/usr/bin/wireguard-go"),
            PathBuf::from("/usr/bin/openvpn"),
        ])
        .unwrap();
        let mut filters: Vec<FilterSpec> = Vec::new();
        rule.apply(&mut filters).unwrap();

        assert_eq!(filters.len(), 2);
        assert_eq!(filters[0].layer, Layer::IcmpErrorV4);
        assert_eq!(filters[1].layer, Layer::IcmpErrorV6);
        for filter in &filters {
            assert_eq!(filter.weight, Weight::Max);
            // icmp class + two applications
            assert_eq!(filter.conditions.len(), 3);
        }
    }
}
