use super::{DNS_PORT, FilterInstaller};
use crate::core::condition::Condition;
use crate::core::error::Result;
use crate::core::filter::{FilterBuilder, Layer};
use crate::core::identity::ObjectName;

/// Permits outbound DNS to any resolver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PermitDns;

impl PermitDns {
    pub fn apply(&self, installer: &mut dyn FilterInstaller) -> Result<()> {
        let mut filter = FilterBuilder::new(
            ObjectName::PermitDnsOutboundIpv4.identity(),
            Layer::ConnectV4,
        );
        filter
            .name("Permit outbound DNS (IPv4)")
            .description("This filter is part of a rule that permits DNS traffic")
            .permit()
            .condition(Condition::PortRemote(DNS_PORT));
        installer.add_filter(&filter.build())?;

        filter
            .key(ObjectName::PermitDnsOutboundIpv6.identity())
            .name("Permit outbound DNS (IPv6)")
            .reset(Layer::ConnectV6)
            .condition(Condition::PortRemote(DNS_PORT));
        installer.add_filter(&filter.build())
    }
}
