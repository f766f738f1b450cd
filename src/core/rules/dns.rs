//! DNS rules that apply regardless of tunnel state

use super::{DNS_PORT, FilterInstaller};
use crate::core::condition::{Condition, MatchType};
use crate::core::error::Result;
use crate::core::filter::{FilterBuilder, Layer, Sublayer};
use crate::core::identity::ObjectName;

/// Blocks every non-loopback DNS query.
///
/// Local resolvers listening on loopback stay reachable; anything leaving
/// the host on port 53 is dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BlockAll;

impl BlockAll {
    pub fn apply(&self, installer: &mut dyn FilterInstaller) -> Result<()> {
        let mut filter = FilterBuilder::new(ObjectName::DnsBlockAllIpv4.identity(), Layer::ConnectV4);
        filter
            .name("Block all non-loopback DNS (IPv4)")
            .description("This filter is part of a rule that blocks DNS traffic")
            .sublayer(Sublayer::Dns)
            .block()
            .condition(Condition::PortRemote(DNS_PORT))
            .condition(Condition::Loopback(MatchType::NotEqual));
        installer.add_filter(&filter.build())?;

        filter
            .key(ObjectName::DnsBlockAllIpv6.identity())
            .name("Block all non-loopback DNS (IPv6)")
            .reset(Layer::ConnectV6)
            .condition(Condition::PortRemote(DNS_PORT))
            .condition(Condition::Loopback(MatchType::NotEqual));
        installer.add_filter(&filter.build())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::filter::{Action, FilterSpec};

    #[test]
    fn test_dns_sublayer_block() {
        let mut filters: Vec<FilterSpec> = Vec::new();
        BlockAll.apply(&mut filters).unwrap();

        assert_eq!(filters.len(), 2);
        for filter in &filters {
            assert_eq!(filter.sublayer, Sublayer::Dns);
            assert_eq!(filter.action, Action::Block);
            assert!(
                filter
                    .conditions
                    .contains(&Condition::Loopback(MatchType::NotEqual))
            );
        }
    }
}
