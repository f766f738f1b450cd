use super::FilterInstaller;
use crate::core::error::Result;
use crate::core::filter::{FilterBuilder, Layer, Weight};
use crate::core::identity::ObjectName;

/// Default-deny baseline: blocks every connection in both directions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BlockAll;

impl BlockAll {
    pub fn apply(&self, installer: &mut dyn FilterInstaller) -> Result<()> {
        let mut filter = FilterBuilder::new(
            ObjectName::BlockAllOutboundIpv4.identity(),
            Layer::ConnectV4,
        );
        filter
            .name("Block all outbound connections (IPv4)")
            .description("This filter is part of a rule that restricts inbound and outbound traffic")
            .weight(Weight::Min)
            .block();
        installer.add_filter(&filter.build())?;

        filter
            .key(ObjectName::BlockAllOutboundIpv6.identity())
            .name("Block all outbound connections (IPv6)")
            .reset(Layer::ConnectV6);
        installer.add_filter(&filter.build())?;

        filter
            .key(ObjectName::BlockAllInboundIpv4.identity())
            .name("Block all inbound connections (IPv4)")
            .reset(Layer::RecvAcceptV4);
        installer.add_filter(&filter.build())?;

        filter
            .key(ObjectName::BlockAllInboundIpv6.identity())
            .name("Block all inbound connections (IPv6)")
            .reset(Layer::RecvAcceptV6);
        installer.add_filter(&filter.build())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::filter::{Action, FilterSpec};

    #[test]
    fn test_four_min_weight_blocks() {
        let mut filters: Vec<FilterSpec> = Vec::new();
        BlockAll.apply(&mut filters).unwrap();

        assert_eq!(filters.len(), 4);
        for filter in &filters {
            assert_eq!(filter.weight, Weight::Min);
            assert_eq!(filter.action, Action::Block);
            assert!(filter.conditions.is_empty());
        }
        let layers: Vec<Layer> = filters.iter().map(|f| f.layer).collect();
        assert_eq!(
            layers,
            vec![
                Layer::ConnectV4,
                Layer::ConnectV6,
                Layer::RecvAcceptV4,
                Layer::RecvAcceptV6
            ]
        );
    }
}
