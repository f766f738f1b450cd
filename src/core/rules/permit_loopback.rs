use super::FilterInstaller;
use crate::core::condition::{Condition, MatchType};
use crate::core::error::Result;
use crate::core::filter::{FilterBuilder, Layer};
use crate::core::identity::ObjectName;

/// Permits all traffic on the loopback interface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PermitLoopback;

impl PermitLoopback {
    pub fn apply(&self, installer: &mut dyn FilterInstaller) -> Result<()> {
        let steps = [
            (
                ObjectName::PermitLoopbackOutboundIpv4,
                Layer::ConnectV4,
                "Permit outbound loopback traffic (IPv4)",
            ),
            (
                ObjectName::PermitLoopbackOutboundIpv6,
                Layer::ConnectV6,
                "Permit outbound loopback traffic (IPv6)",
            ),
            (
                ObjectName::PermitLoopbackInboundIpv4,
                Layer::RecvAcceptV4,
                "Permit inbound loopback traffic (IPv4)",
            ),
            (
                ObjectName::PermitLoopbackInboundIpv6,
                Layer::RecvAcceptV6,
                "Permit inbound loopback traffic (IPv6)",
            ),
        ];

        let mut filter = FilterBuilder::new(steps[0].0.identity(), steps[0].1);
        filter
            .description("This filter is part of a rule that permits loopback traffic")
            .permit();

        for (object, layer, name) in steps {
            filter
                .key(object.identity())
                .name(name)
                .reset(layer)
                .condition(Condition::Loopback(MatchType::Equal));
            installer.add_filter(&filter.build())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::filter::{Action, FilterSpec};

    #[test]
    fn test_loopback_all_layers() {
        let mut filters: Vec<FilterSpec> = Vec::new();
        PermitLoopback.apply(&mut filters).unwrap();

        assert_eq!(filters.len(), 4);
        for filter in &filters {
            assert_eq!(filter.action, Action::Permit);
            assert_eq!(
                filter.conditions,
                vec![Condition::Loopback(MatchType::Equal)]
            );
        }
        let ids: std::collections::HashSet<_> = filters.iter().map(|f| f.id).collect();
        assert_eq!(ids.len(), 4);
    }
}
