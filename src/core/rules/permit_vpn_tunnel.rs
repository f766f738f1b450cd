use super::FilterInstaller;
use crate::core::condition::{Condition, MatchType};
use crate::core::error::{Error, Result};
use crate::core::filter::{FilterBuilder, Layer};
use crate::core::identity::ObjectName;

/// Permits all traffic through the tunnel interface
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermitVpnTunnel {
    tunnel_alias: String,
}

impl PermitVpnTunnel {
    /// # Errors
    ///
    /// [`Error::InvalidArgument`] when the alias is empty.
    pub fn new(tunnel_alias: impl Into<String>) -> Result<Self> {
        let tunnel_alias = tunnel_alias.into();
        if tunnel_alias.is_empty() {
            return Err(Error::InvalidArgument(
                "tunnel interface alias must not be empty".to_string(),
            ));
        }
        Ok(Self { tunnel_alias })
    }

    pub fn tunnel_alias(&self) -> &str {
        &self.tunnel_alias
    }

    pub fn apply(&self, installer: &mut dyn FilterInstaller) -> Result<()> {
        let on_tunnel = || Condition::interface(self.tunnel_alias.clone(), MatchType::Equal);

        let mut filter = FilterBuilder::new(
            ObjectName::PermitVpnTunnelOutboundIpv4.identity(),
            Layer::ConnectV4,
        );
        filter
            .name("Permit outbound connections on tunnel interface (IPv4)")
            .description("This filter is part of a rule that permits traffic inside the VPN tunnel")
            .permit()
            .condition(on_tunnel());
        installer.add_filter(&filter.build())?;

        filter
            .key(ObjectName::PermitVpnTunnelOutboundIpv6.identity())
            .name("Permit outbound connections on tunnel interface (IPv6)")
            .reset(Layer::ConnectV6)
            .condition(on_tunnel());
        installer.add_filter(&filter.build())?;

        filter
            .key(ObjectName::PermitVpnTunnelInboundIpv4.identity())
            .name("Permit inbound connections on tunnel interface (IPv4)")
            .reset(Layer::RecvAcceptV4)
            .condition(on_tunnel());
        installer.add_filter(&filter.build())?;

        filter
            .key(ObjectName::PermitVpnTunnelInboundIpv6.identity())
            .name("Permit inbound connections on tunnel interface (IPv6)")
            .reset(Layer::RecvAcceptV6)
            .condition(on_tunnel());
        installer.add_filter(&filter.build())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::filter::FilterSpec;

    #[test]
    fn test_rejects_empty_alias() {
        assert!(matches!(
            PermitVpnTunnel::new(""),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_every_filter_bound_to_alias() {
        let rule = PermitVpnTunnel::new("wg0").unwrap();
        let mut filters: Vec<FilterSpec> = Vec::new();
        rule.apply(&mut filters).unwrap();

        assert_eq!(filters.len(), 4);
        let expected = Condition::interface("wg0", MatchType::Equal);
        assert!(filters.iter().all(|f| f.conditions == vec![expected.clone()]));
    }
}
