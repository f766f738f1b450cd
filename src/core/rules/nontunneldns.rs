//! DNS rules for traffic outside the tunnel

use super::{DNS_PORT, FilterInstaller};
use crate::core::condition::{Condition, MatchType};
use crate::core::error::Result;
use crate::core::filter::{FilterBuilder, Layer, Sublayer};
use crate::core::identity::ObjectName;

/// Blocks DNS everywhere except loopback and, when given, the tunnel interface
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BlockAll {
    tunnel_alias: Option<String>,
}

impl BlockAll {
    pub fn new(tunnel_alias: Option<String>) -> Self {
        Self {
            tunnel_alias: tunnel_alias.filter(|alias| !alias.is_empty()),
        }
    }

    pub fn tunnel_alias(&self) -> Option<&str> {
        self.tunnel_alias.as_deref()
    }

    fn conditions(&self) -> Vec<Condition> {
        let mut conditions = vec![
            Condition::PortRemote(DNS_PORT),
            Condition::Loopback(MatchType::NotEqual),
        ];
        if let Some(alias) = &self.tunnel_alias {
            conditions.push(Condition::interface(alias.clone(), MatchType::NotEqual));
        }
        conditions
    }

    pub fn apply(&self, installer: &mut dyn FilterInstaller) -> Result<()> {
        let mut filter = FilterBuilder::new(
            ObjectName::NonTunnelDnsBlockAllIpv4.identity(),
            Layer::ConnectV4,
        );
        filter
            .name("Block DNS outside the tunnel (IPv4)")
            .description("This filter is part of a rule that blocks DNS outside the VPN tunnel")
            .sublayer(Sublayer::Dns)
            .block()
            .conditions(self.conditions());
        installer.add_filter(&filter.build())?;

        filter
            .key(ObjectName::NonTunnelDnsBlockAllIpv6.identity())
            .name("Block DNS outside the tunnel (IPv6)")
            .reset(Layer::ConnectV6)
            .conditions(self.conditions());
        installer.add_filter(&filter.build())
    }
}
