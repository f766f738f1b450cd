//! Filter descriptors and the builder rules use to emit them
//!
//! A [`FilterSpec`] is everything the engine needs to create one filter object:
//! identity, metadata, enforcement point ([`Layer`]), precedence group
//! ([`Sublayer`]), [`Weight`], [`Action`], and conditions.
//!
//! # Builder reuse
//!
//! Rules emit several closely related filters from one [`FilterBuilder`].
//! Setters mutate the builder in place and [`FilterBuilder::reset`] only clears
//! conditions and rebinds the layer, so every field not explicitly set again is
//! inherited by the next filter:
//!
//! ```
//! use vpnfw::core::filter::{Action, FilterBuilder, Layer, Weight};
//! use vpnfw::core::identity::identity_for;
//!
//! let mut builder = FilterBuilder::new(identity_for("a"), Layer::ConnectV4);
//! builder.weight(Weight::Max).action(Action::Permit);
//! let first = builder.build();
//!
//! builder.key(identity_for("b")).reset(Layer::ConnectV6);
//! let second = builder.build();
//!
//! assert_eq!(second.weight, first.weight);
//! assert_eq!(second.action, Action::Permit);
//! ```

use crate::core::condition::{AddressFamily, Condition};
use crate::core::identity::{ObjectName, StableId};
use serde::{Deserialize, Serialize};

/// Traffic direction an enforcement point intercepts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display)]
pub enum Direction {
    #[strum(serialize = "inbound")]
    Inbound,
    #[strum(serialize = "outbound")]
    Outbound,
}

/// Enforcement point, scoped to a direction and address family
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumIter,
)]
pub enum Layer {
    /// Outbound connection authorization (IPv4)
    #[strum(serialize = "connect_v4")]
    ConnectV4,
    /// Outbound connection authorization (IPv6)
    #[strum(serialize = "connect_v6")]
    ConnectV6,
    /// Inbound connection acceptance (IPv4)
    #[strum(serialize = "recv_accept_v4")]
    RecvAcceptV4,
    /// Inbound connection acceptance (IPv6)
    #[strum(serialize = "recv_accept_v6")]
    RecvAcceptV6,
    /// Inbound ICMP error messages (IPv4)
    #[strum(serialize = "icmp_error_v4")]
    IcmpErrorV4,
    /// Inbound ICMP error messages (IPv6)
    #[strum(serialize = "icmp_error_v6")]
    IcmpErrorV6,
}

impl Layer {
    pub const fn outbound(family: AddressFamily) -> Self {
        match family {
            AddressFamily::Ipv4 => Layer::ConnectV4,
            AddressFamily::Ipv6 => Layer::ConnectV6,
        }
    }

    pub const fn inbound(family: AddressFamily) -> Self {
        match family {
            AddressFamily::Ipv4 => Layer::RecvAcceptV4,
            AddressFamily::Ipv6 => Layer::RecvAcceptV6,
        }
    }

    pub const fn icmp_error(family: AddressFamily) -> Self {
        match family {
            AddressFamily::Ipv4 => Layer::IcmpErrorV4,
            AddressFamily::Ipv6 => Layer::IcmpErrorV6,
        }
    }

    pub const fn family(self) -> AddressFamily {
        match self {
            Layer::ConnectV4 | Layer::RecvAcceptV4 | Layer::IcmpErrorV4 => AddressFamily::Ipv4,
            Layer::ConnectV6 | Layer::RecvAcceptV6 | Layer::IcmpErrorV6 => AddressFamily::Ipv6,
        }
    }

    pub const fn direction(self) -> Direction {
        match self {
            Layer::ConnectV4 | Layer::ConnectV6 => Direction::Outbound,
            Layer::RecvAcceptV4
            | Layer::RecvAcceptV6
            | Layer::IcmpErrorV4
            | Layer::IcmpErrorV6 => Direction::Inbound,
        }
    }

    pub const fn is_icmp_error(self) -> bool {
        matches!(self, Layer::IcmpErrorV4 | Layer::IcmpErrorV6)
    }
}

/// Precedence group filters are evaluated in
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumIter,
)]
pub enum Sublayer {
    /// Default-deny baseline and its permits
    #[strum(serialize = "baseline")]
    Baseline,
    /// DNS policy, swappable independently of the baseline
    #[strum(serialize = "dns")]
    Dns,
}

impl Sublayer {
    pub const fn object_name(self) -> ObjectName {
        match self {
            Sublayer::Baseline => ObjectName::SublayerBaseline,
            Sublayer::Dns => ObjectName::SublayerDns,
        }
    }

    pub fn identity(self) -> StableId {
        self.object_name().identity()
    }

    /// Evaluation priority among sublayers, higher first
    pub const fn priority(self) -> u16 {
        match self {
            Sublayer::Baseline => u16::MAX,
            Sublayer::Dns => u16::MAX - 1,
        }
    }

    pub fn spec(self) -> SublayerSpec {
        let (name, description) = match self {
            Sublayer::Baseline => (
                "vpnfw baseline",
                "Default-deny policy and the permits that punch through it",
            ),
            Sublayer::Dns => ("vpnfw DNS", "DNS policy scoped to the tunnel state"),
        };
        SublayerSpec {
            id: self.identity(),
            name: name.to_string(),
            description: description.to_string(),
            provider: provider_identity(),
            priority: self.priority(),
        }
    }
}

/// Tie-breaker between filters of one layer and sublayer
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Default,
    Serialize,
    Deserialize,
    strum::Display,
)]
pub enum Weight {
    #[strum(serialize = "min")]
    Min,
    #[default]
    #[strum(serialize = "medium")]
    Medium,
    #[strum(serialize = "max")]
    Max,
}

impl Weight {
    pub const fn value(self) -> u8 {
        match self {
            Weight::Min => 0,
            Weight::Medium => 8,
            Weight::Max => 15,
        }
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, strum::Display,
)]
pub enum Action {
    #[strum(serialize = "permit")]
    Permit,
    #[default]
    #[strum(serialize = "block")]
    Block,
}

/// Kind of engine object
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    strum::Display,
)]
pub enum ObjectKind {
    #[strum(serialize = "provider")]
    Provider,
    #[strum(serialize = "sublayer")]
    Sublayer,
    #[strum(serialize = "filter")]
    Filter,
}

pub fn provider_identity() -> StableId {
    ObjectName::Provider.identity()
}

/// Owner of every sublayer and filter vpnfw installs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderSpec {
    pub id: StableId,
    pub name: String,
    pub description: String,
}

impl Default for ProviderSpec {
    fn default() -> Self {
        Self {
            id: provider_identity(),
            name: "vpnfw".to_string(),
            description: "VPN client firewall policy".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SublayerSpec {
    pub id: StableId,
    pub name: String,
    pub description: String,
    pub provider: StableId,
    pub priority: u16,
}

/// Complete description of one filter object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterSpec {
    pub id: StableId,
    pub name: String,
    pub description: String,
    pub provider: StableId,
    pub layer: Layer,
    pub sublayer: Sublayer,
    pub weight: Weight,
    pub action: Action,
    pub conditions: Vec<Condition>,
}

impl FilterSpec {
    /// Checks that every address condition agrees with the layer's family.
    ///
    /// A mismatch means a rule built a filter it should never build; the
    /// installer refuses it instead of letting the engine guess.
    pub fn family_mismatch(&self) -> Option<&Condition> {
        let family = self.layer.family();
        self.conditions
            .iter()
            .find(|c| c.family().is_some_and(|f| f != family))
    }
}

/// Incremental, reusable filter builder
///
/// Defaults: vpnfw provider, [`Sublayer::Baseline`], [`Weight::Medium`],
/// [`Action::Block`], empty name and description, no conditions.
#[derive(Debug, Clone)]
pub struct FilterBuilder {
    id: StableId,
    name: String,
    description: String,
    provider: StableId,
    layer: Layer,
    sublayer: Sublayer,
    weight: Weight,
    action: Action,
    conditions: Vec<Condition>,
}

impl FilterBuilder {
    pub fn new(id: StableId, layer: Layer) -> Self {
        Self {
            id,
            name: String::new(),
            description: String::new(),
            provider: provider_identity(),
            layer,
            sublayer: Sublayer::Baseline,
            weight: Weight::default(),
            action: Action::default(),
            conditions: Vec::new(),
        }
    }

    pub fn key(&mut self, id: StableId) -> &mut Self {
        self.id = id;
        self
    }

    pub fn name(&mut self, name: impl Into<String>) -> &mut Self {
        self.name = name.into();
        self
    }

    pub fn description(&mut self, description: impl Into<String>) -> &mut Self {
        self.description = description.into();
        self
    }

    pub fn provider(&mut self, provider: StableId) -> &mut Self {
        self.provider = provider;
        self
    }

    pub fn layer(&mut self, layer: Layer) -> &mut Self {
        self.layer = layer;
        self
    }

    pub fn sublayer(&mut self, sublayer: Sublayer) -> &mut Self {
        self.sublayer = sublayer;
        self
    }

    pub fn weight(&mut self, weight: Weight) -> &mut Self {
        self.weight = weight;
        self
    }

    pub fn permit(&mut self) -> &mut Self {
        self.action = Action::Permit;
        self
    }

    pub fn block(&mut self) -> &mut Self {
        self.action = Action::Block;
        self
    }

    pub fn action(&mut self, action: Action) -> &mut Self {
        self.action = action;
        self
    }

    pub fn condition(&mut self, condition: Condition) -> &mut Self {
        self.conditions.push(condition);
        self
    }

    pub fn conditions(&mut self, conditions: impl IntoIterator<Item = Condition>) -> &mut Self {
        self.conditions.extend(conditions);
        self
    }

    /// Clears conditions and binds a new layer; every other field is kept
    pub fn reset(&mut self, layer: Layer) -> &mut Self {
        self.conditions.clear();
        self.layer = layer;
        self
    }

    pub fn build(&self) -> FilterSpec {
        FilterSpec {
            id: self.id,
            name: self.name.clone(),
            description: self.description.clone(),
            provider: self.provider,
            layer: self.layer,
            sublayer: self.sublayer,
            weight: self.weight,
            action: self.action,
            conditions: self.conditions.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::condition::MatchType;
    use crate::core::identity::identity_for;

    #[test]
    fn test_builder_defaults() {
        let spec = FilterBuilder::new(identity_for("t"), Layer::ConnectV4).build();
        assert_eq!(spec.provider, provider_identity());
        assert_eq!(spec.sublayer, Sublayer::Baseline);
        assert_eq!(spec.weight, Weight::Medium);
        assert_eq!(spec.action, Action::Block);
        assert!(spec.conditions.is_empty());
    }

    #[test]
    fn test_later_assignment_overrides_earlier() {
        let mut builder = FilterBuilder::new(identity_for("t"), Layer::ConnectV4);
        builder.weight(Weight::Min).weight(Weight::Max).name("a").name("b");
        let spec = builder.build();
        assert_eq!(spec.weight, Weight::Max);
        assert_eq!(spec.name, "b");
    }

    #[test]
    fn test_second_filter_inherits_unset_fields() {
        let mut builder = FilterBuilder::new(identity_for("first"), Layer::ConnectV4);
        builder
            .name("Permit things")
            .description("shared description")
            .sublayer(Sublayer::Dns)
            .weight(Weight::Max)
            .permit()
            .condition(Condition::PortRemote(53));
        let first = builder.build();

        builder.key(identity_for("second")).reset(Layer::ConnectV6);
        let second = builder.build();

        assert_ne!(first.id, second.id);
        assert_eq!(second.layer, Layer::ConnectV6);
        assert!(second.conditions.is_empty());
        assert_eq!(second.name, first.name);
        assert_eq!(second.description, first.description);
        assert_eq!(second.sublayer, Sublayer::Dns);
        assert_eq!(second.weight, Weight::Max);
        assert_eq!(second.action, Action::Permit);
    }

    #[test]
    fn test_build_snapshots_conditions() {
        let mut builder = FilterBuilder::new(identity_for("t"), Layer::ConnectV4);
        builder.condition(Condition::Loopback(MatchType::Equal));
        let before = builder.build();
        builder.condition(Condition::PortRemote(53));
        assert_eq!(before.conditions.len(), 1);
        assert_eq!(builder.build().conditions.len(), 2);
    }

    #[test]
    fn test_layer_family_and_direction() {
        assert_eq!(Layer::outbound(AddressFamily::Ipv6), Layer::ConnectV6);
        assert_eq!(Layer::inbound(AddressFamily::Ipv4), Layer::RecvAcceptV4);
        assert_eq!(Layer::IcmpErrorV6.family(), AddressFamily::Ipv6);
        assert_eq!(Layer::IcmpErrorV4.direction(), Direction::Inbound);
        assert_eq!(Layer::ConnectV4.direction(), Direction::Outbound);
    }

    #[test]
    fn test_family_mismatch_detected() {
        let mut builder = FilterBuilder::new(identity_for("t"), Layer::ConnectV4);
        builder.condition(Condition::ip_remote("fe80::/10".parse::<ipnetwork::IpNetwork>().unwrap()));
        assert!(builder.build().family_mismatch().is_some());

        builder.reset(Layer::ConnectV6);
        builder.condition(Condition::ip_remote("fe80::/10".parse::<ipnetwork::IpNetwork>().unwrap()));
        assert!(builder.build().family_mismatch().is_none());
    }

    #[test]
    fn test_weight_ordering() {
        assert!(Weight::Min < Weight::Medium);
        assert!(Weight::Medium < Weight::Max);
        assert!(Weight::Min.value() < Weight::Max.value());
    }

    #[test]
    fn test_sublayer_specs_owned_by_provider() {
        for sublayer in [Sublayer::Baseline, Sublayer::Dns] {
            assert_eq!(sublayer.spec().provider, provider_identity());
        }
        assert!(Sublayer::Baseline.priority() > Sublayer::Dns.priority());
    }
}
