//! Policy state machine
//!
//! Maps each VPN connection state to an ordered rule composition and installs
//! it through the [`TransactionCoordinator`]. A state is only recorded as
//! current once its policy has committed; on failure the caller gets a
//! [`PolicyError`] and the previous state stays enforced.

use crate::core::condition::{Endpoint, IpExtent};
use crate::core::engine::FilterEngine;
use crate::core::error::{Error, Result};
use crate::core::rules::{
    BlockAll, PermitDhcp, PermitDhcpServer, PermitDns, PermitEndpoint, PermitIcmpTtl, PermitLan,
    PermitLanService, PermitLoopback, PermitVpnRelay, PermitVpnTunnel, Rule, dns, nontunneldns,
    tunneldns,
};
use crate::core::transaction::TransactionCoordinator;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::PathBuf;
use tracing::{info, warn};

/// VPN connection state
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize, strum::Display)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum PolicyState {
    /// No tunnel and no policy installed (unless lockdown is configured)
    #[default]
    #[strum(serialize = "disconnected")]
    Disconnected,
    /// Everything blocked except the local baseline
    #[strum(serialize = "blocked")]
    Blocked,
    /// Tunnel being established to `relay`
    #[strum(serialize = "connecting")]
    Connecting { relay: Endpoint },
    /// Tunnel up on `tunnel_alias`, DNS restricted to `dns_hosts`
    #[strum(serialize = "connected")]
    Connected {
        relay: Endpoint,
        tunnel_alias: String,
        dns_hosts: Vec<IpAddr>,
    },
}

/// Endpoint reachable outside the tunnel, e.g. the provider's API
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllowedEndpoint {
    pub endpoint: Endpoint,
    #[serde(default)]
    pub clients: Vec<PathBuf>,
}

/// User-facing knobs that shape every composition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicySettings {
    /// Permit LAN traffic and LAN-hosted services
    pub allow_lan: bool,
    /// Permit DHCP client traffic so leases can renew while blocked
    pub permit_dhcp: bool,
    /// Lockdown mode: keep blocking when the tunnel is down on purpose
    pub block_when_disconnected: bool,
    /// Permit DNS to any resolver while the tunnel is being set up
    pub permit_dns_while_connecting: bool,
    /// Executables allowed to talk to the relay (empty: any process)
    pub relay_clients: Vec<PathBuf>,
    pub allowed_endpoint: Option<AllowedEndpoint>,
}

impl Default for PolicySettings {
    fn default() -> Self {
        Self {
            allow_lan: false,
            permit_dhcp: true,
            block_when_disconnected: false,
            permit_dns_while_connecting: false,
            relay_clients: Vec::new(),
            allowed_endpoint: None,
        }
    }
}

impl PolicySettings {
    /// Whether any rule would be limited to specific executables
    pub fn has_application_scoping(&self) -> bool {
        !self.relay_clients.is_empty()
            || self
                .allowed_endpoint
                .as_ref()
                .is_some_and(|allowed| !allowed.clients.is_empty())
    }

    /// Same settings with every executable restriction lifted
    pub fn without_application_scoping(&self) -> Self {
        let mut settings = self.clone();
        settings.relay_clients.clear();
        if let Some(allowed) = &mut settings.allowed_endpoint {
            allowed.clients.clear();
        }
        settings
    }
}

/// Drops executable scoping when `engine` cannot match on it, so
/// transitions do not fail on the first filter that carries it
fn fit_to_engine<E: FilterEngine>(engine: &E, settings: PolicySettings) -> PolicySettings {
    if engine.supports_application_conditions() || !settings.has_application_scoping() {
        return settings;
    }
    warn!(
        "Engine cannot match on executables, ignoring relay_clients {:?} and allowed endpoint clients",
        settings.relay_clients
    );
    settings.without_application_scoping()
}

/// A state transition that did not take effect
#[derive(Debug, thiserror::Error)]
#[error("Failed to apply policy for state '{state}': {source}")]
pub struct PolicyError {
    /// Name of the state that was requested
    pub state: String,
    #[source]
    pub source: Error,
}

impl PolicyError {
    fn new(state: &PolicyState, source: Error) -> Self {
        Self {
            state: state.to_string(),
            source,
        }
    }
}

fn baseline(settings: &PolicySettings) -> Result<Vec<Rule>> {
    let mut rules: Vec<Rule> = vec![BlockAll.into(), PermitLoopback.into()];
    if settings.permit_dhcp {
        rules.push(PermitDhcp.into());
    }
    if settings.allow_lan {
        rules.push(PermitLan.into());
        rules.push(PermitLanService.into());
        rules.push(PermitDhcpServer::with_extent(IpExtent::Ipv4Only)?.into());
    }
    Ok(rules)
}

fn allowed_endpoint(settings: &PolicySettings) -> Option<Rule> {
    settings
        .allowed_endpoint
        .as_ref()
        .map(|allowed| PermitEndpoint::new(allowed.endpoint, allowed.clients.clone()).into())
}

fn relay_rules(relay: &Endpoint, settings: &PolicySettings) -> Result<Vec<Rule>> {
    let mut rules: Vec<Rule> = vec![PermitVpnRelay::new(*relay, settings.relay_clients.clone()).into()];
    if !settings.relay_clients.is_empty() {
        rules.push(PermitIcmpTtl::new(settings.relay_clients.clone())?.into());
    }
    Ok(rules)
}

/// Ordered rule sequence enforcing `state` under `settings`.
///
/// # Errors
///
/// [`Error::InvalidArgument`] when the state carries values a rule cannot
/// express, such as an empty DNS host list.
pub fn compose(state: &PolicyState, settings: &PolicySettings) -> Result<Vec<Rule>> {
    match state {
        PolicyState::Disconnected => {
            if settings.block_when_disconnected {
                compose(&PolicyState::Blocked, settings)
            } else {
                Ok(Vec::new())
            }
        }
        PolicyState::Blocked => {
            let mut rules = baseline(settings)?;
            rules.extend(allowed_endpoint(settings));
            if settings.allow_lan {
                rules.push(dns::BlockAll.into());
            }
            Ok(rules)
        }
        PolicyState::Connecting { relay } => {
            let mut rules = baseline(settings)?;
            rules.extend(relay_rules(relay, settings)?);
            rules.extend(allowed_endpoint(settings));
            if settings.permit_dns_while_connecting {
                rules.push(PermitDns.into());
            } else if settings.allow_lan {
                rules.push(dns::BlockAll.into());
            }
            Ok(rules)
        }
        PolicyState::Connected {
            relay,
            tunnel_alias,
            dns_hosts,
        } => {
            let mut rules = baseline(settings)?;
            rules.extend(relay_rules(relay, settings)?);
            rules.push(PermitVpnTunnel::new(tunnel_alias.as_str())?.into());
            rules.push(nontunneldns::BlockAll::new(Some(tunnel_alias.clone())).into());
            rules.push(tunneldns::BlockAll::new(tunnel_alias.as_str())?.into());
            rules.push(tunneldns::PermitSelected::new(tunnel_alias.as_str(), dns_hosts.clone())?.into());
            Ok(rules)
        }
    }
}

#[derive(Debug)]
struct Current {
    state: PolicyState,
    settings: PolicySettings,
}

/// Drives state transitions for one engine
#[derive(Debug)]
pub struct PolicyController<E: FilterEngine> {
    coordinator: TransactionCoordinator<E>,
    current: Mutex<Current>,
}

impl<E: FilterEngine> PolicyController<E> {
    /// Starts in [`PolicyState::Disconnected`] with nothing installed
    ///
    /// Executable scoping in `settings` is dropped with a warning when the
    /// engine cannot express it.
    pub fn new(engine: E, settings: PolicySettings) -> Self {
        let settings = fit_to_engine(&engine, settings);
        Self {
            coordinator: TransactionCoordinator::new(engine),
            current: Mutex::new(Current {
                state: PolicyState::Disconnected,
                settings,
            }),
        }
    }

    /// Installs the policy for `state` and makes it current.
    ///
    /// # Errors
    ///
    /// [`PolicyError`] when composition or installation fails; the previous
    /// state and its policy remain in force.
    pub fn apply_policy(&self, state: PolicyState) -> std::result::Result<(), PolicyError> {
        let mut current = self.current.lock();

        let rules = compose(&state, &current.settings).map_err(|e| PolicyError::new(&state, e))?;
        self.coordinator
            .apply_policy(&rules)
            .map_err(|e| PolicyError::new(&state, e))?;

        info!("Policy state: {} -> {}", current.state, state);
        current.state = state;
        Ok(())
    }

    pub fn current_state(&self) -> PolicyState {
        self.current.lock().state.clone()
    }

    pub fn settings(&self) -> PolicySettings {
        self.current.lock().settings.clone()
    }

    /// Re-applies the current state under `settings`; they are kept only if
    /// the new policy commits
    pub fn update_settings(&self, settings: PolicySettings) -> std::result::Result<(), PolicyError> {
        let mut current = self.current.lock();
        let settings = self
            .coordinator
            .with_engine(|engine| fit_to_engine(engine, settings));

        let rules = compose(&current.state, &settings)
            .map_err(|e| PolicyError::new(&current.state, e))?;
        self.coordinator
            .apply_policy(&rules)
            .map_err(|e| PolicyError::new(&current.state, e))?;

        info!("Settings updated, policy for '{}' re-applied", current.state);
        current.settings = settings;
        Ok(())
    }

    /// Removes every tracked object. Call at process exit.
    ///
    /// Falls back to purging the whole object catalog if removing the
    /// tracked objects fails.
    pub fn shutdown(&self) -> std::result::Result<(), PolicyError> {
        let mut current = self.current.lock();
        info!("Shutting down, removing installed policy");

        let disconnected = PolicyState::Disconnected;
        if let Err(e) = self.coordinator.purge() {
            warn!("Purging tracked objects failed ({e}), purging all known objects");
            self.coordinator
                .purge_known()
                .map_err(|e| PolicyError::new(&disconnected, e))?;
        }
        current.state = disconnected;
        Ok(())
    }

    /// Deletes every object vpnfw could have installed, tracked or not
    pub fn reset(&self) -> std::result::Result<(), PolicyError> {
        let mut current = self.current.lock();
        let disconnected = PolicyState::Disconnected;
        self.coordinator
            .purge_known()
            .map_err(|e| PolicyError::new(&disconnected, e))?;
        current.state = disconnected;
        Ok(())
    }

    pub fn coordinator(&self) -> &TransactionCoordinator<E> {
        &self.coordinator
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::filter::ObjectKind;
    use crate::core::identity::ObjectName;
    use crate::core::memory::MemoryEngine;
    use crate::core::nft_json::NftEngine;
    use crate::core::test_helpers::{connected_state, connecting_state, lan_settings};
    use std::error::Error as _;

    fn names(rules: &[Rule]) -> Vec<&'static str> {
        rules.iter().map(Rule::name).collect()
    }

    #[test]
    fn test_disconnected_is_empty_unless_lockdown() {
        let settings = PolicySettings::default();
        assert!(compose(&PolicyState::Disconnected, &settings).unwrap().is_empty());

        let lockdown = PolicySettings {
            block_when_disconnected: true,
            ..PolicySettings::default()
        };
        assert_eq!(
            compose(&PolicyState::Disconnected, &lockdown).unwrap(),
            compose(&PolicyState::Blocked, &lockdown).unwrap()
        );
    }

    #[test]
    fn test_blocked_default_settings() {
        let rules = compose(&PolicyState::Blocked, &PolicySettings::default()).unwrap();
        assert_eq!(names(&rules), vec!["BlockAll", "PermitLoopback", "PermitDhcp"]);
    }

    #[test]
    fn test_blocked_with_lan() {
        let rules = compose(&PolicyState::Blocked, &lan_settings()).unwrap();
        assert_eq!(
            names(&rules),
            vec![
                "BlockAll",
                "PermitLoopback",
                "PermitDhcp",
                "PermitLan",
                "PermitLanService",
                "PermitDhcpServer",
                "dns::BlockAll",
            ]
        );
    }

    #[test]
    fn test_connecting_dns_choice() {
        let permissive = PolicySettings {
            permit_dns_while_connecting: true,
            ..lan_settings()
        };
        let rules = compose(&connecting_state(), &permissive).unwrap();
        assert!(names(&rules).contains(&"PermitDns"));
        assert!(!names(&rules).contains(&"dns::BlockAll"));

        let rules = compose(&connecting_state(), &lan_settings()).unwrap();
        assert!(names(&rules).contains(&"dns::BlockAll"));
        assert!(names(&rules).contains(&"PermitVpnRelay"));
    }

    #[test]
    fn test_icmp_ttl_only_with_relay_clients() {
        let rules = compose(&connecting_state(), &PolicySettings::default()).unwrap();
        assert!(!names(&rules).contains(&"PermitIcmpTtl"));

        let settings = PolicySettings {
            relay_clients: vec![PathBuf::from("/usr/bin/wireguard-go")],
            ..PolicySettings::default()
        };
        let rules = compose(&connecting_state(), &settings).unwrap();
        assert!(names(&rules).contains(&"PermitIcmpTtl"));
    }

    #[test]
    fn test_connected_composition() {
        let rules = compose(&connected_state("wg0", &["10.0.0.1"]), &lan_settings()).unwrap();
        let names = names(&rules);
        for expected in [
            "PermitVpnTunnel",
            "nontunneldns::BlockAll",
            "tunneldns::BlockAll",
            "tunneldns::PermitSelected",
        ] {
            assert!(names.contains(&expected), "missing {expected}");
        }
    }

    #[test]
    fn test_connected_without_dns_hosts_is_invalid() {
        let result = compose(&connected_state("wg0", &[]), &PolicySettings::default());
        assert!(matches!(result, Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_state_entered_only_on_success() {
        let controller = PolicyController::new(MemoryEngine::new(), PolicySettings::default());
        controller.apply_policy(PolicyState::Blocked).unwrap();

        controller
            .coordinator()
            .with_engine_mut(|engine| engine.fail_on_commit(true));
        let err = controller.apply_policy(connecting_state()).unwrap_err();

        assert_eq!(err.state, "connecting");
        assert!(err.source().is_some());
        assert_eq!(controller.current_state(), PolicyState::Blocked);
    }

    #[test]
    fn test_invalid_state_leaves_engine_untouched() {
        let controller = PolicyController::new(MemoryEngine::new(), PolicySettings::default());
        controller.apply_policy(PolicyState::Blocked).unwrap();

        assert!(controller.apply_policy(connected_state("wg0", &[])).is_err());
        controller
            .coordinator()
            .with_engine(|engine| assert_eq!(engine.commits(), 1));
    }

    #[test]
    fn test_update_settings_reapplies() {
        let controller = PolicyController::new(MemoryEngine::new(), PolicySettings::default());
        controller.apply_policy(PolicyState::Blocked).unwrap();
        let before = controller.coordinator().ledger().len();

        controller.update_settings(lan_settings()).unwrap();
        assert!(controller.settings().allow_lan);
        assert!(controller.coordinator().ledger().len() > before);
    }

    #[test]
    fn test_update_settings_kept_only_on_commit() {
        let controller = PolicyController::new(MemoryEngine::new(), PolicySettings::default());
        controller.apply_policy(PolicyState::Blocked).unwrap();
        controller
            .coordinator()
            .with_engine_mut(|engine| engine.fail_on_commit(true));

        assert!(controller.update_settings(lan_settings()).is_err());
        assert!(!controller.settings().allow_lan);
    }

    #[test]
    fn test_shutdown_removes_everything() {
        let controller = PolicyController::new(MemoryEngine::new(), lan_settings());
        controller
            .apply_policy(connected_state("wg0", &["10.0.0.1"]))
            .unwrap();
        controller.shutdown().unwrap();

        assert_eq!(controller.current_state(), PolicyState::Disconnected);
        assert!(controller.coordinator().ledger().is_empty());
        controller
            .coordinator()
            .with_engine(|engine| assert_eq!(engine.objects().count(), 0));
    }

    fn scoped_settings() -> PolicySettings {
        PolicySettings {
            relay_clients: vec![PathBuf::from("/usr/bin/wireguard-go")],
            allowed_endpoint: Some(AllowedEndpoint {
                endpoint: "45.83.223.196:443/tcp".parse().unwrap(),
                clients: vec![PathBuf::from("/usr/bin/vpn-daemon")],
            }),
            ..PolicySettings::default()
        }
    }

    fn nft_engine() -> NftEngine {
        NftEngine::new("vpnfw_test").with_command(vec![
            "sh".to_string(),
            format!("{}/tests/mock_nft.sh", env!("CARGO_MANIFEST_DIR")),
        ])
    }

    #[test]
    fn test_application_scoping_kept_when_engine_supports_it() {
        let controller = PolicyController::new(MemoryEngine::new(), scoped_settings());
        assert_eq!(controller.settings(), scoped_settings());

        controller.apply_policy(connecting_state()).unwrap();
        let ttl = ObjectName::PermitIcmpTtlIpv4.identity();
        controller
            .coordinator()
            .with_engine(|engine| assert!(engine.contains(ObjectKind::Filter, ttl)));
    }

    #[test]
    fn test_application_scoping_dropped_for_nft() {
        let controller = PolicyController::new(nft_engine(), scoped_settings());
        let settings = controller.settings();
        assert!(!settings.has_application_scoping());
        assert!(settings.allowed_endpoint.is_some());

        // every state with relay rules must still install
        controller.apply_policy(connecting_state()).unwrap();
        controller
            .apply_policy(connected_state("wg0", &["10.64.0.1"]))
            .unwrap();
        assert_eq!(controller.current_state().to_string(), "connected");
    }

    #[test]
    fn test_update_settings_drops_application_scoping_for_nft() {
        let controller = PolicyController::new(nft_engine(), PolicySettings::default());
        controller.apply_policy(connecting_state()).unwrap();

        controller.update_settings(scoped_settings()).unwrap();
        assert_eq!(
            controller.settings(),
            scoped_settings().without_application_scoping()
        );
    }

    #[test]
    fn test_state_serde_tagged() {
        let json = serde_json::to_string(&PolicyState::Blocked).unwrap();
        assert_eq!(json, r#"{"state":"blocked"}"#);
        let state: PolicyState = serde_json::from_str(&json).unwrap();
        assert_eq!(state, PolicyState::Blocked);
    }
}
