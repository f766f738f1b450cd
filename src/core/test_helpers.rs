//! Shared test utilities for core module tests
//!
//! Only compiled in test mode.

use crate::core::engine::EngineObject;
use crate::core::ledger::SessionLedger;
use crate::core::memory::MemoryEngine;
use crate::core::policy::{PolicySettings, PolicyState};
use std::collections::BTreeSet;
use std::net::IpAddr;
use std::sync::Mutex;

/// Mutex for tests that need exclusive access to environment variables.
///
/// ```ignore
/// let _guard = ENV_VAR_MUTEX.lock().unwrap();
/// unsafe {
///     std::env::set_var("VPNFW_ELEVATION_METHOD", "sudo");
/// }
/// // ... test with custom env state ...
/// unsafe {
///     std::env::remove_var("VPNFW_ELEVATION_METHOD");
/// }
/// ```
pub static ENV_VAR_MUTEX: Mutex<()> = Mutex::new(());

pub fn connecting_state() -> PolicyState {
    PolicyState::Connecting {
        relay: "185.65.135.1:51820/udp".parse().unwrap(),
    }
}

pub fn connected_state(alias: &str, dns_hosts: &[&str]) -> PolicyState {
    PolicyState::Connected {
        relay: "185.65.135.1:51820/udp".parse().unwrap(),
        tunnel_alias: alias.to_string(),
        dns_hosts: dns_hosts
            .iter()
            .map(|h| h.parse::<IpAddr>().unwrap())
            .collect(),
    }
}

pub fn lan_settings() -> PolicySettings {
    PolicySettings {
        allow_lan: true,
        ..PolicySettings::default()
    }
}

/// Asserts the engine holds exactly the objects the ledger names
pub fn assert_ledger_matches_engine(ledger: &SessionLedger, engine: &MemoryEngine) {
    let recorded: BTreeSet<_> = ledger.identities().into_iter().collect();
    let installed: BTreeSet<_> = engine
        .objects()
        .map(|o: &EngineObject| (o.kind(), o.id()))
        .collect();
    assert_eq!(recorded, installed);
    assert_eq!(ledger.len(), recorded.len(), "ledger has duplicate records");
}
