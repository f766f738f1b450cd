//! Persistent operator configuration
//!
//! Stored as JSON at `<data dir>/config.json`. Missing fields take their
//! defaults so older files keep loading.

use crate::core::condition::Endpoint;
use crate::core::error::{Error, Result};
use crate::core::nft_json::DEFAULT_TABLE;
use crate::core::policy::{AllowedEndpoint, PolicySettings};
use crate::utils::get_data_dir;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

const CONFIG_FILE: &str = "config.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Settings every policy composition is built with
    pub policy: PolicySettings,
    /// nftables table (family `inet`) owned by vpnfw
    pub table_name: String,
    /// Run `nft --check` on each batch before applying it
    pub verify_before_commit: bool,
    /// Record privileged operations in the audit log
    pub audit_enabled: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            policy: PolicySettings::default(),
            table_name: DEFAULT_TABLE.to_string(),
            verify_before_commit: true,
            audit_enabled: true,
        }
    }
}

/// Settings `vpnfw config set` can change
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumString, strum::EnumIter)]
#[strum(serialize_all = "snake_case")]
pub enum ConfigKey {
    AllowLan,
    PermitDhcp,
    BlockWhenDisconnected,
    PermitDnsWhileConnecting,
    /// Comma-separated executable paths, empty to clear
    RelayClients,
    /// `ADDR:PORT/PROTO`, or `none` to clear
    AllowedEndpoint,
    TableName,
    VerifyBeforeCommit,
    AuditEnabled,
}

fn parse_flag(key: ConfigKey, value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Ok(true),
        "false" | "no" | "off" | "0" => Ok(false),
        _ => Err(Error::InvalidArgument(format!(
            "{key} expects true or false, got '{value}'"
        ))),
    }
}

fn parse_clients(value: &str) -> Result<Vec<PathBuf>> {
    value
        .split(',')
        .map(str::trim)
        .filter(|path| !path.is_empty())
        .map(|path| {
            let path = PathBuf::from(path);
            if path.is_absolute() {
                Ok(path)
            } else {
                Err(Error::InvalidArgument(format!(
                    "client '{}' must be an absolute path",
                    path.display()
                )))
            }
        })
        .collect()
}

impl AppConfig {
    /// Parses `value` for `key` and stores it. Nothing changes on error.
    pub fn set(&mut self, key: ConfigKey, value: &str) -> Result<()> {
        let value = value.trim();
        match key {
            ConfigKey::AllowLan => self.policy.allow_lan = parse_flag(key, value)?,
            ConfigKey::PermitDhcp => self.policy.permit_dhcp = parse_flag(key, value)?,
            ConfigKey::BlockWhenDisconnected => {
                self.policy.block_when_disconnected = parse_flag(key, value)?;
            }
            ConfigKey::PermitDnsWhileConnecting => {
                self.policy.permit_dns_while_connecting = parse_flag(key, value)?;
            }
            ConfigKey::RelayClients => self.policy.relay_clients = parse_clients(value)?,
            ConfigKey::AllowedEndpoint => {
                self.policy.allowed_endpoint = if value.is_empty() || value == "none" {
                    None
                } else {
                    let endpoint: Endpoint = value.parse()?;
                    // clients stay with the endpoint they were configured for
                    let clients = self
                        .policy
                        .allowed_endpoint
                        .as_ref()
                        .filter(|allowed| allowed.endpoint == endpoint)
                        .map(|allowed| allowed.clients.clone())
                        .unwrap_or_default();
                    Some(AllowedEndpoint { endpoint, clients })
                };
            }
            ConfigKey::TableName => {
                if value.is_empty()
                    || !value
                        .chars()
                        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
                {
                    return Err(Error::InvalidArgument(format!(
                        "table name '{value}' may only hold letters, digits, '_' and '-'"
                    )));
                }
                self.table_name = value.to_string();
            }
            ConfigKey::VerifyBeforeCommit => self.verify_before_commit = parse_flag(key, value)?,
            ConfigKey::AuditEnabled => self.audit_enabled = parse_flag(key, value)?,
        }
        info!("Config: {key} = {value}");
        Ok(())
    }
}

pub fn config_path() -> Option<PathBuf> {
    get_data_dir().map(|dir| dir.join(CONFIG_FILE))
}

/// Writes `config` to `path` atomically.
///
/// The temp file is created in the target directory with mode 0600 (tempfile
/// default), synced, then renamed over `path`.
pub fn save_config_to(config: &AppConfig, path: &Path) -> Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| Error::Config(format!("{} has no parent directory", path.display())))?;
    let json = serde_json::to_string_pretty(config)?;

    let mut temp = tempfile::NamedTempFile::new_in(dir)?;
    temp.write_all(json.as_bytes())?;
    temp.as_file().sync_all()?;

    temp.persist(path).map_err(|e| {
        if e.error.kind() == std::io::ErrorKind::StorageFull {
            Error::Config("Disk full: cannot save configuration. Free up space and try again.".to_string())
        } else {
            Error::Io(e.error)
        }
    })?;
    Ok(())
}

/// Saves to the default location
pub fn save_config(config: &AppConfig) -> Result<()> {
    let path = config_path()
        .ok_or_else(|| Error::Config("Data directory not found".to_string()))?;
    save_config_to(config, &path)
}

/// Loads `path`, falling back to defaults when it is missing or unparsable
pub fn load_config_from(path: &Path) -> AppConfig {
    let Ok(json) = std::fs::read_to_string(path) else {
        return AppConfig::default();
    };
    match serde_json::from_str::<AppConfig>(&json) {
        Ok(config) => config,
        Err(e) => {
            warn!("Ignoring unparsable config {}: {e}", path.display());
            AppConfig::default()
        }
    }
}

pub fn load_config() -> AppConfig {
    config_path().map_or_else(AppConfig::default, |path| load_config_from(&path))
}
