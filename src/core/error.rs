use crate::core::engine::TransactionHandle;
use crate::core::filter::ObjectKind;
use crate::core::identity::StableId;
use thiserror::Error;

/// Core error types for vpnfw
#[derive(Debug, Error)]
pub enum Error {
    /// A rule was constructed with a configuration it cannot express
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A filter reached the installer in a shape the catalog never produces
    /// (e.g. an IPv6 network on an IPv4 layer). Always fatal for the transition.
    #[error("Catalog violation: {0}")]
    CatalogViolation(String),

    /// The filter engine reported a failure
    #[error("Engine operation failed: {0}")]
    Engine(#[from] EngineError),

    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration could not be loaded or saved
    #[error("Configuration error: {0}")]
    Config(String),

    /// Privilege escalation failed
    #[error("Elevation error: {0}")]
    Elevation(String),
}

/// Failures reported by a [`FilterEngine`](crate::core::engine::FilterEngine)
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("{kind} {id} not found")]
    NotFound { kind: ObjectKind, id: StableId },

    #[error("{kind} {id} already exists")]
    AlreadyExists { kind: ObjectKind, id: StableId },

    #[error("a transaction is already in progress")]
    TransactionInProgress,

    #[error("no transaction in progress")]
    NoTransaction,

    #[error("unknown transaction handle {0}")]
    UnknownTransaction(TransactionHandle),

    #[error("engine rejected {kind} {id}: {reason}")]
    Rejected {
        kind: ObjectKind,
        id: StableId,
        reason: String,
    },

    /// nftables command execution failed
    #[error("nftables error: {message}")]
    Nftables {
        message: String,
        stderr: Option<String>,
        exit_code: Option<i32>,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Deletions tolerate objects that are already gone
    pub fn is_not_found(&self) -> bool {
        matches!(self, EngineError::NotFound { .. })
    }
}

/// Represents a translated error with helpful context
#[derive(Debug, Clone)]
pub struct ErrorTranslation {
    pub user_message: String,
    pub suggestions: Vec<String>,
}

impl ErrorTranslation {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            user_message: message.into(),
            suggestions: Vec::new(),
        }
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestions.push(suggestion.into());
        self
    }
}

/// Known nftables failure patterns seen when committing a policy batch
pub struct NftErrorPattern;

impl NftErrorPattern {
    /// Matches an nft error message against known patterns and returns a user-friendly translation.
    pub fn match_error(msg: &str) -> ErrorTranslation {
        let lower = msg.to_lowercase();

        if lower.contains("permission denied") || lower.contains("operation not permitted") {
            return ErrorTranslation::new("Insufficient permissions to modify firewall rules")
                .with_suggestion("Run vpnfw as root or configure VPNFW_ELEVATION_METHOD")
                .with_suggestion("Check if CAP_NET_ADMIN capability is available");
        }

        if lower.contains("no such file") || lower.contains("command not found") {
            return ErrorTranslation::new("nftables is not installed or not found in PATH")
                .with_suggestion("Install nftables: sudo apt install nftables  (Debian/Ubuntu)")
                .with_suggestion("Or: sudo dnf install nftables  (Fedora/RHEL)")
                .with_suggestion("Or: sudo pacman -S nftables  (Arch)");
        }

        if lower.contains("interface")
            && (lower.contains("invalid") || lower.contains("does not exist"))
        {
            return ErrorTranslation::new("Tunnel interface not found or invalid")
                .with_suggestion("Check that the tunnel device is up: ip link show")
                .with_suggestion("Interface names are case-sensitive and max 15 chars");
        }

        if lower.contains("could not process rule") || lower.contains("syntax error") {
            return ErrorTranslation::new("The kernel rejected a generated filter")
                .with_suggestion("Render the policy with `vpnfw render` and inspect the batch")
                .with_suggestion("Ensure the nf_tables kernel module supports inet tables");
        }

        if lower.contains("resource busy") || lower.contains("device or resource busy") {
            return ErrorTranslation::new("Firewall resource is busy")
                .with_suggestion("Another process may be modifying nftables")
                .with_suggestion("Retry the transition once the other process is done");
        }

        if lower.contains("netlink") {
            return ErrorTranslation::new("Communication error with kernel netlink interface")
                .with_suggestion("Check kernel modules: lsmod | grep nf_tables")
                .with_suggestion("Load nf_tables module: sudo modprobe nf_tables");
        }

        ErrorTranslation::new(format!("Firewall error: {msg}"))
            .with_suggestion("Verify nftables is working: sudo nft list ruleset")
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nftables_missing_command() {
        let translation = NftErrorPattern::match_error("command not found: nft");
        assert!(translation.user_message.contains("not installed"));
        assert!(translation.suggestions.len() >= 3);
    }

    #[test]
    fn test_permission_error() {
        let translation = NftErrorPattern::match_error("Operation not permitted");
        assert!(translation.user_message.contains("permissions"));
        assert!(
            translation
                .suggestions
                .iter()
                .any(|s| s.contains("CAP_NET_ADMIN"))
        );
    }

    #[test]
    fn test_missing_interface() {
        let translation = NftErrorPattern::match_error("Interface wg0 does not exist");
        assert!(translation.user_message.contains("Tunnel interface"));
    }

    #[test]
    fn test_generic_fallback_keeps_message() {
        let translation = NftErrorPattern::match_error("something odd");
        assert!(translation.user_message.contains("something odd"));
    }

    #[test]
    fn test_not_found_is_tolerated_kind() {
        let err = EngineError::NotFound {
            kind: ObjectKind::Filter,
            id: crate::core::identity::identity_for("x"),
        };
        assert!(err.is_not_found());
        assert!(!EngineError::NoTransaction.is_not_found());
    }
}
