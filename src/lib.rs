//! vpnfw - VPN firewall policy compiler
//!
//! Compiles a VPN client's connection state into packet-filter objects and
//! installs them as a single transaction, so the host is never left
//! without a policy during a transition.
//!
//! # Architecture
//!
//! - [`core`] - Object model, rule catalog, transactions and engine backends
//! - [`audit`] - Security audit logging for all privileged operations
//! - [`config`] - Configuration persistence
//! - [`elevation`] - Privilege escalation for `nft`
//! - [`utils`] - Utility functions (XDG directories)
//!
//! # Example
//!
//! ```
//! use vpnfw::core::memory::MemoryEngine;
//! use vpnfw::core::policy::{PolicyController, PolicySettings, PolicyState};
//!
//! let controller = PolicyController::new(MemoryEngine::new(), PolicySettings::default());
//! controller.apply_policy(PolicyState::Blocked).unwrap();
//! assert!(controller.coordinator().with_engine(|e| e.filter_count()) > 0);
//! ```

// Allow pedantic clippy warnings that are not worth fixing for this codebase
#![allow(clippy::must_use_candidate)]
#![allow(clippy::return_self_not_must_use)]
#![allow(clippy::missing_errors_doc)]

pub mod audit;
pub mod config;
pub mod core;
pub mod elevation;
pub mod utils;

// Re-export commonly used types
pub use core::error::{Error, Result};
pub use core::policy::{PolicyController, PolicyError, PolicySettings, PolicyState};
pub use core::rules::Rule;
