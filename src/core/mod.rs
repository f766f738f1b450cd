//! Core policy compilation and installation
//!
//! This module contains the object model, the rule catalog and the machinery
//! that installs a rule set into a filtering engine as one transaction.
//! It provides:
//!
//! - [`identity`]: Stable object identities and the name catalog
//! - [`condition`]: Match conditions and endpoint parsing
//! - [`filter`]: Layers, sublayers, weights and the filter builder
//! - [`rules`]: The closed set of firewall rules
//! - [`engine`]: The transactional engine interface
//! - [`ledger`]: Record of the objects the current policy installed
//! - [`transaction`]: All-or-nothing policy installation
//! - [`policy`]: Connection states and the controller that enforces them
//! - [`arbitration`]: Verdict resolution across weights and sublayers
//! - [`memory`]: In-process engine used for rendering and tests
//! - [`nft_json`]: nftables backend speaking JSON batches
//! - [`verify`]: Batch validation with `nft --check`
//! - [`error`]: Error types for policy operations

pub mod arbitration;
pub mod condition;
pub mod engine;
pub mod error;
pub mod filter;
pub mod identity;
pub mod ledger;
pub mod memory;
pub mod nft_json;
pub mod policy;
pub mod rules;
pub mod transaction;
pub mod verify;

#[cfg(test)]
pub mod test_helpers;
