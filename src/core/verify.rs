//! Verification of nftables batches
//!
//! Runs a rendered batch through `nft --json --check` before it is applied,
//! so a batch the kernel would refuse never reaches the commit step.

use crate::core::error::EngineError;
use std::process::Command;
use tracing::{info, warn};

/// Result of a batch verification
#[derive(Debug, Clone)]
pub struct VerifyResult {
    pub success: bool,
    pub errors: Vec<String>,
}

impl VerifyResult {
    pub fn success() -> Self {
        Self {
            success: true,
            errors: Vec::new(),
        }
    }

    pub fn failure(errors: Vec<String>) -> Self {
        Self {
            success: false,
            errors,
        }
    }
}

/// Verifies `batch` with `nft --json --check -f -`.
///
/// `command` must already carry those arguments; see
/// [`NftEngine`](crate::core::nft_json::NftEngine).
///
/// # Errors
///
/// Returns `Err` only when nft cannot be run. A batch nft refuses is an
/// `Ok` with `success == false`.
pub fn verify_ruleset(command: Command, batch: &serde_json::Value) -> Result<VerifyResult, EngineError> {
    let json_string = serde_json::to_string(batch).map_err(|e| EngineError::Nftables {
        message: format!("Failed to serialize batch: {e}"),
        stderr: None,
        exit_code: None,
    })?;

    info!("Verifying batch via nft --json --check");
    let output = crate::core::nft_json::run_with_stdin(command, json_string.as_bytes())?;

    if output.status.success() {
        info!("Batch verification passed");
        Ok(VerifyResult::success())
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr);
        warn!("Batch verification failed: {}", stderr);
        Ok(VerifyResult::failure(parse_nft_errors(&stderr)))
    }
}

/// Parses nft error output into one message per error
pub fn parse_nft_errors(stderr: &str) -> Vec<String> {
    if let Ok(json_err) = serde_json::from_str::<serde_json::Value>(stderr)
        && let Some(errors) = json_err.get("errors").and_then(|e| e.as_array())
    {
        return errors
            .iter()
            .filter_map(|e| e.get("message").and_then(|m| m.as_str()))
            .map(String::from)
            .collect();
    }

    stderr
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        // nft echoes the offending input under the message; keep messages only
        .filter(|line| !line.chars().all(|c| c == '^' || c == '~' || c.is_whitespace()))
        .map(|line| {
            line.trim_start_matches("Error: ")
                .trim_start_matches("nft: ")
                .to_string()
        })
        .collect()
}
