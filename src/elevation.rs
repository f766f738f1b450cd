//! Privilege elevation for `nft`
//!
//! vpnfw only needs root to talk to nftables. Everything else (composing
//! rules, rendering, dry runs) runs unprivileged.
//!
//! # Elevation Strategy
//!
//! 1. `VPNFW_NFT_COMMAND` set: run that command line (whitespace-split)
//!    instead of `nft`, unelevated. Used by tests and packagers.
//! 2. `VPNFW_TEST_NO_ELEVATION` set, or already root: run `nft` directly.
//! 3. `VPNFW_ELEVATION_METHOD` set (`sudo`, `run0`, `pkexec`): use it.
//! 4. Otherwise prefer `run0`, then `sudo` on a terminal, then `pkexec`.
//!
//! Arguments are passed straight to the program, never through a shell.

use std::io;
use std::os::fd::AsFd;
use std::process::Command;

#[derive(Debug, thiserror::Error)]
pub enum ElevationError {
    #[error("pkexec not found - please install PolicyKit")]
    PkexecNotFound,

    #[error("Elevation method '{0}' is not available (binary not found)")]
    MethodNotAvailable(String),

    #[error("Invalid VPNFW_ELEVATION_METHOD '{0}'. Valid options: sudo, run0, pkexec")]
    InvalidMethod(String),

    #[error("VPNFW_NFT_COMMAND is empty")]
    EmptyOverride,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl From<ElevationError> for crate::core::error::Error {
    fn from(e: ElevationError) -> Self {
        crate::core::error::Error::Elevation(e.to_string())
    }
}

fn binary_exists(name: &str) -> bool {
    std::env::var_os("PATH").is_some_and(|paths| {
        std::env::split_paths(&paths).any(|dir| dir.join(name).is_file())
    })
}

fn wrapped(wrapper: &str, program: &str, args: &[&str]) -> Command {
    let mut cmd = Command::new(wrapper);
    cmd.arg(program).args(args);
    cmd
}

fn direct(program: &str, args: &[&str]) -> Command {
    let mut cmd = Command::new(program);
    cmd.args(args);
    cmd
}

fn build_elevated_command(program: &str, args: &[&str]) -> Result<Command, ElevationError> {
    if std::env::var("VPNFW_TEST_NO_ELEVATION").is_ok() || nix::unistd::getuid().is_root() {
        return Ok(direct(program, args));
    }

    if let Ok(method) = std::env::var("VPNFW_ELEVATION_METHOD") {
        let method = method.to_lowercase();
        if !method.is_empty() {
            return match method.as_str() {
                "sudo" | "run0" | "pkexec" => {
                    if binary_exists(&method) {
                        Ok(wrapped(&method, program, args))
                    } else {
                        Err(ElevationError::MethodNotAvailable(method))
                    }
                }
                _ => Err(ElevationError::InvalidMethod(method)),
            };
        }
    }

    if binary_exists("run0") {
        return Ok(wrapped("run0", program, args));
    }

    let is_atty = nix::unistd::isatty(io::stdin().as_fd()).unwrap_or(false);
    if is_atty {
        Ok(wrapped("sudo", program, args))
    } else if binary_exists("pkexec") {
        Ok(wrapped("pkexec", program, args))
    } else {
        Err(ElevationError::PkexecNotFound)
    }
}

/// Builds the command that runs `nft` with `args`, elevated when needed.
///
/// # Errors
///
/// Fails when no elevation method is usable or `VPNFW_NFT_COMMAND` is blank.
pub fn create_elevated_nft_command(args: &[&str]) -> Result<Command, ElevationError> {
    if let Ok(override_cmd) = std::env::var("VPNFW_NFT_COMMAND") {
        let mut parts = override_cmd.split_whitespace();
        let program = parts.next().ok_or(ElevationError::EmptyOverride)?;
        let mut cmd = Command::new(program);
        cmd.args(parts).args(args);
        return Ok(cmd);
    }
    build_elevated_command("nft", args)
}
