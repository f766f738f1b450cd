//! vpnfw - operator CLI for the VPN firewall policy
//!
//! # Usage
//!
//! ```bash
//! vpnfw render blocked                                   # Dry run, list filters
//! vpnfw render connecting --relay 185.65.135.1:51820/udp --format nft
//! vpnfw apply connected --relay 185.65.135.1:51820/udp --tunnel wg0 --dns 10.64.0.1
//! vpnfw shutdown                                         # Remove the installed policy
//! vpnfw reset                                            # Remove every object vpnfw may own
//! vpnfw identities                                       # Semantic names and their UUIDs
//! vpnfw config set allow_lan true                        # Persist a setting
//! vpnfw audit -n 5                                       # Last privileged operations
//! ```

use clap::{Args, Parser, Subcommand, ValueEnum};
use shadow_rs::shadow;
use std::net::IpAddr;
use std::process::ExitCode;
use strum::IntoEnumIterator;
use vpnfw::audit::AuditLog;
use vpnfw::config::{self, AppConfig, ConfigKey};
use vpnfw::core::condition::Endpoint;
use vpnfw::core::error::{EngineError, Error, NftErrorPattern};
use vpnfw::core::filter::{FilterSpec, ObjectKind};
use vpnfw::core::identity::ObjectName;
use vpnfw::core::memory::MemoryEngine;
use vpnfw::core::nft_json::{NftEngine, render_batch};
use vpnfw::core::policy::{PolicyController, PolicyError, PolicyState};
use vpnfw::{audit, utils};

shadow!(build);

#[derive(Parser)]
#[command(name = "vpnfw")]
#[command(about = "VPN firewall policy compiler and installer", long_about = None)]
struct Cli {
    /// Write logs to <state dir>/vpnfw.log instead of stderr
    #[arg(long, global = true)]
    log_file: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a policy state without touching the kernel
    Render {
        #[command(flatten)]
        target: StateArgs,
        /// Output format
        #[arg(short, long, value_enum, default_value_t = Format::Filters)]
        format: Format,
    },
    /// Install the policy for a state into the kernel
    Apply {
        #[command(flatten)]
        target: StateArgs,
    },
    /// Remove the installed policy
    Shutdown,
    /// Remove every object vpnfw could have installed
    Reset,
    /// List semantic object names and their identities
    Identities,
    /// Show or change the stored configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Show recent entries of the audit log
    Audit {
        /// Number of entries, newest first
        #[arg(short = 'n', long, default_value_t = 20)]
        count: usize,
    },
    /// Show build information
    Version,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the configuration as JSON
    Show,
    /// Store one setting; takes effect on the next apply
    Set {
        /// Setting name, e.g. allow_lan or relay_clients
        key: ConfigKey,
        value: String,
    },
}

#[derive(Args)]
struct StateArgs {
    /// Connection state to enforce
    #[arg(value_enum)]
    state: StateKind,
    /// Relay endpoint as ADDR:PORT/PROTO (connecting, connected)
    #[arg(long)]
    relay: Option<Endpoint>,
    /// Tunnel interface alias (connected)
    #[arg(long)]
    tunnel: Option<String>,
    /// DNS resolver reachable inside the tunnel (connected, repeatable)
    #[arg(long = "dns")]
    dns: Vec<IpAddr>,
}

#[derive(Clone, Copy, ValueEnum)]
enum StateKind {
    Disconnected,
    Blocked,
    Connecting,
    Connected,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Format {
    Filters,
    Nft,
}

impl StateArgs {
    fn to_state(&self) -> Result<PolicyState, String> {
        let relay = || {
            self.relay
                .ok_or_else(|| "--relay is required for this state".to_string())
        };
        match self.state {
            StateKind::Disconnected => Ok(PolicyState::Disconnected),
            StateKind::Blocked => Ok(PolicyState::Blocked),
            StateKind::Connecting => Ok(PolicyState::Connecting { relay: relay()? }),
            StateKind::Connected => Ok(PolicyState::Connected {
                relay: relay()?,
                tunnel_alias: self
                    .tunnel
                    .clone()
                    .ok_or_else(|| "--tunnel is required for the connected state".to_string())?,
                dns_hosts: self.dns.clone(),
            }),
        }
    }
}

fn init_tracing(log_file: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    if log_file
        && let Some(mut log_path) = utils::get_state_dir()
    {
        log_path.push("vpnfw.log");
        if let Ok(file) = std::fs::File::create(log_path) {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(file)
                .init();
            return;
        }
    }
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Err(e) = utils::ensure_dirs() {
        eprintln!("Warning: could not create vpnfw directories: {e}");
    }
    init_tracing(cli.log_file);

    match handle_cli(cli.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn handle_cli(command: Commands) -> Result<(), Box<dyn std::error::Error>> {
    let config = config::load_config();
    match command {
        Commands::Render { target, format } => render(&config, &target, format)?,
        Commands::Apply { target } => apply(&config, &target)?,
        Commands::Shutdown => {
            let controller = nft_controller(&config);
            let result = controller.shutdown();
            if config.audit_enabled {
                audit::log_shutdown(result.is_ok(), result.as_ref().err().map(ToString::to_string));
            }
            result.map_err(report)?;
            println!("✓ Policy removed from table inet {}.", config.table_name);
        }
        Commands::Reset => {
            let controller = nft_controller(&config);
            let result = controller.reset();
            if config.audit_enabled {
                audit::log_reset(result.is_ok(), result.as_ref().err().map(ToString::to_string));
            }
            result.map_err(report)?;
            println!("✓ All vpnfw objects removed.");
        }
        Commands::Identities => {
            for name in ObjectName::iter() {
                println!("{:<8}  {}  {name}", name.kind().to_string(), name.identity());
            }
        }
        Commands::Config { action } => match action {
            ConfigAction::Show => println!("{}", serde_json::to_string_pretty(&config)?),
            ConfigAction::Set { key, value } => {
                let mut config = config;
                config.set(key, &value)?;
                config::save_config(&config)?;
                println!("✓ {key} saved. Applies from the next 'vpnfw apply'.");
            }
        },
        Commands::Audit { count } => {
            let log = AuditLog::new()?;
            let events = log.read_recent(count)?;
            if events.is_empty() {
                println!("No audit entries in {}", log.path().display());
            }
            for event in &events {
                println!("{event}");
            }
        }
        Commands::Version => {
            println!("vpnfw {}", build::PKG_VERSION);
            println!(
                "commit {}{}",
                build::SHORT_COMMIT,
                if build::GIT_CLEAN { "" } else { " (dirty)" }
            );
            println!("built {} with {}", build::BUILD_TIME, build::RUST_VERSION);
        }
    }
    Ok(())
}

fn render(config: &AppConfig, target: &StateArgs, format: Format) -> Result<(), Box<dyn std::error::Error>> {
    let state = target.to_state()?;
    let controller = PolicyController::new(MemoryEngine::new(), config.policy.clone());
    controller.apply_policy(state).map_err(report)?;

    match format {
        Format::Filters => {
            let filters: Vec<FilterSpec> =
                controller.coordinator().with_engine(|e| e.filters().cloned().collect());
            for filter in &filters {
                print_filter(filter);
            }
            println!("{} filters", filters.len());
        }
        Format::Nft => {
            let batch = controller.coordinator().with_engine(|e| {
                render_batch(&config.table_name, e.objects())
            })?;
            println!("{}", serde_json::to_string_pretty(&batch)?);
        }
    }
    Ok(())
}

fn print_filter(filter: &FilterSpec) {
    println!(
        "{:<14} {:<8} {:<6} {:<6} {}",
        filter.layer.to_string(),
        filter.sublayer.to_string(),
        filter.weight.to_string(),
        filter.action.to_string(),
        filter.name
    );
    for condition in &filter.conditions {
        println!("{:>16}{condition:?}", "");
    }
}

fn nft_controller(config: &AppConfig) -> PolicyController<NftEngine> {
    if !nix::unistd::getuid().is_root() {
        println!("Note: Not running as root. Will use sudo/pkexec for nft.");
    }
    let engine = NftEngine::new(config.table_name.as_str())
        .verify_before_commit(config.verify_before_commit);
    PolicyController::new(engine, config.policy.clone())
}

fn apply(config: &AppConfig, target: &StateArgs) -> Result<(), Box<dyn std::error::Error>> {
    let state = target.to_state()?;
    let state_name = state.to_string();
    let controller = nft_controller(config);

    println!("Applying '{state_name}' policy...");
    let result = controller.apply_policy(state);

    let ledger = controller.coordinator().ledger();
    let checksum = controller
        .coordinator()
        .with_engine(|e| e.last_checksum().map(str::to_owned));
    if config.audit_enabled {
        audit::log_apply_policy(
            &state_name,
            ledger.count(ObjectKind::Filter),
            checksum.as_deref(),
            result.is_ok(),
            result.as_ref().err().map(ToString::to_string),
        );
    }
    result.map_err(report)?;

    println!(
        "✓ {} filters installed in table inet {}.",
        ledger.count(ObjectKind::Filter),
        config.table_name
    );
    Ok(())
}

/// Prints nft's own diagnostics and suggestions before handing the error on
fn report(error: PolicyError) -> Box<dyn std::error::Error> {
    if let Error::Engine(EngineError::Nftables {
        stderr: Some(stderr),
        ..
    }) = &error.source
    {
        let translation = NftErrorPattern::match_error(stderr);
        eprintln!("{}", translation.user_message);
        for suggestion in &translation.suggestions {
            eprintln!("  • {suggestion}");
        }
    }
    error.to_string().into()
}
