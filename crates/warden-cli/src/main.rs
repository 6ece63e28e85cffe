//! `warden` – command line entry point.
//!
//! | Command | Effect |
//! |---|---|
//! | `warden verify [--json]` | Run one verification pass and publish the registry. |
//! | `warden monitor` | Startup pass, then supervise enabled units until Ctrl-C. |
//! | `warden resolve <name>` | Print the path of a registered unit. |
//! | `warden status` | Print the published registry. |
//! | `warden init` | Write a default `warden.toml` to the working directory. |

mod config;
mod report;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use colored::Colorize;
use tokio::sync::watch;
use tracing::{error, info, warn};

use warden_kernel::{Verifier, VerifierConfig};
use warden_registry::{StatusRegistry, UnitLocator};
use warden_runtime::{ProcessHost, Supervisor, SupervisorConfig, UnitHost, init_tracing};
use warden_types::WardenError;

#[derive(Debug, Parser)]
#[command(name = "warden", version, about = "Verifies and supervises the units of a modular assistant")]
struct Cli {
    /// Config file (default: ./warden.toml, then ~/.warden/config.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run one verification pass.
    Verify {
        /// Print the report as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Verify, then keep enabled units loaded until Ctrl-C.
    Monitor,
    /// Print the path of the unit named NAME.
    Resolve { name: String },
    /// Print the published registry.
    Status,
    /// Write a default config file.
    Init {
        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },
}

fn main() -> ExitCode {
    let _tracing = init_tracing("warden");
    let cli = Cli::parse();

    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{}: {e}", "error".red().bold());
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode, WardenError> {
    if let Command::Init { force } = cli.command {
        let path = cli
            .config
            .unwrap_or_else(|| PathBuf::from(config::LOCAL_CONFIG_FILE));
        return cmd_init(&path, force);
    }

    let config_path = config::resolve_config_path(cli.config.as_deref());
    let cfg = config::load_or_default(&config_path)?;
    let cwd = std::env::current_dir()
        .map_err(|e| WardenError::Config(format!("cannot determine working directory: {e}")))?;
    let verifier_config = cfg.verifier_config(&cwd)?;
    info!(config = %config_path.display(), root = %verifier_config.root.display(), "configuration loaded");

    match cli.command {
        Command::Verify { json } => block_on(cmd_verify(verifier_config, json)),
        Command::Monitor => block_on(cmd_monitor(verifier_config, cfg.poll_interval())),
        Command::Resolve { name } => cmd_resolve(&verifier_config, &name),
        Command::Status => cmd_status(&verifier_config),
        Command::Init { .. } => Ok(ExitCode::SUCCESS),
    }
}

fn block_on<F>(fut: F) -> Result<ExitCode, WardenError>
where
    F: std::future::Future<Output = Result<ExitCode, WardenError>>,
{
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| WardenError::Config(format!("failed to start async runtime: {e}")))?
        .block_on(fut)
}

async fn cmd_verify(verifier_config: VerifierConfig, json: bool) -> Result<ExitCode, WardenError> {
    let verifier = Verifier::new(verifier_config);
    match verifier.run_pass().await {
        Ok(report) if json => {
            let out = serde_json::to_string_pretty(&report)
                .map_err(|e| WardenError::Config(format!("failed to encode report: {e}")))?;
            println!("{out}");
            Ok(ExitCode::SUCCESS)
        }
        Ok(report) => {
            report::print_report(&report);
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            eprintln!("{}: {e}", "verification failed".red().bold());
            eprintln!("  The previously published registry is unchanged.");
            Ok(ExitCode::FAILURE)
        }
    }
}

async fn cmd_monitor(verifier_config: VerifierConfig, poll_interval: Duration) -> Result<ExitCode, WardenError> {
    // Readers must always find a registry, even before the first publish.
    StatusRegistry::load_or_create(&verifier_config.registry_path)?;

    let host = ProcessHost::new(&verifier_config);
    let verifier = Arc::new(Verifier::new(verifier_config));

    match verifier.run_pass().await {
        Ok(report) => report::print_report(&report),
        Err(e) => error!(error = %e, "startup verification failed; supervising the last published registry"),
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let shutdown_tx = Arc::new(shutdown_tx);
    let handler_tx = Arc::clone(&shutdown_tx);
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – stopping supervisor …".yellow().bold());
        let _ = handler_tx.send(true);
    }) {
        warn!("Could not install Ctrl-C handler: {e}");
    }

    println!(
        "{} every {}s. Press {} to stop.",
        "Supervising enabled units".bold(),
        poll_interval.as_secs(),
        "Ctrl-C".bold().cyan()
    );
    let supervisor = Supervisor::new(host, verifier, SupervisorConfig { poll_interval });
    let mut supervisor = supervisor.run(shutdown_rx).await;
    drop(shutdown_tx);

    for key in supervisor.loaded().keys() {
        if let Err(e) = supervisor.host_mut().unload(&key) {
            warn!(unit = %key, error = %e, "could not stop unit on exit");
        }
    }
    println!("{}", "  ✓ Supervisor stopped.".green());
    Ok(ExitCode::SUCCESS)
}

fn cmd_resolve(verifier_config: &VerifierConfig, name: &str) -> Result<ExitCode, WardenError> {
    let registry = StatusRegistry::load_or_create(&verifier_config.registry_path)?;
    let locator = UnitLocator::new(&verifier_config.root);
    match locator.resolve_path(&registry, name) {
        Some(path) => {
            println!("{}", path.display());
            Ok(ExitCode::SUCCESS)
        }
        None => {
            eprintln!("{}: {name}", "not found".red());
            Ok(ExitCode::FAILURE)
        }
    }
}

fn cmd_status(verifier_config: &VerifierConfig) -> Result<ExitCode, WardenError> {
    let registry = StatusRegistry::load(&verifier_config.registry_path)?;
    println!(
        "{} {}",
        "Registry".bold(),
        verifier_config.registry_path.display().to_string().dimmed()
    );
    report::print_registry(&registry);
    Ok(ExitCode::SUCCESS)
}

fn cmd_init(path: &Path, force: bool) -> Result<ExitCode, WardenError> {
    if path.exists() && !force {
        eprintln!(
            "{} already exists (use {} to overwrite)",
            path.display().to_string().bold(),
            "--force".bold()
        );
        return Ok(ExitCode::FAILURE);
    }
    config::save_to(&config::Config::default(), path)?;
    println!(
        "{} Config written to {}",
        "✓".green().bold(),
        path.display().to_string().bold()
    );
    Ok(ExitCode::SUCCESS)
}
