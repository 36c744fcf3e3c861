//! FerroSync - bidirectional record synchronization
//!
//! Command line front end for inspecting configuration and exercising the
//! sync engine against in-memory stores.

mod demo;
mod display;
mod json_output;
mod progress;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use console::style;
use demo::Demo;
use ferrosync_config::{Config, ConfigLoader, LoggingConfig, ProfileConfig};
use ferrosync_engine::{
    ChannelDispatcher, SyncHandle, SyncManager, SyncOutcome, SyncPair, SyncProfile,
};
use ferrosync_types::CancellationContext;
use json_output::{ReportMetadata, RunReport, SimulationReport};
use progress::ProgressView;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Profile run when the configuration declares none
const DEFAULT_PROFILE: &str = "All";

/// FerroSync - bidirectional record synchronization
#[derive(Parser)]
#[command(
    name = "ferrosync",
    version = env!("CARGO_PKG_VERSION"),
    about = "Bidirectional record synchronization",
    long_about = "FerroSync exchanges record changes between a client and a server store.\n\
                  It pages changes in both directions, applies them in dependency order,\n\
                  and recovers failed records through correction rounds."
)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Quiet mode - minimal output
    #[arg(short, long)]
    quiet: bool,

    /// Verbose mode - detailed output
    #[arg(short, long)]
    verbose: bool,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Inspect or create configuration files
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// List configured sync profiles
    Profiles,
    /// Run profiles between two seeded in-memory stores
    Simulate {
        /// Profiles to run, defaults to every configured profile
        profiles: Vec<String>,
        /// Tasks seeded on each side
        #[arg(long, default_value = "25")]
        records: usize,
        /// Simulated storage latency per unit of work
        #[arg(long)]
        latency_ms: Option<u64>,
        /// Request every profile at once instead of one after another
        #[arg(long)]
        concurrent: bool,
        /// Wait this long for a running profile, overriding the configuration
        #[arg(long)]
        wait_ms: Option<u64>,
        /// Cancel a running profile that outlives the wait
        #[arg(long)]
        force: bool,
        /// Print a JSON report instead of text
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show the effective configuration
    Show {
        /// Show the built-in defaults instead
        #[arg(long)]
        default: bool,
    },
    /// Write a default configuration file
    Init {
        /// Target path, YAML or TOML by extension
        path: PathBuf,
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Validate a configuration file
    Validate {
        /// File to validate
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_ref())?;

    init_logging(&config.logging, cli.debug, cli.quiet, cli.verbose)?;
    info!("FerroSync v{} starting", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Commands::Config { action } => config_command(&config, action)?,
        Commands::Profiles => profiles_command(&config),
        Commands::Simulate {
            profiles,
            records,
            latency_ms,
            concurrent,
            wait_ms,
            force,
            json,
        } => {
            let options = SimulateOptions {
                profiles,
                records,
                latency: latency_ms.map(Duration::from_millis),
                concurrent,
                wait: wait_ms.map(Duration::from_millis),
                force,
                json,
                quiet: cli.quiet,
            };
            simulate_command(config, options).await?;
        }
    }

    Ok(())
}

fn load_config(path: Option<&PathBuf>) -> Result<Config> {
    let config = match path {
        Some(path) => ConfigLoader::load_from_file(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None => ConfigLoader::load_default().context("Failed to load configuration")?,
    };
    Ok(config)
}

fn init_logging(logging: &LoggingConfig, debug: bool, quiet: bool, verbose: bool) -> Result<()> {
    use tracing_subscriber::{fmt, EnvFilter};

    let level = if debug {
        "debug"
    } else if verbose {
        "info"
    } else if quiet {
        "error"
    } else {
        logging.level.as_str()
    };

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .context("Invalid log filter")?;

    let builder = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_writer(std::io::stderr);

    if logging.json_format {
        builder.json().init();
    } else {
        builder.with_ansi(logging.colored_output).init();
    }

    Ok(())
}

fn config_command(config: &Config, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Show { default } => {
            let (label, shown) = if default {
                ("Default configuration:", Config::default())
            } else {
                ("Current configuration:", config.clone())
            };
            println!("{} {}", style("⚙").blue().bold(), label);
            println!("{}", serde_json::to_string_pretty(&shown)?);
        }
        ConfigAction::Init { path, force } => {
            if path.exists() && !force {
                anyhow::bail!("{} already exists, use --force to overwrite", path.display());
            }
            ConfigLoader::generate_default_config(&path)?;
            println!(
                "{} Wrote default configuration to {}",
                style("✓").green(),
                style(path.display()).cyan()
            );
        }
        ConfigAction::Validate { path } => {
            ConfigLoader::validate_file(&path)?;
            println!(
                "{} {} is valid",
                style("✓").green(),
                style(path.display()).cyan()
            );
        }
    }
    Ok(())
}

fn profiles_command(config: &Config) {
    if config.profiles.is_empty() {
        println!(
            "{} No profiles configured, {} runs with the sync defaults",
            style("ℹ").yellow(),
            style(DEFAULT_PROFILE).cyan()
        );
        return;
    }
    println!("{}", style("Profiles:").bold().underlined());
    for profile in &config.profiles {
        let options = profile.to_options(&config.sync);
        println!(
            "  {} ({} items per request{}{})",
            style(&profile.name).cyan(),
            options.items_per_sync_request.get(),
            if profile.exclude.is_empty() {
                String::new()
            } else {
                format!(", excludes {}", profile.exclude.join(", "))
            },
            if profile.track_duration {
                ", timed"
            } else {
                ""
            }
        );
    }
}

struct SimulateOptions {
    profiles: Vec<String>,
    records: usize,
    latency: Option<Duration>,
    concurrent: bool,
    wait: Option<Duration>,
    force: bool,
    json: bool,
    quiet: bool,
}

async fn simulate_command(mut config: Config, options: SimulateOptions) -> Result<()> {
    if config.profiles.is_empty() {
        config.profiles.push(ProfileConfig::new(DEFAULT_PROFILE));
    }
    let names = if options.profiles.is_empty() {
        config.profiles.iter().map(|profile| profile.name.clone()).collect()
    } else {
        options.profiles.clone()
    };

    let wait_config = config.manager.wait_config();
    let wait = options.wait.or(wait_config.wait_timeout);
    let force = options.force || config.manager.force;

    let demo = Demo::seeded(options.records, options.latency, &config)?;
    let factory = {
        let demo = demo.clone();
        move |profile: &SyncProfile,
              cancellation: &CancellationContext|
              -> ferrosync_types::Result<SyncPair> { demo.pair(profile, cancellation) }
    };

    let (dispatcher, receiver) = ChannelDispatcher::new();
    let manager = SyncManager::from_config(&config, factory).with_dispatcher(Arc::new(dispatcher));
    let view = ProgressView::spawn(receiver, options.quiet || options.json);

    if !options.json && !options.quiet {
        view.println(format!(
            "{} Simulating {} with {} tasks per side",
            style("⟲").blue().bold(),
            style(names.join(", ")).cyan(),
            options.records
        ));
    }

    let mut outcomes = Vec::with_capacity(names.len());
    if options.concurrent {
        let mut handles: Vec<(String, SyncHandle)> = Vec::with_capacity(names.len());
        for name in &names {
            let handle = request(&manager, name, wait, force).await?;
            handles.push((name.clone(), handle));
        }
        for (name, handle) in handles {
            outcomes.push((name, handle.wait().await?));
        }
    } else {
        for name in &names {
            let handle = request(&manager, name, wait, force).await?;
            outcomes.push((name.clone(), handle.wait().await?));
        }
    }
    view.finish();

    let client = demo.client_counts()?;
    let server = demo.server_counts()?;

    if options.json {
        let report = SimulationReport {
            metadata: ReportMetadata::new("simulate"),
            runs: outcomes
                .into_iter()
                .map(|(name, outcome)| RunReport::from_outcome(&name, outcome))
                .collect(),
            client,
            server,
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    if !options.quiet {
        for (name, outcome) in &outcomes {
            display::display_outcome(name, outcome);
            if let Some(average) = manager.average_duration(name).await {
                println!(
                    "  Average duration: {}",
                    style(display::format_duration(average)).blue()
                );
            }
        }
        display::display_counts(client, server);
    }

    let failed = outcomes.iter().any(|(_, outcome)| {
        outcome
            .results()
            .is_some_and(|results| !results.is_success())
    });
    if failed {
        anyhow::bail!("One or more sync profiles did not complete");
    }
    Ok(())
}

async fn request(
    manager: &SyncManager,
    name: &str,
    wait: Option<Duration>,
    force: bool,
) -> Result<SyncHandle> {
    let profile = name.to_string();
    let handle = manager
        .process(name, wait, force, move |outcome: &SyncOutcome| {
            debug!("Post action for {}: {:?}", profile, outcome.results().map(|r| r.status));
        })
        .await
        .with_context(|| format!("Failed to start sync profile {}", name))?;
    Ok(handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_simulate_arguments() {
        let cli = Cli::try_parse_from([
            "ferrosync",
            "simulate",
            "All",
            "Accounts",
            "--records",
            "5",
            "--wait-ms",
            "250",
            "--force",
        ])
        .unwrap();

        match cli.command {
            Commands::Simulate {
                profiles,
                records,
                wait_ms,
                force,
                concurrent,
                ..
            } => {
                assert_eq!(profiles, vec!["All", "Accounts"]);
                assert_eq!(records, 5);
                assert_eq!(wait_ms, Some(250));
                assert!(force);
                assert!(!concurrent);
            }
            _ => panic!("expected simulate"),
        }
    }

    #[test]
    fn test_init_refuses_to_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ferrosync.yaml");
        let config = Config::default();
        let init = |force| ConfigAction::Init {
            path: path.clone(),
            force,
        };

        config_command(&config, init(false)).unwrap();
        assert!(path.exists());
        assert!(config_command(&config, init(false)).is_err());
        config_command(&config, init(true)).unwrap();
        config_command(&config, ConfigAction::Validate { path: path.clone() }).unwrap();
    }
}
