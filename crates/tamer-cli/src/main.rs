//! tamer - profile-scoped supervisor daemon manager
//!
//! Starts, stops and inspects one supervisor-managed daemon per profile.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tamer_core::config::default_config_path;
use tamer_core::{DaemonTamer, TamerConfig, TcpSupervisorClient};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

mod commands;

/// tamer - profile-scoped supervisor daemon manager
#[derive(Parser, Debug)]
#[command(name = "tamer")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value_os_t = default_config_path())]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    // === Daemon lifecycle ===
    /// Start the profile's daemon, allocating an endpoint on first use
    Start {
        /// Profile name
        #[arg(short, long)]
        profile: String,
    },

    /// Stop the profile's daemon, then quit the supervisor if it is idle
    Stop {
        /// Profile name
        #[arg(short, long)]
        profile: String,
    },

    /// Stop every watcher in the profile's supervisor
    Pause {
        /// Profile name
        #[arg(short, long)]
        profile: String,
    },

    /// Start every watcher in the profile's supervisor
    Unpause {
        /// Profile name
        #[arg(short, long)]
        profile: String,
    },

    /// Terminate the profile's supervisor once it has no watchers
    Quit {
        /// Profile name
        #[arg(short, long)]
        profile: String,

        /// Terminate even if watchers remain
        #[arg(long)]
        force: bool,
    },

    // === Inspection ===
    /// Show the profile's daemon status (active, stopped, shut down)
    Status {
        /// Profile name
        #[arg(short, long)]
        profile: String,
    },

    /// List profiles with allocated endpoints
    #[command(alias = "ls")]
    Profiles,

    // === Log relays ===
    /// Start a log relay watcher for TAG under the profile's supervisor
    Stream {
        /// Stream tag
        tag: String,

        /// Profile name
        #[arg(short, long)]
        profile: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = EnvFilter::try_new(&cli.log_level).unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let config = TamerConfig::load_or_default(&cli.config)
        .with_context(|| format!("failed to load configuration from {}", cli.config.display()))?;
    let client = TcpSupervisorClient::new().with_timeout(config.supervisor.timeout);
    let tamer = DaemonTamer::from_config(&config, client);

    match cli.command {
        Commands::Start { profile } => commands::lifecycle::start(&tamer, &profile),
        Commands::Stop { profile } => commands::lifecycle::stop(&tamer, &profile),
        Commands::Pause { profile } => commands::lifecycle::pause(&tamer, &profile),
        Commands::Unpause { profile } => commands::lifecycle::unpause(&tamer, &profile),
        Commands::Quit { profile, force } => commands::lifecycle::quit(&tamer, &profile, force),
        Commands::Status { profile } => commands::lifecycle::status(&tamer, &profile),
        Commands::Profiles => commands::profiles::list(tamer.registry()),
        Commands::Stream { tag, profile } => commands::lifecycle::stream(&tamer, &profile, &tag),
    }
}
