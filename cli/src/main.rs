// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # algo-agent
//!
//! Node-local agent that runs training, evaluation, extraction and inference
//! containers for a remote controller.
//!
//! ## Commands
//!
//! - `algo-agent run` - Serve the agent API and reconcile tasks until stopped
//! - `algo-agent tasks list <kind>` - Inspect a task registry
//! - `algo-agent config show|validate|generate` - Configuration management

use anyhow::Result;
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use tracing::debug;

use algo_agent::commands::{self, ConfigCommand, TasksCommand};
use algo_agent::daemon::{self, ServeOverrides};
use algo_agent::logging::{init_logging, LogFormat};

/// algo-agent - run ML jobs in containers on this node
#[derive(Parser)]
#[command(name = "algo-agent")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file (overrides discovery)
    #[arg(
        short,
        long,
        global = true,
        env = "ALGO_AGENT_CONFIG_PATH",
        value_name = "FILE"
    )]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, env = "ALGO_AGENT_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Log output format
    #[arg(long, global = true, env = "ALGO_AGENT_LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the agent in the foreground
    #[command(name = "run")]
    Run {
        /// HTTP bind address (overrides config)
        #[arg(long, env = "ALGO_AGENT_HOST")]
        host: Option<String>,

        /// HTTP port (overrides config)
        #[arg(long)]
        port: Option<u16>,

        /// Root of task directories and registries (overrides config)
        #[arg(long, value_name = "DIR")]
        data_root: Option<PathBuf>,
    },

    /// Inspect task registries
    #[command(name = "tasks")]
    Tasks {
        #[command(subcommand)]
        command: TasksCommand,
    },

    /// Configuration management
    #[command(name = "config")]
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let dotenv = dotenvy::dotenv();
    let cli = Cli::parse();

    init_logging(&cli.log_level, cli.log_format)?;
    if let Ok(path) = dotenv {
        debug!(path = %path.display(), "Loaded environment file");
    }

    match cli.command {
        Some(Commands::Run {
            host,
            port,
            data_root,
        }) => {
            let overrides = ServeOverrides {
                bind_address: host,
                port,
                data_root,
            };
            daemon::run_agent(cli.config, overrides).await
        }
        Some(Commands::Tasks { command }) => commands::tasks::handle_command(command, cli.config).await,
        Some(Commands::Config { command }) => commands::config::handle_command(command, cli.config).await,
        None => {
            eprintln!("{}", "No command specified. Use --help for usage.".yellow());
            std::process::exit(1);
        }
    }
}
