// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Configuration management commands
//!
//! Commands: show, validate, generate

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::PathBuf;

use algo_agent_core::domain::node_config::{AgentConfig, CONFIG_PATH_ENV};
use algo_agent_core::domain::task::TaskKind;

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Show config file paths checked
        #[arg(long)]
        paths: bool,
    },

    /// Validate configuration file
    Validate {
        /// Path to config file (default: discover)
        #[arg(value_name = "FILE")]
        file: Option<PathBuf>,
    },

    /// Write the default configuration as YAML
    Generate {
        /// Output path
        #[arg(short, long, default_value = "./algo-agent.yaml")]
        output: PathBuf,
    },
}

pub async fn handle_command(command: ConfigCommand, config_override: Option<PathBuf>) -> Result<()> {
    match command {
        ConfigCommand::Show { paths } => show(config_override, paths),
        ConfigCommand::Validate { file } => validate(file.or(config_override)),
        ConfigCommand::Generate { output } => generate(output),
    }
}

fn show(config_override: Option<PathBuf>, show_paths: bool) -> Result<()> {
    let config = AgentConfig::load_or_default(config_override.clone())
        .context("Failed to load configuration")?;

    if show_paths {
        println!("{}", "Configuration discovery paths:".bold());
        match &config_override {
            Some(path) => println!("  1. --config flag: {}", path.display()),
            None => println!("  1. --config flag: {}", "(not set)".dimmed()),
        }
        println!(
            "  2. {}: {}",
            CONFIG_PATH_ENV,
            std::env::var(CONFIG_PATH_ENV)
                .unwrap_or_else(|_| "(not set)".to_string())
                .dimmed()
        );
        println!("  3. ./algo-agent.yaml");
        println!("  4. ~/.algo-agent/config.yaml");
        println!("  5. /etc/algo-agent/config.yaml");
        println!();
    }

    println!("{}", "Current configuration:".bold());
    println!();

    println!("{}", "Node:".bold());
    println!("  Name: {}", config.node_name);
    println!("  Data root: {}", config.data_root.display());
    println!();

    println!("{}", "Runtime:".bold());
    println!(
        "  Docker socket: {}",
        config.runtime.docker_socket_path.as_deref().unwrap_or("(local default)")
    );
    println!("  Memory limit: {} bytes", config.runtime.memory_bytes);
    println!("  Interpreter: {}", config.runtime.interpreter);
    println!("  Workspace: {}", config.runtime.workspace);
    println!();

    println!("{}", "Object storage:".bold());
    println!("  Base path: {}", config.storage.base_path.display());
    println!("  Model prefix: {}", config.storage.model_path_prefix);
    println!("  Checkpoint prefix: {}", config.storage.checkpoint_path_prefix);
    println!("  Extract prefix: {}", config.storage.extract_path_prefix);
    println!();

    println!("{}", "Reconciliation:".bold());
    for kind in TaskKind::ALL {
        println!(
            "  {:<10} every {:>4}s, grace {:>6}s, registry {}",
            kind.to_string(),
            config.reconcile.interval(kind).as_secs(),
            config.reconcile.grace(kind).as_secs(),
            config.registry_path(kind).display()
        );
    }
    println!();

    println!("{}", "HTTP:".bold());
    println!("  Listen: {}:{}", config.http.bind_address, config.http.port);
    println!();

    Ok(())
}

fn validate(config_path: Option<PathBuf>) -> Result<()> {
    println!("Validating configuration...");

    let config = AgentConfig::load_or_default(config_path).context("Failed to load configuration")?;
    config.validate().context("Configuration validation failed")?;

    println!("{}", "✓ Configuration is valid".green());
    Ok(())
}

fn generate(output: PathBuf) -> Result<()> {
    AgentConfig::default()
        .to_yaml_file(&output)
        .with_context(|| format!("Failed to write config to {:?}", output))?;

    println!(
        "{}",
        format!("✓ Configuration generated: {}", output.display()).green()
    );
    Ok(())
}
