// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Task registry inspection
//!
//! Reads the registry snapshots straight from the data root, so it works
//! whether or not the agent is running.

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::PathBuf;

use algo_agent_core::domain::node_config::AgentConfig;
use algo_agent_core::domain::record::{
    DeployServiceRecord, EvalTaskRecord, ExtractTaskRecord, TaskRecord, TrainingTaskRecord,
};
use algo_agent_core::domain::repository::TaskRegistry;
use algo_agent_core::domain::task::{LifecycleStatus, Phase, TaskKind};
use algo_agent_core::infrastructure::registry::JsonTaskRegistry;

#[derive(Subcommand)]
pub enum TasksCommand {
    /// List the records of one task kind
    List {
        /// train, eval, extract or deploy
        #[arg(value_name = "KIND")]
        kind: String,

        /// Print the raw records as JSON
        #[arg(long)]
        json: bool,
    },
}

pub async fn handle_command(command: TasksCommand, config_override: Option<PathBuf>) -> Result<()> {
    let config = AgentConfig::load_or_default(config_override).context("Failed to load configuration")?;
    match command {
        TasksCommand::List { kind, json } => {
            let kind = TaskKind::parse(&kind)
                .with_context(|| format!("Unknown task kind '{}' (expected train, eval, extract or deploy)", kind))?;
            match kind {
                TaskKind::Training => list::<TrainingTaskRecord>(&config, json),
                TaskKind::Evaluation => list::<EvalTaskRecord>(&config, json),
                TaskKind::Extraction => list::<ExtractTaskRecord>(&config, json),
                TaskKind::Deploy => list::<DeployServiceRecord>(&config, json),
            }
        }
    }
}

fn list<R: TaskRecord>(config: &AgentConfig, json: bool) -> Result<()> {
    let registry = JsonTaskRegistry::<R>::new(config.registry_path(R::KIND));
    let records = registry.list();

    if json {
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }

    if records.is_empty() {
        println!("No {} tasks in {}", R::KIND, registry.path().display());
        return Ok(());
    }

    println!(
        "{:<24} {:<22} {:<40} {}",
        "ID".bold(),
        "STATUS".bold(),
        "CONTAINER".bold(),
        "REMARK".bold()
    );
    for record in &records {
        let status = record.status();
        let label = format!("{:?} ({})", status, status.code());
        let label = match status.phase() {
            Phase::Running => label.green(),
            Phase::Terminal if status == <R::Status as LifecycleStatus>::FAILED => label.red(),
            Phase::Terminal => label.dimmed(),
            Phase::Staging => label.yellow(),
        };
        let container = if record.container_name().is_empty() {
            "-"
        } else {
            record.container_name()
        };
        println!("{:<24} {:<22} {:<40} {}", record.id(), label, container, record.remark());
    }
    Ok(())
}
