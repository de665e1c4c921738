// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Agent Configuration Types
//
// Defines the configuration schema for an algo-agent node, including:
// - Node identity and data root
// - Container runtime connection and launch defaults
// - Object storage location and artifact key prefixes
// - Message bus service names
// - Reconciliation schedules and grace periods
// - HTTP ingress settings

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::domain::task::TaskKind;

pub const CONFIG_PATH_ENV: &str = "ALGO_AGENT_CONFIG_PATH";

/// Top-level agent configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Node name reported to the controller (defaults to the hostname)
    #[serde(default = "default_node_name")]
    pub node_name: String,

    /// Root of every task directory, registry file and the image cache
    #[serde(default = "default_data_root")]
    pub data_root: PathBuf,

    #[serde(default)]
    pub runtime: RuntimeSettings,

    #[serde(default)]
    pub storage: StorageSettings,

    #[serde(default)]
    pub services: ServiceNames,

    #[serde(default)]
    pub scripts: EntryScripts,

    #[serde(default)]
    pub reconcile: ReconcileSettings,

    #[serde(default)]
    pub http: HttpSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeSettings {
    /// Docker socket; local defaults are used when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub docker_socket_path: Option<String>,

    #[serde(default = "default_memory_bytes")]
    pub memory_bytes: i64,

    /// Program that runs the entry script inside the container
    #[serde(default = "default_interpreter")]
    pub interpreter: String,

    /// Mount point of the task directory inside the container
    #[serde(default = "default_workspace")]
    pub workspace: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSettings {
    /// Directory backing the local object store (`<base>/<bucket>/<key>`)
    #[serde(default = "default_storage_base")]
    pub base_path: PathBuf,

    /// Key prefix for uploaded training weights; the task id follows directly
    #[serde(default = "default_model_prefix")]
    pub model_path_prefix: String,

    /// Key prefix for uploaded training checkpoints
    #[serde(default = "default_checkpoint_prefix")]
    pub checkpoint_path_prefix: String,

    /// Key prefix for extracted model weights
    #[serde(default = "default_extract_prefix")]
    pub extract_path_prefix: String,
}

/// Queue names on the controller side
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceNames {
    #[serde(default = "default_train_service")]
    pub train: String,

    #[serde(default = "default_eval_service")]
    pub eval: String,

    #[serde(default = "default_deploy_service")]
    pub deploy: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryScripts {
    #[serde(default = "default_train_script")]
    pub train: String,
    #[serde(default = "default_eval_script")]
    pub eval: String,
    #[serde(default = "default_extract_script")]
    pub extract: String,
    #[serde(default = "default_deploy_script")]
    pub deploy: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileSettings {
    #[serde(default = "default_job_interval")]
    pub train_interval_secs: u64,
    #[serde(default = "default_job_interval")]
    pub eval_interval_secs: u64,
    #[serde(default = "default_extract_interval")]
    pub extract_interval_secs: u64,
    #[serde(default = "default_job_interval")]
    pub deploy_interval_secs: u64,

    /// How long a stopped train/eval container is kept before cleanup
    #[serde(default = "default_job_grace")]
    pub job_grace_secs: u64,

    #[serde(default = "default_extract_grace")]
    pub extract_grace_secs: u64,

    /// Log lines quoted in the remark of a crashed task
    #[serde(default = "default_log_tail")]
    pub log_tail: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpSettings {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    #[serde(default = "default_http_port")]
    pub port: u16,
}

// Default value functions
fn default_node_name() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "algo-agent".to_string())
}

fn default_data_root() -> PathBuf {
    PathBuf::from("./data")
}

fn default_memory_bytes() -> i64 {
    16 * 1024 * 1024 * 1024
}

fn default_interpreter() -> String {
    "python".to_string()
}

fn default_workspace() -> String {
    "/workspace".to_string()
}

fn default_storage_base() -> PathBuf {
    PathBuf::from("./objects")
}

fn default_model_prefix() -> String {
    "Model/train-".to_string()
}

fn default_checkpoint_prefix() -> String {
    "Checkpoint/train-".to_string()
}

fn default_extract_prefix() -> String {
    "Model/train_detail-".to_string()
}

fn default_train_service() -> String {
    "train".to_string()
}

fn default_eval_service() -> String {
    "eval".to_string()
}

fn default_deploy_service() -> String {
    "deploy".to_string()
}

fn default_train_script() -> String {
    "train.py".to_string()
}

fn default_eval_script() -> String {
    "eval.py".to_string()
}

fn default_extract_script() -> String {
    "extract.py".to_string()
}

fn default_deploy_script() -> String {
    "inference.py".to_string()
}

fn default_job_interval() -> u64 {
    30
}

fn default_extract_interval() -> u64 {
    120
}

fn default_job_grace() -> u64 {
    6 * 60 * 60
}

fn default_extract_grace() -> u64 {
    10 * 60
}

fn default_log_tail() -> usize {
    10
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_http_port() -> u16 {
    8090
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            docker_socket_path: None,
            memory_bytes: default_memory_bytes(),
            interpreter: default_interpreter(),
            workspace: default_workspace(),
        }
    }
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            base_path: default_storage_base(),
            model_path_prefix: default_model_prefix(),
            checkpoint_path_prefix: default_checkpoint_prefix(),
            extract_path_prefix: default_extract_prefix(),
        }
    }
}

impl Default for ServiceNames {
    fn default() -> Self {
        Self {
            train: default_train_service(),
            eval: default_eval_service(),
            deploy: default_deploy_service(),
        }
    }
}

impl Default for EntryScripts {
    fn default() -> Self {
        Self {
            train: default_train_script(),
            eval: default_eval_script(),
            extract: default_extract_script(),
            deploy: default_deploy_script(),
        }
    }
}

impl Default for ReconcileSettings {
    fn default() -> Self {
        Self {
            train_interval_secs: default_job_interval(),
            eval_interval_secs: default_job_interval(),
            extract_interval_secs: default_extract_interval(),
            deploy_interval_secs: default_job_interval(),
            job_grace_secs: default_job_grace(),
            extract_grace_secs: default_extract_grace(),
            log_tail: default_log_tail(),
        }
    }
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_http_port(),
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            node_name: default_node_name(),
            data_root: default_data_root(),
            runtime: RuntimeSettings::default(),
            storage: StorageSettings::default(),
            services: ServiceNames::default(),
            scripts: EntryScripts::default(),
            reconcile: ReconcileSettings::default(),
            http: HttpSettings::default(),
        }
    }
}

impl ReconcileSettings {
    pub fn interval(&self, kind: TaskKind) -> Duration {
        let secs = match kind {
            TaskKind::Training => self.train_interval_secs,
            TaskKind::Evaluation => self.eval_interval_secs,
            TaskKind::Extraction => self.extract_interval_secs,
            TaskKind::Deploy => self.deploy_interval_secs,
        };
        Duration::from_secs(secs)
    }

    /// Deploy services are cleaned up as soon as they are found dead.
    pub fn grace(&self, kind: TaskKind) -> Duration {
        let secs = match kind {
            TaskKind::Training | TaskKind::Evaluation => self.job_grace_secs,
            TaskKind::Extraction => self.extract_grace_secs,
            TaskKind::Deploy => 0,
        };
        Duration::from_secs(secs)
    }
}

impl EntryScripts {
    pub fn for_kind(&self, kind: TaskKind) -> &str {
        match kind {
            TaskKind::Training => &self.train,
            TaskKind::Evaluation => &self.eval,
            TaskKind::Extraction => &self.extract,
            TaskKind::Deploy => &self.deploy,
        }
    }
}

impl AgentConfig {
    pub fn from_yaml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    pub fn to_yaml_file(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    pub fn from_yaml_str(yaml: &str) -> anyhow::Result<Self> {
        let config = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    pub fn discover_config() -> Option<PathBuf> {
        // 1. Environment variable
        if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        // 2. Working directory
        let cwd = PathBuf::from("./algo-agent.yaml");
        if cwd.exists() {
            return Some(cwd);
        }

        // 3. User home
        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".algo-agent").join("config.yaml");
            if user_config.exists() {
                return Some(user_config);
            }
        }

        // 4. System config
        let system_config = PathBuf::from("/etc/algo-agent/config.yaml");
        if system_config.exists() {
            return Some(system_config);
        }

        None
    }

    pub fn load_or_default(cli_path: Option<PathBuf>) -> anyhow::Result<Self> {
        // Explicit path must exist and parse
        if let Some(path) = cli_path {
            tracing::info!("Loading configuration from explicit path: {:?}", path);
            let mut config = Self::from_yaml_file(&path).map_err(|e| {
                anyhow::anyhow!("Failed to load config at {:?}: {}", path, e)
            })?;
            config.apply_env_overrides();
            return Ok(config);
        }

        if let Some(config_path) = Self::discover_config() {
            tracing::info!("Loading configuration from discovered path: {:?}", config_path);
            let mut config = Self::from_yaml_file(config_path)?;
            config.apply_env_overrides();
            Ok(config)
        } else {
            tracing::warn!("No configuration file found in standard locations. Using defaults.");
            let mut config = Self::default();
            config.apply_env_overrides();
            Ok(config)
        }
    }

    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("ALGO_AGENT_DATA_ROOT") {
            tracing::info!("Environment override: ALGO_AGENT_DATA_ROOT={}", val);
            self.data_root = PathBuf::from(val);
        }

        if let Ok(val) = std::env::var("ALGO_AGENT_DOCKER_SOCKET") {
            tracing::info!("Environment override: ALGO_AGENT_DOCKER_SOCKET={}", val);
            self.runtime.docker_socket_path = Some(val);
        }

        if let Ok(val) = std::env::var("ALGO_AGENT_NODE_NAME") {
            tracing::info!("Environment override: ALGO_AGENT_NODE_NAME={}", val);
            self.node_name = val;
        }

        if let Ok(val) = std::env::var("ALGO_AGENT_HTTP_PORT") {
            match val.parse::<u16>() {
                Ok(port) => {
                    tracing::info!("Environment override: ALGO_AGENT_HTTP_PORT={}", port);
                    self.http.port = port;
                }
                Err(_) => {
                    tracing::warn!(
                        "Invalid value for ALGO_AGENT_HTTP_PORT: '{}'. Expected a port number. Ignoring.",
                        val
                    );
                }
            }
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.node_name.trim().is_empty() {
            anyhow::bail!("node_name cannot be empty");
        }

        if self.data_root.as_os_str().is_empty() {
            anyhow::bail!("data_root cannot be empty");
        }

        if !self.runtime.workspace.starts_with('/') {
            anyhow::bail!(
                "runtime.workspace must be an absolute container path, got '{}'",
                self.runtime.workspace
            );
        }

        if self.runtime.memory_bytes <= 0 {
            anyhow::bail!("runtime.memory_bytes must be positive");
        }

        if self.runtime.interpreter.is_empty() {
            anyhow::bail!("runtime.interpreter cannot be empty");
        }

        for (name, value) in [
            ("services.train", &self.services.train),
            ("services.eval", &self.services.eval),
            ("services.deploy", &self.services.deploy),
        ] {
            if value.is_empty() {
                anyhow::bail!("{} cannot be empty", name);
            }
        }

        for kind in TaskKind::ALL {
            if self.scripts.for_kind(kind).is_empty() {
                anyhow::bail!("entry script for {} cannot be empty", kind);
            }
            if self.reconcile.interval(kind).is_zero() {
                anyhow::bail!("reconcile interval for {} must be positive", kind);
            }
        }

        Ok(())
    }

    /// `<data_root>/<kind>`
    pub fn kind_root(&self, kind: TaskKind) -> PathBuf {
        self.data_root.join(kind.dir_name())
    }

    pub fn registry_path(&self, kind: TaskKind) -> PathBuf {
        self.kind_root(kind).join(kind.registry_file())
    }

    pub fn image_cache_dir(&self) -> PathBuf {
        self.data_root.join("image")
    }
}
