// ABOUTME: Runner configuration: account credentials plus pool, job, package and monitor settings
// ABOUTME: Loaded once at startup from a TOML file with environment overrides for secrets

use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::Deserialize;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::RunnerError;

pub const CONFIG_ENV_VAR: &str = "SQLPACKAGE_BATCH_CONFIG";
pub const DEFAULT_CONFIG_FILE: &str = "sqlpackage-batch.toml";

pub const BATCH_ACCOUNT_URL_VAR: &str = "BATCH_ACCOUNT_URL";
pub const BATCH_ACCOUNT_NAME_VAR: &str = "BATCH_ACCOUNT_NAME";
pub const BATCH_ACCOUNT_KEY_VAR: &str = "BATCH_ACCOUNT_KEY";
pub const STORAGE_ACCOUNT_NAME_VAR: &str = "STORAGE_ACCOUNT_NAME";
pub const STORAGE_ACCOUNT_KEY_VAR: &str = "STORAGE_ACCOUNT_KEY";

/// What to tear down once a run has succeeded. Failed or timed-out runs never clean up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum CleanupPolicy {
    /// Leave the job and pool in place
    #[default]
    Retain,
    /// Delete the job. The job is shared, so this also terminates tasks other
    /// operators may be running in it
    DeleteJob,
    /// Delete the shared job and then the pool, including any other work on them
    DeleteJobAndPool,
}

#[derive(Clone, Default, Deserialize)]
#[serde(default)]
pub struct BatchAccount {
    pub account_url: String,
    pub account_name: String,
    pub account_key: String,
}

impl fmt::Debug for BatchAccount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchAccount")
            .field("account_url", &self.account_url)
            .field("account_name", &self.account_name)
            .field("account_key", &"<redacted>")
            .finish()
    }
}

#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct StorageAccount {
    pub account_name: String,
    pub account_key: String,
    pub endpoint_suffix: String,
    pub capability_lifetime_hours: u32,
}

impl Default for StorageAccount {
    fn default() -> Self {
        Self {
            account_name: String::new(),
            account_key: String::new(),
            endpoint_suffix: "core.windows.net".to_string(),
            capability_lifetime_hours: 24,
        }
    }
}

impl fmt::Debug for StorageAccount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageAccount")
            .field("account_name", &self.account_name)
            .field("account_key", &"<redacted>")
            .field("endpoint_suffix", &self.endpoint_suffix)
            .field("capability_lifetime_hours", &self.capability_lifetime_hours)
            .finish()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ImageSettings {
    pub publisher: String,
    pub offer: String,
    pub sku: String,
    pub version: String,
}

impl Default for ImageSettings {
    fn default() -> Self {
        Self {
            publisher: "MicrosoftWindowsServer".to_string(),
            offer: "WindowsServer".to_string(),
            sku: "2016-datacenter-smalldisk".to_string(),
            version: "latest".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PoolSettings {
    pub id: String,
    pub vm_size: String,
    pub node_count: u32,
    pub node_agent_sku: String,
    pub image: ImageSettings,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            id: "sqlpackage-pool".to_string(),
            vm_size: "STANDARD_D3_V2".to_string(),
            node_count: 1,
            node_agent_sku: "batch.node.windows amd64".to_string(),
            image: ImageSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct JobSettings {
    pub id: String,
}

impl Default for JobSettings {
    fn default() -> Self {
        Self {
            id: "importexport".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PackageSettings {
    pub id: String,
    pub version: String,
}

impl Default for PackageSettings {
    fn default() -> Self {
        Self {
            id: "sqlpackagenetcore".to_string(),
            version: "15.0.4630.1".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MonitorSettings {
    pub timeout_secs: u64,
    pub poll_interval_secs: u64,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            timeout_secs: 300,
            poll_interval_secs: 5,
        }
    }
}

impl MonitorSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub batch: BatchAccount,
    pub storage: StorageAccount,
    pub pool: PoolSettings,
    pub job: JobSettings,
    pub package: PackageSettings,
    pub monitor: MonitorSettings,
    pub cleanup: CleanupPolicy,
    pub fail_on_task_error: bool,
}

impl Config {
    /// Loads the config file (if any) and applies credential overrides from the environment.
    pub fn load(path_override: Option<&Path>) -> Result<Self> {
        let (path, required) = match path_override {
            Some(path) => (Some(path.to_path_buf()), true),
            None => match std::env::var_os(CONFIG_ENV_VAR) {
                Some(value) if !value.is_empty() => (Some(PathBuf::from(value)), true),
                Some(_) => anyhow::bail!("{CONFIG_ENV_VAR} is set but empty"),
                None => (Some(PathBuf::from(DEFAULT_CONFIG_FILE)), false),
            },
        };

        let mut config = match path.as_deref() {
            Some(path) => read_config_file(path, required)?,
            None => Config::default(),
        };
        config.apply_env(|name| std::env::var(name).ok());
        Ok(config)
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        toml::from_str(contents).context("failed to parse config")
    }

    /// Overrides credentials with any non-empty values returned by `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let targets: [(&str, &mut String); 5] = [
            (BATCH_ACCOUNT_URL_VAR, &mut self.batch.account_url),
            (BATCH_ACCOUNT_NAME_VAR, &mut self.batch.account_name),
            (BATCH_ACCOUNT_KEY_VAR, &mut self.batch.account_key),
            (STORAGE_ACCOUNT_NAME_VAR, &mut self.storage.account_name),
            (STORAGE_ACCOUNT_KEY_VAR, &mut self.storage.account_key),
        ];
        for (name, slot) in targets {
            if let Some(value) = lookup(name).filter(|v| !v.is_empty()) {
                *slot = value;
            }
        }
    }

    /// Checks that every credential is present before any client is built.
    pub fn validate(&self) -> std::result::Result<(), RunnerError> {
        let required = [
            ("batch.account_url", &self.batch.account_url),
            ("batch.account_name", &self.batch.account_name),
            ("batch.account_key", &self.batch.account_key),
            ("storage.account_name", &self.storage.account_name),
            ("storage.account_key", &self.storage.account_key),
        ];
        let missing: Vec<&str> = required
            .iter()
            .filter(|(_, value)| value.trim().is_empty())
            .map(|(name, _)| *name)
            .collect();
        if !missing.is_empty() {
            return Err(RunnerError::config(format!(
                "One or more account credentials have not been populated: {}. Set them in the config file or via environment variables",
                missing.join(", ")
            )));
        }

        if !self.batch.account_url.starts_with("https://") {
            return Err(RunnerError::config("batch.account_url must be an https URL"));
        }
        for (name, key) in [
            ("batch.account_key", &self.batch.account_key),
            ("storage.account_key", &self.storage.account_key),
        ] {
            if STANDARD.decode(key.trim()).is_err() {
                return Err(RunnerError::config(format!("{} is not valid base64", name)));
            }
        }
        if self.pool.node_count == 0 {
            return Err(RunnerError::config("pool.node_count must be at least 1"));
        }
        if self.storage.capability_lifetime_hours == 0 {
            return Err(RunnerError::config(
                "storage.capability_lifetime_hours must be at least 1",
            ));
        }
        Ok(())
    }
}

fn read_config_file(path: &Path, required: bool) -> Result<Config> {
    if !path.exists() {
        if required {
            anyhow::bail!("config file not found at {}", path.display());
        }
        return Ok(Config::default());
    }

    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    toml::from_str(&contents)
        .with_context(|| format!("failed to parse config file {}", path.display()))
}
