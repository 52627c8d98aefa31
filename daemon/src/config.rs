//! Configuration loading for the scheduler daemon.
//!
//! Mirrors the teacher's `ConfigManager`: a single config directory holding
//! a couple of TOML files, loaded once at startup and validated before
//! anything else runs.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

const SCHEDULER_CONFIG_FILE: &str = "scheduler.toml";
const LICENSE_CONFIG_FILE: &str = "license.toml";

/// Daemon-level settings: where the engine keeps its data, how aggressively
/// the dispatcher polls, and how long a graceful shutdown is allowed to
/// wait for an in-flight `RunOnce` to finish.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub data_root: PathBuf,
    pub log_dir: PathBuf,
    pub dispatcher_poll_ceiling_seconds: u64,
    pub execute_now_timeout_ms: u64,
    pub shutdown_grace_seconds: u64,
    pub shared_cookie_file: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            data_root: PathBuf::from("./data"),
            log_dir: PathBuf::from("./logs"),
            dispatcher_poll_ceiling_seconds: 60,
            execute_now_timeout_ms: 5_000,
            shutdown_grace_seconds: 30,
            shared_cookie_file: "cookies.json".to_string(),
        }
    }
}

impl SchedulerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.dispatcher_poll_ceiling_seconds == 0 {
            anyhow::bail!("dispatcher_poll_ceiling_seconds must be positive");
        }
        if self.execute_now_timeout_ms == 0 {
            anyhow::bail!("execute_now_timeout_ms must be positive");
        }
        Ok(())
    }

    pub fn poll_ceiling(&self) -> Duration {
        Duration::from_secs(self.dispatcher_poll_ceiling_seconds)
    }

    pub fn execute_now_timeout(&self) -> Duration {
        Duration::from_millis(self.execute_now_timeout_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_seconds)
    }

    pub fn shared_cookie_path(&self) -> PathBuf {
        self.data_root.join(&self.shared_cookie_file)
    }
}

/// Load `scheduler.toml` from `config_dir`, or fall back to defaults if it
/// is absent — a fresh install should start rather than demand an
/// already-populated config directory.
pub async fn load_scheduler_config(config_dir: &Path) -> Result<SchedulerConfig> {
    let path = config_dir.join(SCHEDULER_CONFIG_FILE);
    let config = if path.exists() {
        let content = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("failed to read {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("failed to parse {} - TOML syntax error", path.display()))?
    } else {
        tracing::info!(
            path = %path.display(),
            "no scheduler.toml found, starting with default configuration"
        );
        SchedulerConfig::default()
    };

    config
        .validate()
        .with_context(|| format!("invalid configuration in {}", path.display()))?;
    Ok(config)
}

/// Load `license.toml`, standing in for the encrypted license source the
/// real product would read (§4.9's contract only, not its encryption). A
/// missing file means an unactivated free trial, not an error.
pub async fn load_license_config(config_dir: &Path) -> Result<scheduler_types::LicenseConfig> {
    let path = config_dir.join(LICENSE_CONFIG_FILE);
    if !path.exists() {
        tracing::info!(
            path = %path.display(),
            "no license.toml found, running as an unactivated free trial"
        );
        return Ok(scheduler_types::LicenseConfig::default());
    }

    let content = tokio::fs::read_to_string(&path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;
    let license: scheduler_types::LicenseConfig = toml::from_str(&content)
        .with_context(|| format!("failed to parse {} - TOML syntax error", path.display()))?;
    Ok(license)
}
