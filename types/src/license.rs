use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

/// Input constraints for the license gate (§4.9). The real product reads
/// this from an encrypted local config; that encryption layer is out of
/// scope here (§1), so this is loaded from a plain `license.toml` instead —
/// only the contract in §4.9 is implemented.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LicenseConfig {
    #[serde(default)]
    pub activated: bool,
    #[serde(default = "default_task_num")]
    pub task_num: u32,
    pub end_time: Option<DateTime<Local>>,
}

fn default_task_num() -> u32 {
    1
}

impl Default for LicenseConfig {
    fn default() -> Self {
        Self {
            activated: false,
            task_num: default_task_num(),
            end_time: None,
        }
    }
}

/// Free-trial coerced interval (§4.9 `forced_interval`).
pub const FREE_TRIAL_INTERVAL_SECONDS: u64 = 7200;
