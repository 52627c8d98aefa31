//! License Gate (§4.9, C9): pure predicates over `LicenseConfig`, consumed
//! by the Control API before mutating operations. The encrypted source of
//! the config is out of scope (§1); only this contract matters.

use chrono::{DateTime, Local};
use scheduler_types::LicenseConfig;

pub use scheduler_types::license::FREE_TRIAL_INTERVAL_SECONDS;

pub struct LicenseGate {
    config: LicenseConfig,
}

impl LicenseGate {
    pub fn new(config: LicenseConfig) -> Self {
        Self { config }
    }

    /// §4.9 `max_tasks`.
    pub fn max_tasks(&self) -> u32 {
        if self.config.activated {
            self.config.task_num
        } else {
            1
        }
    }

    /// §4.9 `forced_interval`.
    pub fn forced_interval(&self) -> Option<u64> {
        if self.config.activated {
            None
        } else {
            Some(FREE_TRIAL_INTERVAL_SECONDS)
        }
    }

    /// §4.9 `can_execute_now`.
    pub fn can_execute_now(&self) -> bool {
        self.config.activated
    }

    /// §4.9 `is_expired`.
    pub fn is_expired(&self, now: DateTime<Local>) -> bool {
        match (self.config.activated, self.config.end_time) {
            (true, Some(end_time)) => now >= end_time,
            _ => false,
        }
    }
}
