//! Whole-registry snapshot persistence (§4.8, C8).
//!
//! Complements the per-task meta files (C2) with a single file listing every
//! task, written after each mutating Control API call and after each
//! dispatch cycle, so a restart can rebuild the registry without replaying
//! individual task directories.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use scheduler_types::{SchedulerError, SchedulerResult, TaskSnapshot, TaskStatus};
use serde::{Deserialize, Serialize};

use crate::clock;

/// Bumped if the on-disk schema ever changes shape; absent on older files,
/// which deserialize to 0 via `#[serde(default)]` and are still readable.
pub const CURRENT_SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RegistrySnapshot {
    #[serde(default)]
    pub version: u32,
    #[serde(default)]
    pub saved_at: Option<DateTime<Local>>,
    pub tasks: Vec<TaskSnapshot>,
}

impl RegistrySnapshot {
    pub fn new(tasks: Vec<TaskSnapshot>) -> Self {
        Self {
            version: CURRENT_SNAPSHOT_VERSION,
            saved_at: Some(Local::now()),
            tasks,
        }
    }
}

pub struct SnapshotStore {
    path: PathBuf,
}

impl SnapshotStore {
    pub fn new(data_root: &Path) -> Self {
        Self {
            path: data_root.join("registry_snapshot.json"),
        }
    }

    /// §4.8 `save`: atomic write of the whole registry.
    pub fn save(&self, snapshot: &RegistrySnapshot) -> SchedulerResult<()> {
        scheduler_types::utils::atomic_write_json(&self.path, snapshot)
            .map_err(|e| SchedulerError::PersistenceError(e.to_string()))
    }

    /// §4.8 `load`: absent file means a fresh install, not an error. Any
    /// task caught `running` by a prior crash is reset to `pending` so the
    /// dispatcher picks it back up rather than leaving it stuck forever
    /// (§4.8 load policy, §9 "Crash during RunOnce").
    pub fn load(&self) -> SchedulerResult<RegistrySnapshot> {
        let mut snapshot = scheduler_types::utils::read_json_if_exists::<RegistrySnapshot>(&self.path)
            .map_err(|e| SchedulerError::CorruptSnapshot(e.to_string()))?
            .unwrap_or_default();

        let now = Local::now();
        for task in &mut snapshot.tasks {
            if task.status == TaskStatus::Running {
                tracing::warn!(
                    task_id = %task.task_id,
                    "found task running in snapshot at load; resetting to pending"
                );
                task.status = TaskStatus::Pending;
                task.next_execution_time = clock::next_execution(
                    now,
                    task.last_execution_time,
                    task.interval_seconds,
                    task.valid_hour_range,
                    task.end_date,
                );
                if task.next_execution_time.is_none() {
                    task.status = TaskStatus::Completed;
                }
            }
        }
        Ok(snapshot)
    }
}
