//! Per-task durable metadata (§4.2 Task Persistence, C2).
//!
//! One JSON file per task, written with the write-temp-then-rename idiom
//! from `scheduler_types::utils`. Every mutation saves; nothing here is
//! buffered in memory beyond what the caller already holds.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use scheduler_types::{AgentParams, CadenceSpec, ExecutionMode, SchedulerError, TaskIdentity};
use serde::{Deserialize, Serialize};

/// Retention cap for the append-only step log (§10.3, resolving §9's open
/// question on unbounded growth): oldest entries are dropped first.
pub const MAX_STEP_ENTRIES: usize = 200;

/// One `RunOnce` iteration's opaque note, appended by the agent (§3 "Per-task
/// durable meta").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepEntry {
    pub round_num: u64,
    pub at: DateTime<Local>,
    pub note: serde_json::Value,
}

/// Durable per-task metadata mirroring identity/cadence/mode plus the round
/// counter and step history (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskMeta {
    pub identity: TaskIdentity,
    pub cadence: CadenceSpec,
    pub mode: ExecutionMode,
    pub kwargs: AgentParams,
    pub round_num: u64,
    pub steps: Vec<StepEntry>,
}

/// Owns the on-disk location of one task's meta file. Held exclusively by
/// that task's in-memory record (§3 "Ownership").
pub struct TaskPersistence {
    meta_path: PathBuf,
}

impl TaskPersistence {
    pub fn new(data_root: &Path, task_id: uuid::Uuid) -> Self {
        Self {
            meta_path: task_dir(data_root, task_id).join("meta.json"),
        }
    }

    pub fn task_dir(data_root: &Path, task_id: uuid::Uuid) -> PathBuf {
        task_dir(data_root, task_id)
    }

    pub fn meta_path(&self) -> &Path {
        &self.meta_path
    }

    /// Load the meta file if present, otherwise materialize and persist
    /// `defaults` (§4.2 `load_or_init`).
    pub fn load_or_init(&self, defaults: TaskMeta) -> Result<TaskMeta, SchedulerError> {
        match scheduler_types::utils::read_json_if_exists::<TaskMeta>(&self.meta_path)
            .map_err(|e| SchedulerError::PersistenceError(e.to_string()))?
        {
            Some(meta) => Ok(meta),
            None => {
                self.update(&defaults)?;
                Ok(defaults)
            }
        }
    }

    /// Overwrite the meta file atomically (§4.2 `update`).
    pub fn update(&self, meta: &TaskMeta) -> Result<(), SchedulerError> {
        scheduler_types::utils::atomic_write_json(&self.meta_path, meta)
            .map_err(|e| SchedulerError::PersistenceError(e.to_string()))
    }

    /// Append a step entry and persist, dropping the oldest entry once
    /// `MAX_STEP_ENTRIES` is exceeded (§4.2 `append_step`, §10.3).
    pub fn append_step(&self, meta: &mut TaskMeta, step: StepEntry) -> Result<(), SchedulerError> {
        meta.steps.push(step);
        if meta.steps.len() > MAX_STEP_ENTRIES {
            let overflow = meta.steps.len() - MAX_STEP_ENTRIES;
            tracing::warn!(
                task_id = %meta.identity.task_id,
                dropped = overflow,
                "step log exceeded retention cap, dropping oldest entries"
            );
            meta.steps.drain(0..overflow);
        }
        self.update(meta)
    }

    /// Remove the meta file and its containing directory (§4.4 `delete`).
    pub fn remove_dir(data_root: &Path, task_id: uuid::Uuid) -> std::io::Result<()> {
        let dir = task_dir(data_root, task_id);
        if dir.exists() {
            std::fs::remove_dir_all(dir)?;
        }
        Ok(())
    }
}

fn task_dir(data_root: &Path, task_id: uuid::Uuid) -> PathBuf {
    data_root.join("tasks").join(task_id.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use scheduler_types::{ExecutionMode, SocialOperatorParams, TaskType};

    fn sample_meta(task_id: uuid::Uuid) -> TaskMeta {
        TaskMeta {
            identity: TaskIdentity {
                task_id,
                task_type: TaskType::SocialAccountOperator,
                account_id: "acct-1".into(),
                account_name: "Acct One".into(),
            },
            cadence: CadenceSpec {
                interval_seconds: 3600,
                valid_hour_range: None,
                end_date: chrono::NaiveDate::from_ymd_opt(2030, 1, 1).unwrap(),
            },
            mode: ExecutionMode::Standard,
            kwargs: AgentParams::SocialAccountOperator(SocialOperatorParams::default()),
            round_num: 0,
            steps: Vec::new(),
        }
    }

    #[test]
    fn load_or_init_materializes_defaults_on_first_call() {
        let dir = tempfile::tempdir().unwrap();
        let task_id = uuid::Uuid::new_v4();
        let persistence = TaskPersistence::new(dir.path(), task_id);

        let loaded = persistence.load_or_init(sample_meta(task_id)).unwrap();
        assert_eq!(loaded.identity.task_id, task_id);
        assert!(TaskPersistence::task_dir(dir.path(), task_id)
            .join("meta.json")
            .exists());
    }

    #[test]
    fn load_or_init_returns_existing_file_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let task_id = uuid::Uuid::new_v4();
        let persistence = TaskPersistence::new(dir.path(), task_id);

        let mut meta = persistence.load_or_init(sample_meta(task_id)).unwrap();
        meta.round_num = 7;
        persistence.update(&meta).unwrap();

        let reloaded = persistence.load_or_init(sample_meta(task_id)).unwrap();
        assert_eq!(reloaded.round_num, 7);
    }

    #[test]
    fn append_step_caps_history_at_retention_limit() {
        let dir = tempfile::tempdir().unwrap();
        let task_id = uuid::Uuid::new_v4();
        let persistence = TaskPersistence::new(dir.path(), task_id);
        let mut meta = persistence.load_or_init(sample_meta(task_id)).unwrap();

        for i in 0..(MAX_STEP_ENTRIES as u64 + 10) {
            persistence
                .append_step(
                    &mut meta,
                    StepEntry {
                        round_num: i,
                        at: chrono::Local::now(),
                        note: serde_json::json!({"i": i}),
                    },
                )
                .unwrap();
        }

        assert_eq!(meta.steps.len(), MAX_STEP_ENTRIES);
        assert_eq!(meta.steps.first().unwrap().round_num, 10);
    }

    #[test]
    fn remove_dir_deletes_meta_file() {
        let dir = tempfile::tempdir().unwrap();
        let task_id = uuid::Uuid::new_v4();
        let persistence = TaskPersistence::new(dir.path(), task_id);
        persistence.load_or_init(sample_meta(task_id)).unwrap();

        TaskPersistence::remove_dir(dir.path(), task_id).unwrap();
        assert!(!TaskPersistence::task_dir(dir.path(), task_id).exists());
    }
}
