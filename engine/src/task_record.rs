//! In-memory task state (§4.3 Task Record, C3).
//!
//! Owned exclusively by the Registry for the task's lifetime. Holds the
//! task's own Agent handle and persistence handle directly, with no
//! back-pointer to the Registry (§9 "Cross-module cycles").

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Local};
use scheduler_types::{
    AgentParams, CadenceSpec, ExecutionMode, TaskIdentity, TaskSnapshot, TaskStatus,
};

use crate::agent::AgentCollaborator;
use crate::persistence::TaskPersistence;

pub struct TaskRecord {
    pub identity: TaskIdentity,
    pub cadence: CadenceSpec,
    pub mode: ExecutionMode,
    pub status: TaskStatus,
    pub created_at: DateTime<Local>,
    pub updated_at: DateTime<Local>,
    pub last_execution_time: Option<DateTime<Local>>,
    pub next_execution_time: Option<DateTime<Local>>,
    pub round_num: u64,
    pub kwargs: AgentParams,
    pub workspace_dir: PathBuf,

    /// The task's own persistence handle (C2). Exclusively owned.
    pub persistence: TaskPersistence,
    /// The task's own agent handle (C10). `Arc` so the dispatcher can clone
    /// a handle out and invoke `RunOnce` without holding the registry lock
    /// for the duration of the call; `run_once` takes `&self`, so this is
    /// not shared *mutable* state, just a cheaply-cloneable reference.
    pub agent: Arc<dyn AgentCollaborator>,

    /// Set by `delete` when the task is currently running; the Dispatcher
    /// removes the record for real once the in-flight run returns (§4.4).
    pub pending_delete: bool,
}

impl TaskRecord {
    pub fn to_snapshot(&self) -> TaskSnapshot {
        TaskSnapshot {
            task_id: self.identity.task_id,
            account_id: self.identity.account_id.clone(),
            account_name: self.identity.account_name.clone(),
            task_type: self.identity.task_type,
            status: self.status,
            interval_seconds: self.cadence.interval_seconds,
            valid_hour_range: self.cadence.valid_hour_range,
            end_date: self.cadence.end_date,
            last_execution_time: self.last_execution_time,
            next_execution_time: self.next_execution_time,
            created_at: self.created_at,
            updated_at: self.updated_at,
            round_num: self.round_num,
            mode: self.mode,
            kwargs: self.kwargs.clone(),
        }
    }
}
