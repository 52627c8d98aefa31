use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::task::{AgentParams, CadenceSpec, ExecutionMode, TaskStatus, TaskType};

/// Read-only view of a task returned by every task-returning control
/// operation (§6 "Task snapshot fields").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSnapshot {
    pub task_id: uuid::Uuid,
    pub account_id: String,
    pub account_name: String,
    pub task_type: TaskType,
    pub status: TaskStatus,
    pub interval_seconds: u64,
    pub valid_hour_range: Option<crate::task::ValidHourRange>,
    pub end_date: chrono::NaiveDate,
    pub last_execution_time: Option<DateTime<Local>>,
    pub next_execution_time: Option<DateTime<Local>>,
    pub created_at: DateTime<Local>,
    pub updated_at: DateTime<Local>,
    pub round_num: u64,
    pub mode: ExecutionMode,
    pub kwargs: AgentParams,
}

impl TaskSnapshot {
    pub fn cadence(&self) -> CadenceSpec {
        CadenceSpec {
            interval_seconds: self.interval_seconds,
            valid_hour_range: self.valid_hour_range,
            end_date: self.end_date,
        }
    }
}

/// Optional filters for `ListTasks` (§4.4 `list`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListFilter {
    pub account_id: Option<String>,
    pub status: Option<TaskStatus>,
}

/// Outcome of a synchronous `ExecuteNow` call (§4.7 "Execute now").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteNowOutcome {
    pub started_at: DateTime<Local>,
    pub ended_at: DateTime<Local>,
    pub duration_ms: i64,
    pub succeeded: bool,
}

/// Counts and running-task identity for `DispatcherStatus` (§4.7, §10.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatcherStatusSnapshot {
    pub is_running: bool,
    pub pending_count: usize,
    pub running_count: usize,
    pub paused_count: usize,
    pub completed_count: usize,
    pub error_count: usize,
    pub running_task_id: Option<uuid::Uuid>,
    pub next_wake_at: Option<DateTime<Local>>,
    pub last_tick_at: Option<DateTime<Local>>,
}
