//! The Registry (§4.4, C4): owns every Task Record for the process lifetime,
//! enforces the account-uniqueness invariant, and is the only module allowed
//! to mutate a record's status or schedule fields.
//!
//! All mutation goes through `tokio::sync::Mutex<RegistryState>` so that
//! concurrent Control API calls serialize cleanly, matching the teacher's
//! `Arc<RwLock<TasksConfig>>` pattern in `agent/src/scheduler.rs` adapted to
//! a plain `Mutex` since reads here are just as frequent as writes and the
//! work done per call is small.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Local};
use scheduler_types::{
    AgentParams, CadenceSpec, ExecutionMode, ListFilter, SchedulerError, SchedulerResult,
    TaskIdentity, TaskSnapshot, TaskStatus, TaskType,
};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::agent::{reconstruct_agent, AgentCollaborator, RunContext};
use crate::clock;
use crate::persistence::{StepEntry, TaskMeta, TaskPersistence};
use crate::task_record::TaskRecord;

/// Input to `Registry::add` (§4.4 `add`). `interval_seconds` may already
/// have been coerced by the License Gate (C9) before reaching here; the
/// Registry does not know about licensing.
#[derive(Debug, Clone)]
pub struct CreateTaskParams {
    pub task_type: TaskType,
    pub account_id: String,
    pub account_name: String,
    pub cadence: CadenceSpec,
    pub mode: ExecutionMode,
    pub kwargs: AgentParams,
}

/// Partial update accepted by `Registry::update` (§4.4 `update`). Absent
/// fields are left unchanged.
#[derive(Debug, Clone, Default)]
pub struct UpdateTaskParams {
    pub cadence: Option<CadenceSpec>,
    pub mode: Option<ExecutionMode>,
    pub kwargs: Option<AgentParams>,
}

/// What the dispatcher needs to drive one `RunOnce` call once it has won the
/// Global Lock and the registry has flipped the record to `running`.
pub struct RunClaim {
    pub context: RunContext,
    pub agent: Arc<dyn AgentCollaborator>,
}

/// Outcome of a completed `RunOnce` call, fed back into `finish_run`.
pub enum RunOutcome {
    Ok { note: serde_json::Value },
    Err { message: String },
}

struct RegistryState {
    tasks: HashMap<Uuid, TaskRecord>,
    account_index: HashMap<(TaskType, String), Uuid>,
    running_task: Option<Uuid>,
}

pub struct Registry {
    data_root: PathBuf,
    state: Mutex<RegistryState>,
}

impl Registry {
    pub fn new(data_root: PathBuf) -> Self {
        Self {
            data_root,
            state: Mutex::new(RegistryState {
                tasks: HashMap::new(),
                account_index: HashMap::new(),
                running_task: None,
            }),
        }
    }

    /// §4.4 `add`. Rejects a second task of the same type for the same
    /// account (invariant I1).
    pub async fn add(
        &self,
        params: CreateTaskParams,
        now: DateTime<Local>,
    ) -> SchedulerResult<TaskSnapshot> {
        params.cadence.validate()?;
        if params.kwargs.task_type() != params.task_type {
            return Err(SchedulerError::Invalid(
                "kwargs task_type does not match the requested task_type".into(),
            ));
        }

        let mut state = self.state.lock().await;
        let index_key = (params.task_type, params.account_id.clone());
        if state.account_index.contains_key(&index_key) {
            return Err(SchedulerError::AccountTaken(params.account_id));
        }

        let task_id = Uuid::new_v4();
        let identity = TaskIdentity {
            task_id,
            task_type: params.task_type,
            account_id: params.account_id.clone(),
            account_name: params.account_name.clone(),
        };
        let workspace_dir = TaskPersistence::task_dir(&self.data_root, task_id);
        std::fs::create_dir_all(workspace_dir.join("credentials"))
            .map_err(|e| SchedulerError::PersistenceError(e.to_string()))?;

        let next_execution_time = clock::next_execution(
            now,
            None,
            params.cadence.interval_seconds,
            params.cadence.valid_hour_range,
            params.cadence.end_date,
        );

        let persistence = TaskPersistence::new(&self.data_root, task_id);
        let meta = TaskMeta {
            identity: identity.clone(),
            cadence: params.cadence.clone(),
            mode: params.mode,
            kwargs: params.kwargs.clone(),
            round_num: 0,
            steps: Vec::new(),
        };
        persistence.update(&meta)?;

        let agent: Arc<dyn AgentCollaborator> =
            Arc::from(reconstruct_agent(&identity, &params.kwargs, workspace_dir.clone())?);

        let record = TaskRecord {
            identity,
            cadence: params.cadence,
            mode: params.mode,
            status: TaskStatus::Pending,
            created_at: now,
            updated_at: now,
            last_execution_time: None,
            next_execution_time,
            round_num: 0,
            kwargs: params.kwargs,
            workspace_dir,
            persistence,
            agent,
            pending_delete: false,
        };
        let snapshot = record.to_snapshot();

        state.account_index.insert(index_key, task_id);
        state.tasks.insert(task_id, record);
        Ok(snapshot)
    }

    /// §4.4 `update`. Schedule fields are only recomputed while the task is
    /// `pending`; a `running` task's next execution time is recomputed once
    /// the in-flight run returns (`finish_run`), a `paused` task's stays
    /// `None` until `resume`.
    pub async fn update(
        &self,
        task_id: Uuid,
        patch: UpdateTaskParams,
        now: DateTime<Local>,
    ) -> SchedulerResult<TaskSnapshot> {
        if let Some(cadence) = &patch.cadence {
            cadence.validate()?;
        }

        let mut state = self.state.lock().await;
        let record = state
            .tasks
            .get_mut(&task_id)
            .ok_or_else(|| SchedulerError::NotFound(task_id.to_string()))?;

        if let Some(cadence) = patch.cadence {
            record.cadence = cadence;
        }
        if let Some(mode) = patch.mode {
            record.mode = mode;
        }
        if let Some(kwargs) = patch.kwargs {
            if kwargs.task_type() != record.identity.task_type {
                return Err(SchedulerError::Invalid(
                    "kwargs task_type does not match this task's type".into(),
                ));
            }
            record.agent = Arc::from(reconstruct_agent(
                &record.identity,
                &kwargs,
                record.workspace_dir.clone(),
            )?);
            record.kwargs = kwargs;
        }
        record.updated_at = now;

        if record.status == TaskStatus::Pending {
            record.next_execution_time = clock::next_execution(
                now,
                record.last_execution_time,
                record.cadence.interval_seconds,
                record.cadence.valid_hour_range,
                record.cadence.end_date,
            );
        }

        persist_meta(record);
        Ok(record.to_snapshot())
    }

    /// §4.4 `delete`. A running task is marked for removal and cleaned up by
    /// the dispatcher once its in-flight run returns.
    pub async fn delete(&self, task_id: Uuid) -> SchedulerResult<()> {
        let mut state = self.state.lock().await;
        let is_running = state.running_task == Some(task_id);
        let record = state
            .tasks
            .get_mut(&task_id)
            .ok_or_else(|| SchedulerError::NotFound(task_id.to_string()))?;

        if is_running {
            record.pending_delete = true;
            return Ok(());
        }

        let index_key = (record.identity.task_type, record.identity.account_id.clone());
        state.tasks.remove(&task_id);
        state.account_index.remove(&index_key);
        TaskPersistence::remove_dir(&self.data_root, task_id)
            .map_err(|e| SchedulerError::PersistenceError(e.to_string()))?;
        Ok(())
    }

    /// §4.4 `pause`. Idempotent: pausing an already-paused or completed task
    /// is a no-op that returns the current snapshot.
    pub async fn pause(&self, task_id: Uuid, now: DateTime<Local>) -> SchedulerResult<TaskSnapshot> {
        let mut state = self.state.lock().await;
        let record = state
            .tasks
            .get_mut(&task_id)
            .ok_or_else(|| SchedulerError::NotFound(task_id.to_string()))?;

        if !matches!(record.status, TaskStatus::Paused | TaskStatus::Completed) {
            record.status = TaskStatus::Paused;
            record.next_execution_time = None;
            record.updated_at = now;
            persist_meta(record);
        }
        Ok(record.to_snapshot())
    }

    /// §4.4 `resume`: `paused -> pending`, with the schedule recomputed from
    /// `now`. Only legal while the task is actually paused.
    pub async fn resume(&self, task_id: Uuid, now: DateTime<Local>) -> SchedulerResult<TaskSnapshot> {
        let mut state = self.state.lock().await;
        let record = state
            .tasks
            .get_mut(&task_id)
            .ok_or_else(|| SchedulerError::NotFound(task_id.to_string()))?;

        if record.status != TaskStatus::Paused {
            return Err(SchedulerError::IllegalState(format!(
                "task {task_id} is not paused"
            )));
        }

        record.status = TaskStatus::Pending;
        record.next_execution_time = clock::next_execution(
            now,
            record.last_execution_time,
            record.cadence.interval_seconds,
            record.cadence.valid_hour_range,
            record.cadence.end_date,
        );
        record.updated_at = now;
        persist_meta(record);
        Ok(record.to_snapshot())
    }

    /// §4.4 `reorder`: nudge a pending task's `next_execution_time` by
    /// `offset_seconds`, re-snapping into the valid hour window and checking
    /// the end date. Only legal for a task currently `pending` with a
    /// schedulable next time.
    pub async fn reorder(
        &self,
        task_id: Uuid,
        offset_seconds: i64,
        now: DateTime<Local>,
    ) -> SchedulerResult<TaskSnapshot> {
        let mut state = self.state.lock().await;
        let record = state
            .tasks
            .get_mut(&task_id)
            .ok_or_else(|| SchedulerError::NotFound(task_id.to_string()))?;

        if record.status != TaskStatus::Pending {
            return Err(SchedulerError::IllegalState(format!(
                "task {task_id} is {:?}, not pending",
                record.status
            )));
        }
        let Some(current_next) = record.next_execution_time else {
            return Err(SchedulerError::IllegalState(format!(
                "task {task_id} has no schedulable next execution time"
            )));
        };

        let shifted = current_next + chrono::Duration::seconds(offset_seconds);
        let adjusted = clock::advance_to_next_valid(shifted, record.cadence.valid_hour_range);

        if adjusted.date_naive() >= record.cadence.end_date {
            record.status = TaskStatus::Completed;
            record.next_execution_time = None;
        } else {
            record.next_execution_time = Some(adjusted);
        }
        record.updated_at = now;
        persist_meta(record);
        Ok(record.to_snapshot())
    }

    /// §4.4 `list`, ordered by `next_execution_time` ascending with `None`
    /// sorted last (matches the dispatcher's own due-candidate ordering).
    pub async fn list(&self, filter: ListFilter) -> Vec<TaskSnapshot> {
        let state = self.state.lock().await;
        let mut snapshots: Vec<TaskSnapshot> = state
            .tasks
            .values()
            .filter(|r| {
                filter
                    .account_id
                    .as_ref()
                    .is_none_or(|a| *a == r.identity.account_id)
                    && filter.status.is_none_or(|s| s == r.status)
            })
            .map(TaskRecord::to_snapshot)
            .collect();
        snapshots.sort_by_key(|s| (s.next_execution_time.is_none(), s.next_execution_time));
        snapshots
    }

    pub async fn get(&self, task_id: Uuid) -> Option<TaskSnapshot> {
        let state = self.state.lock().await;
        state.tasks.get(&task_id).map(TaskRecord::to_snapshot)
    }

    /// Clone out the task's agent handle for a login probe (§4.10); these
    /// calls don't touch schedule/status fields and don't need the Global
    /// Lock, just a cheap `Arc` clone.
    pub async fn agent_handle(&self, task_id: Uuid) -> Option<Arc<dyn AgentCollaborator>> {
        let state = self.state.lock().await;
        state.tasks.get(&task_id).map(|r| r.agent.clone())
    }

    pub async fn get_by_account(
        &self,
        task_type: TaskType,
        account_id: &str,
    ) -> Option<TaskSnapshot> {
        let state = self.state.lock().await;
        let task_id = *state.account_index.get(&(task_type, account_id.to_string()))?;
        state.tasks.get(&task_id).map(TaskRecord::to_snapshot)
    }

    pub async fn count(&self) -> usize {
        self.state.lock().await.tasks.len()
    }

    pub async fn running_task_id(&self) -> Option<Uuid> {
        self.state.lock().await.running_task
    }

    pub async fn count_by_status(&self, status: TaskStatus) -> usize {
        self.state
            .lock()
            .await
            .tasks
            .values()
            .filter(|r| r.status == status)
            .count()
    }

    /// Every `pending` or `error` task whose `next_execution_time` is due
    /// (`<= now`), earliest first, ties broken by `created_at` (§4.6 step 2).
    /// An `error` task is still dispatched on its next tick (§4.6 step 11,
    /// §3, §7) as long as it has a `next_execution_time` set.
    pub async fn due_candidates(&self, now: DateTime<Local>) -> Vec<Uuid> {
        let state = self.state.lock().await;
        let mut due: Vec<&TaskRecord> = state
            .tasks
            .values()
            .filter(|r| {
                matches!(r.status, TaskStatus::Pending | TaskStatus::Error)
                    && r.next_execution_time.is_some_and(|t| t <= now)
            })
            .collect();
        due.sort_by_key(|r| (r.next_execution_time, r.created_at));
        due.into_iter().map(|r| r.identity.task_id).collect()
    }

    /// Earliest `next_execution_time` across all pending or errored tasks,
    /// used to size the dispatcher's idle sleep (§4.6 step 1).
    pub async fn earliest_wake(&self) -> Option<DateTime<Local>> {
        let state = self.state.lock().await;
        state
            .tasks
            .values()
            .filter(|r| matches!(r.status, TaskStatus::Pending | TaskStatus::Error))
            .filter_map(|r| r.next_execution_time)
            .min()
    }

    /// §4.6 step 5: re-read status under the registry lock immediately
    /// before committing to a run, in case it changed between the due-scan
    /// and winning the Global Lock (e.g. a concurrent `pause`/`delete`). An
    /// `error` task is claimable like a `pending` one (error → running,
    /// §4.6 step 11). Returns `None` if the task is no longer runnable.
    pub async fn claim_for_run(&self, task_id: Uuid, now: DateTime<Local>) -> Option<RunClaim> {
        let mut state = self.state.lock().await;
        let record = state.tasks.get_mut(&task_id)?;
        if !matches!(record.status, TaskStatus::Pending | TaskStatus::Error) || record.pending_delete {
            return None;
        }

        record.status = TaskStatus::Running;
        record.updated_at = now;
        persist_meta(record);
        state.running_task = Some(task_id);

        Some(RunClaim {
            context: RunContext {
                task_id,
                account_id: record.identity.account_id.clone(),
                mode: record.mode,
                round_num: record.round_num,
                workspace_dir: record.workspace_dir.clone(),
            },
            agent: record.agent.clone(),
        })
    }

    /// §4.6 steps 9-13: post-run bookkeeping. Returns the resulting
    /// snapshot, or `None` if the task was deleted while running (and has
    /// now been removed for real).
    pub async fn finish_run(
        &self,
        task_id: Uuid,
        ended_at: DateTime<Local>,
        outcome: RunOutcome,
    ) -> Option<TaskSnapshot> {
        let mut state = self.state.lock().await;
        state.running_task = None;

        let pending_delete = state.tasks.get(&task_id).map(|r| r.pending_delete)?;
        if pending_delete {
            let record = state.tasks.remove(&task_id)?;
            let index_key = (record.identity.task_type, record.identity.account_id.clone());
            state.account_index.remove(&index_key);
            if let Err(e) = TaskPersistence::remove_dir(&self.data_root, task_id) {
                tracing::warn!(%task_id, error = %e, "failed to remove task workspace after deferred delete");
            }
            return None;
        }

        let record = state.tasks.get_mut(&task_id)?;
        record.last_execution_time = Some(ended_at);
        record.round_num += 1;
        record.updated_at = ended_at;

        let (note, err_message) = match &outcome {
            RunOutcome::Ok { note } => (note.clone(), None),
            RunOutcome::Err { message } => (
                serde_json::json!({ "error": message }),
                Some(message.clone()),
            ),
        };

        if ended_at.date_naive() >= record.cadence.end_date {
            record.status = TaskStatus::Completed;
            record.next_execution_time = None;
        } else if let Some(message) = err_message {
            record.status = TaskStatus::Error;
            tracing::warn!(%task_id, error = %message, "run_once returned an error");
            record.next_execution_time = clock::next_execution(
                ended_at,
                record.last_execution_time,
                record.cadence.interval_seconds,
                record.cadence.valid_hour_range,
                record.cadence.end_date,
            );
        } else {
            record.next_execution_time = clock::next_execution(
                ended_at,
                record.last_execution_time,
                record.cadence.interval_seconds,
                record.cadence.valid_hour_range,
                record.cadence.end_date,
            );
            record.status = if record.next_execution_time.is_none() {
                TaskStatus::Completed
            } else {
                TaskStatus::Pending
            };
        }

        let mut meta = TaskMeta {
            identity: record.identity.clone(),
            cadence: record.cadence.clone(),
            mode: record.mode,
            kwargs: record.kwargs.clone(),
            round_num: record.round_num,
            steps: Vec::new(),
        };
        // `load_or_init` on creation already wrote the steps file; reload it
        // here so `append_step` appends rather than clobbers.
        if let Ok(Some(existing)) =
            scheduler_types::utils::read_json_if_exists::<TaskMeta>(record.persistence.meta_path())
        {
            meta.steps = existing.steps;
        }
        if let Err(e) = record.persistence.append_step(
            &mut meta,
            StepEntry {
                round_num: record.round_num,
                at: ended_at,
                note,
            },
        ) {
            tracing::warn!(%task_id, error = %e, "failed to persist step entry");
        }

        Some(record.to_snapshot())
    }

    pub fn data_root(&self) -> &std::path::Path {
        &self.data_root
    }

    /// Whole-registry export for snapshot persistence (C8).
    pub async fn export_all(&self) -> Vec<TaskSnapshot> {
        let state = self.state.lock().await;
        state.tasks.values().map(TaskRecord::to_snapshot).collect()
    }

    /// Rehydrate a task record on daemon startup from a loaded snapshot
    /// (§4.8 load policy). Any task caught `running` at the time of a crash
    /// is reset to `pending` by the caller before this is invoked.
    pub async fn rehydrate(&self, snapshot: TaskSnapshot) -> SchedulerResult<()> {
        let identity = TaskIdentity {
            task_id: snapshot.task_id,
            task_type: snapshot.task_type,
            account_id: snapshot.account_id.clone(),
            account_name: snapshot.account_name.clone(),
        };
        let workspace_dir = TaskPersistence::task_dir(&self.data_root, snapshot.task_id);
        let agent: Arc<dyn AgentCollaborator> = Arc::from(reconstruct_agent(
            &identity,
            &snapshot.kwargs,
            workspace_dir.clone(),
        )?);
        let persistence = TaskPersistence::new(&self.data_root, snapshot.task_id);

        let record = TaskRecord {
            cadence: snapshot.cadence(),
            identity: identity.clone(),
            mode: snapshot.mode,
            status: snapshot.status,
            created_at: snapshot.created_at,
            updated_at: snapshot.updated_at,
            last_execution_time: snapshot.last_execution_time,
            next_execution_time: snapshot.next_execution_time,
            round_num: snapshot.round_num,
            kwargs: snapshot.kwargs,
            workspace_dir,
            persistence,
            agent,
            pending_delete: false,
        };

        let mut state = self.state.lock().await;
        state
            .account_index
            .insert((identity.task_type, identity.account_id), snapshot.task_id);
        state.tasks.insert(snapshot.task_id, record);
        Ok(())
    }
}

fn persist_meta(record: &TaskRecord) {
    let meta = TaskMeta {
        identity: record.identity.clone(),
        cadence: record.cadence.clone(),
        mode: record.mode,
        kwargs: record.kwargs.clone(),
        round_num: record.round_num,
        steps: Vec::new(),
    };
    // Preserve the existing step history; this call only ever touches the
    // identity/cadence/mode/round_num fields.
    if let Ok(Some(mut existing)) =
        scheduler_types::utils::read_json_if_exists::<TaskMeta>(record.persistence.meta_path())
    {
        existing.identity = meta.identity;
        existing.cadence = meta.cadence;
        existing.mode = meta.mode;
        existing.kwargs = meta.kwargs;
        existing.round_num = meta.round_num;
        if let Err(e) = record.persistence.update(&existing) {
            tracing::warn!(task_id = %record.identity.task_id, error = %e, "failed to persist task meta");
        }
    } else if let Err(e) = record.persistence.update(&meta) {
        tracing::warn!(task_id = %record.identity.task_id, error = %e, "failed to persist task meta");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scheduler_types::SocialOperatorParams;

    fn local_ymd_hms(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Local> {
        use chrono::TimeZone;
        Local.with_ymd_and_hms(y, mo, d, h, mi, s).single().unwrap()
    }

    fn sample_params(account_id: &str) -> CreateTaskParams {
        CreateTaskParams {
            task_type: TaskType::SocialAccountOperator,
            account_id: account_id.into(),
            account_name: "Display Name".into(),
            cadence: CadenceSpec {
                interval_seconds: 3600,
                valid_hour_range: None,
                end_date: chrono::NaiveDate::from_ymd_opt(2030, 1, 1).unwrap(),
            },
            mode: ExecutionMode::Standard,
            kwargs: AgentParams::SocialAccountOperator(SocialOperatorParams::default()),
        }
    }

    #[tokio::test]
    async fn add_rejects_duplicate_account_for_same_task_type() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Registry::new(dir.path().to_path_buf());
        let now = local_ymd_hms(2026, 1, 1, 9, 0, 0);

        registry.add(sample_params("acct-1"), now).await.unwrap();
        let err = registry.add(sample_params("acct-1"), now).await.unwrap_err();
        assert_eq!(err, SchedulerError::AccountTaken("acct-1".into()));
    }

    #[tokio::test]
    async fn pause_then_resume_round_trips_status() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Registry::new(dir.path().to_path_buf());
        let now = local_ymd_hms(2026, 1, 1, 9, 0, 0);

        let created = registry.add(sample_params("acct-1"), now).await.unwrap();
        let paused = registry.pause(created.task_id, now).await.unwrap();
        assert_eq!(paused.status, TaskStatus::Paused);
        assert!(paused.next_execution_time.is_none());

        let resumed = registry.resume(created.task_id, now).await.unwrap();
        assert_eq!(resumed.status, TaskStatus::Pending);
        assert!(resumed.next_execution_time.is_some());
    }

    #[tokio::test]
    async fn resume_rejects_non_paused_task() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Registry::new(dir.path().to_path_buf());
        let now = local_ymd_hms(2026, 1, 1, 9, 0, 0);

        let created = registry.add(sample_params("acct-1"), now).await.unwrap();
        let err = registry.resume(created.task_id, now).await.unwrap_err();
        assert!(matches!(err, SchedulerError::IllegalState(_)));
    }

    #[tokio::test]
    async fn delete_removes_task_and_frees_account_slot() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Registry::new(dir.path().to_path_buf());
        let now = local_ymd_hms(2026, 1, 1, 9, 0, 0);

        let created = registry.add(sample_params("acct-1"), now).await.unwrap();
        registry.delete(created.task_id).await.unwrap();
        assert!(registry.get(created.task_id).await.is_none());

        registry.add(sample_params("acct-1"), now).await.unwrap();
    }

    #[tokio::test]
    async fn due_candidates_orders_by_next_execution_time() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Registry::new(dir.path().to_path_buf());
        let now = local_ymd_hms(2026, 1, 1, 9, 0, 0);

        let mut p1 = sample_params("acct-1");
        p1.cadence.interval_seconds = 60;
        let mut p2 = sample_params("acct-2");
        p2.cadence.interval_seconds = 60;

        let t1 = registry.add(p1, now).await.unwrap();
        let t2 = registry.add(p2, now).await.unwrap();

        let due = registry
            .due_candidates(now + chrono::Duration::seconds(1))
            .await;
        assert_eq!(due, vec![t1.task_id, t2.task_id]);
    }

    #[tokio::test]
    async fn claim_for_run_transitions_to_running_and_finish_run_reschedules() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Registry::new(dir.path().to_path_buf());
        let now = local_ymd_hms(2026, 1, 1, 9, 0, 0);
        let created = registry.add(sample_params("acct-1"), now).await.unwrap();

        let claim = registry.claim_for_run(created.task_id, now).await.unwrap();
        assert_eq!(claim.context.account_id, "acct-1");
        let running = registry.get(created.task_id).await.unwrap();
        assert_eq!(running.status, TaskStatus::Running);

        let ended_at = now + chrono::Duration::seconds(5);
        let snapshot = registry
            .finish_run(
                created.task_id,
                ended_at,
                RunOutcome::Ok {
                    note: serde_json::json!({"ok": true}),
                },
            )
            .await
            .unwrap();
        assert_eq!(snapshot.status, TaskStatus::Pending);
        assert_eq!(snapshot.round_num, 1);
        assert!(snapshot.next_execution_time.unwrap() > ended_at);
    }

    #[tokio::test]
    async fn errored_task_is_rescheduled_and_claimed_again_on_next_tick() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Registry::new(dir.path().to_path_buf());
        let now = local_ymd_hms(2026, 1, 1, 9, 0, 0);
        let mut params = sample_params("acct-1");
        params.cadence.interval_seconds = 60;
        let created = registry.add(params, now).await.unwrap();

        registry.claim_for_run(created.task_id, now).await.unwrap();
        let ended_at = now + chrono::Duration::seconds(5);
        let snapshot = registry
            .finish_run(
                created.task_id,
                ended_at,
                RunOutcome::Err {
                    message: "agent collaborator failed".into(),
                },
            )
            .await
            .unwrap();
        assert_eq!(snapshot.status, TaskStatus::Error);
        let next_run_at = snapshot.next_execution_time.unwrap();
        assert!(next_run_at > ended_at);

        // Not due yet: an error task is still schedulable, just not early.
        assert!(registry.due_candidates(ended_at).await.is_empty());
        assert_eq!(registry.earliest_wake().await.unwrap(), next_run_at);

        // Once its next_execution_time arrives, the errored task is picked
        // back up by the due-scan and can be claimed like a pending one.
        let due = registry.due_candidates(next_run_at).await;
        assert_eq!(due, vec![created.task_id]);

        let claim = registry
            .claim_for_run(created.task_id, next_run_at)
            .await
            .unwrap();
        assert_eq!(claim.context.account_id, "acct-1");
        let running = registry.get(created.task_id).await.unwrap();
        assert_eq!(running.status, TaskStatus::Running);

        let second_ended_at = next_run_at + chrono::Duration::seconds(5);
        let snapshot = registry
            .finish_run(
                created.task_id,
                second_ended_at,
                RunOutcome::Ok {
                    note: serde_json::json!({"ok": true}),
                },
            )
            .await
            .unwrap();
        assert_eq!(snapshot.status, TaskStatus::Pending);
        assert_eq!(snapshot.round_num, 2);
    }

    #[tokio::test]
    async fn finish_run_marks_completed_past_end_date() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Registry::new(dir.path().to_path_buf());
        let now = local_ymd_hms(2026, 1, 1, 9, 0, 0);
        let mut params = sample_params("acct-1");
        params.cadence.end_date = chrono::NaiveDate::from_ymd_opt(2026, 1, 2).unwrap();
        let created = registry.add(params, now).await.unwrap();

        registry.claim_for_run(created.task_id, now).await.unwrap();
        let ended_at = local_ymd_hms(2026, 1, 2, 9, 0, 0);
        let snapshot = registry
            .finish_run(
                created.task_id,
                ended_at,
                RunOutcome::Ok {
                    note: serde_json::json!({}),
                },
            )
            .await
            .unwrap();
        assert_eq!(snapshot.status, TaskStatus::Completed);
        assert!(snapshot.next_execution_time.is_none());
    }

    #[tokio::test]
    async fn delete_while_running_defers_removal_until_finish_run() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Registry::new(dir.path().to_path_buf());
        let now = local_ymd_hms(2026, 1, 1, 9, 0, 0);
        let created = registry.add(sample_params("acct-1"), now).await.unwrap();

        registry.claim_for_run(created.task_id, now).await.unwrap();
        registry.delete(created.task_id).await.unwrap();
        assert!(registry.get(created.task_id).await.is_some());

        let result = registry
            .finish_run(
                created.task_id,
                now,
                RunOutcome::Ok {
                    note: serde_json::json!({}),
                },
            )
            .await;
        assert!(result.is_none());
        assert!(registry.get(created.task_id).await.is_none());
    }
}
