//! The Control API (§4.7, C7): the single façade a transport layer (out of
//! scope here) would sit behind. Wraps the Registry, Global Lock, License
//! Gate, Dispatcher, and Snapshot Store behind the named operations §6 lists.
//!
//! Every mutating call here persists (C8) and wakes the dispatcher, the same
//! way the teacher's `Agent` methods call into `ConfigManager::save` and then
//! nudge `TaskScheduler` after any config change.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Local;
use scheduler_types::{
    BeginLoginOutcome, CadenceSpec, ExecuteNowOutcome, ExecutionMode, ListFilter, LoginStatus,
    SchedulerError, SchedulerResult, TaskSnapshot, TaskType,
};
use uuid::Uuid;

use crate::agent::CookieBroker;
use crate::dispatcher::Dispatcher;
use crate::license::LicenseGate;
use crate::lock::GlobalLock;
use crate::registry::{CreateTaskParams, Registry, RunOutcome, UpdateTaskParams};
use crate::snapshot_store::{RegistrySnapshot, SnapshotStore};

pub use crate::registry::CreateTaskParams as CreateTaskInput;
pub use crate::registry::UpdateTaskParams as UpdateTaskInput;

pub struct Control {
    registry: Arc<Registry>,
    global_lock: Arc<GlobalLock>,
    snapshot_store: Arc<SnapshotStore>,
    dispatcher: Arc<Dispatcher>,
    license: LicenseGate,
    shared_cookie_path: PathBuf,
    execute_now_timeout: StdDuration,
}

impl Control {
    pub fn new(
        registry: Arc<Registry>,
        global_lock: Arc<GlobalLock>,
        snapshot_store: Arc<SnapshotStore>,
        dispatcher: Arc<Dispatcher>,
        license: LicenseGate,
        shared_cookie_path: PathBuf,
        execute_now_timeout: StdDuration,
    ) -> Self {
        Self {
            registry,
            global_lock,
            snapshot_store,
            dispatcher,
            license,
            shared_cookie_path,
            execute_now_timeout,
        }
    }

    /// §4.8 load policy: load the registry snapshot (or start empty, on a
    /// missing or corrupt file), rehydrate every task record, and wire up
    /// the rest of the engine around it. The daemon binary calls this once
    /// at startup.
    pub async fn bootstrap(
        data_root: PathBuf,
        license: LicenseGate,
        shared_cookie_path: PathBuf,
        poll_ceiling: StdDuration,
        execute_now_timeout: StdDuration,
    ) -> Self {
        let registry = Arc::new(Registry::new(data_root.clone()));
        let snapshot_store = Arc::new(SnapshotStore::new(&data_root));

        let loaded = snapshot_store.load().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "registry snapshot corrupt, starting with an empty registry");
            RegistrySnapshot::default()
        });
        for task in loaded.tasks {
            let task_id = task.task_id;
            if let Err(e) = registry.rehydrate(task).await {
                tracing::error!(%task_id, error = %e, "failed to reconstruct agent handle, skipping task");
            }
        }

        let global_lock = Arc::new(GlobalLock::new());
        let dispatcher = Arc::new(Dispatcher::new(
            registry.clone(),
            global_lock.clone(),
            snapshot_store.clone(),
            shared_cookie_path.clone(),
            poll_ceiling,
        ));

        Self::new(
            registry,
            global_lock,
            snapshot_store,
            dispatcher,
            license,
            shared_cookie_path,
            execute_now_timeout,
        )
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// §4.7 "Create task": license pre-check, interval coercion, then
    /// `Registry::add`.
    pub async fn create_task(
        &self,
        task_type: TaskType,
        account_id: String,
        account_name: String,
        mut cadence: CadenceSpec,
        mode: ExecutionMode,
        kwargs: scheduler_types::AgentParams,
    ) -> SchedulerResult<TaskSnapshot> {
        let now = Local::now();

        if self.license.is_expired(now) {
            return Err(SchedulerError::LicenseExpired);
        }
        if let Some(forced) = self.license.forced_interval() {
            cadence.interval_seconds = forced;
        }
        let max_tasks = self.license.max_tasks() as usize;
        if self.registry.count().await >= max_tasks {
            return Err(SchedulerError::TaskLimitReached);
        }

        let snapshot = self
            .registry
            .add(
                CreateTaskParams {
                    task_type,
                    account_id,
                    account_name,
                    cadence,
                    mode,
                    kwargs,
                },
                now,
            )
            .await?;

        self.persist_and_wake().await;
        Ok(snapshot)
    }

    pub async fn update_task(
        &self,
        task_id: Uuid,
        patch: UpdateTaskParams,
    ) -> SchedulerResult<TaskSnapshot> {
        let snapshot = self.registry.update(task_id, patch, Local::now()).await?;
        self.persist_and_wake().await;
        Ok(snapshot)
    }

    pub async fn delete_task(&self, task_id: Uuid) -> SchedulerResult<()> {
        self.registry.delete(task_id).await?;
        self.persist_and_wake().await;
        Ok(())
    }

    pub async fn pause_task(&self, task_id: Uuid) -> SchedulerResult<TaskSnapshot> {
        let snapshot = self.registry.pause(task_id, Local::now()).await?;
        self.persist_and_wake().await;
        Ok(snapshot)
    }

    pub async fn resume_task(&self, task_id: Uuid) -> SchedulerResult<TaskSnapshot> {
        let snapshot = self.registry.resume(task_id, Local::now()).await?;
        self.persist_and_wake().await;
        Ok(snapshot)
    }

    pub async fn reorder_task(
        &self,
        task_id: Uuid,
        offset_seconds: i64,
    ) -> SchedulerResult<TaskSnapshot> {
        let snapshot = self
            .registry
            .reorder(task_id, offset_seconds, Local::now())
            .await?;
        self.persist_and_wake().await;
        Ok(snapshot)
    }

    /// §4.7 "Execute now": license gate, bounded Global Lock acquisition,
    /// one synchronous `RunOnce`, identical post-run bookkeeping to the
    /// dispatch path.
    pub async fn execute_now(&self, task_id: Uuid) -> SchedulerResult<ExecuteNowOutcome> {
        if !self.license.can_execute_now() {
            return Err(SchedulerError::LicenseForbidden);
        }
        self.registry
            .get(task_id)
            .await
            .ok_or_else(|| SchedulerError::NotFound(task_id.to_string()))?;

        let _guard = self
            .global_lock
            .try_acquire_timeout(self.execute_now_timeout)
            .await?;

        let started_at = Local::now();
        let claim = self
            .registry
            .claim_for_run(task_id, started_at)
            .await
            .ok_or_else(|| {
                SchedulerError::IllegalState(format!("task {task_id} is not pending"))
            })?;

        let broker = CookieBroker::new(self.shared_cookie_path.clone());
        if let Err(e) = broker.populate(&claim.context.workspace_dir) {
            tracing::warn!(%task_id, error = %e, "failed to populate shared cookie file");
        }

        let result = claim.agent.run_once(&claim.context).await;

        if let Err(e) = broker.clear() {
            tracing::warn!(%task_id, error = %e, "failed to clear shared cookie file");
        }

        let succeeded = result.is_ok();
        let outcome = match result {
            Ok(may_reschedule) => RunOutcome::Ok {
                note: serde_json::json!({ "may_reschedule": may_reschedule }),
            },
            Err(e) => RunOutcome::Err {
                message: e.to_string(),
            },
        };

        let ended_at = Local::now();
        self.registry.finish_run(task_id, ended_at, outcome).await;
        drop(_guard);
        self.persist_and_wake().await;

        Ok(ExecuteNowOutcome {
            started_at,
            ended_at,
            duration_ms: (ended_at - started_at).num_milliseconds(),
            succeeded,
        })
    }

    pub async fn list_tasks(&self, filter: ListFilter) -> Vec<TaskSnapshot> {
        self.registry.list(filter).await
    }

    pub async fn get_task(&self, task_id: Uuid) -> SchedulerResult<TaskSnapshot> {
        self.registry
            .get(task_id)
            .await
            .ok_or_else(|| SchedulerError::NotFound(task_id.to_string()))
    }

    pub async fn get_by_account(
        &self,
        task_type: TaskType,
        account_id: &str,
    ) -> SchedulerResult<TaskSnapshot> {
        self.registry
            .get_by_account(task_type, account_id)
            .await
            .ok_or_else(|| SchedulerError::NotFound(account_id.to_string()))
    }

    pub fn start_dispatcher(&self) {
        self.dispatcher.start();
    }

    pub fn stop_dispatcher(&self) {
        self.dispatcher.stop();
    }

    pub async fn dispatcher_status(&self) -> scheduler_types::DispatcherStatusSnapshot {
        self.dispatcher.status().await
    }

    pub async fn login_status(&self, task_id: Uuid) -> SchedulerResult<LoginStatus> {
        let agent = self
            .registry
            .agent_handle(task_id)
            .await
            .ok_or_else(|| SchedulerError::NotFound(task_id.to_string()))?;
        Ok(agent.login_status().await)
    }

    pub async fn login_qrcode(&self, task_id: Uuid) -> SchedulerResult<BeginLoginOutcome> {
        let agent = self
            .registry
            .agent_handle(task_id)
            .await
            .ok_or_else(|| SchedulerError::NotFound(task_id.to_string()))?;
        agent.begin_login().await
    }

    pub async fn login_confirm(&self, task_id: Uuid) -> SchedulerResult<LoginStatus> {
        let agent = self
            .registry
            .agent_handle(task_id)
            .await
            .ok_or_else(|| SchedulerError::NotFound(task_id.to_string()))?;
        agent.confirm_login().await
    }

    async fn persist_and_wake(&self) {
        let snapshot = RegistrySnapshot::new(self.registry.export_all().await);
        if let Err(e) = self.snapshot_store.save(&snapshot) {
            tracing::error!(error = %e, "failed to persist registry snapshot after mutation");
        }
        self.dispatcher.notify_wakeup();
    }
}
