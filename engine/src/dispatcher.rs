//! The Dispatcher Loop (§4.6, C6): the single coordinator thread that scans
//! for due tasks, serializes execution behind the Global Lock, and drives
//! each task's post-run bookkeeping.
//!
//! Mirrors the teacher's `TaskScheduler::run` shape — a `loop` around a timed,
//! interruptible wait — generalized from "tick every probe on its own timer"
//! to "find the single earliest-due task and run it to completion before
//! looking again".

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Local};
use scheduler_types::DispatcherStatusSnapshot;
use tokio::sync::{watch, Mutex, Notify};
use uuid::Uuid;

use crate::agent::CookieBroker;
use crate::lock::GlobalLock;
use crate::registry::{Registry, RunOutcome};
use crate::snapshot_store::{RegistrySnapshot, SnapshotStore};

/// Upper bound on the idle wait between dispatch cycles (§4.6 step 2's
/// "now + 60s" cap), even if no task is due sooner.
pub const DEFAULT_POLL_CEILING: StdDuration = StdDuration::from_secs(60);

pub struct Dispatcher {
    registry: Arc<Registry>,
    global_lock: Arc<GlobalLock>,
    snapshot_store: Arc<SnapshotStore>,
    shared_cookie_path: PathBuf,
    poll_ceiling: StdDuration,
    enabled: AtomicBool,
    notify: Notify,
    last_tick_at: Mutex<Option<DateTime<Local>>>,
    next_wake_at: Mutex<Option<DateTime<Local>>>,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<Registry>,
        global_lock: Arc<GlobalLock>,
        snapshot_store: Arc<SnapshotStore>,
        shared_cookie_path: PathBuf,
        poll_ceiling: StdDuration,
    ) -> Self {
        Self {
            registry,
            global_lock,
            snapshot_store,
            shared_cookie_path,
            poll_ceiling,
            enabled: AtomicBool::new(true),
            notify: Notify::new(),
            last_tick_at: Mutex::new(None),
            next_wake_at: Mutex::new(None),
        }
    }

    /// §4.7 `StartDispatcher`.
    pub fn start(&self) {
        self.enabled.store(true, Ordering::SeqCst);
        self.notify.notify_one();
    }

    /// §4.7 `StopDispatcher`. Does not abort a run already in flight.
    pub fn stop(&self) {
        self.enabled.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Wake the loop early so a just-applied mutation is seen immediately
    /// (§4.6 "Wakeup signal"), instead of waiting out the poll ceiling.
    pub fn notify_wakeup(&self) {
        self.notify.notify_one();
    }

    /// §4.7 `DispatcherStatus`.
    pub async fn status(&self) -> DispatcherStatusSnapshot {
        use scheduler_types::TaskStatus;
        DispatcherStatusSnapshot {
            is_running: self.is_running(),
            pending_count: self.registry.count_by_status(TaskStatus::Pending).await,
            running_count: self.registry.count_by_status(TaskStatus::Running).await,
            paused_count: self.registry.count_by_status(TaskStatus::Paused).await,
            completed_count: self.registry.count_by_status(TaskStatus::Completed).await,
            error_count: self.registry.count_by_status(TaskStatus::Error).await,
            running_task_id: self.registry.running_task_id().await,
            next_wake_at: *self.next_wake_at.lock().await,
            last_tick_at: *self.last_tick_at.lock().await,
        }
    }

    /// Runs until `shutdown` is set to `true`. On shutdown, stops pulling
    /// new work but does not interrupt a `run_one` already in flight — the
    /// caller is responsible for awaiting this future within the configured
    /// grace window (§4.6 "Cancellation & timeouts").
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow() {
                return;
            }

            if !self.is_running() {
                tokio::select! {
                    _ = self.notify.notified() => continue,
                    _ = shutdown.changed() => continue,
                }
            }

            let now = Local::now();
            *self.last_tick_at.lock().await = Some(now);

            let due = self.registry.due_candidates(now).await;
            let Some(task_id) = due.into_iter().next() else {
                self.wait_for_next_cycle(now, &mut shutdown).await;
                continue;
            };

            self.run_one(task_id).await;
        }
    }

    async fn wait_for_next_cycle(&self, now: DateTime<Local>, shutdown: &mut watch::Receiver<bool>) {
        let ceiling = now + chrono::Duration::from_std(self.poll_ceiling).unwrap_or_default();
        let wake_at = self
            .registry
            .earliest_wake()
            .await
            .map(|w| w.min(ceiling))
            .unwrap_or(ceiling);
        *self.next_wake_at.lock().await = Some(wake_at);

        let sleep_for = (wake_at - Local::now())
            .to_std()
            .unwrap_or(StdDuration::ZERO);
        tokio::select! {
            _ = tokio::time::sleep(sleep_for) => {}
            _ = self.notify.notified() => {}
            _ = shutdown.changed() => {}
        }
    }

    /// §4.6 steps 4-13 for a single chosen task.
    async fn run_one(&self, task_id: Uuid) {
        let _guard = self.global_lock.acquire().await;

        let Some(claim) = self.registry.claim_for_run(task_id, Local::now()).await else {
            // Status changed between the due-scan and winning the lock
            // (§4.6 step 5); drop the lock and let the next cycle re-evaluate.
            return;
        };

        let broker = CookieBroker::new(self.shared_cookie_path.clone());
        if let Err(e) = broker.populate(&claim.context.workspace_dir) {
            tracing::warn!(%task_id, error = %e, "failed to populate shared cookie file");
        }

        let result = claim.agent.run_once(&claim.context).await;

        if let Err(e) = broker.clear() {
            tracing::warn!(%task_id, error = %e, "failed to clear shared cookie file");
        }

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

        self.persist_snapshot().await;
    }

    /// §4.6 step 13 / §4.8 write policy: persist the whole registry after
    /// every post-run bookkeeping pass.
    pub async fn persist_snapshot(&self) {
        let snapshot = RegistrySnapshot::new(self.registry.export_all().await);
        if let Err(e) = self.snapshot_store.save(&snapshot) {
            tracing::error!(error = %e, "failed to persist registry snapshot");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scheduler_types::{AgentParams, CadenceSpec, ExecutionMode, SocialOperatorParams, TaskType};

    fn sample_params(account_id: &str, interval_seconds: u64) -> crate::registry::CreateTaskParams {
        crate::registry::CreateTaskParams {
            task_type: TaskType::SocialAccountOperator,
            account_id: account_id.into(),
            account_name: "Display Name".into(),
            cadence: CadenceSpec {
                interval_seconds,
                valid_hour_range: None,
                end_date: chrono::NaiveDate::from_ymd_opt(2030, 1, 1).unwrap(),
            },
            mode: ExecutionMode::Standard,
            kwargs: AgentParams::SocialAccountOperator(SocialOperatorParams::default()),
        }
    }

    #[tokio::test]
    async fn run_one_dispatches_due_task_and_reschedules() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Arc::new(Registry::new(dir.path().join("data")));
        let lock = Arc::new(GlobalLock::new());
        let store = Arc::new(SnapshotStore::new(&dir.path().join("data")));
        let dispatcher = Dispatcher::new(
            registry.clone(),
            lock,
            store,
            dir.path().join("cookies.json"),
            StdDuration::from_secs(60),
        );

        let now = Local::now();
        let created = registry.add(sample_params("acct-1", 1), now).await.unwrap();

        // Force the task due right now instead of waiting out its interval.
        registry
            .reorder(created.task_id, -1_000_000, now)
            .await
            .ok();

        dispatcher.run_one(created.task_id).await;

        let after = registry.get(created.task_id).await.unwrap();
        assert_eq!(after.round_num, 1);
        assert!(after.last_execution_time.is_some());
    }

    #[tokio::test]
    async fn status_reports_counts_by_status() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Arc::new(Registry::new(dir.path().join("data")));
        let lock = Arc::new(GlobalLock::new());
        let store = Arc::new(SnapshotStore::new(&dir.path().join("data")));
        let dispatcher = Dispatcher::new(
            registry.clone(),
            lock,
            store,
            dir.path().join("cookies.json"),
            StdDuration::from_secs(60),
        );

        let now = Local::now();
        let created = registry.add(sample_params("acct-1", 3600), now).await.unwrap();
        registry.pause(created.task_id, now).await.unwrap();

        let status = dispatcher.status().await;
        assert_eq!(status.paused_count, 1);
        assert_eq!(status.pending_count, 0);
        assert!(status.is_running);
        assert_eq!(status.running_task_id, None);
    }
}
