//! The Agent Collaborator Contract (§4.10, C10).
//!
//! The scheduler never looks inside the agent: browser driving, LLM content
//! generation, and MCP tool calls are out of scope (§1). This module defines
//! only the boundary — the trait the dispatcher calls through, the factory
//! that reconstructs an agent handle from its opaque `kwargs` on snapshot
//! load, and the shared-cookie-file hooks that must run inside the Global
//! Lock around `RunOnce`.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use scheduler_types::{
    AgentParams, BeginLoginOutcome, ExecutionMode, LoginStatus, SchedulerError, TaskIdentity,
};

/// Cadence/mode snapshot handed to `RunOnce`, current as of dispatch time
/// (§4.6 step 7: "a context carrying the up-to-date cadence/mode snapshot").
#[derive(Debug, Clone)]
pub struct RunContext {
    pub task_id: uuid::Uuid,
    pub account_id: String,
    pub mode: ExecutionMode,
    pub round_num: u64,
    pub workspace_dir: PathBuf,
}

/// The opaque external collaborator (§4.10).
#[async_trait]
pub trait AgentCollaborator: Send + Sync {
    /// One iteration of the operator workflow. `Ok(true)` signals the task
    /// may be scheduled again from the agent's perspective; the scheduler
    /// still checks the end date independently. `Err` is caught by the
    /// dispatcher and converted to `status = error`.
    async fn run_once(&self, ctx: &RunContext) -> Result<bool, SchedulerError>;

    async fn login_status(&self) -> LoginStatus;

    async fn begin_login(&self) -> Result<BeginLoginOutcome, SchedulerError>;

    async fn confirm_login(&self) -> Result<LoginStatus, SchedulerError>;
}

/// Rebuilds an `AgentCollaborator` handle from its identity, opaque
/// `kwargs`, and task workspace directory (§4.8 load policy: "instantiate
/// the Agent handle from `kwargs + sys_type`"). Only one task type exists
/// today, so there is only one arm; a second task type adds a second arm
/// here and a second `AgentParams` variant, nothing else.
pub fn reconstruct_agent(
    identity: &TaskIdentity,
    kwargs: &AgentParams,
    workspace_dir: PathBuf,
) -> Result<Box<dyn AgentCollaborator>, SchedulerError> {
    match kwargs {
        AgentParams::SocialAccountOperator(params) => Ok(Box::new(SocialOperatorAgent {
            account_id: identity.account_id.clone(),
            params: params.clone(),
            workspace_dir,
        })),
    }
}

/// Demo `social-account-operator` collaborator. The real product drives a
/// browser, calls an LLM, and talks to social-platform MCP tools; all of
/// that is out of scope (§1). This stand-in mirrors the teacher's own
/// placeholder task body (`agent/src/scheduler.rs`'s documented "currently a
/// placeholder `tokio::time::sleep` is used") — it sleeps briefly, touches
/// its workspace directory, and reports success.
pub struct SocialOperatorAgent {
    account_id: String,
    params: scheduler_types::SocialOperatorParams,
    workspace_dir: PathBuf,
}

#[async_trait]
impl AgentCollaborator for SocialOperatorAgent {
    async fn run_once(&self, ctx: &RunContext) -> Result<bool, SchedulerError> {
        tracing::debug!(
            account_id = %self.account_id,
            round_num = ctx.round_num,
            topic = ?self.params.topic,
            "running operator round"
        );
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        Ok(true)
    }

    async fn login_status(&self) -> LoginStatus {
        if self.workspace_dir.join("credentials").join("cookies.json").exists() {
            LoginStatus::LoggedIn
        } else {
            LoginStatus::NotLoggedIn
        }
    }

    async fn begin_login(&self) -> Result<BeginLoginOutcome, SchedulerError> {
        if matches!(self.login_status().await, LoginStatus::LoggedIn) {
            return Ok(BeginLoginOutcome::AlreadyLoggedIn);
        }
        Ok(BeginLoginOutcome::QrCode {
            payload: format!("qr:{}", self.account_id).into_bytes(),
        })
    }

    async fn confirm_login(&self) -> Result<LoginStatus, SchedulerError> {
        Ok(self.login_status().await)
    }
}

/// Manages the single shared `cookies.json` the browser backend reads.
/// Populated from the task's own credentials directory before `RunOnce`,
/// deleted after it returns — both while the Global Lock is held (§4.10
/// "Credentials hook", §5 "Shared resources").
pub struct CookieBroker {
    shared_cookie_path: PathBuf,
}

impl CookieBroker {
    pub fn new(shared_cookie_path: PathBuf) -> Self {
        Self { shared_cookie_path }
    }

    /// Copy the task's cookie file into the shared location, if it has one.
    pub fn populate(&self, task_workspace_dir: &Path) -> std::io::Result<()> {
        let source = task_workspace_dir.join("credentials").join("cookies.json");
        if !source.exists() {
            return Ok(());
        }
        if let Some(parent) = self.shared_cookie_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::copy(&source, &self.shared_cookie_path)?;
        Ok(())
    }

    /// Remove the shared cookie file, ignoring a missing file.
    pub fn clear(&self) -> std::io::Result<()> {
        match std::fs::remove_file(&self.shared_cookie_path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn demo_agent_reports_success() {
        let dir = tempfile::tempdir().unwrap();
        let agent = SocialOperatorAgent {
            account_id: "acct-1".into(),
            params: scheduler_types::SocialOperatorParams::default(),
            workspace_dir: dir.path().to_path_buf(),
        };
        let ctx = RunContext {
            task_id: uuid::Uuid::new_v4(),
            account_id: "acct-1".into(),
            mode: ExecutionMode::Standard,
            round_num: 1,
            workspace_dir: dir.path().to_path_buf(),
        };
        assert!(agent.run_once(&ctx).await.unwrap());
    }

    #[tokio::test]
    async fn login_status_reflects_cookie_presence() {
        let dir = tempfile::tempdir().unwrap();
        let agent = SocialOperatorAgent {
            account_id: "acct-1".into(),
            params: scheduler_types::SocialOperatorParams::default(),
            workspace_dir: dir.path().to_path_buf(),
        };
        assert_eq!(agent.login_status().await, LoginStatus::NotLoggedIn);

        let creds_dir = dir.path().join("credentials");
        std::fs::create_dir_all(&creds_dir).unwrap();
        std::fs::write(creds_dir.join("cookies.json"), "{}").unwrap();
        assert_eq!(agent.login_status().await, LoginStatus::LoggedIn);
    }

    #[test]
    fn cookie_broker_populates_and_clears() {
        let task_dir = tempfile::tempdir().unwrap();
        let creds_dir = task_dir.path().join("credentials");
        std::fs::create_dir_all(&creds_dir).unwrap();
        std::fs::write(creds_dir.join("cookies.json"), "{\"a\":1}").unwrap();

        let shared_dir = tempfile::tempdir().unwrap();
        let shared_path = shared_dir.path().join("cookies.json");
        let broker = CookieBroker::new(shared_path.clone());

        broker.populate(task_dir.path()).unwrap();
        assert!(shared_path.exists());

        broker.clear().unwrap();
        assert!(!shared_path.exists());
    }

    #[test]
    fn cookie_broker_clear_is_idempotent() {
        let shared_path = tempfile::tempdir().unwrap().path().join("cookies.json");
        let broker = CookieBroker::new(shared_path);
        broker.clear().unwrap();
        broker.clear().unwrap();
    }
}
