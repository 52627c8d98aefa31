//! The scheduler daemon: a thin process wiring `scheduler_engine::Control`
//! to a config directory, `tracing`, and the OS's signal handling. There is
//! no network transport here — an out-of-scope HTTP façade would sit in
//! front of `Control`, the same way the teacher's `server` crate sits in
//! front of its `agent` fleet.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

mod config;

use config::{load_license_config, load_scheduler_config};
use scheduler_engine::{Control, LicenseGate};

/// Command-line arguments for the scheduler daemon.
#[derive(Parser, Debug)]
#[command(name = "scheduler-daemon")]
#[command(about = "Single-node scheduler for long-running browser-automation operator tasks", long_about = None)]
struct CliArgs {
    /// Directory containing scheduler.toml and license.toml
    #[arg(value_name = "CONFIG_DIR")]
    config_dir: PathBuf,

    /// Override the data root directory from scheduler.toml
    #[arg(long = "data-root", value_name = "DIR")]
    data_root: Option<PathBuf>,

    /// Directory the daily log file is written to
    #[arg(long = "log-dir", value_name = "DIR", default_value = "./logs")]
    log_dir: PathBuf,

    /// Run every currently due task once, then exit instead of starting the
    /// dispatch loop. Useful for operational debugging.
    #[arg(long = "once")]
    once: bool,

    /// Bootstrap the engine and wait for a shutdown signal, but never start
    /// the dispatch loop. `ExecuteNow`-style operations remain available to
    /// whatever calls into `Control` in-process; nothing runs on a timer.
    #[arg(long = "no-dispatch")]
    no_dispatch: bool,
}

fn init_tracing(log_dir: &PathBuf) {
    let file_appender = tracing_appender::rolling::daily(log_dir, "scheduler-daemon.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    // Leaking the guard is deliberate: it must live for the process lifetime
    // so the background writer thread keeps flushing.
    Box::leak(Box::new(guard));

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("scheduler_daemon=info,scheduler_engine=info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .json()
        .with_current_span(false)
        .with_span_list(false)
        .with_writer(non_blocking)
        .init();
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");

        tokio::select! {
            _ = sigterm.recv() => info!("received SIGTERM"),
            _ = sigint.recv() => info!("received SIGINT"),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
        info!("received Ctrl+C");
    }
}

/// Run every currently due task to completion, one at a time, then return.
/// Used by `--once` for a single debugging pass instead of the open-ended
/// dispatch loop.
async fn run_once_pass(control: &Control) -> Result<usize> {
    let mut ran = 0usize;
    loop {
        let due = control.registry().due_candidates(chrono::Local::now()).await;
        let Some(task_id) = due.into_iter().next() else {
            break;
        };
        match control.execute_now(task_id).await {
            Ok(outcome) => {
                info!(%task_id, succeeded = outcome.succeeded, duration_ms = outcome.duration_ms, "ran due task");
                ran += 1;
            }
            Err(e) => {
                warn!(%task_id, error = %e, "failed to run due task in --once pass");
                break;
            }
        }
    }
    Ok(ran)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();
    init_tracing(&cli_args.log_dir);

    info!("scheduler daemon starting up");
    info!(config_dir = %cli_args.config_dir.display(), "reading configuration");

    let mut scheduler_config = load_scheduler_config(&cli_args.config_dir)
        .await
        .context("failed to load scheduler.toml")?;
    if let Some(data_root) = cli_args.data_root.clone() {
        info!(data_root = %data_root.display(), "data root override provided via command line");
        scheduler_config.data_root = data_root;
    }

    let license_config = load_license_config(&cli_args.config_dir)
        .await
        .context("failed to load license.toml")?;
    info!(
        activated = license_config.activated,
        task_num = license_config.task_num,
        "license configuration loaded"
    );

    let control = Control::bootstrap(
        scheduler_config.data_root.clone(),
        LicenseGate::new(license_config),
        scheduler_config.shared_cookie_path(),
        scheduler_config.poll_ceiling(),
        scheduler_config.execute_now_timeout(),
    )
    .await;

    if cli_args.once {
        let ran = run_once_pass(&control).await?;
        info!(tasks_run = ran, "completed --once pass, exiting");
        return Ok(());
    }

    if cli_args.no_dispatch {
        info!("--no-dispatch set, dispatch loop will not run");
        control.stop_dispatcher();
        shutdown_signal().await;
        info!("shutdown signal received");
        info!("scheduler daemon shutdown complete");
        return Ok(());
    }

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let dispatch_future = control.dispatcher().run(shutdown_rx);
    tokio::pin!(dispatch_future);

    tokio::select! {
        _ = &mut dispatch_future => {
            warn!("dispatch loop exited on its own");
        }
        _ = shutdown_signal() => {
            info!("shutdown signal received, stopping dispatch loop");
        }
    }

    let _ = shutdown_tx.send(true);
    control.stop_dispatcher();

    let grace = scheduler_config.shutdown_grace();
    match tokio::time::timeout(grace, &mut dispatch_future).await {
        Ok(()) => info!("dispatch loop stopped cleanly"),
        Err(_) => warn!(
            grace_seconds = scheduler_config.shutdown_grace_seconds,
            "dispatch loop did not stop within the shutdown grace window, exiting anyway"
        ),
    }

    info!("scheduler daemon shutdown complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use scheduler_types::{
        AgentParams, CadenceSpec, ExecutionMode, LicenseConfig, SocialOperatorParams, TaskType,
    };

    #[test]
    fn cli_args_parse_config_dir_and_flags() {
        let args = CliArgs::try_parse_from([
            "scheduler-daemon",
            "/tmp/config",
            "--once",
            "--data-root",
            "/tmp/data",
        ])
        .unwrap();
        assert_eq!(args.config_dir, PathBuf::from("/tmp/config"));
        assert_eq!(args.data_root, Some(PathBuf::from("/tmp/data")));
        assert!(args.once);
        assert!(!args.no_dispatch);
    }

    #[tokio::test]
    async fn once_pass_runs_every_due_task_and_then_stops() {
        let dir = tempfile::tempdir().unwrap();
        let control = Control::bootstrap(
            dir.path().to_path_buf(),
            LicenseGate::new(LicenseConfig {
                activated: true,
                task_num: 5,
                end_time: None,
            }),
            dir.path().join("cookies.json"),
            std::time::Duration::from_secs(60),
            std::time::Duration::from_millis(200),
        )
        .await;

        let cadence = CadenceSpec {
            interval_seconds: 900,
            valid_hour_range: None,
            end_date: chrono::NaiveDate::from_ymd_opt(2030, 1, 1).unwrap(),
        };
        let created = control
            .create_task(
                TaskType::SocialAccountOperator,
                "acct-1".into(),
                "Acct One".into(),
                cadence,
                ExecutionMode::Standard,
                AgentParams::SocialAccountOperator(SocialOperatorParams::default()),
            )
            .await
            .unwrap();
        control
            .reorder_task(created.task_id, -10_000_000)
            .await
            .unwrap();

        let ran = run_once_pass(&control).await.unwrap();
        assert_eq!(ran, 1);

        let after = control.get_task(created.task_id).await.unwrap();
        assert_eq!(after.round_num, 1);

        // Nothing else is due immediately afterwards.
        assert_eq!(run_once_pass(&control).await.unwrap(), 0);
    }
}
