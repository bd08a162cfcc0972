//! Process Supervisor.
//!
//! # Responsibilities
//! - Decide whether this process supervises, serves as a worker, or serves alone
//! - Start one worker process per slot, each binding the shared port
//! - Restart a worker after a short delay whenever it exits
//! - Stop restarting and terminate workers on shutdown
//!
//! # Design Decisions
//! - Workers are re-executions of the current binary with the same arguments;
//!   the slot number travels in `RELAY_WORKER_ID`
//! - The supervisor never serves traffic itself
//! - Children are killed when their handle drops, so a dying supervisor takes
//!   its workers with it

use std::ffi::OsString;
use std::path::PathBuf;
use std::process::ExitStatus;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::process::{Child, Command};
use tokio::sync::broadcast;

use crate::config::SupervisorConfig;
use crate::observability::metrics;

/// Environment variable carrying a worker's slot number.
pub const WORKER_ENV: &str = "RELAY_WORKER_ID";

#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error("cannot locate the current executable: {0}")]
    CurrentExe(#[source] std::io::Error),

    #[error("worker slot task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Slot number of this process when it runs as a supervised worker.
pub fn worker_id_from_env() -> Option<usize> {
    worker_id_from(|key| std::env::var(key).ok())
}

pub fn worker_id_from<F>(env: F) -> Option<usize>
where
    F: Fn(&str) -> Option<String>,
{
    env(WORKER_ENV).and_then(|v| v.trim().parse().ok())
}

/// Whether this process should fan out into workers.
pub fn should_supervise(config: &SupervisorConfig, externally_managed: bool, is_worker: bool) -> bool {
    config.enabled && !externally_managed && !is_worker && config.worker_count() > 1
}

/// Supervises a fixed number of worker processes.
pub struct Supervisor {
    program: PathBuf,
    args: Vec<OsString>,
    workers: usize,
    restart_delay: Duration,
    restarts: Arc<AtomicU64>,
}

impl Supervisor {
    /// Supervise re-executions of the running binary with its own arguments.
    pub fn new(config: &SupervisorConfig) -> Result<Self, SupervisorError> {
        let program = std::env::current_exe().map_err(SupervisorError::CurrentExe)?;
        let args = std::env::args_os().skip(1).collect();
        Ok(Self::with_command(
            program,
            args,
            config.worker_count(),
            Duration::from_millis(config.restart_delay_ms),
        ))
    }

    pub fn with_command(program: PathBuf, args: Vec<OsString>, workers: usize, restart_delay: Duration) -> Self {
        Self {
            program,
            args,
            workers,
            restart_delay,
            restarts: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Total restarts across all slots so far.
    pub fn restarts(&self) -> Arc<AtomicU64> {
        self.restarts.clone()
    }

    /// Keep every slot populated until `shutdown` fires.
    pub async fn run(self, shutdown: broadcast::Receiver<()>) -> Result<(), SupervisorError> {
        tracing::info!(
            workers = self.workers,
            program = %self.program.display(),
            "Supervisor starting"
        );

        let mut slots = Vec::with_capacity(self.workers);
        for id in 0..self.workers {
            let slot = Slot {
                id,
                program: self.program.clone(),
                args: self.args.clone(),
                restart_delay: self.restart_delay,
                restarts: self.restarts.clone(),
            };
            slots.push(tokio::spawn(slot.run(shutdown.resubscribe())));
        }

        for slot in slots {
            slot.await?;
        }

        tracing::info!("Supervisor stopped");
        Ok(())
    }
}

struct Slot {
    id: usize,
    program: PathBuf,
    args: Vec<OsString>,
    restart_delay: Duration,
    restarts: Arc<AtomicU64>,
}

impl Slot {
    async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        loop {
            match self.spawn() {
                Ok(mut child) => {
                    tracing::info!(worker = self.id, pid = ?child.id(), "Worker online");
                    tokio::select! {
                        status = child.wait() => self.exited(status),
                        _ = shutdown.recv() => {
                            stop(self.id, &mut child).await;
                            return;
                        }
                    }
                }
                Err(e) => {
                    tracing::error!(worker = self.id, error = %e, "Failed to spawn worker");
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.restart_delay) => {}
                _ = shutdown.recv() => return,
            }
            self.restarts.fetch_add(1, Ordering::Relaxed);
            metrics::record_worker_restart(self.id);
            tracing::info!(worker = self.id, "Restarting worker");
        }
    }

    fn spawn(&self) -> std::io::Result<Child> {
        Command::new(&self.program)
            .args(&self.args)
            .env(WORKER_ENV, self.id.to_string())
            .kill_on_drop(true)
            .spawn()
    }

    fn exited(&self, status: std::io::Result<ExitStatus>) {
        match status {
            Ok(status) => tracing::warn!(worker = self.id, status = %status, "Worker exited"),
            Err(e) => tracing::warn!(worker = self.id, error = %e, "Lost track of worker"),
        }
    }
}

async fn stop(id: usize, child: &mut Child) {
    if let Err(e) = child.start_kill() {
        tracing::debug!(worker = id, error = %e, "Worker already gone");
    }
    let _ = child.wait().await;
    tracing::info!(worker = id, "Worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_worker_id_from_env() {
        let env: HashMap<&str, &str> = [(WORKER_ENV, "3")].into();
        assert_eq!(worker_id_from(|k| env.get(k).map(|v| v.to_string())), Some(3));
        assert_eq!(worker_id_from(|_| None), None);
        assert_eq!(worker_id_from(|_| Some("x".into())), None);
    }

    #[test]
    fn test_should_supervise() {
        let config = SupervisorConfig {
            enabled: true,
            workers: Some(4),
            restart_delay_ms: 500,
        };
        assert!(should_supervise(&config, false, false));
        assert!(!should_supervise(&config, true, false));
        assert!(!should_supervise(&config, false, true));

        let single = SupervisorConfig {
            workers: Some(1),
            ..config.clone()
        };
        assert!(!should_supervise(&single, false, false));

        let disabled = SupervisorConfig {
            enabled: false,
            ..config
        };
        assert!(!should_supervise(&disabled, false, false));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_crashed_workers_are_restarted_until_shutdown() {
        let supervisor = Supervisor::with_command(
            PathBuf::from("sh"),
            vec!["-c".into(), "exit 1".into()],
            2,
            Duration::from_millis(20),
        );
        let restarts = supervisor.restarts();
        let (tx, rx) = broadcast::channel(1);
        let handle = tokio::spawn(supervisor.run(rx));

        tokio::time::sleep(Duration::from_millis(400)).await;
        tx.send(()).unwrap();
        handle.await.unwrap().unwrap();

        assert!(restarts.load(Ordering::Relaxed) >= 2);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_shutdown_stops_running_workers() {
        let supervisor = Supervisor::with_command(
            PathBuf::from("sleep"),
            vec!["30".into()],
            1,
            Duration::from_millis(20),
        );
        let restarts = supervisor.restarts();
        let (tx, rx) = broadcast::channel(1);
        let handle = tokio::spawn(supervisor.run(rx));

        tokio::time::sleep(Duration::from_millis(100)).await;
        tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("supervisor stops promptly")
            .unwrap()
            .unwrap();
        assert_eq!(restarts.load(Ordering::Relaxed), 0);
    }
}
