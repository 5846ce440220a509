use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{error, info, warn};

use crate::error::ReconcileError;
use crate::reconcile::Reconciler;

/// Exclusive-process guard. Holds the PID file for the lifetime of the
/// daemon; a stale file from a dead process is replaced.
#[derive(Debug)]
struct PidLock {
    path: PathBuf,
}

impl PidLock {
    fn acquire(path: &Path) -> Result<Self, ReconcileError> {
        if let Ok(content) = std::fs::read_to_string(path) {
            if let Ok(pid) = content.trim().parse::<u32>() {
                if pid != std::process::id() && Path::new(&format!("/proc/{}", pid)).exists() {
                    return Err(ReconcileError::LockHeld { pid });
                }
                warn!(pid, path = %path.display(), "replacing stale lock file");
            }
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ReconcileError::Io {
                path: parent.display().to_string(),
                source: e,
            })?;
        }
        std::fs::write(path, std::process::id().to_string()).map_err(|e| {
            ReconcileError::Io { path: path.display().to_string(), source: e }
        })?;
        Ok(Self { path: path.to_path_buf() })
    }
}

impl Drop for PidLock {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

/// Runs the reconciler forever, one pass every `interval`, serialized
/// across processes by the PID lock file. Per-pass errors are logged
/// and the loop continues; only SIGINT ends it.
pub struct Daemon {
    interval: Duration,
    pid_path: PathBuf,
}

impl Daemon {
    pub fn new(interval: Duration, pid_path: impl Into<PathBuf>) -> Self {
        Self { interval, pid_path: pid_path.into() }
    }

    /// Returns `true` when the loop ended on SIGINT.
    pub async fn run(&self, reconciler: &mut Reconciler) -> Result<bool, ReconcileError> {
        let _lock = PidLock::acquire(&self.pid_path)?;
        info!(pid = std::process::id(), "reconciler daemon running");

        loop {
            if let Err(e) = reconciler.run_once().await {
                error!(error = %e, "reconciliation pass failed");
            }
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("interrupted, shutting down");
                    return Ok(true);
                }
                _ = tokio::time::sleep(self.interval) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_is_exclusive_against_a_live_pid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sbridge.pid");
        // PID 1 is always alive on Linux.
        std::fs::write(&path, "1").unwrap();
        let err = PidLock::acquire(&path).unwrap_err();
        assert!(matches!(err, ReconcileError::LockHeld { pid: 1 }));
    }

    #[test]
    fn stale_lock_is_replaced_and_released_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sbridge.pid");
        std::fs::write(&path, "999999999").unwrap();

        let lock = PidLock::acquire(&path).unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, std::process::id().to_string());

        drop(lock);
        assert!(!path.exists());
    }
}
