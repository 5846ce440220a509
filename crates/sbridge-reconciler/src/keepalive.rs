use std::collections::HashSet;
use std::path::PathBuf;

use sbridge_sched::SlurmClient;
use tracing::info;

use crate::error::ReconcileError;

const MANAGED_HEADER: &str = "# Managed by sbridged";

/// Persists the scheduler's `SuspendExcNodes` list across reconfigures.
///
/// The scheduler does not reliably carry in-memory updates of this list
/// through a reconfigure, so the current value is read back every pass
/// and mirrored to a managed two-line file, written only when it
/// actually changed (tmp-then-rename, never a partial file).
pub struct KeepAliveFile {
    path: PathBuf,
    last_raw: String,
    parsed: HashSet<String>,
}

impl KeepAliveFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            last_raw: String::new(),
            parsed: HashSet::new(),
        }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    /// Read the scheduler's current value, rewrite the snapshot if it
    /// differs from the last one seen, and return the parsed name set.
    pub async fn refresh(
        &mut self,
        slurm: &SlurmClient,
    ) -> Result<HashSet<String>, ReconcileError> {
        let config = slurm.show_config().await?;
        for line in config.lines() {
            if !line.starts_with("SuspendExcNodes") {
                continue;
            }
            let raw_line = if line.contains("(null)") {
                "# SuspendExcNodes =".to_string()
            } else {
                line.to_string()
            };
            if raw_line == self.last_raw {
                continue;
            }

            info!(path = %self.path.display(), "keep-alive: updating snapshot");
            info!(old = %self.last_raw, new = %raw_line, "keep-alive");
            self.write_snapshot(&raw_line)?;

            let value = raw_line.split('=').nth(1).unwrap_or("").trim();
            let parsed = if value.is_empty() {
                HashSet::new()
            } else {
                slurm.from_hostlist(value).await?.into_iter().collect()
            };
            self.last_raw = raw_line;
            self.parsed = parsed;
        }
        Ok(self.parsed.clone())
    }

    fn write_snapshot(&self, raw_line: &str) -> Result<(), ReconcileError> {
        let tmp = self.path.with_extension("tmp");
        let content = format!("{}\n{}", MANAGED_HEADER, raw_line);
        std::fs::write(&tmp, content).map_err(|e| ReconcileError::Io {
            path: tmp.display().to_string(),
            source: e,
        })?;
        std::fs::rename(&tmp, &self.path).map_err(|e| ReconcileError::Io {
            path: self.path.display().to_string(),
            source: e,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use sbridge_core::ManualClock;
    use sbridge_sched::mock::MockSlurm;

    use super::*;

    fn client(mock: Arc<MockSlurm>) -> SlurmClient {
        SlurmClient::new(mock, Arc::new(ManualClock::default()))
    }

    #[tokio::test]
    async fn snapshot_follows_the_scheduler_value() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keep_alive.conf");
        let mock = Arc::new(MockSlurm::new());
        mock.set_suspend_exc("hpc-1,hpc-2");
        let slurm = client(mock.clone());

        let mut file = KeepAliveFile::new(&path);
        let parsed = file.refresh(&slurm).await.unwrap();
        assert_eq!(parsed.len(), 2);
        assert!(parsed.contains("hpc-1"));

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.starts_with("# Managed by sbridged\n"));
        assert!(content.contains("SuspendExcNodes"));
        assert!(content.contains("hpc-1,hpc-2"));
    }

    #[tokio::test]
    async fn unchanged_value_leaves_the_file_byte_identical() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keep_alive.conf");
        let mock = Arc::new(MockSlurm::new());
        mock.set_suspend_exc("hpc-1");
        let slurm = client(mock.clone());

        let mut file = KeepAliveFile::new(&path);
        file.refresh(&slurm).await.unwrap();
        let first = std::fs::read(&path).unwrap();
        let first_mtime = std::fs::metadata(&path).unwrap().modified().unwrap();

        file.refresh(&slurm).await.unwrap();
        let second = std::fs::read(&path).unwrap();
        let second_mtime = std::fs::metadata(&path).unwrap().modified().unwrap();

        assert_eq!(first, second);
        assert_eq!(first_mtime, second_mtime, "no rewrite on unchanged input");
    }

    #[tokio::test]
    async fn null_value_parses_to_an_empty_set() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keep_alive.conf");
        let mock = Arc::new(MockSlurm::new());
        let slurm = client(mock.clone());

        let mut file = KeepAliveFile::new(&path);
        let parsed = file.refresh(&slurm).await.unwrap();
        assert!(parsed.is_empty());

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, "# Managed by sbridged\n# SuspendExcNodes =");
    }
}
