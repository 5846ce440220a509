use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sbridge_core::{CommandOutput, CommandRunner, DEFAULT_COMMAND_TIMEOUT};
use tracing::debug;

use crate::error::SchedError;

/// Options for running a command on cluster nodes through `srun`.
#[derive(Debug, Clone)]
pub struct SrunOptions {
    pub partition: Option<String>,
    pub gpus: Option<u32>,
    /// `--time` in minutes; must be at least 1.
    pub timeout_minutes: u64,
    /// Wrap the command in `bash -c` so pipelines work.
    pub shell: bool,
}

impl Default for SrunOptions {
    fn default() -> Self {
        Self {
            partition: None,
            gpus: None,
            timeout_minutes: 2,
            shell: false,
        }
    }
}

/// Low-level seam over the scheduler binaries. Production uses
/// [`NativeSlurm`]; tests use [`crate::mock::MockSlurm`].
#[async_trait]
pub trait SlurmCli: Send + Sync {
    async fn scontrol(&self, args: &[String]) -> Result<String, SchedError>;

    async fn sinfo(&self, args: &[String]) -> Result<String, SchedError>;

    async fn srun(
        &self,
        hosts: &[String],
        command: &str,
        opts: &SrunOptions,
    ) -> Result<CommandOutput, SchedError>;
}

pub struct NativeSlurm {
    runner: Arc<dyn CommandRunner>,
    timeout: Duration,
}

impl NativeSlurm {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner, timeout: DEFAULT_COMMAND_TIMEOUT }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl SlurmCli for NativeSlurm {
    async fn scontrol(&self, args: &[String]) -> Result<String, SchedError> {
        debug_assert!(args.first().map(String::as_str) != Some("scontrol"));
        let stdout = self.runner.check_output("scontrol", args, self.timeout).await?;
        Ok(stdout.trim().to_string())
    }

    async fn sinfo(&self, args: &[String]) -> Result<String, SchedError> {
        let stdout = self.runner.check_output("sinfo", args, self.timeout).await?;
        Ok(stdout.trim_end().to_string())
    }

    async fn srun(
        &self,
        hosts: &[String],
        command: &str,
        opts: &SrunOptions,
    ) -> Result<CommandOutput, SchedError> {
        assert!(opts.timeout_minutes >= 1);
        assert!(!hosts.is_empty());

        let mut args: Vec<String> = Vec::new();
        if let Some(partition) = &opts.partition {
            args.push("-p".into());
            args.push(partition.clone());
        }
        args.push("-w".into());
        args.push(hosts.join(","));
        if let Some(gpus) = opts.gpus {
            args.push(format!("--gpus={}", gpus));
        }
        // Deadline one minute past the srun timeout so the job's own
        // timeout fires first.
        args.push(format!("--deadline=now+{}minutes", opts.timeout_minutes + 1));
        args.push(format!("--time={}", opts.timeout_minutes));
        if opts.shell {
            args.push("bash".into());
            args.push("-c".into());
            args.push(command.to_string());
        } else {
            args.extend(command.split_whitespace().map(String::from));
        }

        debug!(hosts = %hosts.join(","), command, "srun");
        // Subprocess timeout covers scheduling delay on top of --time.
        let wall = Duration::from_secs(opts.timeout_minutes * 60 + 180);
        Ok(self.runner.run("srun", &args, wall).await?)
    }
}
