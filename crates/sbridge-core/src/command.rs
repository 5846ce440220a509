use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::chaos::ChaosPolicy;
use crate::error::ExecError;

pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub status: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == 0
    }
}

/// Subprocess seam. Production uses [`SystemRunner`]; tests inject fakes
/// that answer from canned tables.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(
        &self,
        program: &str,
        args: &[String],
        timeout: Duration,
    ) -> Result<CommandOutput, ExecError>;

    /// Run and require a zero exit status, returning stdout.
    async fn check_output(
        &self,
        program: &str,
        args: &[String],
        timeout: Duration,
    ) -> Result<String, ExecError> {
        let output = self.run(program, args, timeout).await?;
        if output.success() {
            Ok(output.stdout)
        } else {
            Err(ExecError::CommandFailed {
                program: program.to_string(),
                status: output.status,
                stderr: output.stderr,
            })
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct SystemRunner;

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(
        &self,
        program: &str,
        args: &[String],
        timeout: Duration,
    ) -> Result<CommandOutput, ExecError> {
        debug!(program, args = ?args, "running command");
        let child = tokio::process::Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(timeout, child)
            .await
            .map_err(|_| ExecError::Timeout {
                program: program.to_string(),
                timeout,
            })?
            .map_err(|e| ExecError::Spawn {
                program: program.to_string(),
                source: e,
            })?;

        Ok(CommandOutput {
            status: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Wraps another runner and injects failures per the configured
/// [`ChaosPolicy`]. This is the only place command chaos is applied.
pub struct ChaosRunner<R> {
    inner: R,
    chaos: ChaosPolicy,
}

impl<R> ChaosRunner<R> {
    pub fn new(inner: R, chaos: ChaosPolicy) -> Self {
        Self { inner, chaos }
    }
}

#[async_trait]
impl<R: CommandRunner> CommandRunner for ChaosRunner<R> {
    async fn run(
        &self,
        program: &str,
        args: &[String],
        timeout: Duration,
    ) -> Result<CommandOutput, ExecError> {
        if self.chaos.should_trip() {
            return Err(ExecError::ChaosInjected);
        }
        self.inner.run(program, args, timeout).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn system_runner_captures_stdout() {
        let runner = SystemRunner;
        let output = runner
            .run("echo", &["hello".to_string()], DEFAULT_COMMAND_TIMEOUT)
            .await
            .unwrap();
        assert!(output.success());
        assert_eq!(output.stdout.trim(), "hello");
    }

    #[tokio::test]
    async fn check_output_fails_on_nonzero_status() {
        let runner = SystemRunner;
        let err = runner
            .check_output("false", &[], DEFAULT_COMMAND_TIMEOUT)
            .await
            .unwrap_err();
        assert!(matches!(err, ExecError::CommandFailed { status: 1, .. }));
    }

    #[tokio::test]
    async fn chaos_runner_always_fails_at_full_probability() {
        let runner = ChaosRunner::new(SystemRunner, ChaosPolicy::new(1.0));
        let err = runner
            .run("echo", &[], DEFAULT_COMMAND_TIMEOUT)
            .await
            .unwrap_err();
        assert!(matches!(err, ExecError::ChaosInjected));
    }
}
