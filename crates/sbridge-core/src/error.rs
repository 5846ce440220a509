use std::time::Duration;

use thiserror::Error;

use crate::retry::Retryable;

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} exited with status {status}: {stderr}")]
    CommandFailed {
        program: String,
        status: i32,
        stderr: String,
    },

    #[error("{program} timed out after {timeout:?}")]
    Timeout { program: String, timeout: Duration },

    #[error("injected chaos failure")]
    ChaosInjected,
}

impl Retryable for ExecError {
    // A clean non-zero exit will fail identically on retry; only
    // environmental failures are worth repeating.
    fn is_transient(&self) -> bool {
        match self {
            ExecError::CommandFailed { .. } => false,
            ExecError::Spawn { .. } | ExecError::Timeout { .. } | ExecError::ChaosInjected => {
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_failures_are_permanent() {
        let err = ExecError::CommandFailed {
            program: "scontrol".into(),
            status: 1,
            stderr: "Invalid node name specified".into(),
        };
        assert!(!err.is_transient());
    }

    #[test]
    fn environmental_failures_are_transient() {
        let spawn = ExecError::Spawn {
            program: "scontrol".into(),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        };
        let timeout = ExecError::Timeout {
            program: "sinfo".into(),
            timeout: Duration::from_secs(300),
        };
        assert!(spawn.is_transient());
        assert!(timeout.is_transient());
        assert!(ExecError::ChaosInjected.is_transient());
    }
}
