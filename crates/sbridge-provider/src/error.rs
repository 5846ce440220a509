use std::time::Duration;

use sbridge_core::Retryable;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provider unavailable: {0}")]
    Unavailable(String),

    #[error("provider returned {status}: {detail}")]
    Api { status: u16, detail: String },

    #[error("unexpected provider response: {0}")]
    InvalidResponse(String),

    #[error("name hook rejected allocation: {0}")]
    NameHook(String),

    #[error("invalid hostname pattern '{0}'")]
    InvalidPattern(String),

    #[error("timed out after {timeout:?} waiting for hostname of {name}")]
    HostnameTimeout { name: String, timeout: Duration },

    #[error("injected chaos failure")]
    ChaosInjected,
}

impl Retryable for ProviderError {
    fn is_transient(&self) -> bool {
        matches!(
            self,
            ProviderError::Unavailable(_) | ProviderError::ChaosInjected
        )
    }
}
