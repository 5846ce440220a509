//! Execution substrate shared by every component: an injectable clock,
//! an injectable subprocess runner, retry with quadratic backoff, and the
//! chaos-mode fault hook used to exercise the retry paths in tests.

mod chaos;
mod clock;
mod command;
mod error;
mod retry;

pub use chaos::ChaosPolicy;
pub use clock::{Clock, ManualClock, SystemClock};
pub use command::{ChaosRunner, CommandOutput, CommandRunner, SystemRunner, DEFAULT_COMMAND_TIMEOUT};
pub use error::ExecError;
pub use retry::{retry, Retryable, DEFAULT_ATTEMPTS};
