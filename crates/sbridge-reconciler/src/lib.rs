//! Node lifecycle reconciler: a long-running loop that diffs the
//! scheduler's node table against the provider's inventory and issues
//! the minimum corrective updates, plus the keep-alive snapshot
//! serializer it maintains on every pass.

mod daemon;
mod error;
mod keepalive;
mod reconcile;
mod view;

pub use daemon::Daemon;
pub use error::ReconcileError;
pub use keepalive::KeepAliveFile;
pub use reconcile::{PassSummary, Reconciler};
