//! Resume/suspend dispatcher: translates scheduler-supplied node lists
//! into allocation, boot, and address-assignment actions against the
//! provider, tolerating partial failures per node.

mod dispatcher;
mod error;
mod wait;

pub use dispatcher::{Dispatcher, ResumeOptions, ResumeSummary};
pub use error::DispatchError;
