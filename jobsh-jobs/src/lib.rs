//! Job control for jobsh.
//!
//! [`Dispatcher`] is the entry point: it takes parsed lines, runs built-ins
//! against the [`JobTable`] and hands external pipelines to the
//! [`launcher`]. Child status changes, whether waited for directly or
//! picked up by the [`ChildWatcher`], are all applied by
//! [`status::reconcile`].

pub mod dispatcher;
pub mod error;
pub mod job;
pub mod launcher;
pub mod notify;
pub mod spawn;
pub mod status;
pub mod table;
pub mod terminal;

pub use dispatcher::{Builtin, Dispatcher, Flow};
pub use error::{JobError, Result};
pub use job::{Job, JobId, JobStatus, ProcessRecord, ProcessState};
pub use launcher::LaunchOutcome;
pub use notify::{ChildWatcher, Suppressed};
pub use status::{Notice, TerminationCause};
pub use table::JobTable;
pub use terminal::{Terminal, TerminalControl, TtySnapshot};

/// Tests that reap with `waitpid(-1)` share the process's children.
#[cfg(test)]
pub(crate) static WAIT_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());
