use miette::Diagnostic;
use nix::errno::Errno;
use nix::sys::signal::Signal;
use nix::unistd::Pid;
use std::io;
use std::path::PathBuf;
use thiserror::Error;
use tracing::{error, warn};

use crate::job::JobId;

pub type Result<T, E = JobError> = std::result::Result<T, E>;

#[derive(Debug, Error, Diagnostic)]
pub enum JobError {
    #[error("maximum number of jobs exceeded ({max})")]
    #[diagnostic(help("jobs are only released once all of their processes have been reaped"))]
    TableFull { max: u32 },
    #[error("child process {0} does not belong to any job")]
    UnknownChild(Pid),
    #[error("waiting for child processes failed")]
    Wait(#[source] Errno),
    #[error("{0}")]
    Internal(&'static str),

    #[error("job id missing")]
    MissingJobId,
    #[error("invalid job id '{0}'")]
    InvalidJobId(String),
    #[error("no such job {0}")]
    NoSuchJob(JobId),
    #[error("failed to send {signal:?} to {target}")]
    Signal {
        signal: Signal,
        target: String,
        #[source]
        source: Errno,
    },
    #[error("{}: cannot open", path.display())]
    Redirect {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("{program}: failed to start")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to create pipe")]
    Pipe(#[source] Errno),
    #[error("terminal control failed")]
    Terminal(#[source] Errno),
    #[error("failed to write output")]
    Output(#[source] io::Error),
}

impl JobError {
    /// Fatal errors mean the engine's bookkeeping can no longer be trusted.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            JobError::TableFull { .. }
                | JobError::UnknownChild(_)
                | JobError::Wait(_)
                | JobError::Internal(_)
        )
    }

    /// Print the error for the user, as `jobsh: <error>: <cause>`.
    pub fn report(&self) {
        self.print("jobsh");
    }

    /// Like [`JobError::report`], naming the built-in that failed.
    pub fn report_for(&self, builtin: &str) {
        self.print(&format!("jobsh: {builtin}"));
    }

    fn print(&self, prefix: &str) {
        if self.is_fatal() {
            error!("{}", self);
        } else {
            warn!("{:?}", self);
        }
        match std::error::Error::source(self) {
            Some(source) => eprintln!("{prefix}: {self}: {source}"),
            None => eprintln!("{prefix}: {self}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(JobError::TableFull { max: 4 }.is_fatal());
        assert!(JobError::UnknownChild(Pid::from_raw(7)).is_fatal());
        assert!(JobError::Wait(Errno::EINVAL).is_fatal());
        assert!(!JobError::NoSuchJob(3).is_fatal());
        assert!(!JobError::MissingJobId.is_fatal());
        assert!(
            !JobError::Spawn {
                program: "nope".into(),
                source: io::Error::from(io::ErrorKind::NotFound),
            }
            .is_fatal()
        );
    }

    #[test]
    fn test_display() {
        assert_eq!(JobError::NoSuchJob(3).to_string(), "no such job 3");
        assert_eq!(
            JobError::InvalidJobId("x".into()).to_string(),
            "invalid job id 'x'"
        );
        let err = JobError::Signal {
            signal: Signal::SIGTERM,
            target: "process 42".into(),
            source: Errno::ESRCH,
        };
        assert_eq!(err.to_string(), "failed to send SIGTERM to process 42");
    }
}
