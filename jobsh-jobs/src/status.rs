//! Applies child status changes reported by `waitpid` to the job table.
//!
//! Both the blocking wait for a foreground job and the asynchronous
//! notification path funnel every [`WaitStatus`] through [`reconcile`], so
//! there is exactly one place where jobs move between states and where
//! processes are counted as gone.

use nix::errno::Errno;
use nix::sys::signal::Signal;
use nix::sys::wait::{self, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;
use std::fmt;
use tracing::{debug, trace, warn};

use crate::error::{JobError, Result};
use crate::job::{JobId, JobStatus, ProcessState, listing_line};
use crate::table::JobTable;
use crate::terminal::TerminalControl;

/// Why a process was terminated by a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationCause {
    FloatingPoint,
    SegmentationFault,
    Aborted,
    Killed,
    Terminated,
    Other(Signal),
}

impl From<Signal> for TerminationCause {
    fn from(signal: Signal) -> Self {
        match signal {
            Signal::SIGFPE => TerminationCause::FloatingPoint,
            Signal::SIGSEGV => TerminationCause::SegmentationFault,
            Signal::SIGABRT => TerminationCause::Aborted,
            Signal::SIGKILL => TerminationCause::Killed,
            Signal::SIGTERM => TerminationCause::Terminated,
            other => TerminationCause::Other(other),
        }
    }
}

impl fmt::Display for TerminationCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TerminationCause::FloatingPoint => f.write_str("floating point exception"),
            TerminationCause::SegmentationFault => f.write_str("segmentation fault"),
            TerminationCause::Aborted => f.write_str("aborted"),
            TerminationCause::Killed => f.write_str("killed"),
            TerminationCause::Terminated => f.write_str("terminated"),
            TerminationCause::Other(signal) => write!(f, "terminated by signal {signal:?}"),
        }
    }
}

/// Something the user should hear about after a status change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// The job was suspended; carries its listing line.
    Stopped { jid: JobId, line: String },
    Killed {
        jid: JobId,
        pid: Pid,
        cause: TerminationCause,
    },
    /// A job outside the foreground finished.
    Done { jid: JobId, line: String },
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notice::Stopped { line, .. } | Notice::Done { line, .. } => f.write_str(line),
            Notice::Killed { jid, pid, cause } => write!(f, "[{jid}] {pid} {cause}"),
        }
    }
}

/// Apply one status change.
///
/// The terminal goes back to the shell only when the affected job held it
/// and has now left the foreground, either by stopping or by running out
/// of processes. A status for a pid no job owns is a fatal bookkeeping
/// error.
pub fn reconcile<T>(table: &mut JobTable, status: WaitStatus, terminal: &T) -> Result<Vec<Notice>>
where
    T: TerminalControl + ?Sized,
{
    let Some(pid) = status.pid() else {
        return Ok(Vec::new());
    };
    let jid = table.find_by_pid(pid).ok_or(JobError::UnknownChild(pid))?;
    let job = table
        .get_mut(jid)
        .ok_or(JobError::Internal("job vanished during reconciliation"))?;
    let was_foreground = job.status == JobStatus::Foreground;
    let mut notices = Vec::new();
    trace!(jid, ?status, "Reconciling");

    match status {
        WaitStatus::Stopped(pid, signal) => {
            job.mark_process(pid, ProcessState::Stopped(signal));
            match signal {
                Signal::SIGTTIN | Signal::SIGTTOU => {
                    debug!(jid, %pid, ?signal, "Job needs the terminal");
                    job.status = JobStatus::NeedsTerminal;
                }
                _ => {
                    if was_foreground {
                        job.save_tty(terminal.save()?);
                    }
                    if job.status != JobStatus::Stopped {
                        debug!(jid, %pid, ?signal, "Job stopped");
                        job.status = JobStatus::Stopped;
                        notices.push(Notice::Stopped {
                            jid,
                            line: job.listing(),
                        });
                    }
                }
            }
        }
        WaitStatus::Exited(pid, code) => {
            debug!(jid, %pid, code, "Process exited");
            job.mark_process(pid, ProcessState::Exited(code));
        }
        WaitStatus::Signaled(pid, signal, _) => {
            debug!(jid, %pid, ?signal, "Process killed by signal");
            job.mark_process(pid, ProcessState::Signaled(signal));
            notices.push(Notice::Killed {
                jid,
                pid,
                cause: signal.into(),
            });
        }
        WaitStatus::Continued(_) => job.mark_continued(),
        _ => {}
    }

    let alive = job.alive();
    if alive == 0 && !was_foreground {
        notices.push(Notice::Done {
            jid,
            line: listing_line(jid, "Done", job.pipeline()),
        });
    }
    if was_foreground && (job.status != JobStatus::Foreground || alive == 0) {
        terminal.give_back_to_shell()?;
    }
    Ok(notices)
}

/// Block until job `jid` leaves the foreground or has no live processes.
///
/// Status changes of other jobs seen on the way are applied as well.
/// Must only run while child notifications are suppressed.
pub fn wait_for_job<T, F>(
    table: &mut JobTable,
    jid: JobId,
    terminal: &T,
    mut on_notice: F,
) -> Result<()>
where
    T: TerminalControl + ?Sized,
    F: FnMut(Notice),
{
    while table
        .get(jid)
        .is_some_and(|job| job.status == JobStatus::Foreground && job.alive() > 0)
    {
        match wait::waitpid(None, Some(WaitPidFlag::WUNTRACED)) {
            Ok(status) => {
                for notice in reconcile(table, status, terminal)? {
                    on_notice(notice);
                }
            }
            Err(Errno::EINTR) => continue,
            Err(Errno::ECHILD) => {
                warn!(jid, "No children left while waiting for job");
                break;
            }
            Err(errno) => return Err(JobError::Wait(errno)),
        }
    }
    Ok(())
}

/// Apply every status change that is already pending, without blocking.
pub fn reap_pending<T>(table: &mut JobTable, terminal: &T) -> Result<Vec<Notice>>
where
    T: TerminalControl + ?Sized,
{
    let mut notices = Vec::new();
    loop {
        match wait::waitpid(None, Some(WaitPidFlag::WNOHANG | WaitPidFlag::WUNTRACED)) {
            Ok(WaitStatus::StillAlive) | Err(Errno::ECHILD) => break,
            Ok(status) => notices.extend(reconcile(table, status, terminal)?),
            Err(Errno::EINTR) => continue,
            Err(errno) => return Err(JobError::Wait(errno)),
        }
    }
    Ok(notices)
}
