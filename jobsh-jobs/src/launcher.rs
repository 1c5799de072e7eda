//! Turns a [`Pipeline`] into a job of running processes.

use jobsh_core::Pipeline;
use nix::fcntl::OFlag;
use nix::unistd::{self, Pid};
use std::os::fd::OwnedFd;
use tracing::{debug, warn};

use crate::error::{JobError, Result};
use crate::job::{JobId, JobStatus};
use crate::spawn::{self, SpawnRequest};
use crate::status::{self, Notice};
use crate::table::JobTable;
use crate::terminal::TerminalControl;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaunchOutcome {
    pub jid: JobId,
    /// Pid of the last stage that started.
    pub last_pid: Option<Pid>,
    /// Some stage could not be set up; the ones before it keep running.
    pub failed: bool,
}

/// Start every stage of `pipeline` as one job and, for a foreground
/// pipeline, wait until it finishes or stops.
///
/// Setup failures are reported and end the launch early without being
/// returned; only errors that leave the engine inconsistent come back as
/// `Err`. The shell owns the terminal again when this returns.
pub fn launch<T, F>(
    table: &mut JobTable,
    pipeline: Pipeline,
    terminal: &T,
    on_notice: F,
) -> Result<LaunchOutcome>
where
    T: TerminalControl + ?Sized,
    F: FnMut(Notice),
{
    let foreground = !pipeline.background;
    let commands = pipeline.commands.clone();
    let input = pipeline.input.clone();
    let output = pipeline.output.clone();

    let jid = table.allocate(pipeline, JobStatus::Background)?;
    if foreground {
        table.set_foreground(jid)?;
    }

    let mut outcome = LaunchOutcome {
        jid,
        last_pid: None,
        failed: false,
    };
    let mut pgid = None;
    let mut upstream: Option<OwnedFd> = None;

    for (i, command) in commands.iter().enumerate() {
        let last = i + 1 == commands.len();

        let stdin = match (i, &input) {
            (0, Some(path)) => match spawn::open_input(path) {
                Ok(file) => Some(OwnedFd::from(file)),
                Err(source) => {
                    fail(&mut outcome, JobError::Redirect { path: path.clone(), source });
                    break;
                }
            },
            _ => upstream.take(),
        };

        let stdout = if last {
            match &output {
                Some(redirect) => match spawn::open_output(&redirect.path, redirect.append) {
                    Ok(file) => Some(OwnedFd::from(file)),
                    Err(source) => {
                        fail(
                            &mut outcome,
                            JobError::Redirect {
                                path: redirect.path.clone(),
                                source,
                            },
                        );
                        break;
                    }
                },
                None => None,
            }
        } else {
            match unistd::pipe2(OFlag::O_CLOEXEC) {
                Ok((read, write)) => {
                    upstream = Some(read);
                    Some(write)
                }
                Err(errno) => {
                    fail(&mut outcome, JobError::Pipe(errno));
                    break;
                }
            }
        };

        let request = SpawnRequest {
            argv: &command.argv,
            process_group: pgid,
            claim_terminal: if foreground { terminal.spawn_fd() } else { None },
            stdin,
            stdout,
            stderr_to_stdout: command.stderr_to_stdout,
        };
        match spawn::spawn(request) {
            Ok(pid) => {
                let job = table
                    .get_mut(jid)
                    .ok_or(JobError::Internal("job vanished during launch"))?;
                job.add_process(pid);
                pgid = job.pgid;
                outcome.last_pid = Some(pid);
            }
            Err(source) => {
                fail(
                    &mut outcome,
                    JobError::Spawn {
                        program: command.program().to_string(),
                        source,
                    },
                );
                break;
            }
        }
    }
    drop(upstream);

    if outcome.failed {
        if let Some(job) = table.get_mut(jid) {
            if job.status == JobStatus::Foreground && job.alive() > 0 {
                warn!(jid, "Pipeline only partly started, leaving it in the background");
                job.status = JobStatus::Background;
            }
        }
    } else if foreground {
        debug!(jid, "Waiting for foreground job");
        status::wait_for_job(table, jid, terminal, on_notice)?;
    }

    terminal.give_back_to_shell()?;
    Ok(outcome)
}

fn fail(outcome: &mut LaunchOutcome, err: JobError) {
    err.report();
    outcome.failed = true;
}
