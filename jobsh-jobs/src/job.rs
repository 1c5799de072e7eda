use jobsh_core::Pipeline;
use nix::sys::signal::Signal;
use nix::unistd::Pid;
use std::fmt;

use crate::terminal::TtySnapshot;

pub type JobId = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobStatus {
    /// Owns the terminal; the shell is waiting on it
    Foreground,
    /// Running without the terminal
    Background,
    /// Suspended by a stop signal
    Stopped,
    /// Suspended by the kernel for touching the terminal from the background
    NeedsTerminal,
}

impl JobStatus {
    pub fn label(self) -> &'static str {
        match self {
            JobStatus::Foreground => "Foreground",
            JobStatus::Background => "Running",
            JobStatus::Stopped => "Stopped",
            JobStatus::NeedsTerminal => "Stopped (tty)",
        }
    }

    pub fn is_stopped(self) -> bool {
        matches!(self, JobStatus::Stopped | JobStatus::NeedsTerminal)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Running,
    Stopped(Signal),
    Exited(i32),
    Signaled(Signal),
}

impl ProcessState {
    pub fn is_alive(self) -> bool {
        matches!(self, ProcessState::Running | ProcessState::Stopped(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessRecord {
    pub pid: Pid,
    pub state: ProcessState,
}

/// A pipeline's processes, controlled as one unit.
#[derive(Debug)]
pub struct Job {
    pub jid: JobId,
    /// Group id, set when the first process is registered.
    pub pgid: Option<Pid>,
    pub status: JobStatus,
    processes: Vec<ProcessRecord>,
    saved_tty: Option<TtySnapshot>,
    pipeline: Pipeline,
}

impl Job {
    pub(crate) fn new(jid: JobId, pipeline: Pipeline, status: JobStatus) -> Self {
        Self {
            jid,
            pgid: None,
            status,
            processes: Vec::new(),
            saved_tty: None,
            pipeline,
        }
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub fn processes(&self) -> &[ProcessRecord] {
        &self.processes
    }

    /// Number of processes not yet reaped.
    pub fn alive(&self) -> usize {
        self.processes.iter().filter(|p| p.state.is_alive()).count()
    }

    pub fn add_process(&mut self, pid: Pid) {
        if self.pgid.is_none() {
            self.pgid = Some(pid);
        }
        self.processes.push(ProcessRecord {
            pid,
            state: ProcessState::Running,
        });
    }

    /// Whether `pid` is a live member of this job.
    pub fn owns(&self, pid: Pid) -> bool {
        self.processes
            .iter()
            .any(|p| p.pid == pid && p.state.is_alive())
    }

    pub fn live_pids(&self) -> impl Iterator<Item = Pid> + '_ {
        self.processes
            .iter()
            .filter(|p| p.state.is_alive())
            .map(|p| p.pid)
    }

    pub fn saved_tty(&self) -> Option<&TtySnapshot> {
        self.saved_tty.as_ref()
    }

    pub fn save_tty(&mut self, snapshot: Option<TtySnapshot>) {
        self.saved_tty = snapshot;
    }

    /// Record a new state for `pid`. Returns `false` when the process is
    /// not a live member of this job.
    pub fn mark_process(&mut self, pid: Pid, state: ProcessState) -> bool {
        match self
            .processes
            .iter_mut()
            .find(|p| p.pid == pid && p.state.is_alive())
        {
            Some(record) => {
                record.state = state;
                true
            }
            None => false,
        }
    }

    /// Every stopped process is running again after SIGCONT.
    pub fn mark_continued(&mut self) {
        for record in &mut self.processes {
            if let ProcessState::Stopped(_) = record.state {
                record.state = ProcessState::Running;
            }
        }
    }

    /// The line printed by `jobs`.
    pub fn listing(&self) -> String {
        listing_line(self.jid, self.status.label(), &self.pipeline)
    }
}

pub(crate) fn listing_line(jid: JobId, label: &str, pipeline: &Pipeline) -> String {
    format!("[{jid}]\t{label}\t\t({pipeline})")
}
