//! Runs one input line: built-ins act on the job table directly, anything
//! else goes to the launcher.

use jobsh_core::{CommandLine, Expansion, History, HistoryError, Pipeline, ShellConfig};
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::io::Write;
use std::rc::Rc;
use tracing::debug;

use crate::error::{JobError, Result};
use crate::job::{Job, JobId, JobStatus};
use crate::launcher;
use crate::notify::ChildWatcher;
use crate::status::{self, Notice};
use crate::table::JobTable;
use crate::terminal::TerminalControl;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Exit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    Jobs,
    Kill,
    Stop,
    Exit,
    Fg,
    Bg,
    History,
}

impl Builtin {
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "jobs" => Builtin::Jobs,
            "kill" => Builtin::Kill,
            "stop" => Builtin::Stop,
            "exit" => Builtin::Exit,
            "fg" => Builtin::Fg,
            "bg" => Builtin::Bg,
            "history" => Builtin::History,
            _ => return None,
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            Builtin::Jobs => "jobs",
            Builtin::Kill => "kill",
            Builtin::Stop => "stop",
            Builtin::Exit => "exit",
            Builtin::Fg => "fg",
            Builtin::Bg => "bg",
            Builtin::History => "history",
        }
    }
}

/// Parse a job id argument, `N` or `%N`.
pub fn parse_job_id(arg: Option<&str>) -> Result<JobId> {
    let arg = arg.ok_or(JobError::MissingJobId)?;
    arg.strip_prefix('%')
        .unwrap_or(arg)
        .parse()
        .map_err(|_| JobError::InvalidJobId(arg.to_string()))
}

pub struct Dispatcher<T, W> {
    table: JobTable,
    terminal: T,
    history: History,
    watcher: Option<Rc<ChildWatcher>>,
    notify_done: bool,
    out: W,
}

impl<T: TerminalControl, W: Write> Dispatcher<T, W> {
    pub fn new(terminal: T, config: &ShellConfig, out: W) -> Self {
        Self {
            table: JobTable::new(config.max_jobs),
            terminal,
            history: History::new(config.history_size),
            watcher: None,
            notify_done: config.notify_done,
            out,
        }
    }

    /// Take child statuses from `watcher` instead of polling for them.
    pub fn with_watcher(mut self, watcher: ChildWatcher) -> Self {
        self.watcher = Some(Rc::new(watcher));
        self
    }

    pub fn table(&self) -> &JobTable {
        &self.table
    }

    pub fn terminal(&self) -> &T {
        &self.terminal
    }

    pub fn watcher(&self) -> Option<&ChildWatcher> {
        self.watcher.as_deref()
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    pub fn output(&self) -> &W {
        &self.out
    }

    pub fn expand(&self, line: &str) -> std::result::Result<Expansion, HistoryError> {
        self.history.expand(line)
    }

    pub fn record(&mut self, line: &str) {
        self.history.push(line);
    }

    /// Run every pipeline on the line, in order.
    ///
    /// Reportable errors are printed and the line carries on; only fatal
    /// errors are returned.
    pub fn evaluate(&mut self, line: &CommandLine) -> Result<Flow> {
        let watcher = self.watcher.clone();
        let _suppressed = watcher.as_deref().map(ChildWatcher::suppress);
        carry_on(self.collect_pending())?;
        self.table.sweep();

        let mut flow = Flow::Continue;
        for pipeline in &line.pipelines {
            flow = self.dispatch(pipeline)?;
            if flow == Flow::Exit {
                break;
            }
        }
        self.table.sweep();
        Ok(flow)
    }

    /// Apply status changes that arrived while idle, then check that the
    /// shell is in a state to read the next line.
    pub fn before_prompt(&mut self) -> Result<()> {
        {
            let watcher = self.watcher.clone();
            let _suppressed = watcher.as_deref().map(ChildWatcher::suppress);
            carry_on(self.collect_pending())?;
            self.table.sweep();
        }
        if self.watcher.as_ref().is_some_and(|w| w.is_suppressed()) {
            return Err(JobError::Internal(
                "child notifications are suppressed at the prompt",
            ));
        }
        if !self.terminal.shell_owns_terminal()? {
            return Err(JobError::Internal("shell does not own the terminal at the prompt"));
        }
        Ok(())
    }

    fn dispatch(&mut self, pipeline: &Pipeline) -> Result<Flow> {
        let Some(first) = pipeline.first() else {
            return Ok(Flow::Continue);
        };
        let Some(builtin) = Builtin::from_name(first.program()) else {
            carry_on(self.launch(pipeline.clone()))?;
            return Ok(Flow::Continue);
        };

        let args: Vec<&str> = first.args().iter().map(String::as_str).collect();
        match self.run_builtin(builtin, &args) {
            Ok(flow) => Ok(flow),
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                e.report_for(builtin.name());
                Ok(Flow::Continue)
            }
        }
    }

    fn launch(&mut self, pipeline: Pipeline) -> Result<()> {
        let background = pipeline.background;
        let mut notices = Vec::new();
        let outcome =
            launcher::launch(&mut self.table, pipeline, &self.terminal, |n| notices.push(n))?;
        self.emit(notices)?;
        if background {
            if let Some(pid) = outcome.last_pid {
                writeln!(self.out, "[{}] {}", outcome.jid, pid).map_err(JobError::Output)?;
            }
        }
        self.out.flush().map_err(JobError::Output)
    }

    fn run_builtin(&mut self, builtin: Builtin, args: &[&str]) -> Result<Flow> {
        debug!(builtin = builtin.name(), ?args, "Running built-in");
        match builtin {
            Builtin::Exit => return Ok(Flow::Exit),
            Builtin::Jobs => {
                for job in self.table.iter().filter(|job| job.alive() > 0) {
                    writeln!(self.out, "{}", job.listing()).map_err(JobError::Output)?;
                }
            }
            Builtin::History => {
                for (n, line) in self.history.iter() {
                    writeln!(self.out, "{n}  {line}").map_err(JobError::Output)?;
                }
            }
            Builtin::Kill => {
                let jid = parse_job_id(args.first().copied())?;
                let job = self.job(jid)?;
                signal_job(job, Signal::SIGTERM)?;
                if job.status.is_stopped() {
                    signal_group(job, Signal::SIGCONT)?;
                }
            }
            Builtin::Stop => {
                let jid = parse_job_id(args.first().copied())?;
                signal_job(self.job(jid)?, Signal::SIGSTOP)?;
                let job = self.job_mut(jid)?;
                job.status = JobStatus::Stopped;
                let line = job.listing();
                writeln!(self.out, "{line}").map_err(JobError::Output)?;
            }
            Builtin::Bg => {
                let jid = parse_job_id(args.first().copied())?;
                let job = self.job_mut(jid)?;
                let pgid = group_of(job)?;
                if job.status.is_stopped() {
                    signal_group(job, Signal::SIGCONT)?;
                    job.mark_continued();
                }
                job.status = JobStatus::Background;
                writeln!(self.out, "[{jid}] {pgid}").map_err(JobError::Output)?;
            }
            Builtin::Fg => {
                let jid = parse_job_id(args.first().copied())?;
                self.foreground(jid)?;
            }
        }
        self.out.flush().map_err(JobError::Output)?;
        Ok(Flow::Continue)
    }

    fn foreground(&mut self, jid: JobId) -> Result<()> {
        let job = self.job(jid)?;
        let pgid = group_of(job)?;
        let previous = job.status;
        let snapshot = job.saved_tty().copied();
        let line = job.pipeline().to_string();
        writeln!(self.out, "{line}").map_err(JobError::Output)?;
        self.out.flush().map_err(JobError::Output)?;

        self.table.set_foreground(jid)?;
        self.terminal.give_to(pgid, snapshot.as_ref())?;
        if previous.is_stopped() {
            let job = self.job_mut(jid)?;
            if let Err(e) = signal_group(job, Signal::SIGCONT) {
                job.status = previous;
                self.terminal.give_back_to_shell()?;
                return Err(e);
            }
            job.mark_continued();
        }
        debug!(jid, %pgid, "Job moved to the foreground");

        let mut notices = Vec::new();
        status::wait_for_job(&mut self.table, jid, &self.terminal, |n| notices.push(n))?;
        self.terminal.give_back_to_shell()?;
        self.emit(notices)
    }

    fn job(&self, jid: JobId) -> Result<&Job> {
        self.table.get(jid).ok_or(JobError::NoSuchJob(jid))
    }

    fn job_mut(&mut self, jid: JobId) -> Result<&mut Job> {
        self.table.get_mut(jid).ok_or(JobError::NoSuchJob(jid))
    }

    fn collect_pending(&mut self) -> Result<()> {
        let notices = match &self.watcher {
            Some(watcher) => {
                let mut notices = Vec::new();
                for status in watcher.drain() {
                    notices.extend(status::reconcile(&mut self.table, status, &self.terminal)?);
                }
                notices
            }
            None => status::reap_pending(&mut self.table, &self.terminal)?,
        };
        self.emit(notices)
    }

    fn emit(&mut self, notices: Vec<Notice>) -> Result<()> {
        for notice in notices {
            if matches!(notice, Notice::Done { .. }) && !self.notify_done {
                continue;
            }
            writeln!(self.out, "{notice}").map_err(JobError::Output)?;
        }
        self.out.flush().map_err(JobError::Output)
    }
}

/// Report an error the shell can recover from and pass fatal ones up.
fn carry_on(result: Result<()>) -> Result<()> {
    match result {
        Err(e) if !e.is_fatal() => {
            e.report();
            Ok(())
        }
        other => other,
    }
}

fn group_of(job: &Job) -> Result<Pid> {
    job.pgid.ok_or(JobError::NoSuchJob(job.jid))
}

/// Send `signal` to every live process of the job and to its group.
fn signal_job(job: &Job, signal: Signal) -> Result<()> {
    for pid in job.live_pids() {
        signal::kill(pid, signal).map_err(|source| JobError::Signal {
            signal,
            target: format!("process {pid}"),
            source,
        })?;
    }
    signal_group(job, signal)
}

fn signal_group(job: &Job, signal: Signal) -> Result<()> {
    let pgid = group_of(job)?;
    debug!(jid = job.jid, %pgid, ?signal, "Signalling job");
    signal::killpg(pgid, signal).map_err(|source| JobError::Signal {
        signal,
        target: format!("job {}", job.jid),
        source,
    })
}
