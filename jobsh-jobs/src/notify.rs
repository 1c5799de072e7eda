//! Asynchronous child status notification.
//!
//! A reaper thread wakes on every `SIGCHLD`, collects pending statuses with
//! a non-blocking `waitpid` and queues them. The shell applies the queue
//! from its own thread with [`crate::status::reconcile`], so job state is
//! never touched from more than one thread.
//!
//! The reaper only runs while it holds the gate. Holding a [`Suppressed`]
//! guard keeps it away while the shell waits on a job itself.

use nix::errno::Errno;
use nix::sys::wait::{self, WaitPidFlag, WaitStatus};
use signal_hook::consts::SIGCHLD;
use signal_hook::iterator::{Handle, Signals};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use tracing::{debug, error, trace};

pub struct ChildWatcher {
    gate: Arc<Mutex<()>>,
    suppressed: AtomicBool,
    events: Receiver<WaitStatus>,
    handle: Handle,
    thread: Option<JoinHandle<()>>,
}

/// Child notifications are held back for as long as this lives.
#[must_use = "notifications resume as soon as the guard is dropped"]
pub struct Suppressed<'a> {
    _gate: MutexGuard<'a, ()>,
    flag: &'a AtomicBool,
}

impl Drop for Suppressed<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

impl ChildWatcher {
    pub fn install() -> io::Result<Self> {
        let mut signals = Signals::new([SIGCHLD])?;
        let handle = signals.handle();
        let gate = Arc::new(Mutex::new(()));
        let (tx, events) = mpsc::channel();

        let thread_gate = Arc::clone(&gate);
        let thread = thread::Builder::new()
            .name("jobsh-reaper".into())
            .spawn(move || {
                for _ in signals.forever() {
                    let _gate = thread_gate.lock().unwrap_or_else(PoisonError::into_inner);
                    if !drain_children(&tx) {
                        break;
                    }
                }
                debug!("Reaper thread exiting");
            })?;
        debug!("Installed SIGCHLD watcher");

        Ok(Self {
            gate,
            suppressed: AtomicBool::new(false),
            events,
            handle,
            thread: Some(thread),
        })
    }

    /// Hold back child notifications until the guard is dropped.
    ///
    /// Not reentrant: taking a second guard on the same thread deadlocks.
    pub fn suppress(&self) -> Suppressed<'_> {
        let gate = self.gate.lock().unwrap_or_else(PoisonError::into_inner);
        self.suppressed.store(true, Ordering::SeqCst);
        Suppressed {
            _gate: gate,
            flag: &self.suppressed,
        }
    }

    pub fn is_suppressed(&self) -> bool {
        self.suppressed.load(Ordering::SeqCst)
    }

    /// Statuses queued since the last drain, oldest first.
    pub fn drain(&self) -> Vec<WaitStatus> {
        self.events.try_iter().collect()
    }
}

impl Drop for ChildWatcher {
    fn drop(&mut self) {
        self.handle.close();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("Reaper thread panicked");
            }
        }
    }
}

/// Forward every pending status. Returns `false` once the receiver is gone.
fn drain_children(tx: &Sender<WaitStatus>) -> bool {
    loop {
        match wait::waitpid(None, Some(WaitPidFlag::WNOHANG | WaitPidFlag::WUNTRACED)) {
            Ok(WaitStatus::StillAlive) | Err(Errno::ECHILD) => return true,
            Ok(status) => {
                trace!(?status, "Queued child status");
                if tx.send(status).is_err() {
                    return false;
                }
            }
            Err(Errno::EINTR) => continue,
            Err(errno) => {
                error!("waitpid failed in reaper: {errno}");
                return true;
            }
        }
    }
}
