//! Shared helpers for jobsh-jobs integration tests.

// Each test file compiles separately, so not all helpers are used in each binary
#![allow(dead_code)]

use jobsh_core::{ShellConfig, parse};
use jobsh_jobs::terminal::testing::RecordingTerminal;
use jobsh_jobs::{ChildWatcher, Dispatcher, Flow};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

/// Every test reaps with `waitpid(-1)`, so only one may have children at a time.
static CHILDREN: Mutex<()> = Mutex::new(());

pub fn lock_children() -> MutexGuard<'static, ()> {
    CHILDREN.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A dispatcher writing into a buffer, driven one line at a time.
pub struct TestShell {
    pub dispatcher: Dispatcher<RecordingTerminal, Vec<u8>>,
    seen: usize,
    _children: MutexGuard<'static, ()>,
}

impl TestShell {
    pub fn new() -> Self {
        Self::with_config(ShellConfig::default())
    }

    pub fn with_config(config: ShellConfig) -> Self {
        let children = lock_children();
        Self {
            dispatcher: Dispatcher::new(RecordingTerminal::default(), &config, Vec::new()),
            seen: 0,
            _children: children,
        }
    }

    /// Statuses arrive through a SIGCHLD watcher instead of polling.
    pub fn with_watcher() -> Self {
        let children = lock_children();
        let watcher = ChildWatcher::install().expect("Failed to install SIGCHLD watcher");
        let config = ShellConfig::default();
        Self {
            dispatcher: Dispatcher::new(RecordingTerminal::default(), &config, Vec::new())
                .with_watcher(watcher),
            seen: 0,
            _children: children,
        }
    }

    pub fn run(&mut self, line: &str) -> Flow {
        self.dispatcher.record(line);
        let parsed = parse(line).expect("Failed to parse test line");
        self.dispatcher
            .evaluate(&parsed)
            .expect("Fatal error while evaluating")
    }

    /// Output written since the last call.
    pub fn take_output(&mut self) -> String {
        let out = self.dispatcher.output();
        let fresh = String::from_utf8_lossy(&out[self.seen..]).into_owned();
        self.seen = out.len();
        fresh
    }

    /// Poll until every job has been reaped and swept.
    pub fn settle(&mut self) {
        let deadline = Instant::now() + Duration::from_secs(10);
        loop {
            self.dispatcher
                .before_prompt()
                .expect("Shell not ready for the prompt");
            if self.dispatcher.table().is_empty() {
                return;
            }
            assert!(Instant::now() < deadline, "jobs never finished");
            thread::sleep(Duration::from_millis(20));
        }
    }
}

impl Drop for TestShell {
    /// Kill and reap leftovers so the next test starts without children.
    fn drop(&mut self) {
        use nix::sys::signal::{Signal, kill};
        use nix::sys::wait::waitpid;

        let pids: Vec<_> = self
            .dispatcher
            .table()
            .iter()
            .flat_map(|job| job.live_pids())
            .collect();
        for pid in pids {
            let _ = kill(pid, Signal::SIGKILL);
            let _ = waitpid(pid, None);
        }
    }
}
