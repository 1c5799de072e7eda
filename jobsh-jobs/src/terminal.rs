//! Terminal arbitration.
//!
//! Tracks which process group owns the controlling terminal and hands it
//! between the shell and its jobs. When the shell is not attached to a
//! terminal every operation is a no-op and the shell is treated as the
//! owner, so non-interactive use and tests share the same code paths.

use nix::sys::signal::{self, SigHandler, Signal};
use nix::sys::termios::{self, SetArg, Termios};
use nix::unistd::{self, Pid};
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, IsTerminal};
use std::os::fd::{AsRawFd, RawFd};
use tracing::debug;

use crate::error::{JobError, Result};

/// Terminal attributes captured at a point in time.
#[derive(Clone, Copy)]
pub struct TtySnapshot(libc::termios);

impl TtySnapshot {
    pub fn from_raw(raw: libc::termios) -> Self {
        Self(raw)
    }

    pub fn as_raw(&self) -> &libc::termios {
        &self.0
    }
}

impl fmt::Debug for TtySnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TtySnapshot")
            .field("c_iflag", &self.0.c_iflag)
            .field("c_oflag", &self.0.c_oflag)
            .field("c_cflag", &self.0.c_cflag)
            .field("c_lflag", &self.0.c_lflag)
            .finish_non_exhaustive()
    }
}

/// Operations the job engine needs from the controlling terminal.
pub trait TerminalControl {
    /// Process group of the shell itself.
    fn shell_pgrp(&self) -> Pid;

    /// Process group currently owning the terminal.
    fn owner(&self) -> Result<Pid>;

    /// Capture the current terminal attributes.
    fn save(&self) -> Result<Option<TtySnapshot>>;

    /// Make `pgrp` the foreground process group, first restoring `restore`
    /// if given.
    fn give_to(&self, pgrp: Pid, restore: Option<&TtySnapshot>) -> Result<()>;

    /// Take the terminal back and restore the shell's own attributes.
    fn give_back_to_shell(&self) -> Result<()>;

    /// Descriptor a foreground child uses to claim the terminal while it is
    /// being spawned.
    fn spawn_fd(&self) -> Option<RawFd>;

    fn shell_owns_terminal(&self) -> Result<bool> {
        Ok(self.owner()? == self.shell_pgrp())
    }
}

/// The process's real controlling terminal.
#[derive(Debug)]
pub struct Terminal {
    tty: Option<File>,
    shell_pgrp: Pid,
    shell_state: Option<TtySnapshot>,
}

impl Terminal {
    /// A terminal handle that never touches a tty.
    pub fn detached() -> Self {
        Self {
            tty: None,
            shell_pgrp: unistd::getpgrp(),
            shell_state: None,
        }
    }

    /// Set up job control when stdin is a terminal, otherwise fall back to
    /// [`Terminal::detached`].
    ///
    /// Waits until the shell is in the foreground, moves it into its own
    /// process group, takes the terminal and records the shell's terminal
    /// attributes. The shell ignores the job-control stop signals from
    /// then on.
    pub fn acquire() -> Result<Self> {
        if !io::stdin().is_terminal() {
            debug!("stdin is not a terminal, job control disabled");
            return Ok(Self::detached());
        }
        let tty = match OpenOptions::new().read(true).write(true).open("/dev/tty") {
            Ok(tty) => tty,
            Err(e) => {
                debug!("No controlling terminal ({e}), job control disabled");
                return Ok(Self::detached());
            }
        };

        loop {
            let pgrp = unistd::getpgrp();
            if unistd::tcgetpgrp(&tty).map_err(JobError::Terminal)? == pgrp {
                break;
            }
            signal::killpg(pgrp, Signal::SIGTTIN).map_err(JobError::Terminal)?;
        }

        for sig in [Signal::SIGTSTP, Signal::SIGTTIN, Signal::SIGTTOU] {
            // SAFETY: installing SIG_IGN does not run any code in signal context.
            unsafe { signal::signal(sig, SigHandler::SigIgn) }.map_err(JobError::Terminal)?;
        }

        let shell_pid = unistd::getpid();
        if unistd::getpgrp() != shell_pid {
            // Fails with EPERM for a session leader, which already leads its group.
            if let Err(e) = unistd::setpgid(shell_pid, shell_pid) {
                debug!("setpgid for the shell failed: {e}");
            }
        }
        let shell_pgrp = unistd::getpgrp();
        unistd::tcsetpgrp(&tty, shell_pgrp).map_err(JobError::Terminal)?;

        let shell_state = termios::tcgetattr(&tty)
            .map(|t| TtySnapshot(t.into()))
            .map_err(JobError::Terminal)?;
        debug!(pgrp = %shell_pgrp, "Acquired controlling terminal");

        Ok(Self {
            tty: Some(tty),
            shell_pgrp,
            shell_state: Some(shell_state),
        })
    }

    pub fn is_interactive(&self) -> bool {
        self.tty.is_some()
    }

    fn restore(tty: &File, snapshot: &TtySnapshot) -> Result<()> {
        let attrs = Termios::from(snapshot.0);
        termios::tcsetattr(tty, SetArg::TCSADRAIN, &attrs).map_err(JobError::Terminal)
    }
}

impl TerminalControl for Terminal {
    fn shell_pgrp(&self) -> Pid {
        self.shell_pgrp
    }

    fn owner(&self) -> Result<Pid> {
        match &self.tty {
            Some(tty) => unistd::tcgetpgrp(tty).map_err(JobError::Terminal),
            None => Ok(self.shell_pgrp),
        }
    }

    fn save(&self) -> Result<Option<TtySnapshot>> {
        match &self.tty {
            Some(tty) => termios::tcgetattr(tty)
                .map(|t| Some(TtySnapshot(t.into())))
                .map_err(JobError::Terminal),
            None => Ok(None),
        }
    }

    fn give_to(&self, pgrp: Pid, restore: Option<&TtySnapshot>) -> Result<()> {
        let Some(tty) = &self.tty else {
            return Ok(());
        };
        if let Some(snapshot) = restore {
            Self::restore(tty, snapshot)?;
        }
        debug!(%pgrp, "Handing terminal to job");
        unistd::tcsetpgrp(tty, pgrp).map_err(JobError::Terminal)
    }

    fn give_back_to_shell(&self) -> Result<()> {
        let Some(tty) = &self.tty else {
            return Ok(());
        };
        unistd::tcsetpgrp(tty, self.shell_pgrp).map_err(JobError::Terminal)?;
        if let Some(state) = &self.shell_state {
            Self::restore(tty, state)?;
        }
        Ok(())
    }

    fn spawn_fd(&self) -> Option<RawFd> {
        self.tty.as_ref().map(AsRawFd::as_raw_fd)
    }
}

pub mod testing {
    //! An in-memory terminal for exercising the engine without a tty.

    use super::*;
    use std::cell::{Cell, RefCell};

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum TerminalOp {
        Save { lflag: libc::tcflag_t },
        GiveTo { pgrp: Pid, restored: Option<libc::tcflag_t> },
        GiveBack,
    }

    /// Records every ownership change. Each [`save`](TerminalControl::save)
    /// returns a snapshot whose `c_lflag` is a fresh counter value, so
    /// tests can tell snapshots apart.
    #[derive(Debug)]
    pub struct RecordingTerminal {
        shell_pgrp: Pid,
        owner: Cell<Pid>,
        saves: Cell<libc::tcflag_t>,
        ops: RefCell<Vec<TerminalOp>>,
    }

    impl Default for RecordingTerminal {
        fn default() -> Self {
            Self::new(unistd::getpgrp())
        }
    }

    impl RecordingTerminal {
        pub fn new(shell_pgrp: Pid) -> Self {
            Self {
                shell_pgrp,
                owner: Cell::new(shell_pgrp),
                saves: Cell::new(0),
                ops: RefCell::new(Vec::new()),
            }
        }

        pub fn ops(&self) -> Vec<TerminalOp> {
            self.ops.borrow().clone()
        }

        pub fn clear(&self) {
            self.ops.borrow_mut().clear();
        }

        /// Pretend `pgrp` grabbed the terminal on its own, as a foreground
        /// child does at spawn.
        pub fn set_owner(&self, pgrp: Pid) {
            self.owner.set(pgrp);
        }
    }

    impl TerminalControl for RecordingTerminal {
        fn shell_pgrp(&self) -> Pid {
            self.shell_pgrp
        }

        fn owner(&self) -> Result<Pid> {
            Ok(self.owner.get())
        }

        fn save(&self) -> Result<Option<TtySnapshot>> {
            let lflag = self.saves.get() + 1;
            self.saves.set(lflag);
            // SAFETY: termios is a plain C struct; all-zero is a valid value.
            let mut raw: libc::termios = unsafe { std::mem::zeroed() };
            raw.c_lflag = lflag;
            self.ops.borrow_mut().push(TerminalOp::Save { lflag });
            Ok(Some(TtySnapshot::from_raw(raw)))
        }

        fn give_to(&self, pgrp: Pid, restore: Option<&TtySnapshot>) -> Result<()> {
            self.owner.set(pgrp);
            self.ops.borrow_mut().push(TerminalOp::GiveTo {
                pgrp,
                restored: restore.map(|s| s.as_raw().c_lflag),
            });
            Ok(())
        }

        fn give_back_to_shell(&self) -> Result<()> {
            self.owner.set(self.shell_pgrp);
            self.ops.borrow_mut().push(TerminalOp::GiveBack);
            Ok(())
        }

        fn spawn_fd(&self) -> Option<RawFd> {
            None
        }
    }
}
