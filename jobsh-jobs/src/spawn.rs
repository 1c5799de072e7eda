//! Process creation for pipeline stages.

use nix::unistd::Pid;
use std::fs::{File, OpenOptions};
use std::io;
use std::os::fd::{OwnedFd, RawFd};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::process::CommandExt;
use std::path::Path;
use std::process::{Command, Stdio};
use tracing::debug;

/// Everything needed to start one stage.
#[derive(Debug)]
pub struct SpawnRequest<'a> {
    pub argv: &'a [String],
    /// Group to join; `None` starts a new group led by the child.
    pub process_group: Option<Pid>,
    /// Terminal the child makes its group the foreground of before exec.
    pub claim_terminal: Option<RawFd>,
    /// `None` inherits the shell's descriptor.
    pub stdin: Option<OwnedFd>,
    pub stdout: Option<OwnedFd>,
    pub stderr_to_stdout: bool,
}

/// Start the process described by `request` and return its pid.
///
/// The descriptors in the request are consumed; the child's copies are
/// the only ones left open once this returns.
pub fn spawn(request: SpawnRequest<'_>) -> io::Result<Pid> {
    let SpawnRequest {
        argv,
        process_group,
        claim_terminal,
        stdin,
        stdout,
        stderr_to_stdout,
    } = request;
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "empty command"))?;

    let mut command = Command::new(program);
    command
        .args(args)
        .process_group(process_group.map_or(0, Pid::as_raw));
    if let Some(fd) = stdin {
        command.stdin(Stdio::from(fd));
    }
    if let Some(fd) = stdout {
        command.stdout(Stdio::from(fd));
    }

    // SAFETY: the closure only makes async-signal-safe libc calls.
    unsafe {
        command.pre_exec(move || {
            if let Some(tty) = claim_terminal {
                if libc::tcsetpgrp(tty, libc::getpgrp()) == -1 {
                    return Err(io::Error::last_os_error());
                }
            }
            if stderr_to_stdout && libc::dup2(libc::STDOUT_FILENO, libc::STDERR_FILENO) == -1 {
                return Err(io::Error::last_os_error());
            }
            for sig in [libc::SIGTSTP, libc::SIGTTIN, libc::SIGTTOU] {
                if libc::signal(sig, libc::SIG_DFL) == libc::SIG_ERR {
                    return Err(io::Error::last_os_error());
                }
            }
            Ok(())
        });
    }

    let child = command.spawn()?;
    let pid = Pid::from_raw(child.id() as i32);
    debug!(%pid, %program, ?process_group, "Spawned process");
    Ok(pid)
}

/// Open `path` as a pipeline's standard input, creating it if absent.
pub fn open_input(path: &Path) -> io::Result<File> {
    OpenOptions::new()
        .read(true)
        .custom_flags(libc::O_CREAT)
        .mode(0o644)
        .open(path)
}

/// Open `path` as a pipeline's standard output.
pub fn open_output(path: &Path, append: bool) -> io::Result<File> {
    OpenOptions::new()
        .write(true)
        .create(true)
        .append(append)
        .truncate(!append)
        .mode(0o644)
        .open(path)
}
