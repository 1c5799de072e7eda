//! Job state kept current by the SIGCHLD watcher while the shell is idle.

mod common;

use common::TestShell;
use jobsh_jobs::JobStatus;
use nix::sys::signal::{Signal, kill};
use std::thread;
use std::time::{Duration, Instant};

fn wait_until(shell: &mut TestShell, mut done: impl FnMut(&TestShell) -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        shell
            .dispatcher
            .before_prompt()
            .expect("Shell not ready for the prompt");
        if done(shell) {
            return;
        }
        assert!(Instant::now() < deadline, "watcher never delivered the status");
        thread::sleep(Duration::from_millis(20));
    }
}

fn not_suppressed(shell: &TestShell) -> bool {
    shell
        .dispatcher
        .watcher()
        .is_some_and(|watcher| !watcher.is_suppressed())
}

#[test]
fn test_background_exit_is_announced_before_prompt() {
    let mut shell = TestShell::with_watcher();
    shell.run("sleep 0.1 &");
    assert!(not_suppressed(&shell));
    let pid = shell.dispatcher.table().get(1).unwrap().processes()[0].pid;
    assert_eq!(shell.take_output(), format!("[1] {pid}\n"));

    thread::sleep(Duration::from_millis(200));
    wait_until(&mut shell, |shell| shell.dispatcher.table().is_empty());

    assert_eq!(shell.take_output(), "[1]\tDone\t\t(sleep 0.1)\n");
    assert!(not_suppressed(&shell));
}

#[test]
fn test_external_stop_is_recorded() {
    let mut shell = TestShell::with_watcher();
    shell.run("sleep 5 &");
    let pid = shell.dispatcher.table().get(1).unwrap().processes()[0].pid;
    shell.take_output();

    kill(pid, Signal::SIGSTOP).unwrap();
    wait_until(&mut shell, |shell| {
        shell
            .dispatcher
            .table()
            .get(1)
            .is_some_and(|job| job.status == JobStatus::Stopped)
    });

    shell.run("kill 1");
    wait_until(&mut shell, |shell| shell.dispatcher.table().is_empty());
    assert!(not_suppressed(&shell));
}

#[test]
fn test_foreground_lines_run_alongside_the_watcher() {
    let mut shell = TestShell::with_watcher();
    shell.run("sleep 0.2 &; true; false");
    assert_eq!(shell.dispatcher.table().len(), 1);
    wait_until(&mut shell, |shell| shell.dispatcher.table().is_empty());
    let output = shell.take_output();
    assert!(output.ends_with("[1]\tDone\t\t(sleep 0.2)\n"), "{output}");
}
