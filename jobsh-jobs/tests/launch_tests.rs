//! Pipeline wiring: pipes, redirections and process groups.

mod common;

use common::lock_children;
use jobsh_core::{Pipeline, parse};
use jobsh_jobs::launcher::launch;
use jobsh_jobs::terminal::testing::RecordingTerminal;
use jobsh_jobs::{JobTable, TerminalControl};
use pretty_assertions::assert_eq;
use std::fs;
use std::path::Path;

fn pipeline(line: &str) -> Pipeline {
    let mut parsed = parse(line).expect("Failed to parse test line");
    assert_eq!(parsed.pipelines.len(), 1);
    parsed.pipelines.remove(0)
}

fn quoted(path: &Path) -> String {
    format!("'{}'", path.display())
}

#[test]
fn test_output_redirection_truncates_then_appends() {
    let _children = lock_children();
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("out.txt");
    fs::write(&out, "stale contents that must go\n").unwrap();
    let mut table = JobTable::default();
    let terminal = RecordingTerminal::default();

    launch(&mut table, pipeline(&format!("echo hi > {}", quoted(&out))), &terminal, |_| {}).unwrap();
    assert_eq!(fs::read_to_string(&out).unwrap(), "hi\n");

    launch(&mut table, pipeline(&format!("echo hi >> {}", quoted(&out))), &terminal, |_| {}).unwrap();
    assert_eq!(fs::read_to_string(&out).unwrap(), "hi\nhi\n");

    assert_eq!(table.sweep().len(), 2);
}

#[test]
fn test_pipeline_connects_stages() {
    let _children = lock_children();
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("in.txt");
    let out = dir.path().join("count.txt");
    fs::write(&input, "first line\nsecond line\n").unwrap();
    let mut table = JobTable::default();
    let terminal = RecordingTerminal::default();

    let line = format!("cat < {} | wc -l > {}", quoted(&input), quoted(&out));
    let outcome = launch(&mut table, pipeline(&line), &terminal, |_| {}).unwrap();

    assert!(!outcome.failed);
    assert_eq!(fs::read_to_string(&out).unwrap().trim(), "2");
    let job = table.get(outcome.jid).unwrap();
    assert_eq!(job.processes().len(), 2);
    assert_eq!(job.alive(), 0);
    assert_eq!(job.pgid, Some(job.processes()[0].pid));
}

#[test]
fn test_stages_share_one_process_group() {
    let _children = lock_children();
    let mut table = JobTable::default();
    let terminal = RecordingTerminal::default();

    let outcome = launch(&mut table, pipeline("sleep 5 | sleep 5 &"), &terminal, |_| {}).unwrap();

    let job = table.get(outcome.jid).unwrap();
    let pgid = job.pgid.unwrap();
    for record in job.processes() {
        assert_eq!(nix::unistd::getpgid(Some(record.pid)).unwrap(), pgid);
    }
    assert!(terminal.shell_owns_terminal().unwrap());

    nix::sys::signal::killpg(pgid, nix::sys::signal::Signal::SIGKILL).unwrap();
    for record in job.processes() {
        nix::sys::wait::waitpid(record.pid, None).unwrap();
    }
}

#[test]
fn test_merged_stderr_reaches_output_file() {
    let _children = lock_children();
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("both.txt");
    let mut table = JobTable::default();
    let terminal = RecordingTerminal::default();

    let line = format!("sh -c 'echo oops >&2' >& {}", quoted(&out));
    launch(&mut table, pipeline(&line), &terminal, |_| {}).unwrap();

    assert_eq!(fs::read_to_string(&out).unwrap(), "oops\n");
}

#[test]
fn test_missing_middle_stage_leaves_siblings_running() {
    let _children = lock_children();
    let mut table = JobTable::default();
    let terminal = RecordingTerminal::default();

    let outcome = launch(
        &mut table,
        pipeline("sleep 5 | /nonexistent/jobsh-test-program | cat"),
        &terminal,
        |_| {},
    )
    .unwrap();

    assert!(outcome.failed);
    let job = table.get(outcome.jid).unwrap();
    assert_eq!(job.processes().len(), 1);
    assert_eq!(job.alive(), 1);
    assert_eq!(job.status, jobsh_jobs::JobStatus::Background);
    assert!(terminal.shell_owns_terminal().unwrap());

    let pid = job.processes()[0].pid;
    nix::sys::signal::kill(pid, nix::sys::signal::Signal::SIGKILL).unwrap();
    nix::sys::wait::waitpid(pid, None).unwrap();
}
