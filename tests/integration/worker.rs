//! Integration tests running the binary directly in the worker role.

#[path = "common/mod.rs"]
mod common;

use std::{
    process::{Child, Command, Stdio},
    thread,
    time::Duration,
};

use assert_cmd::Command as AssertCommand;
use common::{demon_bin, wait_until};
use demonizer::{demon::send_signal, pid_file::PidFileStore};
use nix::sys::signal::Signal;
use predicates::prelude::*;
use tempfile::tempdir;

fn worker_args(name: &str, supervisor_pid: u32, state_dir: &std::path::Path) -> Vec<String> {
    vec![
        "worker".into(),
        "--name".into(),
        name.into(),
        "--slot".into(),
        "0".into(),
        "--supervisor-pid".into(),
        supervisor_pid.to_string(),
        "--state-dir".into(),
        state_dir.display().to_string(),
        "--parent-poll-ms".into(),
        "100".into(),
    ]
}

fn spawn_worker(args: &[String]) -> Child {
    Command::new(demon_bin())
        .args(args)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn worker")
}

#[test]
fn shutdown_signal_removes_pid_file_and_exits_cleanly() {
    let dir = tempdir().unwrap();
    let store = PidFileStore::new(dir.path());
    let mut worker = spawn_worker(&worker_args("graceful", std::process::id(), dir.path()));
    store.write("graceful", 0, worker.id()).unwrap();

    // Give the worker time to install its signal listener.
    thread::sleep(Duration::from_millis(500));
    assert!(worker.try_wait().unwrap().is_none());

    send_signal(worker.id(), Signal::SIGHUP).unwrap();
    let status = worker.wait().unwrap();

    assert_eq!(status.code(), Some(0));
    assert!(!store.path("graceful", 0).exists());
}

#[test]
fn worker_exits_after_supervisor_dies() {
    let dir = tempdir().unwrap();
    let mut supervisor = Command::new("sleep").arg("30").spawn().unwrap();
    let mut worker = spawn_worker(&worker_args("orphan", supervisor.id(), dir.path()));

    thread::sleep(Duration::from_millis(300));
    assert!(worker.try_wait().unwrap().is_none());

    supervisor.kill().unwrap();
    supervisor.wait().unwrap();

    assert!(wait_until(Duration::from_secs(5), || {
        worker.try_wait().unwrap().is_some()
    }));
    assert_eq!(worker.wait().unwrap().code(), Some(0));
}

#[test]
fn worker_with_dead_supervisor_exits_immediately() {
    let dir = tempdir().unwrap();
    let mut gone = Command::new("true").spawn().unwrap();
    let gone_pid = gone.id();
    gone.wait().unwrap();

    AssertCommand::new(demon_bin())
        .args(worker_args("late", gone_pid, dir.path()))
        .timeout(Duration::from_secs(5))
        .assert()
        .success();
}

#[test]
fn failing_command_is_reported_as_fault() {
    let dir = tempdir().unwrap();
    let mut args = worker_args("broken", std::process::id(), dir.path());
    args.extend(["--command".to_string(), "exit 7".to_string()]);

    AssertCommand::new(demon_bin())
        .args(args)
        .timeout(Duration::from_secs(10))
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Worker command exited"))
        .stderr(predicate::str::contains("Some(7)"));
}

#[test]
fn worker_stdout_goes_to_dev_null() {
    let dir = tempdir().unwrap();
    let mut args = worker_args("chatty", std::process::id(), dir.path());
    args.extend([
        "--command".to_string(),
        "echo should-not-appear".to_string(),
    ]);

    AssertCommand::new(demon_bin())
        .args(args)
        .timeout(Duration::from_secs(10))
        .assert()
        .success()
        .stdout(predicate::str::is_empty());
}
