//! Integration tests for pid files left behind by an earlier supervisor.

#[path = "common/mod.rs"]
mod common;

use std::{os::unix::process::ExitStatusExt, process::Command, time::Duration};

use common::{fast_kind, wait_for_pid_change, wait_for_process_exit, wait_until};
use demonizer::{demon::RestartPolicy, pid_file::PidFileStore, registry::DemonRegistry};
use tempfile::tempdir;

#[test]
fn live_prior_worker_is_terminated_before_spawn() {
    let dir = tempdir().unwrap();
    let store = PidFileStore::new(dir.path());
    let mut prior = Command::new("sleep").arg("30").spawn().unwrap();
    store.write("legacy", 0, prior.id()).unwrap();

    let registry = DemonRegistry::new(store.clone());
    registry.start(&fast_kind("legacy", None, RestartPolicy::default()), 1);

    let status = prior.wait().unwrap();
    assert_eq!(status.signal(), Some(libc::SIGTERM));

    let fresh = wait_for_pid_change(&store, "legacy", 0, prior.id());
    assert_eq!(registry.running_pids("legacy"), vec![Some(fresh)]);

    registry.shutdown();
    wait_for_process_exit(fresh);
}

#[test]
fn dead_prior_worker_is_simply_replaced() {
    let dir = tempdir().unwrap();
    let store = PidFileStore::new(dir.path());
    let mut gone = Command::new("true").spawn().unwrap();
    let gone_pid = gone.id();
    gone.wait().unwrap();
    store.write("legacy", 0, gone_pid).unwrap();

    let registry = DemonRegistry::new(store.clone());
    registry.start(&fast_kind("legacy", None, RestartPolicy::default()), 1);

    let fresh = wait_for_pid_change(&store, "legacy", 0, gone_pid);
    assert!(wait_until(Duration::from_secs(5), || {
        registry.running_pids("legacy") == vec![Some(fresh)]
    }));

    registry.shutdown();
    wait_for_process_exit(fresh);
}

#[test]
fn garbage_pid_file_is_overwritten() {
    let dir = tempdir().unwrap();
    let store = PidFileStore::new(dir.path());
    std::fs::create_dir_all(store.dir()).unwrap();
    std::fs::write(store.path("legacy", 0), "not a pid").unwrap();

    let registry = DemonRegistry::new(store.clone());
    registry.start(&fast_kind("legacy", None, RestartPolicy::default()), 1);

    let fresh = common::wait_for_pid(&store, "legacy", 0);
    assert_eq!(registry.running_pids("legacy"), vec![Some(fresh)]);

    registry.shutdown();
    wait_for_process_exit(fresh);
}
