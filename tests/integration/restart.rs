//! Integration tests for the child monitor's restart behaviour.

#[path = "common/mod.rs"]
mod common;

use std::time::{Duration, Instant};

use common::{
    fast_kind, wait_for_pid, wait_for_pid_change, wait_for_process_exit, wait_until,
};
use demonizer::{
    demon::{RestartPolicy, SlotState, send_signal},
    pid_file::PidFileStore,
    registry::DemonRegistry,
};
use nix::sys::signal::Signal;
use tempfile::tempdir;

#[test]
fn killed_worker_is_replaced() {
    let dir = tempdir().unwrap();
    let store = PidFileStore::new(dir.path());
    let registry = DemonRegistry::new(store.clone());
    registry.start(&fast_kind("phoenix", None, RestartPolicy::default()), 1);

    let first = wait_for_pid(&store, "phoenix", 0);
    let killed_at = Instant::now();
    send_signal(first, Signal::SIGKILL).unwrap();

    let second = wait_for_pid_change(&store, "phoenix", 0, first);
    assert!(killed_at.elapsed() < Duration::from_secs(5));
    wait_for_process_exit(first);
    assert_eq!(registry.running_pids("phoenix"), vec![Some(second)]);
    assert_eq!(registry.instances("phoenix")[0].restarts(), 1);

    registry.shutdown();
    wait_for_process_exit(second);
}

#[test]
fn only_the_dead_slot_is_restarted() {
    let dir = tempdir().unwrap();
    let store = PidFileStore::new(dir.path());
    let registry = DemonRegistry::new(store.clone());
    registry.start(&fast_kind("pair", None, RestartPolicy::default()), 2);

    let slot0 = wait_for_pid(&store, "pair", 0);
    let slot1 = wait_for_pid(&store, "pair", 1);

    send_signal(slot1, Signal::SIGKILL).unwrap();
    let replacement = wait_for_pid_change(&store, "pair", 1, slot1);

    assert_eq!(store.read("pair", 0).unwrap(), Some(slot0));
    assert_eq!(
        registry.running_pids("pair"),
        vec![Some(slot0), Some(replacement)]
    );

    registry.shutdown();
}

#[test]
fn crash_loop_keeps_restarting_by_default() {
    let dir = tempdir().unwrap();
    let store = PidFileStore::new(dir.path());
    let registry = DemonRegistry::new(store.clone());
    registry.start(
        &fast_kind("flaky", Some("exit 3"), RestartPolicy::default()),
        1,
    );

    let instance = registry.instances("flaky").remove(0);
    assert!(wait_until(Duration::from_secs(10), || instance.restarts() >= 3));
    assert_ne!(instance.state(), SlotState::Exhausted);

    registry.shutdown();
    assert_eq!(instance.state(), SlotState::Stopped);
}

#[test]
fn restart_limit_gives_up() {
    let dir = tempdir().unwrap();
    let store = PidFileStore::new(dir.path());
    let registry = DemonRegistry::new(store.clone());
    let policy = RestartPolicy {
        max_restarts: Some(1),
        backoff: None,
    };
    registry.start(&fast_kind("fragile", Some("exit 3"), policy), 1);

    let instance = registry.instances("fragile").remove(0);
    assert!(wait_until(Duration::from_secs(10), || {
        instance.state() == SlotState::Exhausted
    }));
    assert_eq!(instance.restarts(), 1);
    assert!(instance.worker_pid().is_none());
    assert!(!instance.is_monitored());

    registry.shutdown();
    assert_eq!(instance.state(), SlotState::Stopped);
}
