//! Integration tests for starting and stopping pools through the registry.

#[path = "common/mod.rs"]
mod common;

use common::{
    fast_kind, is_process_alive, wait_for_path_removed, wait_for_pid, wait_for_process_exit,
};
use demonizer::{demon::RestartPolicy, pid_file::PidFileStore, registry::DemonRegistry};
use tempfile::tempdir;

#[test]
fn start_spawns_one_worker_per_slot() {
    let dir = tempdir().unwrap();
    let store = PidFileStore::new(dir.path());
    let registry = DemonRegistry::new(store.clone());
    let kind = fast_kind("pool", None, RestartPolicy::default());

    registry.start(&kind, 3);

    let pids: Vec<u32> = (0..3).map(|slot| wait_for_pid(&store, "pool", slot)).collect();
    assert_eq!(store.list("pool").unwrap().len(), 3);
    assert_eq!(
        registry.running_pids("pool"),
        pids.iter().copied().map(Some).collect::<Vec<_>>()
    );
    let mut unique = pids.clone();
    unique.sort_unstable();
    unique.dedup();
    assert_eq!(unique.len(), 3);

    registry.shutdown();
    for pid in pids {
        wait_for_process_exit(pid);
    }
}

#[test]
fn zero_count_spawns_nothing() {
    let dir = tempdir().unwrap();
    let store = PidFileStore::new(dir.path());
    let registry = DemonRegistry::new(store.clone());

    registry.start(&fast_kind("none", None, RestartPolicy::default()), 0);

    assert!(store.list("none").unwrap().is_empty());
    assert!(registry.running_pids("none").is_empty());
}

#[test]
fn repeated_start_keeps_running_workers() {
    let dir = tempdir().unwrap();
    let store = PidFileStore::new(dir.path());
    let registry = DemonRegistry::new(store.clone());
    let kind = fast_kind("steady", None, RestartPolicy::default());

    registry.start(&kind, 2);
    let first: Vec<u32> = (0..2).map(|slot| wait_for_pid(&store, "steady", slot)).collect();

    registry.start(&kind, 2);
    let second: Vec<u32> = (0..2).map(|slot| wait_for_pid(&store, "steady", slot)).collect();

    assert_eq!(first, second);
    assert!(first.iter().all(|pid| is_process_alive(*pid)));

    registry.shutdown();
}

#[test]
fn stop_removes_pid_files_and_ends_workers() {
    let dir = tempdir().unwrap();
    let store = PidFileStore::new(dir.path());
    let registry = DemonRegistry::new(store.clone());
    let kind = fast_kind("transient", None, RestartPolicy::default());

    registry.start(&kind, 2);
    let pids: Vec<u32> = (0..2)
        .map(|slot| wait_for_pid(&store, "transient", slot))
        .collect();

    registry.stop("transient");

    for slot in 0..2 {
        wait_for_path_removed(&store.path("transient", slot));
    }
    for pid in pids {
        wait_for_process_exit(pid);
    }
    assert_eq!(registry.running_pids("transient"), vec![None, None]);
}

#[test]
fn stopped_pool_can_be_started_again() {
    let dir = tempdir().unwrap();
    let store = PidFileStore::new(dir.path());
    let registry = DemonRegistry::new(store.clone());
    let kind = fast_kind("again", None, RestartPolicy::default());

    registry.start(&kind, 1);
    let first = wait_for_pid(&store, "again", 0);
    registry.stop("again");
    wait_for_path_removed(&store.path("again", 0));

    registry.start(&kind, 1);
    let second = wait_for_pid(&store, "again", 0);
    assert_ne!(first, second);

    registry.shutdown();
    wait_for_process_exit(second);
}
