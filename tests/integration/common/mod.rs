#![allow(dead_code)]

use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

use demonizer::{
    demon::{DemonKind, RestartPolicy},
    pid_file::PidFileStore,
};
use sysinfo::{Pid, ProcessesToUpdate, System};

/// Path of the `demon` binary under test; re-executed as the worker program.
pub fn demon_bin() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_demon"))
}

/// A demon kind backed by the real binary with intervals short enough for tests.
pub fn fast_kind(name: &str, command: Option<&str>, restart: RestartPolicy) -> Arc<DemonKind> {
    let mut kind = DemonKind::new(name, demon_bin())
        .with_restart_policy(restart)
        .with_poll_intervals(Duration::from_millis(150), Duration::from_millis(150));
    if let Some(command) = command {
        kind = kind.with_command(command);
    }
    Arc::new(kind)
}

pub fn wait_until<F: FnMut() -> bool>(timeout: Duration, mut check: F) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        thread::sleep(Duration::from_millis(50));
    }
    false
}

/// Waits for the slot's pid file to name a live process and returns that pid.
pub fn wait_for_pid(store: &PidFileStore, name: &str, slot: usize) -> u32 {
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        if let Ok(Some(pid)) = store.read(name, slot)
            && is_process_alive(pid)
        {
            return pid;
        }

        if Instant::now() >= deadline {
            panic!("Timed out waiting for a live PID in {:?}", store.path(name, slot));
        }

        thread::sleep(Duration::from_millis(50));
    }
}

/// Waits for the slot's pid file to name a live process other than `previous`.
pub fn wait_for_pid_change(store: &PidFileStore, name: &str, slot: usize, previous: u32) -> u32 {
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        if let Ok(Some(pid)) = store.read(name, slot)
            && pid != previous
            && is_process_alive(pid)
        {
            return pid;
        }

        if Instant::now() >= deadline {
            panic!("Timed out waiting for {name}_{slot} to record a new PID");
        }

        thread::sleep(Duration::from_millis(50));
    }
}

pub fn wait_for_path_removed(path: &Path) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while Instant::now() < deadline {
        if !path.exists() {
            return;
        }
        thread::sleep(Duration::from_millis(50));
    }
    panic!("Timed out waiting for {:?} to be removed", path);
}

pub fn wait_for_path(path: &Path) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while Instant::now() < deadline {
        if path.exists() {
            return;
        }
        thread::sleep(Duration::from_millis(50));
    }
    panic!("Timed out waiting for {:?} to exist", path);
}

/// Waits until `pid` is gone or only lingers as a zombie.
#[cfg(target_os = "linux")]
pub fn wait_for_process_exit(pid: u32) {
    let deadline = Instant::now() + Duration::from_secs(10);
    let proc_path = PathBuf::from(format!("/proc/{}", pid));
    let stat_path = PathBuf::from(format!("/proc/{}/stat", pid));

    while Instant::now() < deadline {
        if !proc_path.exists() {
            return;
        }

        if let Ok(stat) = fs::read_to_string(&stat_path)
            && let Some(state_start) = stat.rfind(')')
            && let Some(state_char) = stat[state_start + 1..].trim().chars().next()
            && (state_char == 'Z' || state_char == 'X')
        {
            return;
        }

        thread::sleep(Duration::from_millis(50));
    }

    panic!("Timed out waiting for PID {} to exit", pid);
}

#[cfg(not(target_os = "linux"))]
pub fn wait_for_process_exit(pid: u32) {
    if !wait_until(Duration::from_secs(10), || !is_process_alive(pid)) {
        panic!("Timed out waiting for PID {} to exit", pid);
    }
}

pub fn is_process_alive(pid: u32) -> bool {
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::All, true);
    system.process(Pid::from_u32(pid)).is_some()
}

/// Writes a config file into `dir` and returns its path.
pub fn write_config(dir: &Path, body: &str) -> PathBuf {
    let path = dir.join("demon.yaml");
    fs::write(&path, body).expect("write config");
    path
}
