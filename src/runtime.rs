//! Runtime paths and modes.
#[cfg(test)]
use std::path::Path;
use std::{
    env,
    path::PathBuf,
    sync::{OnceLock, RwLock},
};

use crate::constants::{PID_DIR_NAME, SUPERVISOR_PID_FILE_NAME};

/// Where to store pid files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeMode {
    /// User home dir (~/.local/share/demonizer).
    User,
    /// System dirs (/var/lib/demonizer).
    System,
}

#[derive(Debug, Clone)]
struct RuntimeContext {
    state_dir: PathBuf,
}

static CONTEXT: OnceLock<RwLock<RuntimeContext>> = OnceLock::new();

fn context_lock() -> &'static RwLock<RuntimeContext> {
    CONTEXT.get_or_init(|| RwLock::new(RuntimeContext::from_mode(RuntimeMode::User)))
}

impl RuntimeContext {
    fn from_mode(mode: RuntimeMode) -> Self {
        match mode {
            RuntimeMode::User => Self::user_directories(),
            RuntimeMode::System => Self::system_directories(),
        }
    }

    fn user_directories() -> Self {
        let home = env::var_os("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("/"));
        Self::from_user_home(home)
    }

    fn from_user_home(home: PathBuf) -> Self {
        Self {
            state_dir: home.join(".local/share/demonizer"),
        }
    }

    fn system_directories() -> Self {
        Self {
            state_dir: PathBuf::from("/var/lib/demonizer"),
        }
    }
}

/// Sets runtime mode. Can be called multiple times.
pub fn init(mode: RuntimeMode) {
    let mut guard = context_lock()
        .write()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    *guard = RuntimeContext::from_mode(mode);
}

#[cfg(test)]
pub fn init_with_test_home(home: &Path) {
    let mut guard = context_lock()
        .write()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    *guard = RuntimeContext::from_user_home(home.to_path_buf());
}

/// State dir (pid files, supervisor pid).
pub fn state_dir() -> PathBuf {
    context_lock()
        .read()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .state_dir
        .clone()
}

/// Directory holding per-slot pid files for a given state dir.
pub fn pid_dir(state_dir: &std::path::Path) -> PathBuf {
    state_dir.join(PID_DIR_NAME)
}

/// Path of the supervisor's own pid file for a given state dir.
pub fn supervisor_pid_path(state_dir: &std::path::Path) -> PathBuf {
    state_dir.join(SUPERVISOR_PID_FILE_NAME)
}
