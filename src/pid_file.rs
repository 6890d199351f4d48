//! Per-slot pid files.
//!
//! Each supervised slot is tracked by a single text file at
//! `<state_dir>/pids/<name>_<slot>.pid` holding the worker's decimal process id. The file is
//! written by the supervisor right after spawning a worker and removed by the worker itself when
//! it receives its shutdown signal. A pid file never proves that the process is alive; callers
//! always pair a read with a liveness probe.

use std::{
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
};

use tracing::debug;

use crate::{constants::PID_FILE_EXTENSION, error::PidFileError, runtime};

/// Reads and writes slot pid files under a runtime state directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PidFileStore {
    state_dir: PathBuf,
    dir: PathBuf,
}

impl PidFileStore {
    /// Creates a store rooted at `<state_dir>/pids`.
    pub fn new(state_dir: impl AsRef<Path>) -> Self {
        let state_dir = state_dir.as_ref().to_path_buf();
        Self {
            dir: runtime::pid_dir(&state_dir),
            state_dir,
        }
    }

    /// Runtime state directory the store lives in.
    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    /// Directory holding the pid files.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Returns the pid file path for a slot.
    pub fn path(&self, name: &str, slot: usize) -> PathBuf {
        self.dir.join(format!("{name}_{slot}.{PID_FILE_EXTENSION}"))
    }

    /// Records `pid` for the slot, creating the directory and overwriting prior content.
    pub fn write(&self, name: &str, slot: usize, pid: u32) -> Result<(), PidFileError> {
        fs::create_dir_all(&self.dir)?;
        let path = self.path(name, slot);
        fs::write(&path, pid.to_string())?;
        debug!("Recorded PID {pid} in {}", path.display());
        Ok(())
    }

    /// Returns the recorded pid, or `None` when no file exists for the slot.
    pub fn read(&self, name: &str, slot: usize) -> Result<Option<u32>, PidFileError> {
        match fs::read_to_string(self.path(name, slot)) {
            Ok(contents) => Ok(Some(contents.trim().parse::<u32>()?)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    /// Removes the slot's pid file. A missing file is not an error.
    pub fn delete(&self, name: &str, slot: usize) -> Result<(), PidFileError> {
        match fs::remove_file(self.path(name, slot)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    /// Lists `(slot, pid)` pairs for every readable pid file belonging to `name`, ordered by slot.
    ///
    /// Malformed files and files of other demons are skipped.
    pub fn list(&self, name: &str) -> Result<Vec<(usize, u32)>, PidFileError> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };

        let prefix = format!("{name}_");
        let mut slots: Vec<(usize, u32)> = entries
            .filter_map(Result::ok)
            .filter_map(|entry| {
                let file_name = entry.file_name();
                let stem = file_name
                    .to_str()?
                    .strip_suffix(&format!(".{PID_FILE_EXTENSION}"))?
                    .strip_prefix(&prefix)?
                    .to_string();
                let slot = stem.parse::<usize>().ok()?;
                let pid = self.read(name, slot).ok().flatten()?;
                Some((slot, pid))
            })
            .collect();

        slots.sort_by_key(|(slot, _)| *slot);
        Ok(slots)
    }
}
