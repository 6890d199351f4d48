//! Status reporting for configured demon pools.
//!
//! Status is read from disk only: the supervisor pid file and the per-slot pid files, each paired
//! with a liveness probe. It can therefore be collected from any process, not only the running
//! supervisor.
use std::{
    fmt::Write as _,
    fs,
    path::{Path, PathBuf},
    time::SystemTime,
};

use chrono::{DateTime, Local, Utc};
use serde::Serialize;
use strum_macros::{AsRefStr, Display};
use tracing::debug;

use crate::{
    config::Config, error::PidFileError, liveness, pid_file::PidFileStore, runtime,
};

const GREEN_BOLD: &str = "\x1b[1;32m"; // Bright Green
const RED_BOLD: &str = "\x1b[1;31m"; // Bright Red
const YELLOW_BOLD: &str = "\x1b[1;33m"; // Yellow/Gold
const RESET: &str = "\x1b[0m"; // Reset color

/// Health of a slot as observed from its pid file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, AsRefStr, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SlotHealth {
    /// The pid file names a live process.
    Running,
    /// The pid file names a process that no longer exists.
    Stale,
    /// No pid file exists for the slot.
    Missing,
}

/// Observed state of a single slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SlotStatus {
    pub demon: String,
    pub slot: usize,
    pub pid: Option<u32>,
    pub health: SlotHealth,
    /// Last modification of the pid file, roughly when the current worker was spawned.
    pub since: Option<DateTime<Utc>>,
}

/// Observed state of the supervisor process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SupervisorStatus {
    pub pid: u32,
    pub alive: bool,
}

/// Snapshot of a state directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusReport {
    pub state_dir: PathBuf,
    pub supervisor: Option<SupervisorStatus>,
    pub slots: Vec<SlotStatus>,
}

impl StatusReport {
    /// Collects the status of every slot named by `config` under `state_dir`.
    ///
    /// Slots `0..count` are always reported; pid files for slots beyond the configured count are
    /// reported too, so leftovers from a larger pool remain visible.
    pub fn collect(config: &Config, state_dir: &Path) -> Result<Self, PidFileError> {
        let pid_files = PidFileStore::new(state_dir);
        let mut slots = Vec::new();

        for (name, demon) in &config.demons {
            for slot in 0..demon.count {
                slots.push(slot_status(&pid_files, name, slot)?);
            }
            for (slot, _) in pid_files.list(name)? {
                if slot >= demon.count {
                    slots.push(slot_status(&pid_files, name, slot)?);
                }
            }
        }

        Ok(Self {
            state_dir: state_dir.to_path_buf(),
            supervisor: supervisor_status(state_dir)?,
            slots,
        })
    }

    /// Number of slots whose worker is alive.
    pub fn running(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| slot.health == SlotHealth::Running)
            .count()
    }

    /// Renders the report as JSON.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Renders the report as a human-readable table, with ANSI colours when `color` is set.
    pub fn render(&self, color: bool) -> String {
        let paint = |code: &'static str| if color { code } else { "" };
        let reset = paint(RESET);
        let mut out = String::new();

        match &self.supervisor {
            Some(SupervisorStatus { pid, alive: true }) => {
                let _ = writeln!(
                    out,
                    "{}● Supervisor running{} (PID {pid})",
                    paint(GREEN_BOLD),
                    reset
                );
            }
            Some(SupervisorStatus { pid, alive: false }) => {
                let _ = writeln!(
                    out,
                    "{}● Supervisor not running{} (stale PID {pid})",
                    paint(RED_BOLD),
                    reset
                );
            }
            None => {
                let _ = writeln!(out, "● Supervisor not running");
            }
        }

        if self.slots.is_empty() {
            let _ = writeln!(out, "No configured demons.");
            return out;
        }

        let _ = writeln!(
            out,
            "{:<24} {:<8} {:<10} {}",
            "WORKER", "PID", "STATE", "SINCE"
        );
        for slot in &self.slots {
            let label = format!("{}_{}", slot.demon, slot.slot);
            let pid = slot
                .pid
                .map(|pid| pid.to_string())
                .unwrap_or_else(|| "-".into());
            let since = slot
                .since
                .map(|since| {
                    since
                        .with_timezone(&Local)
                        .format("%Y-%m-%d %H:%M:%S")
                        .to_string()
                })
                .unwrap_or_else(|| "-".into());
            let state_color = match slot.health {
                SlotHealth::Running => GREEN_BOLD,
                SlotHealth::Stale => YELLOW_BOLD,
                SlotHealth::Missing => RED_BOLD,
            };
            let _ = writeln!(
                out,
                "{label:<24} {pid:<8} {}{:<10}{} {since}",
                paint(state_color),
                slot.health.as_ref(),
                reset
            );
        }

        let _ = writeln!(out, "{}/{} workers running", self.running(), self.slots.len());
        out
    }
}

/// Resolves the state directory for a configuration: the config override wins over the runtime
/// default.
pub fn state_dir_for(config: &Config) -> PathBuf {
    config
        .resolved_state_dir()
        .unwrap_or_else(runtime::state_dir)
}

fn slot_status(
    pid_files: &PidFileStore,
    name: &str,
    slot: usize,
) -> Result<SlotStatus, PidFileError> {
    let pid = match pid_files.read(name, slot) {
        Ok(pid) => pid,
        Err(PidFileError::ParseError(err)) => {
            debug!("Ignoring malformed pid file for {name}_{slot}: {err}");
            None
        }
        Err(err) => return Err(err),
    };

    let health = match pid {
        Some(pid) if liveness::is_alive(pid) => SlotHealth::Running,
        Some(_) => SlotHealth::Stale,
        None => SlotHealth::Missing,
    };

    let since = pid.and_then(|_| modified_at(&pid_files.path(name, slot)));

    Ok(SlotStatus {
        demon: name.to_string(),
        slot,
        pid,
        health,
        since,
    })
}

fn supervisor_status(state_dir: &Path) -> Result<Option<SupervisorStatus>, PidFileError> {
    let path = runtime::supervisor_pid_path(state_dir);
    let contents = match fs::read_to_string(&path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    let pid: u32 = match contents.trim().parse() {
        Ok(pid) => pid,
        Err(err) => {
            debug!("Ignoring malformed supervisor pid file {}: {err}", path.display());
            return Ok(None);
        }
    };
    Ok(Some(SupervisorStatus {
        pid,
        alive: liveness::is_alive(pid),
    }))
}

fn modified_at(path: &Path) -> Option<DateTime<Utc>> {
    let modified: SystemTime = fs::metadata(path).ok()?.modified().ok()?;
    Some(DateTime::<Utc>::from(modified))
}
