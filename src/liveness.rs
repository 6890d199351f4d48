//! Process liveness probing.
use nix::{errno::Errno, unistd::Pid};
use tracing::warn;

/// Result of probing a process id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    /// The process exists.
    Alive,
    /// No process with this id exists.
    Dead,
    /// The probe failed for a reason other than "no such process".
    Indeterminate(Errno),
}

impl Liveness {
    /// Whether the process must be treated as present.
    ///
    /// `Indeterminate` counts as alive: misreading an unprobeable process as dead would spawn a
    /// duplicate worker.
    pub fn is_alive(self) -> bool {
        !matches!(self, Liveness::Dead)
    }
}

/// Checks whether `pid` refers to an existing process without signalling it.
///
/// Queries the process group of `pid`; only `ESRCH` is reported as [`Liveness::Dead`].
pub fn probe(pid: u32) -> Liveness {
    let Ok(raw) = i32::try_from(pid) else {
        warn!("PID {pid} is out of range for this platform");
        return Liveness::Dead;
    };
    if raw <= 0 {
        return Liveness::Dead;
    }

    match nix::unistd::getpgid(Some(Pid::from_raw(raw))) {
        Ok(_) => Liveness::Alive,
        Err(Errno::ESRCH) => Liveness::Dead,
        Err(err) => {
            warn!("Unable to probe PID {pid}: {err}; assuming it is still running");
            Liveness::Indeterminate(err)
        }
    }
}

/// Shorthand for `probe(pid).is_alive()`.
pub fn is_alive(pid: u32) -> bool {
    probe(pid).is_alive()
}
