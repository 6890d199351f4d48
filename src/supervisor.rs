//! Supervisor runtime: owns the registry of demon pools and the supervisor pid file.
use std::{
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::Arc,
};

use crossbeam_channel::{Receiver, bounded};
use tracing::{debug, info, warn};

use crate::{
    config::Config,
    constants::SUPERVISOR_STOP_SIGNAL,
    demon::{DemonKind, send_signal},
    error::{PidFileError, SupervisorError},
    liveness,
    pid_file::PidFileStore,
    registry::DemonRegistry,
    runtime,
};

/// Long-lived supervisor that keeps every configured pool at its slot count until told to stop.
pub struct Supervisor {
    state_dir: PathBuf,
    kinds: Vec<(Arc<DemonKind>, usize)>,
    registry: DemonRegistry,
}

impl Supervisor {
    /// Creates a supervisor for the demons in `config`.
    ///
    /// `program` is re-executed in the worker role for every slot. When `demon_filter` is set,
    /// only that demon is supervised.
    pub fn new(
        config: &Config,
        program: &Path,
        state_dir: PathBuf,
        demon_filter: Option<&str>,
    ) -> Result<Self, SupervisorError> {
        let mut kinds = config.demon_kinds(program)?;
        if let Some(filter) = demon_filter {
            kinds.retain(|(kind, _)| kind.name == filter);
            if kinds.is_empty() {
                return Err(SupervisorError::UnknownDemon(filter.to_string()));
            }
        }

        Ok(Self {
            registry: DemonRegistry::new(PidFileStore::new(&state_dir)),
            state_dir,
            kinds,
        })
    }

    /// Starts every configured pool.
    pub fn start(&self) {
        for (kind, count) in &self.kinds {
            self.registry.start(kind, *count);
        }
    }

    /// Stops every pool.
    pub fn shutdown(&self) {
        info!("Shutting down all demons");
        self.registry.shutdown();
    }

    /// Records the supervisor pid, starts all pools and blocks until SIGINT or SIGTERM.
    pub fn run(&self) -> Result<(), SupervisorError> {
        let (tx, rx) = bounded::<()>(1);
        ctrlc::set_handler(move || {
            let _ = tx.try_send(());
        })?;
        self.run_until(rx)
    }

    /// Like [`Supervisor::run`], but returns once `shutdown` yields or disconnects.
    pub fn run_until(&self, shutdown: Receiver<()>) -> Result<(), SupervisorError> {
        acquire_supervisor_pid(&self.state_dir)?;
        info!(
            "Supervisor {} managing state in {}",
            std::process::id(),
            self.state_dir.display()
        );

        self.start();
        let _ = shutdown.recv();
        info!("Termination requested");

        self.shutdown();
        release_supervisor_pid(&self.state_dir)?;
        Ok(())
    }
}

/// Reads the pid recorded in `<state_dir>/demon.pid`, if any.
pub fn read_supervisor_pid(state_dir: &Path) -> Result<Option<u32>, PidFileError> {
    match fs::read_to_string(runtime::supervisor_pid_path(state_dir)) {
        Ok(contents) => Ok(Some(contents.trim().parse()?)),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err.into()),
    }
}

fn acquire_supervisor_pid(state_dir: &Path) -> Result<(), SupervisorError> {
    if let Some(pid) = read_supervisor_pid(state_dir)? {
        if pid != std::process::id() && liveness::is_alive(pid) {
            return Err(SupervisorError::AlreadyRunning(pid));
        }
        debug!("Replacing stale supervisor pid file naming {pid}");
    }

    fs::create_dir_all(state_dir).map_err(PidFileError::from)?;
    fs::write(
        runtime::supervisor_pid_path(state_dir),
        std::process::id().to_string(),
    )
    .map_err(PidFileError::from)?;
    Ok(())
}

fn release_supervisor_pid(state_dir: &Path) -> Result<(), SupervisorError> {
    match fs::remove_file(runtime::supervisor_pid_path(state_dir)) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(PidFileError::from(err).into()),
    }
}

/// Asks the supervisor recorded under `state_dir` to shut down.
///
/// Returns the signalled pid, or `None` when no live supervisor was found. A pid file naming a
/// dead process is removed.
pub fn stop_running_supervisor(state_dir: &Path) -> Result<Option<u32>, SupervisorError> {
    let Some(pid) = read_supervisor_pid(state_dir)? else {
        return Ok(None);
    };

    if !liveness::is_alive(pid) {
        warn!("Supervisor pid file names dead process {pid}; removing it");
        release_supervisor_pid(state_dir)?;
        return Ok(None);
    }

    info!("Sending {SUPERVISOR_STOP_SIGNAL} to supervisor {pid}");
    send_signal(pid, SUPERVISOR_STOP_SIGNAL)?;
    Ok(Some(pid))
}
