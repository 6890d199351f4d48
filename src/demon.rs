//! Supervision of a single worker slot.
//!
//! A [`DemonInstance`] owns one slot of a named worker pool. Starting it spawns a worker
//! process, records the worker's pid on disk and starts a child monitor that restarts the worker
//! whenever it disappears. Stopping it cancels the monitor first, then asks the worker to exit.
use std::{
    ops::ControlFlow,
    path::PathBuf,
    process::Child,
    sync::{Arc, Mutex, MutexGuard, Weak},
    thread,
    time::Duration,
};

use nix::{sys::signal::Signal, unistd::Pid};
use strum_macros::{AsRefStr, Display};
use tracing::{debug, error, info, warn};

use crate::{
    constants::{
        CHILD_POLL_INTERVAL, FORCE_KILL_SIGNAL, PARENT_POLL_INTERVAL, SHUTDOWN_SIGNAL,
    },
    error::DemonError,
    liveness,
    monitor::{Cancellation, MonitorHandle, PeriodicTask},
    pid_file::PidFileStore,
    spawn::WorkerInvocation,
};

/// How a slot reacts to repeated worker deaths.
///
/// The default restarts forever and immediately.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RestartPolicy {
    /// Give up after this many restarts since the slot was last started explicitly.
    pub max_restarts: Option<u32>,
    /// Delay before each restart.
    pub backoff: Option<Duration>,
}

/// Static description of a pool of workers sharing a name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DemonKind {
    /// Demon name, used as the pid file prefix.
    pub name: String,
    /// Program re-executed in the worker role.
    pub program: PathBuf,
    /// Shell command run by each worker; workers idle when absent.
    pub command: Option<String>,
    /// Restart behaviour for crashed workers.
    pub restart: RestartPolicy,
    /// Interval between worker liveness checks.
    pub child_poll_interval: Duration,
    /// Interval between supervisor liveness checks inside each worker.
    pub parent_poll_interval: Duration,
}

impl DemonKind {
    /// Creates a kind with default intervals and restart policy.
    pub fn new(name: impl Into<String>, program: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            program: program.into(),
            command: None,
            restart: RestartPolicy::default(),
            child_poll_interval: CHILD_POLL_INTERVAL,
            parent_poll_interval: PARENT_POLL_INTERVAL,
        }
    }

    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.command = Some(command.into());
        self
    }

    pub fn with_restart_policy(mut self, restart: RestartPolicy) -> Self {
        self.restart = restart;
        self
    }

    pub fn with_poll_intervals(mut self, child: Duration, parent: Duration) -> Self {
        self.child_poll_interval = child;
        self.parent_poll_interval = parent;
        self
    }
}

/// Lifecycle state of a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, AsRefStr, Display)]
#[strum(serialize_all = "snake_case")]
pub enum SlotState {
    Stopped,
    Starting,
    /// A prior worker recorded in the pid file was found alive and is being killed.
    ForceKillPrior,
    Running,
    Stopping,
    /// The restart policy's limit was reached; the slot waits for an explicit start.
    Exhausted,
}

#[derive(Debug)]
struct Slot {
    state: SlotState,
    worker_pid: Option<u32>,
    worker: Option<Child>,
    monitor: Option<MonitorHandle>,
    restarts: u32,
}

/// One supervised worker slot.
///
/// `start` and `stop` must not be called for the same instance from two control paths at once;
/// the child monitor is the only other party touching the slot.
#[derive(Debug)]
pub struct DemonInstance {
    kind: Arc<DemonKind>,
    slot: usize,
    supervisor_pid: u32,
    pid_files: PidFileStore,
    inner: Mutex<Slot>,
}

impl DemonInstance {
    /// Creates a stopped instance for `slot`, owned by the current process.
    pub fn new(kind: Arc<DemonKind>, slot: usize, pid_files: PidFileStore) -> Arc<Self> {
        Arc::new(Self {
            kind,
            slot,
            supervisor_pid: std::process::id(),
            pid_files,
            inner: Mutex::new(Slot {
                state: SlotState::Stopped,
                worker_pid: None,
                worker: None,
                monitor: None,
                restarts: 0,
            }),
        })
    }

    pub fn slot(&self) -> usize {
        self.slot
    }

    /// PID of the worker currently tracked in memory.
    pub fn worker_pid(&self) -> Option<u32> {
        self.lock().worker_pid
    }

    pub fn state(&self) -> SlotState {
        self.lock().state
    }

    /// Workers the child monitor has successfully re-spawned since the last explicit start.
    pub fn restarts(&self) -> u32 {
        self.lock().restarts
    }

    /// Whether a child monitor is currently polling this slot.
    pub fn is_monitored(&self) -> bool {
        self.lock()
            .monitor
            .as_ref()
            .is_some_and(|monitor| !monitor.is_finished())
    }

    /// Starts a worker for this slot unless one is already tracked.
    ///
    /// A live process named by the slot's pid file that this instance does not track is left
    /// over from an earlier supervisor; it is sent SIGTERM before a fresh worker is spawned.
    /// Failures are logged; the slot is left stopped.
    pub fn start(self: &Arc<Self>) {
        let mut slot = self.lock();
        if matches!(slot.state, SlotState::Stopped | SlotState::Exhausted) {
            slot.restarts = 0;
        }

        if let Err(err) = self.start_locked(&mut slot) {
            error!("Failed to start {}: {err}", self.label());
            slot.state = SlotState::Stopped;
        }
    }

    /// Stops the slot: joins the child monitor, then sends the shutdown signal to the worker.
    ///
    /// Does not wait for the worker to exit or to delete its pid file.
    pub fn stop(&self) {
        let monitor = {
            let mut slot = self.lock();
            slot.state = SlotState::Stopping;
            slot.monitor.take()
        };

        if let Some(monitor) = monitor {
            debug!("Cancelling monitor '{}'", monitor.name());
            monitor.cancel_and_join();
        }

        let mut slot = self.lock();
        if let Some(pid) = slot.worker_pid.take() {
            info!("Stopping {} (PID {pid})", self.label());
            if let Err(err) = send_signal(pid, SHUTDOWN_SIGNAL) {
                warn!("{err}");
            }
        }
        if let Some(child) = slot.worker.take() {
            reap_in_background(child, self.label());
        }
        slot.restarts = 0;
        slot.state = SlotState::Stopped;
    }

    /// Returns the pid recorded in the slot's pid file if that process is alive.
    ///
    /// Missing, unreadable and malformed pid files all count as "not running".
    pub fn already_running(&self) -> Option<u32> {
        match self.pid_files.read(&self.kind.name, self.slot) {
            Ok(Some(pid)) if liveness::is_alive(pid) => Some(pid),
            Ok(_) => None,
            Err(err) => {
                debug!("Ignoring unreadable pid file for {}: {err}", self.label());
                None
            }
        }
    }

    fn start_locked(self: &Arc<Self>, slot: &mut Slot) -> Result<(), DemonError> {
        if let Some(existing) = self.already_running()
            && slot.worker_pid != Some(existing)
        {
            slot.state = SlotState::ForceKillPrior;
            warn!(
                "{} is still held by PID {existing} from an earlier run; sending {FORCE_KILL_SIGNAL}",
                self.label()
            );
            if let Err(err) = send_signal(existing, FORCE_KILL_SIGNAL) {
                warn!("{err}");
            }
        }

        if let Some(pid) = slot.worker_pid {
            debug!("{} already running with PID {pid}", self.label());
            slot.state = SlotState::Running;
            return Ok(());
        }

        slot.state = SlotState::Starting;
        let child = self.spawn_worker()?;
        let pid = child.id();
        slot.worker_pid = Some(pid);
        slot.worker = Some(child);

        if let Err(err) = self.pid_files.write(&self.kind.name, self.slot, pid) {
            error!("Failed to record PID {pid} for {}: {err}", self.label());
        }

        match self.monitor_child() {
            Ok(monitor) => slot.monitor = Some(monitor),
            Err(err) => {
                slot.worker_pid = None;
                if let Err(signal_err) = send_signal(pid, SHUTDOWN_SIGNAL) {
                    warn!("{signal_err}");
                }
                if let Some(child) = slot.worker.take() {
                    reap_in_background(child, self.label());
                }
                return Err(err);
            }
        }

        slot.state = SlotState::Running;
        info!("Started {} with PID {pid}", self.label());
        Ok(())
    }

    fn spawn_worker(&self) -> Result<Child, DemonError> {
        let invocation = WorkerInvocation {
            name: self.kind.name.clone(),
            slot: self.slot,
            supervisor_pid: self.supervisor_pid,
            state_dir: self.pid_files.state_dir().to_path_buf(),
            parent_poll_interval: self.kind.parent_poll_interval,
            command: self.kind.command.clone(),
        };

        debug!(
            "Spawning {} via {}",
            self.label(),
            self.kind.program.display()
        );
        invocation
            .to_command(&self.kind.program)
            .spawn()
            .map_err(|source| DemonError::SpawnError {
                name: self.kind.name.clone(),
                slot: self.slot,
                source,
            })
    }

    fn monitor_child(self: &Arc<Self>) -> Result<MonitorHandle, DemonError> {
        let task = format!("monitor-{}-{}", self.kind.name, self.slot);
        let instance = Arc::downgrade(self);

        PeriodicTask::new(task.clone(), self.kind.child_poll_interval)
            .spawn(move |cancellation| Self::check_worker(&instance, cancellation))
            .map_err(|source| DemonError::MonitorError { task, source })
    }

    /// One child monitor tick. Breaks once it has handed the slot to a new monitor.
    fn check_worker(instance: &Weak<Self>, cancellation: &Cancellation) -> ControlFlow<()> {
        let Some(this) = instance.upgrade() else {
            return ControlFlow::Break(());
        };

        {
            let mut slot = this.lock();
            if slot.state != SlotState::Running || cancellation.is_cancelled() {
                return ControlFlow::Break(());
            }
            let Some(pid) = slot.worker_pid else {
                return ControlFlow::Break(());
            };

            this.reap_exited(&mut slot);
            if liveness::probe(pid).is_alive() {
                return ControlFlow::Continue(());
            }

            warn!("{pid} died, restarting {}", this.label());
            slot.worker_pid = None;
            slot.worker = None;

            if let Some(max) = this.kind.restart.max_restarts
                && slot.restarts >= max
            {
                error!(
                    "{} has reached maximum restart attempts ({max}). Giving up.",
                    this.label()
                );
                slot.state = SlotState::Exhausted;
                slot.monitor = None;
                return ControlFlow::Break(());
            }
        }

        if let Some(backoff) = this.kind.restart.backoff {
            info!("Restarting {} after {backoff:?}", this.label());
            if !cancellation.sleep(backoff) {
                return ControlFlow::Break(());
            }
        }

        let mut slot = this.lock();
        if slot.state != SlotState::Running || cancellation.is_cancelled() {
            return ControlFlow::Break(());
        }
        match this.start_locked(&mut slot) {
            Ok(()) => slot.restarts += 1,
            Err(err) => {
                error!("Failed to restart {}: {err}", this.label());
                slot.state = SlotState::Stopped;
                slot.monitor = None;
            }
        }

        ControlFlow::Break(())
    }

    /// Collects the exit status of a finished worker so the pid stops resolving.
    fn reap_exited(&self, slot: &mut Slot) {
        let Some(child) = slot.worker.as_mut() else {
            return;
        };

        match child.try_wait() {
            Ok(Some(status)) => {
                debug!("{} exited with {status}", self.label());
                slot.worker = None;
            }
            Ok(None) => {}
            Err(err) => warn!("Failed to check exit status of {}: {err}", self.label()),
        }
    }

    fn label(&self) -> String {
        format!("{}_{}", self.kind.name, self.slot)
    }

    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Sends `signal` to `pid`. A process that is already gone is not an error.
pub fn send_signal(pid: u32, signal: Signal) -> Result<(), DemonError> {
    let target = i32::try_from(pid).map_err(|_| DemonError::SignalError {
        pid,
        signal,
        source: nix::errno::Errno::EINVAL,
    })?;

    match nix::sys::signal::kill(Pid::from_raw(target), Some(signal)) {
        Ok(()) => {
            debug!("Sent {signal} to PID {pid}");
            Ok(())
        }
        Err(nix::errno::Errno::ESRCH) => {
            debug!("PID {pid} exited before {signal} could be delivered");
            Ok(())
        }
        Err(source) => Err(DemonError::SignalError {
            pid,
            signal,
            source,
        }),
    }
}

/// Waits for a signalled worker on a throwaway thread to avoid leaving a zombie behind.
fn reap_in_background(mut child: Child, label: String) {
    let spawned = thread::Builder::new()
        .name(format!("reap-{label}"))
        .spawn(move || match child.wait() {
            Ok(status) => debug!("{label} exited with {status}"),
            Err(err) => warn!("Failed to wait on {label}: {err}"),
        });

    if let Err(err) = spawned {
        warn!("Failed to start reaper thread: {err}");
    }
}
