//! The worker half of the spawn protocol.
//!
//! [`run`] is what a re-executed worker process does before and around its actual work:
//!
//! 1. watch the supervisor and exit as soon as it disappears,
//! 2. re-establish host resources that cannot be inherited from the supervisor,
//! 3. listen for the shutdown signal, which removes the slot's pid file and exits,
//! 4. point standard output at `/dev/null`,
//! 5. run the entry point, turning any fault into a logged stack trace and exit status 1.
use std::{
    backtrace::Backtrace,
    fs::OpenOptions,
    ops::ControlFlow,
    os::{fd::AsRawFd, unix::process::ExitStatusExt},
    panic::{self, AssertUnwindSafe},
    process::{self, Command},
    thread,
    time::Duration,
};

use nix::sys::signal::{SigSet, SigmaskHow, pthread_sigmask};
use tracing::{debug, error, info, warn};

use crate::{
    constants::{
        DEFAULT_SHELL, DEV_NULL, IDLE_HEARTBEAT_INTERVAL, SHELL_COMMAND_FLAG,
        SHUTDOWN_SIGNAL, WORKER_FAULT_EXIT_CODE,
    },
    error::WorkerError,
    liveness::{self, Liveness},
    monitor::PeriodicTask,
    pid_file::PidFileStore,
    spawn::WorkerInvocation,
};

/// Resources of the host application that must be rebuilt inside a fresh worker process.
///
/// Called in declaration order, once, before the entry point runs.
pub trait HostEnvironment {
    /// Re-establish the persistent data store connection or pool.
    fn reconnect_store(&mut self) -> Result<(), WorkerError> {
        Ok(())
    }

    /// Re-establish the cache connection.
    fn reconnect_cache(&mut self) -> Result<(), WorkerError> {
        Ok(())
    }

    /// Re-attach to the publish/subscribe bus.
    fn reconnect_bus(&mut self) -> Result<(), WorkerError> {
        Ok(())
    }
}

/// Host with nothing to reconnect.
#[derive(Debug, Default, Clone, Copy)]
pub struct DetachedHost;

impl HostEnvironment for DetachedHost {}

/// The work a worker process performs. Blocks for the life of the worker.
pub trait WorkerEntryPoint {
    fn run(&mut self) -> Result<(), WorkerError>;
}

/// Runs a shell command and fails if it exits unsuccessfully.
///
/// On Linux the command is killed when the worker dies.
#[derive(Debug, Clone)]
pub struct CommandWorker {
    command: String,
}

impl CommandWorker {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

impl WorkerEntryPoint for CommandWorker {
    fn run(&mut self) -> Result<(), WorkerError> {
        debug!("Executing worker command: `{}`", self.command);

        let mut cmd = Command::new(DEFAULT_SHELL);
        cmd.arg(SHELL_COMMAND_FLAG).arg(&self.command);

        unsafe {
            use std::os::unix::process::CommandExt;

            cmd.pre_exec(|| {
                // The worker keeps the shutdown signal blocked; the command must not inherit that.
                let mut shutdown = SigSet::empty();
                shutdown.add(SHUTDOWN_SIGNAL);
                pthread_sigmask(SigmaskHow::SIG_UNBLOCK, Some(&shutdown), None)?;

                #[cfg(target_os = "linux")]
                {
                    use libc::{PR_SET_PDEATHSIG, SIGTERM, prctl};
                    if prctl(PR_SET_PDEATHSIG, SIGTERM, 0, 0, 0) < 0 {
                        return Err(std::io::Error::last_os_error());
                    }
                }
                Ok(())
            });
        }

        let status = cmd.status()?;
        if status.success() {
            info!("Worker command exited normally");
            Ok(())
        } else {
            Err(WorkerError::CommandFailed {
                code: status.code(),
                signal: status.signal(),
            })
        }
    }
}

/// Does nothing until the worker is told to stop.
#[derive(Debug, Clone)]
pub struct IdleWorker {
    heartbeat: Duration,
}

impl Default for IdleWorker {
    fn default() -> Self {
        Self {
            heartbeat: IDLE_HEARTBEAT_INTERVAL,
        }
    }
}

impl WorkerEntryPoint for IdleWorker {
    fn run(&mut self) -> Result<(), WorkerError> {
        loop {
            thread::sleep(self.heartbeat);
            debug!("Idle worker heartbeat");
        }
    }
}

/// Identity of the slot a worker process serves.
#[derive(Debug, Clone)]
pub struct WorkerContext {
    pub name: String,
    pub slot: usize,
    pub supervisor_pid: u32,
    pub pid_files: PidFileStore,
    pub parent_poll_interval: Duration,
}

impl From<&WorkerInvocation> for WorkerContext {
    fn from(invocation: &WorkerInvocation) -> Self {
        Self {
            name: invocation.name.clone(),
            slot: invocation.slot,
            supervisor_pid: invocation.supervisor_pid,
            pid_files: PidFileStore::new(&invocation.state_dir),
            parent_poll_interval: invocation.parent_poll_interval,
        }
    }
}

/// Runs the worker side of the protocol and returns the process exit status.
///
/// Returns `0` when the entry point returns normally and `1` on any fault. The process may also
/// exit from a background thread: with status `0` on the shutdown signal or when the supervisor
/// is found dead.
pub fn run<H, E>(context: &WorkerContext, host: &mut H, entry: &mut E) -> i32
where
    H: HostEnvironment,
    E: WorkerEntryPoint,
{
    match prepare(context, host) {
        Ok(()) => {}
        Err(err) => {
            report_fault(context, &err, Backtrace::force_capture());
            return WORKER_FAULT_EXIT_CODE;
        }
    }

    panic::set_hook(Box::new(|info| {
        let backtrace = Backtrace::force_capture();
        eprintln!("{info}\n{backtrace}");
    }));

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| entry.run()));
    let _ = panic::take_hook();

    match outcome {
        Ok(Ok(())) => {
            info!("Worker {}_{} finished", context.name, context.slot);
            0
        }
        Ok(Err(err)) => {
            report_fault(context, &err, Backtrace::force_capture());
            WORKER_FAULT_EXIT_CODE
        }
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "non-string panic payload".to_string());
            error!(
                "Worker {}_{} failed: {}",
                context.name,
                context.slot,
                WorkerError::Panic(message)
            );
            WORKER_FAULT_EXIT_CODE
        }
    }
}

fn prepare<H: HostEnvironment>(
    context: &WorkerContext,
    host: &mut H,
) -> Result<(), WorkerError> {
    // Keep the shutdown signal pending until its listener exists; every thread spawned from
    // here on inherits the mask.
    let mut shutdown = SigSet::empty();
    shutdown.add(SHUTDOWN_SIGNAL);
    pthread_sigmask(SigmaskHow::SIG_BLOCK, Some(&shutdown), None)?;

    monitor_parent(context)?;

    host.reconnect_store()?;
    host.reconnect_cache()?;
    host.reconnect_bus()?;

    listen_for_shutdown(context, shutdown)?;
    redirect_stdout()?;
    Ok(())
}

/// Exits the process as soon as the supervisor is gone.
fn monitor_parent(context: &WorkerContext) -> Result<(), WorkerError> {
    let supervisor_pid = context.supervisor_pid;
    exit_if_orphaned(supervisor_pid);

    let task = format!("parent-monitor-{}-{}", context.name, context.slot);
    PeriodicTask::new(task, context.parent_poll_interval).spawn_detached(move |_| {
        exit_if_orphaned(supervisor_pid);
        ControlFlow::Continue(())
    })?;
    Ok(())
}

fn exit_if_orphaned(supervisor_pid: u32) {
    if liveness::probe(supervisor_pid) == Liveness::Dead {
        warn!("Supervisor {supervisor_pid} is gone; exiting");
        process::exit(0);
    }
}

/// Waits for the shutdown signal on a dedicated thread, then removes the pid file and exits.
fn listen_for_shutdown(context: &WorkerContext, signals: SigSet) -> Result<(), WorkerError> {
    let pid_files = context.pid_files.clone();
    let name = context.name.clone();
    let slot = context.slot;

    thread::Builder::new()
        .name(format!("shutdown-{name}-{slot}"))
        .spawn(move || {
            loop {
                match signals.wait() {
                    Ok(signal) if signal == SHUTDOWN_SIGNAL => break,
                    Ok(other) => debug!("Ignoring unexpected {other}"),
                    Err(err) => {
                        error!("Waiting for {SHUTDOWN_SIGNAL} failed: {err}");
                        return;
                    }
                }
            }

            info!("Worker {name}_{slot} received {SHUTDOWN_SIGNAL}; shutting down");
            if let Err(err) = pid_files.delete(&name, slot) {
                error!("Failed to remove pid file for {name}_{slot}: {err}");
            }
            process::exit(0);
        })?;
    Ok(())
}

fn redirect_stdout() -> Result<(), WorkerError> {
    let devnull = OpenOptions::new().write(true).open(DEV_NULL)?;
    nix::unistd::dup2(devnull.as_raw_fd(), libc::STDOUT_FILENO)?;
    Ok(())
}

/// Logs a fault and writes it, its causes and `backtrace` to stderr.
///
/// Errors carry no trace of where they were raised, so callers capture `backtrace` at the point
/// the fault is reported. Panics never come through here: the panic hook prints their own trace
/// from the panicking frame.
fn report_fault(context: &WorkerContext, err: &WorkerError, backtrace: Backtrace) {
    error!("Worker {}_{} failed: {err}", context.name, context.slot);
    eprintln!("{err}");
    let mut source = std::error::Error::source(err);
    while let Some(cause) = source {
        eprintln!("caused by: {cause}");
        source = cause.source();
    }
    eprintln!("{backtrace}");
}
