//! Error handling for demonizer.
use std::num::ParseIntError;

use thiserror::Error;

/// Errors raised while supervising a demon slot.
#[derive(Debug, Error)]
pub enum DemonError {
    /// Error spawning a worker process.
    #[error("Failed to spawn worker '{name}' slot {slot}: {source}")]
    SpawnError {
        /// Demon name the worker belongs to.
        name: String,
        /// Slot index of the worker.
        slot: usize,
        /// The underlying error that occurred.
        #[source]
        source: std::io::Error,
    },

    /// Error starting a monitor thread.
    #[error("Failed to start monitor thread '{task}': {source}")]
    MonitorError {
        /// Name of the monitor thread.
        task: String,
        /// The underlying error that occurred.
        #[source]
        source: std::io::Error,
    },

    /// Error delivering a signal to a process.
    #[error("Failed to send {signal} to PID {pid}: {source}")]
    SignalError {
        /// Target process id.
        pid: u32,
        /// Signal that could not be delivered.
        signal: nix::sys::signal::Signal,
        /// The underlying errno.
        #[source]
        source: nix::errno::Errno,
    },
}

/// Error type for PID file operations.
#[derive(Debug, Error)]
pub enum PidFileError {
    /// Error reading, writing or removing a PID file.
    #[error("Failed to access PID file: {0}")]
    Io(#[from] std::io::Error),

    /// The file does not contain a decimal process id.
    #[error("Failed to parse PID file: {0}")]
    ParseError(#[from] ParseIntError),
}

/// Errors raised while loading the configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Error reading or accessing a configuration file.
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    /// Error parsing YAML configuration.
    #[error("Invalid YAML format: {0}")]
    ParseError(#[from] serde_yaml::Error),

    /// A `${VAR}` reference names an unset environment variable.
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    /// A duration string could not be parsed.
    #[error("Invalid duration '{0}'")]
    InvalidDuration(String),

    /// A field holds a value outside of its accepted range.
    #[error("Invalid value for '{field}' in demon '{demon}': {reason}")]
    InvalidValue {
        /// Demon whose configuration is invalid.
        demon: String,
        /// Offending field.
        field: &'static str,
        /// Why the value was rejected.
        reason: String,
    },
}

/// Faults raised inside a worker process.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// A collaborator resource could not be re-established after spawn.
    #[error("Failed to reconnect {resource}: {reason}")]
    ReconnectError {
        /// Resource being re-established (store, cache, bus).
        resource: &'static str,
        /// Collaborator-supplied failure description.
        reason: String,
    },

    /// The worker command could not be launched or waited on.
    #[error("Worker command I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// The worker command exited unsuccessfully.
    #[error("Worker command exited with status {code:?} (signal {signal:?})")]
    CommandFailed {
        /// Exit code, if the command exited normally.
        code: Option<i32>,
        /// Terminating signal, if any.
        signal: Option<i32>,
    },

    /// Installing the shutdown handler failed.
    #[error("Failed to install shutdown handler: {0}")]
    SignalSetup(#[from] nix::errno::Errno),

    /// The entry point panicked.
    #[error("Worker panicked: {0}")]
    Panic(String),
}

/// Errors emitted by the CLI-facing supervisor runtime.
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Demon(#[from] DemonError),
    #[error(transparent)]
    PidFile(#[from] PidFileError),
    #[error("Failed to install signal handler: {0}")]
    Signal(#[from] ctrlc::Error),
    #[error("Another supervisor is already running with PID {0}")]
    AlreadyRunning(u32),
    #[error("Unknown demon '{0}'")]
    UnknownDemon(String),
}
