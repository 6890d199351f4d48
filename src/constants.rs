//! Constants and default values for the demonizer supervisor.
//!
//! This module centralizes the magic numbers, file names and signal choices used across the
//! supervisor and worker halves of the spawn protocol.

use std::time::Duration;

use nix::sys::signal::Signal;

// ============================================================================
// File System Constants
// ============================================================================

/// Directory (under the runtime state directory) that holds per-slot pid files.
pub const PID_DIR_NAME: &str = "pids";

/// Extension used for per-slot pid files (`<name>_<slot>.pid`).
pub const PID_FILE_EXTENSION: &str = "pid";

/// Name of the file recording the supervisor's own pid.
pub const SUPERVISOR_PID_FILE_NAME: &str = "demon.pid";

/// Default configuration file looked up when `--config` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "demon.yaml";

/// Null device that a worker's standard output is redirected to.
pub const DEV_NULL: &str = "/dev/null";

// ============================================================================
// Monitor Timing
// ============================================================================

/// Interval between worker liveness checks performed by the supervisor.
pub const CHILD_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Interval between supervisor liveness checks performed by each worker.
pub const PARENT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Interval at which the idle worker emits a heartbeat at debug level.
pub const IDLE_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(60);

// ============================================================================
// Signals
// ============================================================================

/// Signal asking a worker to delete its pid file and exit.
pub const SHUTDOWN_SIGNAL: Signal = Signal::SIGHUP;

/// Signal used to clear out a prior worker that is unexpectedly still alive.
pub const FORCE_KILL_SIGNAL: Signal = Signal::SIGTERM;

/// Signal `demon stop` sends to a running supervisor; it shuts its pools down before exiting.
pub const SUPERVISOR_STOP_SIGNAL: Signal = Signal::SIGTERM;

// ============================================================================
// Shell Execution Constants
// ============================================================================

/// Shell used by the command worker.
pub const DEFAULT_SHELL: &str = "sh";

/// Shell argument flag for executing command strings.
pub const SHELL_COMMAND_FLAG: &str = "-c";

// ============================================================================
// Exit Codes
// ============================================================================

/// Exit status of a worker whose entry point faulted.
pub const WORKER_FAULT_EXIT_CODE: i32 = 1;

/// Role argument that turns the binary into a worker process.
pub const WORKER_ROLE: &str = "worker";
