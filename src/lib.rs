//! Demonizer keeps fixed-size pools of long-running worker processes alive on Unix-like
//! systems. A supervisor spawns each worker by re-executing its own binary, records every
//! worker in a per-slot pid file, restarts workers that die, and stops them gracefully on
//! request. Workers in turn watch their supervisor and exit once it is gone.

/// CLI interface.
pub mod cli;

/// Configuration management.
pub mod config;

/// Constants shared by the supervisor and worker halves.
pub mod constants;

/// Demon slots and their child monitors.
pub mod demon;

/// Error handling.
pub mod error;

/// Process liveness probing.
pub mod liveness;

/// Cancellable periodic tasks.
pub mod monitor;

/// Per-slot pid files.
pub mod pid_file;

/// Registry of supervised demon slots.
pub mod registry;

/// Runtime paths and modes.
pub mod runtime;

/// Worker process invocation.
pub mod spawn;

/// Status manager.
pub mod status;

/// Supervisor runtime that owns the registry.
pub mod supervisor;

/// Worker side of the spawn protocol.
pub mod worker;

#[doc(hidden)]
pub mod test_utils;
