//! Command-line interface for demonizer.
use std::{path::PathBuf, str::FromStr, time::Duration};

use clap::{Args, Parser, Subcommand};
use tracing::level_filters::LevelFilter;

use crate::{constants::DEFAULT_CONFIG_FILE, spawn::WorkerInvocation};

/// Wrapper around `LevelFilter` so clap can parse log levels from either
/// string names ("info", "debug", etc.) or numeric shorthands (0-5).
#[derive(Clone, Copy, Debug)]
pub struct LogLevelArg(LevelFilter);

impl LogLevelArg {
    /// String representation suitable for `RUST_LOG`.
    pub fn as_str(&self) -> &'static str {
        match self.0 {
            LevelFilter::OFF => "off",
            LevelFilter::ERROR => "error",
            LevelFilter::WARN => "warn",
            LevelFilter::INFO => "info",
            LevelFilter::DEBUG => "debug",
            LevelFilter::TRACE => "trace",
        }
    }
}

impl FromStr for LogLevelArg {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err("log level cannot be empty".into());
        }

        if let Ok(number) = trimmed.parse::<u8>() {
            let level = match number {
                0 => LevelFilter::OFF,
                1 => LevelFilter::ERROR,
                2 => LevelFilter::WARN,
                3 => LevelFilter::INFO,
                4 => LevelFilter::DEBUG,
                5 => LevelFilter::TRACE,
                _ => {
                    return Err(format!(
                        "unsupported log level number '{number}' (expected 0-5)"
                    ));
                }
            };

            return Ok(LogLevelArg(level));
        }

        let lowercase = trimmed.to_ascii_lowercase();
        let level = match lowercase.as_str() {
            "off" => Some(LevelFilter::OFF),
            "error" | "err" => Some(LevelFilter::ERROR),
            "warn" | "warning" => Some(LevelFilter::WARN),
            "info" | "information" => Some(LevelFilter::INFO),
            "debug" => Some(LevelFilter::DEBUG),
            "trace" => Some(LevelFilter::TRACE),
            _ => None,
        }
        .ok_or_else(|| format!("invalid log level '{trimmed}'"))?;

        Ok(LogLevelArg(level))
    }
}

/// Command-line interface for demonizer.
#[derive(Parser)]
#[command(name = "demon", version, author)]
#[command(about = "Keeps fixed pools of worker processes alive", long_about = None)]
pub struct Cli {
    /// Override the logging verbosity for this invocation only.
    #[arg(long, value_name = "LEVEL", global = true)]
    pub log_level: Option<LogLevelArg>,

    /// Keep state under /var/lib/demonizer instead of the user's home directory.
    #[arg(long = "sys", global = true)]
    pub sys: bool,

    /// The command to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands for demon.
#[derive(Subcommand)]
pub enum Commands {
    /// Start the supervisor in the foreground and keep every configured pool running.
    Start {
        /// Path to the configuration file (defaults to `demon.yaml`).
        #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
        config: String,

        /// Optionally start only the named demon.
        #[arg(short, long)]
        demon: Option<String>,
    },

    /// Ask the running supervisor to stop all workers and exit.
    Stop {
        /// Path to the configuration file (defaults to `demon.yaml`).
        #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
        config: String,
    },

    /// Show the state of every configured worker slot.
    Status {
        /// Path to the configuration file (defaults to `demon.yaml`).
        #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
        config: String,

        /// Emit machine-readable JSON output instead of a table.
        #[arg(long)]
        json: bool,

        /// Disable ANSI colors in output.
        #[arg(long = "no-color")]
        no_color: bool,
    },

    /// Run a single worker process. Spawned by the supervisor.
    #[command(hide = true)]
    Worker(WorkerArgs),
}

/// Arguments of the internal `worker` role.
#[derive(Args, Debug, Clone)]
pub struct WorkerArgs {
    /// Demon name.
    #[arg(long)]
    pub name: String,

    /// Slot index within the pool.
    #[arg(long)]
    pub slot: usize,

    /// PID of the supervisor to watch.
    #[arg(long)]
    pub supervisor_pid: u32,

    /// Runtime state directory holding the pid files.
    #[arg(long)]
    pub state_dir: PathBuf,

    /// Supervisor liveness check interval in milliseconds.
    #[arg(long, default_value_t = 1000)]
    pub parent_poll_ms: u64,

    /// Shell command to run; the worker idles when absent.
    #[arg(long)]
    pub command: Option<String>,
}

impl From<WorkerArgs> for WorkerInvocation {
    fn from(args: WorkerArgs) -> Self {
        WorkerInvocation {
            name: args.name,
            slot: args.slot,
            supervisor_pid: args.supervisor_pid,
            state_dir: args.state_dir,
            parent_poll_interval: Duration::from_millis(args.parent_poll_ms.max(1)),
            command: args.command,
        }
    }
}

/// Parses command-line arguments and returns a `Cli` struct.
pub fn parse_args() -> Cli {
    Cli::parse()
}
