//! Worker process invocation.
//!
//! Workers are not forked copies of the supervisor. The supervisor re-executes a program
//! (normally its own binary) with the `worker` role and the arguments below, and the new
//! process rebuilds the worker side of the protocol from a clean start.

use std::{
    ffi::OsString,
    os::unix::process::CommandExt,
    path::{Path, PathBuf},
    process::{Command, Stdio},
    time::Duration,
};

use crate::constants::WORKER_ROLE;

/// Everything a worker process needs to know about the slot it serves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerInvocation {
    /// Demon name, also the pid file prefix.
    pub name: String,
    /// Slot index within the demon's pool.
    pub slot: usize,
    /// PID of the supervisor that spawned the worker.
    pub supervisor_pid: u32,
    /// Runtime state directory holding the `pids` directory.
    pub state_dir: PathBuf,
    /// How often the worker checks that its supervisor is still alive.
    pub parent_poll_interval: Duration,
    /// Shell command the worker runs, if any.
    pub command: Option<String>,
}

impl WorkerInvocation {
    /// Command-line arguments, role first, understood by the `worker` subcommand.
    pub fn args(&self) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            WORKER_ROLE.into(),
            "--name".into(),
            self.name.clone().into(),
            "--slot".into(),
            self.slot.to_string().into(),
            "--supervisor-pid".into(),
            self.supervisor_pid.to_string().into(),
            "--state-dir".into(),
            self.state_dir.clone().into_os_string(),
            "--parent-poll-ms".into(),
            self.parent_poll_interval.as_millis().to_string().into(),
        ];

        if let Some(command) = &self.command {
            args.push("--command".into());
            args.push(command.into());
        }

        args
    }

    /// Builds the process command for `program`.
    ///
    /// The worker gets its own process group so terminal signals aimed at the supervisor do not
    /// reach it directly; shutdown is always requested by the supervisor.
    pub fn to_command(&self, program: &Path) -> Command {
        let mut cmd = Command::new(program);
        cmd.args(self.args())
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .process_group(0);
        cmd
    }
}
