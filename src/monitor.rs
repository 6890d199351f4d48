//! Cancellable periodic tasks backing the child and parent monitors.
//!
//! A task runs on its own named thread and invokes its tick callback once per interval. The
//! owning [`MonitorHandle`] cancels the task by dropping the sending half of a rendezvous
//! channel, which wakes the task immediately even if it is between ticks or inside a
//! [`Cancellation::sleep`].

use std::{
    io,
    ops::ControlFlow,
    thread::{self, JoinHandle},
    time::Duration,
};

use crossbeam_channel::{
    Receiver, RecvTimeoutError, Sender, TryRecvError, bounded, never, select, tick,
};
use tracing::{debug, warn};

/// Cancellation side of a periodic task, handed to every tick.
#[derive(Debug)]
pub struct Cancellation {
    rx: Receiver<()>,
}

impl Cancellation {
    /// Whether the owning handle has requested cancellation.
    pub fn is_cancelled(&self) -> bool {
        !matches!(self.rx.try_recv(), Err(TryRecvError::Empty))
    }

    /// Sleeps for `duration` unless cancelled first. Returns `true` if the full duration elapsed.
    pub fn sleep(&self, duration: Duration) -> bool {
        matches!(self.rx.recv_timeout(duration), Err(RecvTimeoutError::Timeout))
    }
}

/// Builder for a named polling task.
#[derive(Debug, Clone)]
pub struct PeriodicTask {
    name: String,
    interval: Duration,
}

impl PeriodicTask {
    /// Describes a task that ticks every `interval`. The first tick happens one interval after
    /// the task starts.
    pub fn new(name: impl Into<String>, interval: Duration) -> Self {
        Self {
            name: name.into(),
            interval,
        }
    }

    /// Starts the task and returns a handle that can cancel and join it.
    pub fn spawn<F>(self, on_tick: F) -> io::Result<MonitorHandle>
    where
        F: FnMut(&Cancellation) -> ControlFlow<()> + Send + 'static,
    {
        let (cancel_tx, cancel_rx) = bounded::<()>(0);
        let name = self.name.clone();
        let thread = self.run_on_thread(cancel_rx, on_tick)?;

        Ok(MonitorHandle {
            name,
            cancel: Some(cancel_tx),
            thread: Some(thread),
        })
    }

    /// Starts a task that lives until it breaks out of its loop or the process exits.
    pub fn spawn_detached<F>(self, on_tick: F) -> io::Result<()>
    where
        F: FnMut(&Cancellation) -> ControlFlow<()> + Send + 'static,
    {
        self.run_on_thread(never(), on_tick).map(|_| ())
    }

    fn run_on_thread<F>(
        self,
        cancel_rx: Receiver<()>,
        mut on_tick: F,
    ) -> io::Result<JoinHandle<()>>
    where
        F: FnMut(&Cancellation) -> ControlFlow<()> + Send + 'static,
    {
        let Self { name, interval } = self;
        thread::Builder::new().name(name.clone()).spawn(move || {
            let cancellation = Cancellation { rx: cancel_rx };
            let ticker = tick(interval);

            loop {
                select! {
                    recv(cancellation.rx) -> _ => {
                        debug!("Monitor '{name}' cancelled");
                        break;
                    }
                    recv(ticker) -> _ => {
                        if on_tick(&cancellation).is_break() {
                            debug!("Monitor '{name}' finished");
                            break;
                        }
                    }
                }
            }
        })
    }
}

/// Owning handle of a running periodic task.
///
/// Dropping the handle cancels the task without waiting for it.
#[derive(Debug)]
pub struct MonitorHandle {
    name: String,
    cancel: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl MonitorHandle {
    /// Name of the underlying thread.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the task has stopped running.
    pub fn is_finished(&self) -> bool {
        self.thread
            .as_ref()
            .map(JoinHandle::is_finished)
            .unwrap_or(true)
    }

    /// Requests cancellation and blocks until the task has exited.
    ///
    /// When called from the task's own thread the join is skipped; the task exits as soon as it
    /// returns to its loop.
    pub fn cancel_and_join(mut self) {
        self.cancel.take();

        if let Some(thread) = self.thread.take() {
            if thread.thread().id() == thread::current().id() {
                return;
            }
            if thread.join().is_err() {
                warn!("Monitor '{}' panicked before it could be joined", self.name);
            }
        }
    }
}
