//! Worker control plane
//!
//! A [`Worker`] runs a work function every `interval` inside a forked
//! execution context. `start()` forks and returns without waiting for the
//! first run; `stop()` sends a stop message and returns once the context has
//! terminated.
//!
//! # Example
//!
//! ```no_run
//! use mpworker::{SharedCell, Worker};
//! use std::time::Duration;
//!
//! # fn main() -> anyhow::Result<()> {
//! let counter = SharedCell::new(0u32)?;
//! let mut worker = Worker::builder(
//!     "counter",
//!     Duration::from_secs(1),
//!     |counter: &SharedCell<u32>| {
//!         *counter.lock()? += 1;
//!         Ok(())
//!     },
//!     counter.clone(),
//! )
//! .error_callback(|error| eprintln!("tick failed: {error:#}"))
//! .build()?;
//!
//! worker.start()?;
//! std::thread::sleep(Duration::from_secs(3));
//! worker.stop()?;
//! # Ok(())
//! # }
//! ```

mod lifecycle;

use std::thread;
use std::time::Duration;
use tracing::Span;

use crate::channel::{self, StopReceiver, StopSender};
use crate::config::WorkerConfig;
use crate::error::{Result, WorkerError};
use crate::process::{self, ChildExit, ChildProcess};
use crate::watch::{self, ErrorCallback, LoopExit, WorkFn};

use lifecycle::{describe_exit, is_abnormal, ExecutionContext, Lifecycle};

/// Delay between liveness checks while stopping
pub const STOP_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Exit code of an execution context whose work function failed without an error callback
pub const FATAL_EXIT_CODE: i32 = 1;

/// Runs a work function periodically in a separate process.
pub struct Worker<S> {
    config: WorkerConfig,
    do_work: Box<WorkFn<S>>,
    error_callback: Option<Box<ErrorCallback>>,
    shared_state: S,
    span: Span,
    lifecycle: Lifecycle,
    context: Option<ExecutionContext>,
}

impl<S> Worker<S> {
    /// Create a worker with default options: first run immediately, no error
    /// callback, and a log span named after the worker.
    pub fn new<F>(
        name: impl Into<String>,
        interval: Duration,
        do_work: F,
        shared_state: S,
    ) -> Result<Self>
    where
        F: FnMut(&S) -> anyhow::Result<()> + Send + 'static,
    {
        Self::builder(name, interval, do_work, shared_state).build()
    }

    pub fn builder<F>(
        name: impl Into<String>,
        interval: Duration,
        do_work: F,
        shared_state: S,
    ) -> WorkerBuilder<S>
    where
        F: FnMut(&S) -> anyhow::Result<()> + Send + 'static,
    {
        WorkerBuilder {
            name: name.into(),
            interval,
            first_run_immediate: true,
            do_work: Box::new(do_work),
            error_callback: None,
            shared_state,
            span: None,
        }
    }

    /// Create a worker from an already validated configuration.
    pub fn from_config<F>(config: WorkerConfig, do_work: F, shared_state: S) -> Self
    where
        F: FnMut(&S) -> anyhow::Result<()> + Send + 'static,
    {
        Self::assemble(config, Box::new(do_work), None, shared_state, None)
    }

    fn assemble(
        config: WorkerConfig,
        do_work: Box<WorkFn<S>>,
        error_callback: Option<Box<ErrorCallback>>,
        shared_state: S,
        span: Option<Span>,
    ) -> Self {
        let span = span.unwrap_or_else(|| tracing::info_span!("worker", name = %config.name()));
        Self {
            config,
            do_work,
            error_callback,
            shared_state,
            span,
            lifecycle: Lifecycle::Idle,
            context: None,
        }
    }

    /// Start the execution context.
    ///
    /// Returns as soon as the context has been forked; the first run happens
    /// in the background. Fails with [`WorkerError::AlreadyRunning`] unless the
    /// worker is idle or stopped.
    pub fn start(&mut self) -> Result<()> {
        let span = self.span.clone();
        let _entered = span.enter();

        if !self.lifecycle.can_start() {
            return Err(WorkerError::AlreadyRunning(self.config.name().to_string()));
        }

        tracing::info!(worker = %self.config.name(), "starting worker");
        let previous = std::mem::replace(&mut self.lifecycle, Lifecycle::Starting);

        let context = match self.spawn_context() {
            Ok(context) => context,
            Err(err) => {
                self.lifecycle = previous;
                return Err(err);
            }
        };

        tracing::info!(
            worker = %self.config.name(),
            pid = context.pid(),
            interval = ?self.config.interval(),
            first_run_immediate = self.config.first_run_immediate(),
            "worker started"
        );
        self.context = Some(context);
        self.lifecycle = Lifecycle::Running;
        Ok(())
    }

    fn spawn_context(&mut self) -> Result<ExecutionContext> {
        let (stop_tx, stop_rx) = channel::stop_channel().map_err(WorkerError::Channel)?;

        let child = process::fork_child(|| self.execution_context_main(&stop_tx, stop_rx))
            .map_err(|source| WorkerError::Spawn {
                name: self.config.name().to_string(),
                source,
            })?;

        Ok(ExecutionContext { stop_tx, child })
    }

    /// Body of the forked execution context. Returns its exit code.
    fn execution_context_main(&mut self, inherited_tx: &StopSender, mut stop_rx: StopReceiver) -> i32 {
        process::set_process_name(self.config.name());
        inherited_tx.close_inherited();

        let result = watch::run(
            &mut stop_rx,
            self.config.interval(),
            self.config.first_run_immediate(),
            self.do_work.as_mut(),
            self.error_callback.as_deref_mut(),
            &self.shared_state,
        );

        match result {
            Ok(LoopExit::Stopped) | Ok(LoopExit::Disconnected) => 0,
            Err(error) => {
                tracing::error!(
                    worker = %self.config.name(),
                    error = %format!("{:#}", error),
                    "work function failed without an error callback; execution context exiting"
                );
                FATAL_EXIT_CODE
            }
        }
    }

    /// Stop the execution context and wait until it has terminated.
    ///
    /// Liveness is polled every [`STOP_POLL_INTERVAL`] rather than joined.
    /// A context that already exited on its own (for example after a fatal
    /// work failure) counts as stopped, and so does one that was reaped
    /// elsewhere because SIGCHLD is ignored. Fails with [`WorkerError::NotRunning`]
    /// if the worker was never started or is already stopped.
    pub fn stop(&mut self) -> Result<()> {
        let span = self.span.clone();
        let _entered = span.enter();

        let name = self.config.name().to_string();
        let context = match self.context.as_mut() {
            Some(context) if self.lifecycle.can_stop() => context,
            _ => return Err(WorkerError::NotRunning(name)),
        };

        tracing::info!(worker = %name, pid = context.pid(), "stopping worker");
        self.lifecycle = Lifecycle::Stopping;

        if let Err(source) = context.stop_tx.send() {
            if !channel::is_disconnected(&source) {
                return Err(WorkerError::Signal { name, source });
            }
            tracing::error!(
                worker = %name,
                pid = context.pid(),
                error = %source,
                "stop channel closed; execution context already exited"
            );
        }

        let exit = wait_for_exit(&mut context.child)
            .map_err(|source| WorkerError::Wait { name: name.clone(), source })?;
        log_exit(&name, &exit);

        self.context = None;
        self.lifecycle = Lifecycle::Stopped;
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }
}

/// Poll the child every [`STOP_POLL_INTERVAL`] until it has terminated.
fn wait_for_exit(child: &mut ChildProcess) -> std::io::Result<ChildExit> {
    loop {
        match child.try_wait()? {
            Some(exit) => return Ok(exit),
            None => thread::sleep(STOP_POLL_INTERVAL),
        }
    }
}

fn log_exit(name: &str, exit: &ChildExit) {
    if is_abnormal(exit) {
        tracing::warn!(worker = %name, status = %describe_exit(exit), "worker stopped");
    } else {
        tracing::info!(worker = %name, status = %describe_exit(exit), "worker stopped");
    }
}

impl<S> Drop for Worker<S> {
    /// Requests a stop and hands the child to a detached reaper thread, so a
    /// dropped worker neither blocks nor leaves a zombie behind.
    fn drop(&mut self) {
        let Some(ExecutionContext { stop_tx, mut child }) = self.context.take() else {
            return;
        };

        let _entered = self.span.enter();
        let name = self.config.name().to_string();
        let pid = child.id();
        tracing::warn!(worker = %name, pid, "worker dropped while running; requesting stop");

        if let Err(error) = stop_tx.send() {
            if !channel::is_disconnected(&error) {
                tracing::error!(worker = %name, pid, error = %error, "failed to send stop");
            }
        }
        // Closing our end also ends the watch loop if the stop byte was lost
        drop(stop_tx);

        let span = self.span.clone();
        let reaper_name = name.clone();
        let spawned = thread::Builder::new()
            .name(format!("mpworker-reap-{}", pid))
            .spawn(move || {
                let _entered = span.enter();
                match wait_for_exit(&mut child) {
                    Ok(exit) => log_exit(&reaper_name, &exit),
                    Err(error) => tracing::error!(
                        worker = %reaper_name,
                        pid,
                        error = %error,
                        "failed to reap execution context"
                    ),
                }
            });

        if let Err(error) = spawned {
            tracing::error!(
                worker = %name,
                pid,
                error = %error,
                "failed to start reaper thread; execution context will not be reaped"
            );
        }
    }
}

/// Builder for a [`Worker`] with optional settings
pub struct WorkerBuilder<S> {
    name: String,
    interval: Duration,
    first_run_immediate: bool,
    do_work: Box<WorkFn<S>>,
    error_callback: Option<Box<ErrorCallback>>,
    shared_state: S,
    span: Option<Span>,
}

impl<S> WorkerBuilder<S> {
    /// Run the first iteration without waiting a full interval (default: true)
    pub fn first_run_immediate(mut self, first_run_immediate: bool) -> Self {
        self.first_run_immediate = first_run_immediate;
        self
    }

    /// Handle every failure of the work function inside the execution context.
    ///
    /// Without a callback, the first failure terminates the context.
    pub fn error_callback<C>(mut self, callback: C) -> Self
    where
        C: FnMut(anyhow::Error) + Send + 'static,
    {
        self.error_callback = Some(Box::new(callback));
        self
    }

    /// Emit lifecycle events inside this span instead of `worker{name=..}`
    pub fn span(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }

    /// Validate the configuration and build the worker.
    pub fn build(self) -> Result<Worker<S>> {
        let config = WorkerConfig::new(self.name, self.interval)?
            .with_first_run_immediate(self.first_run_immediate);
        Ok(Worker::assemble(
            config,
            self.do_work,
            self.error_callback,
            self.shared_state,
            self.span,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop(_: &()) -> anyhow::Result<()> {
        Ok(())
    }

    #[test]
    fn test_build_rejects_invalid_config() {
        assert!(matches!(
            Worker::new("", Duration::from_secs(1), noop, ()),
            Err(WorkerError::InvalidConfig(_))
        ));
        assert!(matches!(
            Worker::new("ticker", Duration::ZERO, noop, ()),
            Err(WorkerError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_new_worker_is_idle() {
        let worker = Worker::new("ticker", Duration::from_secs(1), noop, ()).unwrap();
        assert_eq!(worker.lifecycle(), Lifecycle::Idle);
        assert!(worker.config.first_run_immediate());
    }

    #[test]
    fn test_builder_applies_options() {
        let worker = Worker::builder("ticker", Duration::from_millis(250), noop, ())
            .first_run_immediate(false)
            .error_callback(|_| {})
            .span(tracing::info_span!("custom"))
            .build()
            .unwrap();

        assert!(!worker.config.first_run_immediate());
        assert_eq!(worker.config.interval(), Duration::from_millis(250));
        assert!(worker.error_callback.is_some());
    }

    #[test]
    fn test_stop_before_start_is_rejected() {
        let mut worker = Worker::new("ticker", Duration::from_secs(1), noop, ()).unwrap();

        let err = worker.stop().unwrap_err();
        assert!(matches!(err, WorkerError::NotRunning(ref name) if name == "ticker"));
        assert_eq!(worker.lifecycle(), Lifecycle::Idle);
    }

    #[test]
    fn test_from_config_keeps_config() {
        let config = WorkerConfig::new("ticker", Duration::from_secs(2))
            .unwrap()
            .with_first_run_immediate(false);
        let worker = Worker::from_config(config.clone(), noop, ());

        assert_eq!(worker.config, config);
        assert_eq!(worker.lifecycle(), Lifecycle::Idle);
    }
}
