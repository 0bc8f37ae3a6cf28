//! Watch loop run inside a worker's execution context
//!
//! The loop waits on the stop channel for up to one interval, runs the work
//! function when the wait times out, and repeats until a stop arrives. Waiting
//! on the channel is its only suspension point: runs never overlap, missed
//! ticks are not caught up, and a stop sent during a run is seen at the next
//! wait.

use anyhow::{anyhow, Context, Result};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::time::Duration;

use crate::channel::{StopReceiver, WaitOutcome};
use crate::signals;

/// Work function invoked on every tick with the worker's shared state
pub type WorkFn<S> = dyn FnMut(&S) -> Result<()> + Send;

/// Receives every failure of the work function, including panics
pub type ErrorCallback = dyn FnMut(anyhow::Error) + Send;

/// Why the watch loop ended normally
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    /// A stop message was received
    Stopped,
    /// The controlling side closed the stop channel
    Disconnected,
}

/// Entry point of an execution context.
///
/// Ignores SIGINT and SIGTERM, then runs the loop. Returns `Err` with the
/// work function's error when it fails and no error callback is set.
pub fn run<S>(
    stop_rx: &mut StopReceiver,
    interval: Duration,
    first_run_immediate: bool,
    do_work: &mut WorkFn<S>,
    error_callback: Option<&mut ErrorCallback>,
    shared_state: &S,
) -> Result<LoopExit> {
    signals::ignore_termination_signals().context("Failed to ignore termination signals")?;
    watch(
        stop_rx,
        interval,
        first_run_immediate,
        do_work,
        error_callback,
        shared_state,
    )
}

pub(crate) fn watch<S>(
    stop_rx: &mut StopReceiver,
    interval: Duration,
    first_run_immediate: bool,
    do_work: &mut WorkFn<S>,
    mut error_callback: Option<&mut ErrorCallback>,
    shared_state: &S,
) -> Result<LoopExit> {
    let mut timeout = if first_run_immediate {
        Duration::ZERO
    } else {
        interval
    };

    loop {
        match stop_rx
            .wait(timeout)
            .context("Failed to wait on stop channel")?
        {
            WaitOutcome::Stop => return Ok(LoopExit::Stopped),
            WaitOutcome::Disconnected => return Ok(LoopExit::Disconnected),
            WaitOutcome::Elapsed => {}
        }

        timeout = interval;

        if let Err(error) = invoke(do_work, shared_state) {
            match error_callback.as_deref_mut() {
                Some(callback) => callback(error),
                None => return Err(error),
            }
        }
    }
}

fn invoke<S>(do_work: &mut WorkFn<S>, shared_state: &S) -> Result<()> {
    match panic::catch_unwind(AssertUnwindSafe(|| do_work(shared_state))) {
        Ok(result) => result,
        Err(payload) => Err(anyhow!(
            "work function panicked: {}",
            panic_message(payload.as_ref())
        )),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "unknown panic payload"
    }
}
