//! Run a function on a fixed interval inside a forked child process.
//!
//! A [`Worker`] forks an execution context that runs its work function every
//! `interval` until the worker is stopped through its stop channel. Failures
//! of the work function are either handed to an error callback or terminate
//! the context. State shared with the context lives in a [`SharedCell`].

pub mod channel;
pub mod cli;
pub mod config;
pub mod error;
pub mod logging;
pub mod process;
pub mod shared;
pub mod signals;
pub mod watch;
pub mod worker;

pub use config::{Settings, WorkerConfig};
pub use error::{Result, WorkerError};
pub use shared::{SharedCell, SharedGuard};
pub use watch::LoopExit;
pub use worker::{Worker, WorkerBuilder};
