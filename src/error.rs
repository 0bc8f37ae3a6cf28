use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Invalid worker configuration: {0}")]
    InvalidConfig(String),

    #[error("Worker {0} is already running")]
    AlreadyRunning(String),

    #[error("Worker {0} is not running")]
    NotRunning(String),

    #[error("Failed to create stop channel: {0}")]
    Channel(#[source] io::Error),

    #[error("Failed to spawn execution context for worker {name}: {source}")]
    Spawn {
        name: String,
        #[source]
        source: io::Error,
    },

    #[error("Failed to send stop signal to worker {name}: {source}")]
    Signal {
        name: String,
        #[source]
        source: io::Error,
    },

    #[error("Failed to wait for execution context of worker {name}: {source}")]
    Wait {
        name: String,
        #[source]
        source: io::Error,
    },
}

pub type Result<T> = std::result::Result<T, WorkerError>;
