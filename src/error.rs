//! Error types for the scheduler and job control
//!
//! Three families live here:
//! - registration errors, reported when a task is created
//! - dispatch-time errors, raised by handlers/readers/applications and
//!   propagated out of the event loop untouched
//! - job/session consistency errors (programming errors, never ignored)

use crate::kernel::TaskId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// A task was built without a handler
    #[error("task {task} has no handler")]
    MissingHandler { task: String },

    /// A task with this name is already registered in the scheduler
    #[error("duplicate task name: {0}")]
    DuplicateTask(String),

    /// The task is not (or no longer) registered
    #[error("unknown task: {0}")]
    UnknownTask(TaskId),

    /// stop/suspend on a session with nothing to pop
    #[error("session {0} has no job to stop")]
    EmptySession(String),

    /// The job is already on a session stack, or suspended
    #[error("job {0} is already running in a session")]
    JobBusy(String),

    /// No suspended job with this name
    #[error("no suspended job named {0}")]
    NoSuchJob(String),

    /// An application entry point failed
    #[error("{job}: {message}")]
    Application { job: String, message: String },

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid configuration: {0}")]
    Config(#[from] serde_json::Error),
}

impl Error {
    /// Convenience constructor for application failures
    pub fn application(job: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Application {
            job: job.into(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
