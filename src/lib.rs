//! piety - a single-threaded event-driven scheduler with job control
//!
//! Design principles:
//! - Cooperative: a handler always runs to completion, nothing preempts it
//! - One suspension point: the event loop's readiness wait
//! - Tractable: no threads, no locks, no globals
//!
//! Layers:
//! - `kernel`: tasks, the schedule, and two interchangeable event loops
//! - `shell`: jobs and sessions multiplexing one input stream, with
//!   `^Z`/`fg` job control
//! - `config`: loop configuration from JSON

pub mod config;
pub mod error;
pub mod kernel;
pub mod shell;

pub use config::{Backend, LoopConfig};
pub use error::{Error, Result};
pub use kernel::{EventKey, EventLoop, Scheduler, Task, TaskId};
pub use shell::{Application, Job, JobState, Session};
