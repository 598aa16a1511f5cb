//! The kernel - tasks, the schedule, and the event loop
//!
//! Single-threaded and cooperative:
//! - One handler runs at a time, always to completion
//! - The only place anything waits is the poller, between iterations
//! - All state hangs off a `Scheduler` context; there are no globals, so
//!   independent loops can coexist (tests rely on this)

pub mod executor;
pub mod harness;
pub mod poller;
pub mod reactor;
pub mod schedule;
pub mod task;
pub mod timer;


pub use executor::{EventLoop, LoopState, PollLoop};
pub use harness::run_protected;
pub use poller::{FdPoller, Poller, VirtualPoller};
pub use reactor::{CallbackLoop, Reactor};
pub use schedule::{Schedule, Watch};
pub use task::{EventKey, Task, TaskBuilder, TaskId, TaskInfo};
pub use timer::{PeriodicTimer, TimerId, TimerQueue};

use crate::error::Result;
use std::cell::{Cell, RefCell};
use std::rc::Rc;

#[derive(Default)]
struct Shared {
    schedule: RefCell<Schedule>,
    quit: Cell<bool>,
    next_task_id: Cell<u64>,
}

/// Scheduler context: the schedule, its counters, and the quit flag
///
/// Cheap to clone; every clone refers to the same state. Handlers that
/// need to register tasks or stop the loop capture a clone.
#[derive(Clone, Default)]
pub struct Scheduler {
    shared: Rc<Shared>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a task and activate it immediately
    pub fn register(&self, builder: TaskBuilder) -> Result<TaskId> {
        let id = TaskId(self.shared.next_task_id.get());
        self.shared.next_task_id.set(id.0 + 1);

        let builder = builder.name_or_else(|| self.shared.schedule.borrow().unused_name(id.0));
        let task = builder.build(id)?;
        let (task, watch) = self.shared.schedule.borrow_mut().register(task)?;

        tracing::debug!(task = task.name(), key = %task.key(), "task activated");
        if let Watch::Added(key) = watch
            && !key.is_timer()
        {
            tracing::debug!(%key, "watching key");
        }
        Ok(id)
    }

    /// Deactivate a task; its key is unwatched once no task uses it
    pub fn unregister(&self, id: TaskId) -> Result<()> {
        let (task, watch) = self.shared.schedule.borrow_mut().unregister(id)?;

        tracing::debug!(task = task.name(), key = %task.key(), "task deactivated");
        if let Watch::Removed(key) = watch
            && !key.is_timer()
        {
            tracing::debug!(%key, "no longer watching key");
        }
        Ok(())
    }

    /// Invoke every enabled task on `key` and count the occurrence
    ///
    /// The task list is copied before any handler runs, so handlers may
    /// change the schedule freely. The occurrence is counted even when a
    /// handler fails; the error is then returned to the caller.
    pub fn dispatch(&self, key: EventKey) -> Result<usize> {
        let tasks = self.shared.schedule.borrow().snapshot(key);
        if tasks.is_empty() && !key.is_timer() {
            tracing::warn!(%key, "readiness with no handler");
        }

        let result = schedule::invoke_all(&tasks);
        self.shared.schedule.borrow_mut().record(key);
        result
    }

    /// Occurrences seen on `key`
    pub fn count(&self, key: EventKey) -> u64 {
        self.shared.schedule.borrow().count(key)
    }

    /// Concrete keys the loop must wait on
    pub fn watched(&self) -> Vec<EventKey> {
        self.shared.schedule.borrow().watched()
    }

    pub fn has_tasks(&self, key: EventKey) -> bool {
        self.shared.schedule.borrow().has_tasks(key)
    }

    pub fn is_watched(&self, key: EventKey) -> bool {
        !key.is_timer() && self.has_tasks(key)
    }

    /// Diagnostic listing of every task
    pub fn tasks(&self) -> Vec<TaskInfo> {
        self.shared.schedule.borrow().tasks()
    }

    pub fn len(&self) -> usize {
        self.shared.schedule.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.schedule.borrow().is_empty()
    }

    /// Ask the running loop to stop after the current iteration
    pub fn quit(&self) {
        self.shared.quit.set(true);
    }

    pub fn quit_requested(&self) -> bool {
        self.shared.quit.get()
    }

    pub(crate) fn clear_quit(&self) {
        self.shared.quit.set(false);
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("tasks", &self.len())
            .field("quit", &self.quit_requested())
            .finish()
    }
}

impl TaskBuilder {
    /// Create the task in `scheduler` and activate it
    pub fn spawn(self, scheduler: &Scheduler) -> Result<TaskId> {
        scheduler.register(self)
    }
}
