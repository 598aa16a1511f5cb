//! Sessions - several jobs sharing one input key
//!
//! A session is a task whose handler always routes to the job on top of
//! its stack. Starting a job pushes it and backgrounds the previous top;
//! stopping pops the top and brings the next one back. `^Z` moves the
//! foreground job to a suspended list, and `resume_job` (`fg`) pushes it
//! back.
//!
//! The task's enabling predicate is "stack not empty", so an empty session
//! ignores its key without being unregistered.

use super::job::{Job, JobState};
use crate::error::{Error, Result};
use crate::kernel::{EventKey, Scheduler, Task, TaskId};
use serde::Serialize;
use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

/// Diagnostic snapshot of one job
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobInfo {
    pub name: String,
    pub state: JobState,
}

impl std::fmt::Display for JobInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:>10} {}", self.name, self.state)
    }
}

struct SessionInner {
    name: String,
    key: EventKey,
    scheduler: Scheduler,
    task: Cell<Option<TaskId>>,
    /// Top of stack is the foreground job
    stack: RefCell<Vec<Job>>,
    suspended: RefCell<Vec<Job>>,
}

/// Handle to a session; clones refer to the same session
#[derive(Clone)]
pub struct Session {
    inner: Rc<SessionInner>,
}

impl Session {
    /// Create a session and register its task on `key`
    pub fn new(scheduler: &Scheduler, name: impl Into<String>, key: EventKey) -> Result<Self> {
        let name = name.into();
        let inner = Rc::new(SessionInner {
            name: name.clone(),
            key,
            scheduler: scheduler.clone(),
            task: Cell::new(None),
            stack: RefCell::new(Vec::new()),
            suspended: RefCell::new(Vec::new()),
        });

        // The schedule holds the task and the session holds the scheduler,
        // so the task only keeps a weak reference back
        let handler_ref = Rc::downgrade(&inner);
        let enabled_ref = Rc::downgrade(&inner);
        let id = Task::builder(key)
            .name(name)
            .handler(move || match upgrade(&handler_ref) {
                Some(session) => session.handle(),
                None => Ok(()),
            })
            .enabled(move || enabled_ref.upgrade().is_some_and(|inner| !inner.stack.borrow().is_empty()))
            .spawn(scheduler)?;
        inner.task.set(Some(id));

        Ok(Self { inner })
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn key(&self) -> EventKey {
        self.inner.key
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.inner.scheduler
    }

    /// The session's task, until `close`
    pub fn task(&self) -> Option<TaskId> {
        self.inner.task.get()
    }

    pub fn foreground(&self) -> Option<Job> {
        self.inner.stack.borrow().last().cloned()
    }

    /// Jobs on the stack (suspended jobs are not counted)
    pub fn len(&self) -> usize {
        self.inner.stack.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.stack.borrow().is_empty()
    }

    /// Route one readiness event to the foreground job
    fn handle(&self) -> Result<()> {
        match self.foreground() {
            Some(job) => job.handle(self),
            None => Ok(()),
        }
    }

    /// Push `job` as the new foreground job and run it
    pub fn start(&self, job: &Job) -> Result<()> {
        if job.state() != JobState::Loaded {
            return Err(Error::JobBusy(job.name().to_string()));
        }
        if let Some(top) = self.foreground() {
            top.set_state(JobState::Background);
        }

        self.inner.stack.borrow_mut().push(job.clone());
        job.set_state(JobState::Foreground);
        tracing::debug!(session = self.name(), job = job.name(), depth = self.len(), "job started");
        job.run()
    }

    /// Pop the foreground job and resume the one below it
    pub fn stop(&self) -> Result<()> {
        let job = self.pop()?;
        job.set_state(JobState::Loaded);
        tracing::debug!(session = self.name(), job = job.name(), depth = self.len(), "job stopped");
        self.resume_top()
    }

    /// Move the foreground job to the suspended list
    ///
    /// The bottom job cannot be suspended: there would be nothing left to
    /// take the input.
    pub fn suspend(&self) -> Result<()> {
        if self.len() < 2 {
            return Err(Error::EmptySession(self.name().to_string()));
        }
        let job = self.pop()?;
        job.set_state(JobState::Suspended);
        self.inner.suspended.borrow_mut().push(job);
        self.resume_top()
    }

    /// Bring a suspended job back to the foreground
    pub fn resume_job(&self, name: &str) -> Result<()> {
        let job = {
            let mut suspended = self.inner.suspended.borrow_mut();
            let pos = suspended
                .iter()
                .position(|job| job.name() == name)
                .ok_or_else(|| Error::NoSuchJob(name.to_string()))?;
            suspended.remove(pos)
        };
        job.set_state(JobState::Loaded);
        self.start(&job)
    }

    /// Stack jobs bottom to top, then suspended jobs
    pub fn jobs(&self) -> Vec<JobInfo> {
        let stack = self.inner.stack.borrow();
        let suspended = self.inner.suspended.borrow();
        stack
            .iter()
            .chain(suspended.iter())
            .map(|job| JobInfo {
                name: job.name().to_string(),
                state: job.state(),
            })
            .collect()
    }

    /// Unregister the session's task
    pub fn close(&self) -> Result<()> {
        match self.inner.task.take() {
            Some(id) => self.inner.scheduler.unregister(id),
            None => Ok(()),
        }
    }

    fn pop(&self) -> Result<Job> {
        self.inner
            .stack
            .borrow_mut()
            .pop()
            .ok_or_else(|| Error::EmptySession(self.name().to_string()))
    }

    fn resume_top(&self) -> Result<()> {
        match self.foreground() {
            Some(top) => {
                top.set_state(JobState::Foreground);
                top.run()
            }
            None => {
                tracing::debug!(session = self.name(), "session empty");
                Ok(())
            }
        }
    }
}

fn upgrade(inner: &Weak<SessionInner>) -> Option<Session> {
    inner.upgrade().map(|inner| Session { inner })
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("name", &self.name())
            .field("key", &self.key())
            .field("jobs", &self.jobs())
            .finish()
    }
}
