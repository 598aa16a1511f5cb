//! Task abstraction
//!
//! A Task is the unit of scheduling: a handler that the event loop invokes
//! when its event key becomes ready and its enabling predicate holds.
//! Handlers run to completion; there is no preemption and no yielding
//! mid-handler.

use crate::error::{Error, Result};
use serde::Serialize;
use std::cell::{Cell, RefCell};
use std::os::fd::RawFd;

/// Unique identifier for a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct TaskId(pub u64);

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Task({})", self.0)
    }
}

/// What a task waits on
///
/// Keys are compared by value only; the loop never looks inside them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum EventKey {
    /// The next periodic tick
    Timer,
    /// A readable file descriptor (stdin is `Fd(0)`)
    Fd(RawFd),
    /// An in-process input source with no file descriptor
    Source(u32),
}

impl EventKey {
    pub const STDIN: EventKey = EventKey::Fd(0);

    pub fn is_timer(&self) -> bool {
        matches!(self, EventKey::Timer)
    }
}

impl std::fmt::Display for EventKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventKey::Timer => write!(f, "timer"),
            EventKey::Fd(0) => write!(f, "stdin"),
            EventKey::Fd(fd) => write!(f, "fd:{}", fd),
            EventKey::Source(n) => write!(f, "source:{}", n),
        }
    }
}

/// Task body. Errors propagate out of the event loop.
pub type Handler = Box<dyn FnMut() -> Result<()>>;

/// Enabling predicate, checked before every invocation
pub type Enabled = Box<dyn Fn() -> bool>;

/// A registered task
pub struct Task {
    id: TaskId,
    name: String,
    key: EventKey,
    handler: RefCell<Handler>,
    enabled: Enabled,
    /// Cleared on unregister so an in-flight dispatch skips this task
    active: Cell<bool>,
}

impl Task {
    /// Start building a task that waits on `key`
    pub fn builder(key: EventKey) -> TaskBuilder {
        TaskBuilder::new(key)
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn key(&self) -> EventKey {
        self.key
    }

    /// Evaluate the enabling predicate
    pub fn is_enabled(&self) -> bool {
        (self.enabled)()
    }

    pub fn is_active(&self) -> bool {
        self.active.get()
    }

    pub(crate) fn deactivate(&self) {
        self.active.set(false);
    }

    /// Run the handler once
    pub(crate) fn invoke(&self) -> Result<()> {
        let mut handler = self.handler.borrow_mut();
        (handler)()
    }
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("key", &self.key)
            .field("active", &self.active.get())
            .finish()
    }
}

/// Builder for [`Task`]
///
/// The handler is required; name and enabling predicate are optional.
pub struct TaskBuilder {
    name: Option<String>,
    key: EventKey,
    handler: Option<Handler>,
    enabled: Option<Enabled>,
}

impl TaskBuilder {
    pub fn new(key: EventKey) -> Self {
        Self {
            name: None,
            key,
            handler: None,
            enabled: None,
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Name the task `name()` unless the caller already chose one
    pub(crate) fn name_or_else(mut self, name: impl FnOnce() -> String) -> Self {
        if self.name.is_none() {
            self.name = Some(name());
        }
        self
    }

    pub fn handler<F>(mut self, handler: F) -> Self
    where
        F: FnMut() -> Result<()> + 'static,
    {
        self.handler = Some(Box::new(handler));
        self
    }

    pub fn enabled<F>(mut self, enabled: F) -> Self
    where
        F: Fn() -> bool + 'static,
    {
        self.enabled = Some(Box::new(enabled));
        self
    }

    /// Finish the task with the given id. The scheduler supplies the id
    /// and the default name.
    pub(crate) fn build(self, id: TaskId) -> Result<Task> {
        let name = self.name.unwrap_or_else(|| format!("t{}", id.0));
        let handler = self.handler.ok_or_else(|| Error::MissingHandler { task: name.clone() })?;
        Ok(Task {
            id,
            name,
            key: self.key,
            handler: RefCell::new(handler),
            enabled: self.enabled.unwrap_or_else(|| Box::new(|| true)),
            active: Cell::new(true),
        })
    }
}

/// Diagnostic snapshot of one task
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskInfo {
    pub id: TaskId,
    pub name: String,
    pub key: EventKey,
    pub enabled: bool,
    /// Occurrences seen so far on the task's key
    pub count: u64,
}

impl std::fmt::Display for TaskInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:>3} {:>10} {:>7} {:>7} {}",
            self.id.0,
            self.name,
            if self.enabled { "yes" } else { "no" },
            self.count,
            self.key
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;

    #[test]
    fn test_build_requires_handler() {
        let result = Task::builder(EventKey::Timer).name("lonely").build(TaskId(0));
        match result {
            Err(Error::MissingHandler { task }) => assert_eq!(task, "lonely"),
            other => panic!("expected MissingHandler, got {:?}", other.map(|t| t.id())),
        }
    }

    #[test]
    fn test_default_name_and_enabled() {
        let task = Task::builder(EventKey::Timer)
            .handler(|| Ok(()))
            .build(TaskId(3))
            .unwrap();
        assert_eq!(task.name(), "t3");
        assert!(task.is_enabled());
        assert!(task.is_active());
    }

    #[test]
    fn test_invoke_runs_handler() {
        let hits = Rc::new(Cell::new(0));
        let h = hits.clone();
        let task = Task::builder(EventKey::Source(1))
            .handler(move || {
                h.set(h.get() + 1);
                Ok(())
            })
            .build(TaskId(0))
            .unwrap();

        task.invoke().unwrap();
        task.invoke().unwrap();
        assert_eq!(hits.get(), 2);
    }

    #[test]
    fn test_event_key_display() {
        assert_eq!(EventKey::Timer.to_string(), "timer");
        assert_eq!(EventKey::STDIN.to_string(), "stdin");
        assert_eq!(EventKey::Fd(5).to_string(), "fd:5");
        assert_eq!(EventKey::Source(2).to_string(), "source:2");
    }

    #[test]
    fn test_event_key_order_puts_timer_first() {
        let mut keys = vec![EventKey::Source(1), EventKey::Fd(3), EventKey::Timer];
        keys.sort();
        assert_eq!(keys, vec![EventKey::Timer, EventKey::Fd(3), EventKey::Source(1)]);
    }
}
