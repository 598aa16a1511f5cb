//! The schedule: event key -> tasks waiting on that key
//!
//! Pure bookkeeping. Insertion order is dispatch order. Each key also has
//! an occurrence counter that only ever goes up.
//!
//! The set of keys with at least one task is exactly the set of keys the
//! event loop must watch; `register`/`unregister` report when a key enters
//! or leaves that set so the loop can start/stop watching it once.

use super::task::{EventKey, Task, TaskId, TaskInfo};
use crate::error::{Error, Result};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::rc::Rc;

/// Change to the watched-key set caused by a registration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Watch {
    /// First task on this key: start watching it
    Added(EventKey),
    /// Key already had tasks (or still has some)
    Unchanged,
    /// Last task left this key: stop watching it
    Removed(EventKey),
}

#[derive(Debug, Default)]
pub struct Schedule {
    /// Tasks per key, in registration order
    slots: BTreeMap<EventKey, Vec<Rc<Task>>>,
    /// Occurrences per key, never reset
    counts: BTreeMap<EventKey, u64>,
    /// Which key each task lives under
    index: HashMap<TaskId, EventKey>,
    names: HashSet<String>,
}

impl Schedule {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a task to its key's list
    pub fn register(&mut self, task: Task) -> Result<(Rc<Task>, Watch)> {
        if self.names.contains(task.name()) {
            return Err(Error::DuplicateTask(task.name().to_string()));
        }

        let key = task.key();
        let task = Rc::new(task);
        self.names.insert(task.name().to_string());
        self.index.insert(task.id(), key);
        self.counts.entry(key).or_insert(0);

        let slot = self.slots.entry(key).or_default();
        slot.push(task.clone());
        let watch = if slot.len() == 1 { Watch::Added(key) } else { Watch::Unchanged };

        Ok((task, watch))
    }

    /// Remove a task; drops the key entirely when its list empties
    pub fn unregister(&mut self, id: TaskId) -> Result<(Rc<Task>, Watch)> {
        let key = self.index.remove(&id).ok_or(Error::UnknownTask(id))?;
        let slot = self.slots.get_mut(&key).ok_or(Error::UnknownTask(id))?;
        let pos = slot.iter().position(|t| t.id() == id).ok_or(Error::UnknownTask(id))?;

        let task = slot.remove(pos);
        task.deactivate();
        self.names.remove(task.name());

        let watch = if slot.is_empty() {
            self.slots.remove(&key);
            Watch::Removed(key)
        } else {
            Watch::Unchanged
        };

        Ok((task, watch))
    }

    /// Invoke every enabled task on `key`, then count the occurrence once
    ///
    /// Returns the number of handlers invoked. A key with no tasks is a
    /// no-op (but still counted).
    pub fn dispatch(&mut self, key: EventKey) -> Result<usize> {
        let tasks = self.snapshot(key);
        let invoked = invoke_all(&tasks);
        self.record(key);
        invoked
    }

    /// Copy of the task list for `key`, safe to iterate while the schedule changes
    pub fn snapshot(&self, key: EventKey) -> Vec<Rc<Task>> {
        self.slots.get(&key).cloned().unwrap_or_default()
    }

    /// Advance the occurrence counter for `key`
    pub fn record(&mut self, key: EventKey) {
        *self.counts.entry(key).or_insert(0) += 1;
    }

    pub fn count(&self, key: EventKey) -> u64 {
        self.counts.get(&key).copied().unwrap_or(0)
    }

    /// Concrete (non-timer) keys with at least one task
    pub fn watched(&self) -> Vec<EventKey> {
        self.slots.keys().copied().filter(|k| !k.is_timer()).collect()
    }

    pub fn has_tasks(&self, key: EventKey) -> bool {
        self.slots.contains_key(&key)
    }

    pub fn get(&self, id: TaskId) -> Option<&Rc<Task>> {
        let key = self.index.get(&id)?;
        self.slots.get(key)?.iter().find(|t| t.id() == id)
    }

    /// All tasks, in creation order
    pub fn tasks(&self) -> Vec<TaskInfo> {
        let mut infos: Vec<TaskInfo> = self
            .slots
            .values()
            .flatten()
            .map(|t| TaskInfo {
                id: t.id(),
                name: t.name().to_string(),
                key: t.key(),
                enabled: t.is_enabled(),
                count: self.count(t.key()),
            })
            .collect();
        infos.sort_by_key(|info| info.id);
        infos
    }

    /// `t<n>` for the first `n >= start` that no task is named
    pub fn unused_name(&self, start: u64) -> String {
        (start..)
            .map(|n| format!("t{}", n))
            .find(|name| !self.names.contains(name))
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }
}

/// Run enabled, still-registered tasks in order
///
/// A task unregistered by an earlier handler in the same pass is skipped.
pub(crate) fn invoke_all(tasks: &[Rc<Task>]) -> Result<usize> {
    let mut invoked = 0;
    for task in tasks {
        if !task.is_active() || !task.is_enabled() {
            continue;
        }
        tracing::trace!(task = task.name(), key = %task.key(), "dispatch");
        task.invoke()?;
        invoked += 1;
    }
    Ok(invoked)
}
