//! Readiness primitives
//!
//! A `Poller` is the only place the system ever sleeps: it waits until one
//! of the watched keys is ready or the timeout elapses, whichever is first.
//!
//! - `FdPoller`: `poll(2)` over file-descriptor keys, monotonic clock
//! - `VirtualPoller`: replays scripted readiness on a virtual clock, so
//!   timing behaviour can be tested exactly

use super::task::EventKey;
use crate::error::Result;
use std::cell::RefCell;
use std::collections::{BTreeSet, VecDeque};
use std::io;
use std::rc::Rc;
use std::time::{Duration, Instant};

pub trait Poller {
    /// Monotonic time since this poller's origin
    fn now(&self) -> Duration;

    /// Block until a key in `keys` is ready or `timeout` elapses
    ///
    /// Returns the ready keys in a deterministic order; empty means the
    /// timeout elapsed (or the wait was interrupted).
    fn wait(&mut self, keys: &[EventKey], timeout: Duration) -> Result<Vec<EventKey>>;
}

impl<P: Poller + ?Sized> Poller for Box<P> {
    fn now(&self) -> Duration {
        (**self).now()
    }

    fn wait(&mut self, keys: &[EventKey], timeout: Duration) -> Result<Vec<EventKey>> {
        (**self).wait(keys, timeout)
    }
}

// ============================================================================
// poll(2)
// ============================================================================

/// Waits on file descriptors with `poll(2)`
///
/// Only `EventKey::Fd` keys can be watched; other concrete keys are ignored.
#[derive(Debug)]
pub struct FdPoller {
    origin: Instant,
}

impl FdPoller {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for FdPoller {
    fn default() -> Self {
        Self::new()
    }
}

/// Round up to whole milliseconds so poll never returns before the deadline
fn timeout_ms(timeout: Duration) -> libc::c_int {
    let ms = timeout.as_micros().div_ceil(1000);
    ms.min(libc::c_int::MAX as u128) as libc::c_int
}

impl Poller for FdPoller {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }

    fn wait(&mut self, keys: &[EventKey], timeout: Duration) -> Result<Vec<EventKey>> {
        let mut fds: Vec<libc::pollfd> = keys
            .iter()
            .filter_map(|key| match key {
                EventKey::Fd(fd) => Some(libc::pollfd {
                    fd: *fd,
                    events: libc::POLLIN,
                    revents: 0,
                }),
                _ => None,
            })
            .collect();

        // SAFETY: `fds` is a valid, exclusively borrowed array of pollfd
        // for the duration of the call.
        let rc = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, timeout_ms(timeout)) };
        if rc < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(Vec::new());
            }
            return Err(err.into());
        }

        if let Some(bad) = fds.iter().find(|p| p.revents & libc::POLLNVAL != 0) {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, format!("fd {} is not open", bad.fd)).into());
        }

        let ready = fds
            .iter()
            .filter(|p| p.revents & (libc::POLLIN | libc::POLLHUP | libc::POLLERR) != 0)
            .map(|p| EventKey::Fd(p.fd))
            .collect::<BTreeSet<_>>();
        Ok(ready.into_iter().collect())
    }
}

// ============================================================================
// Virtual time
// ============================================================================

#[derive(Debug, Default)]
struct VirtualState {
    now: Duration,
    /// Scripted readiness, sorted by time
    script: VecDeque<(Duration, EventKey)>,
    waits: u64,
}

/// Scripted readiness on a virtual clock
///
/// Cloning gives another handle to the same clock and script, so a test
/// can keep one while the event loop owns the other.
#[derive(Debug, Clone, Default)]
pub struct VirtualPoller {
    state: Rc<RefCell<VirtualState>>,
}

impl VirtualPoller {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `key` ready at virtual time `at`
    pub fn schedule(&self, at: Duration, key: EventKey) {
        let mut state = self.state.borrow_mut();
        let pos = state.script.partition_point(|(t, _)| *t <= at);
        state.script.insert(pos, (at, key));
    }

    /// Make `key` ready at every time in `times`
    pub fn schedule_all(&self, times: impl IntoIterator<Item = Duration>, key: EventKey) {
        for at in times {
            self.schedule(at, key);
        }
    }

    /// Move the clock forward without waiting (simulates handler time)
    pub fn advance(&self, by: Duration) {
        self.state.borrow_mut().now += by;
    }

    pub fn pending(&self) -> usize {
        self.state.borrow().script.len()
    }

    /// Number of times `wait` was called
    pub fn waits(&self) -> u64 {
        self.state.borrow().waits
    }
}

impl Poller for VirtualPoller {
    fn now(&self) -> Duration {
        self.state.borrow().now
    }

    fn wait(&mut self, keys: &[EventKey], timeout: Duration) -> Result<Vec<EventKey>> {
        let mut state = self.state.borrow_mut();
        state.waits += 1;
        let deadline = state.now + timeout;

        // Readiness nobody was watching is lost
        let first = state
            .script
            .iter()
            .take_while(|(at, _)| *at <= deadline)
            .position(|(_, key)| keys.contains(key));

        let Some(first) = first else {
            while state.script.front().is_some_and(|(at, _)| *at <= deadline) {
                state.script.pop_front();
            }
            state.now = deadline;
            return Ok(Vec::new());
        };

        state.script.drain(..first);
        let at = state.script[0].0;
        state.now = state.now.max(at);

        let mut ready = BTreeSet::new();
        while let Some(&(t, key)) = state.script.front() {
            if t > at {
                break;
            }
            state.script.pop_front();
            if keys.contains(&key) {
                ready.insert(key);
            }
        }

        Ok(ready.into_iter().collect())
    }
}
