//! Callback-registration back end
//!
//! The `Reactor` stores continuations instead of looping over the schedule
//! itself: one reader callback per watched key, and one-shot timer
//! callbacks in a deadline-ordered queue. Each `turn` waits once and runs
//! whatever became due.
//!
//! `CallbackLoop` drives the schedule through a reactor: every watched key
//! gets a reader that dispatches it, and the periodic tick is a timer
//! callback that re-arms itself one period after it fires.

use super::executor::{EventLoop, LoopState, RunBound};
use super::poller::Poller;
use super::task::EventKey;
use super::timer::{TimerId, TimerQueue};
use super::Scheduler;
use crate::error::Result;
use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::rc::Rc;
use std::time::Duration;

type ReaderCallback = Rc<dyn Fn() -> Result<()>>;
type TimerCallback = Box<dyn FnOnce() -> Result<()>>;

pub struct Reactor<P: Poller> {
    poller: RefCell<P>,
    readers: RefCell<BTreeMap<EventKey, ReaderCallback>>,
    timers: RefCell<TimerQueue<TimerCallback>>,
}

impl<P: Poller> Reactor<P> {
    pub fn new(poller: P) -> Self {
        Self {
            poller: RefCell::new(poller),
            readers: RefCell::new(BTreeMap::new()),
            timers: RefCell::new(TimerQueue::new()),
        }
    }

    pub fn now(&self) -> Duration {
        self.poller.borrow().now()
    }

    /// Call `callback` whenever `key` is ready. Replaces any existing reader.
    pub fn add_reader<F>(&self, key: EventKey, callback: F)
    where
        F: Fn() -> Result<()> + 'static,
    {
        self.readers.borrow_mut().insert(key, Rc::new(callback));
    }

    /// Returns true if a reader was registered for `key`
    pub fn remove_reader(&self, key: EventKey) -> bool {
        self.readers.borrow_mut().remove(&key).is_some()
    }

    pub fn has_reader(&self, key: EventKey) -> bool {
        self.readers.borrow().contains_key(&key)
    }

    pub fn readers(&self) -> Vec<EventKey> {
        self.readers.borrow().keys().copied().collect()
    }

    /// Run `callback` once at `deadline`
    pub fn call_at<F>(&self, deadline: Duration, callback: F) -> TimerId
    where
        F: FnOnce() -> Result<()> + 'static,
    {
        self.timers.borrow_mut().schedule(deadline, Box::new(callback))
    }

    /// Run `callback` once, `delay` from now
    pub fn call_later<F>(&self, delay: Duration, callback: F) -> TimerId
    where
        F: FnOnce() -> Result<()> + 'static,
    {
        self.call_at(self.now() + delay, callback)
    }

    /// Returns true if the timer was still pending
    pub fn cancel(&self, id: TimerId) -> bool {
        self.timers.borrow_mut().cancel(id).is_some()
    }

    pub fn pending_timers(&self) -> usize {
        self.timers.borrow().len()
    }

    /// Wait once, then run ready readers or, if none, due timers
    ///
    /// `idle_wait` bounds the wait when no timer is pending. Returns the
    /// number of callbacks run.
    pub fn turn(&self, idle_wait: Duration) -> Result<usize> {
        let now = self.now();
        let timeout = self.timers.borrow_mut().time_until_next(now).unwrap_or(idle_wait);
        let keys = self.readers();
        let ready = self.poller.borrow_mut().wait(&keys, timeout)?;

        let mut ran = 0;
        if !ready.is_empty() {
            for key in ready {
                // A reader removed by an earlier callback is skipped
                let callback = self.readers.borrow().get(&key).cloned();
                if let Some(callback) = callback {
                    callback()?;
                    ran += 1;
                }
            }
            return Ok(ran);
        }

        let now = self.now();
        loop {
            let next = self.timers.borrow_mut().pop_next(now);
            let Some((_, callback)) = next else {
                break;
            };
            callback()?;
            ran += 1;
        }
        Ok(ran)
    }
}

/// Event loop built on a [`Reactor`]
pub struct CallbackLoop<P: Poller + 'static> {
    scheduler: Scheduler,
    reactor: Rc<Reactor<P>>,
    period: Duration,
    state: LoopState,
    tick: Rc<Cell<Option<TimerId>>>,
}

impl<P: Poller + 'static> CallbackLoop<P> {
    pub fn new(scheduler: Scheduler, poller: P, period: Duration) -> Self {
        Self {
            scheduler,
            reactor: Rc::new(Reactor::new(poller)),
            period,
            state: LoopState::Idle,
            tick: Rc::new(Cell::new(None)),
        }
    }

    pub fn reactor(&self) -> &Reactor<P> {
        &self.reactor
    }

    /// Make reader registrations match the schedule's watched keys
    fn sync_readers(&self) {
        let watched = self.scheduler.watched();

        for key in self.reactor.readers() {
            if !watched.contains(&key) {
                self.reactor.remove_reader(key);
                tracing::debug!(%key, "reader removed");
            }
        }

        for key in watched {
            if self.reactor.has_reader(key) {
                continue;
            }
            let scheduler = self.scheduler.clone();
            self.reactor.add_reader(key, move || scheduler.dispatch(key).map(|_| ()));
            tracing::debug!(%key, "reader added");
        }
    }

    fn disarm(&self) {
        if let Some(id) = self.tick.take() {
            self.reactor.cancel(id);
        }
    }
}

/// Schedule the periodic tick at `deadline`; it re-arms itself on firing
fn arm_tick<P: Poller + 'static>(
    reactor: &Rc<Reactor<P>>,
    scheduler: Scheduler,
    period: Duration,
    slot: Rc<Cell<Option<TimerId>>>,
    deadline: Duration,
) {
    let weak = Rc::downgrade(reactor);
    let next_slot = slot.clone();
    let id = reactor.call_at(deadline, move || {
        let Some(reactor) = weak.upgrade() else {
            return Ok(());
        };
        let now = reactor.now();
        scheduler.dispatch(EventKey::Timer)?;
        arm_tick(&reactor, scheduler, period, next_slot, now + period);
        Ok(())
    });
    slot.set(Some(id));
}

impl<P: Poller + 'static> EventLoop for CallbackLoop<P> {
    fn run(&mut self, max_ticks: u64) -> Result<()> {
        self.scheduler.clear_quit();
        let bound = RunBound::new(&self.scheduler, max_ticks);

        self.disarm();
        let first = self.reactor.now() + self.period;
        arm_tick(&self.reactor, self.scheduler.clone(), self.period, self.tick.clone(), first);

        self.state = LoopState::Running;
        tracing::info!(period_ms = self.period.as_millis() as u64, max_ticks, "callback loop running");

        let result = loop {
            if bound.reached(&self.scheduler) {
                break Ok(());
            }
            self.sync_readers();
            if let Err(err) = self.reactor.turn(self.period) {
                break Err(err);
            }
        };

        self.disarm();
        self.state = LoopState::Stopped;
        tracing::info!(ticks = self.scheduler.count(EventKey::Timer), ok = result.is_ok(), "callback loop stopped");
        result
    }

    fn state(&self) -> LoopState {
        self.state
    }

    fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    fn period(&self) -> Duration {
        self.period
    }
}
