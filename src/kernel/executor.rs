//! Event loop for cooperative multitasking
//!
//! One iteration:
//! 1. Work out how long until the periodic tick is due
//! 2. Wait for any watched key to become ready, or for the tick
//! 3. Ready keys are dispatched in order; the tick fires only on an
//!    iteration where no key was ready
//! 4. Stop when quit is requested or a bounded run has seen its ticks
//!
//! The tick deadline is absolute, so input arriving early shortens the
//! next wait rather than restarting the period.
//!
//! Two back ends implement `EventLoop`: `PollLoop` (here) blocks on the
//! poller directly; `CallbackLoop` (see `reactor`) stores continuations.
//! Application code only sees the trait.

use super::poller::Poller;
use super::task::EventKey;
use super::timer::PeriodicTimer;
use super::Scheduler;
use crate::error::Result;
use std::time::Duration;

/// Loop lifecycle: idle until the first run, stopped between runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoopState {
    #[default]
    Idle,
    Running,
    Stopped,
}

pub trait EventLoop {
    /// Run until quit, or for exactly `max_ticks` timer ticks when
    /// `max_ticks > 0`
    ///
    /// A handler error ends the run and is returned. Counters and the
    /// schedule survive, so `run` may be called again.
    fn run(&mut self, max_ticks: u64) -> Result<()>;

    /// Request a stop; takes effect at the next iteration boundary
    fn stop(&self) {
        self.scheduler().quit();
    }

    fn state(&self) -> LoopState;

    fn scheduler(&self) -> &Scheduler;

    fn period(&self) -> Duration;
}

/// Stop condition shared by both back ends
#[derive(Debug, Clone, Copy)]
pub(crate) struct RunBound {
    target: Option<u64>,
}

impl RunBound {
    pub(crate) fn new(scheduler: &Scheduler, max_ticks: u64) -> Self {
        let target = (max_ticks > 0).then(|| scheduler.count(EventKey::Timer) + max_ticks);
        Self { target }
    }

    pub(crate) fn reached(&self, scheduler: &Scheduler) -> bool {
        if scheduler.quit_requested() {
            return true;
        }
        match self.target {
            Some(target) => scheduler.count(EventKey::Timer) >= target,
            None => false,
        }
    }
}

/// Readiness-polling back end
pub struct PollLoop<P: Poller> {
    scheduler: Scheduler,
    poller: P,
    period: Duration,
    state: LoopState,
}

impl<P: Poller> PollLoop<P> {
    pub fn new(scheduler: Scheduler, poller: P, period: Duration) -> Self {
        Self {
            scheduler,
            poller,
            period,
            state: LoopState::Idle,
        }
    }

    /// One wait plus the dispatches it triggers
    fn iterate(&mut self, timer: &mut PeriodicTimer) -> Result<()> {
        let timeout = timer.remaining(self.poller.now());
        let keys = self.scheduler.watched();
        let ready = self.poller.wait(&keys, timeout)?;

        if !ready.is_empty() {
            for key in ready {
                self.scheduler.dispatch(key)?;
            }
            return Ok(());
        }

        let now = self.poller.now();
        if !timer.is_due(now) {
            // Interrupted wait; the deadline stays where it was
            return Ok(());
        }
        timer.rearm(now);
        self.scheduler.dispatch(EventKey::Timer)?;
        Ok(())
    }
}

impl<P: Poller> EventLoop for PollLoop<P> {
    fn run(&mut self, max_ticks: u64) -> Result<()> {
        self.scheduler.clear_quit();
        let bound = RunBound::new(&self.scheduler, max_ticks);
        let mut timer = PeriodicTimer::new(self.period, self.poller.now());

        self.state = LoopState::Running;
        tracing::info!(period_ms = self.period.as_millis() as u64, max_ticks, "poll loop running");

        let result = loop {
            if bound.reached(&self.scheduler) {
                break Ok(());
            }
            if let Err(err) = self.iterate(&mut timer) {
                break Err(err);
            }
        };

        self.state = LoopState::Stopped;
        tracing::info!(ticks = self.scheduler.count(EventKey::Timer), ok = result.is_ok(), "poll loop stopped");
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
