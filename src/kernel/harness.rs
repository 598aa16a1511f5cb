//! Protective run boundary
//!
//! Handler errors are not recovered inside the loop. A host that has put
//! the terminal into some special mode wraps the run here so the terminal
//! is restored before the error (or panic) reaches the user.

use super::executor::EventLoop;
use crate::error::Result;
use std::panic::{self, AssertUnwindSafe};

/// Run `event_loop`, calling `restore` if the run fails or panics
///
/// On success `restore` is not called; the host decides what to do next.
/// A panic is resumed after `restore` runs.
pub fn run_protected<F>(event_loop: &mut dyn EventLoop, max_ticks: u64, restore: F) -> Result<()>
where
    F: FnOnce(),
{
    match panic::catch_unwind(AssertUnwindSafe(|| event_loop.run(max_ticks))) {
        Ok(Ok(())) => Ok(()),
        Ok(Err(err)) => {
            tracing::error!(error = %err, "event loop failed");
            restore();
            Err(err)
        }
        Err(payload) => {
            tracing::error!("event loop panicked");
            restore();
            panic::resume_unwind(payload)
        }
    }
}
