//! Clocks, timers and delays.
//!
//! Every runtime owns one [`TimerDriver`]. It is backed either by a
//! [`WallClock`] or, for deterministic tests, by a [`VirtualClock`] that jumps
//! to the next deadline whenever the runtime has nothing runnable.
//!
//! [`delay`] is the task-level suspension primitive built on the driver;
//! timeouts live in [`combinator`](crate::combinator) because they are
//! expressed as cancellation of a child task.

mod driver;
mod elapsed;
mod sleep;

pub use driver::{TimeSource, TimerDriver, TimerHandle, VirtualClock, WallClock};
pub use elapsed::Elapsed;
pub use sleep::{delay, Sleep};

use crate::cx::Cx;
use crate::types::Time;

/// Current time on the clock of the runtime running the calling task.
///
/// Returns `None` outside a runtime task.
#[must_use]
pub fn now() -> Option<Time> {
    Cx::current().map(|cx| cx.now())
}
