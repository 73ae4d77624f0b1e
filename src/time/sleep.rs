//! Cancellable delays.

use super::driver::{TimerDriver, TimerHandle};
use crate::cx::Cx;
use crate::error::{Error, Result};
use crate::types::Time;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

/// Suspends the current task for `duration`.
///
/// This is a suspension point and a cancellation checkpoint: a pending
/// cancellation request is observed before the delay starts and whenever the
/// task is woken while waiting, and the delay then resolves to
/// `Err(Cancelled)`. Outside a runtime task it resolves to `Err(NoRuntime)`.
///
/// ```no_run
/// use std::time::Duration;
/// use taskweave::runtime::RuntimeBuilder;
/// use taskweave::time::delay;
///
/// let runtime = RuntimeBuilder::current_thread().build()?;
/// runtime.run_scope(|_scope| async move {
///     delay(Duration::from_millis(100)).await?;
///     Ok(())
/// })?;
/// # Ok::<(), taskweave::error::Error>(())
/// ```
pub fn delay(duration: Duration) -> Sleep {
    Sleep {
        duration,
        deadline: None,
        timer: None,
    }
}

/// Future returned by [`delay`].
///
/// The deadline is fixed on first poll from the runtime clock, so a `Sleep`
/// built ahead of time still waits its full duration.
#[derive(Debug)]
#[must_use = "futures do nothing unless polled"]
pub struct Sleep {
    duration: Duration,
    deadline: Option<Time>,
    timer: Option<(Arc<TimerDriver>, TimerHandle)>,
}

impl Sleep {
    /// The requested delay.
    #[must_use]
    pub const fn duration(&self) -> Duration {
        self.duration
    }

    /// The absolute deadline, once the sleep has been polled.
    #[must_use]
    pub const fn deadline(&self) -> Option<Time> {
        self.deadline
    }

    fn clear_timer(&mut self) {
        if let Some((driver, handle)) = self.timer.take() {
            driver.cancel(&handle);
        }
    }
}

impl Future for Sleep {
    type Output = Result<()>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let Some(task) = Cx::current() else {
            return Poll::Ready(Err(Error::no_runtime("delay")));
        };
        if let Err(err) = task.checkpoint() {
            self.clear_timer();
            return Poll::Ready(Err(err));
        }

        let driver = task.timer_driver();
        let now = driver.now();
        let deadline = match self.deadline {
            Some(deadline) => deadline,
            None => {
                let deadline = now + self.duration;
                self.deadline = Some(deadline);
                deadline
            }
        };
        if now >= deadline {
            self.clear_timer();
            return Poll::Ready(Ok(()));
        }

        let still_pending = self
            .timer
            .as_ref()
            .is_some_and(|(driver, handle)| driver.update_waker(handle, cx.waker()));
        if !still_pending {
            let handle = driver.register(deadline, cx.waker().clone());
            self.timer = Some((Arc::clone(driver), handle));
        }
        Poll::Pending
    }
}

impl Drop for Sleep {
    fn drop(&mut self) {
        self.clear_timer();
    }
}
