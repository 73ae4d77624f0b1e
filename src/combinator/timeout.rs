//! Timeout combinator: add a deadline to a block.
//!
//! The block runs as a child task of the caller. A timer registered with the
//! runtime clock requests cancellation of that child when the deadline
//! passes.
//!
//! # Semantics
//!
//! `with_timeout(d, body)`:
//! 1. Spawn `body` as a child of the calling task
//! 2. Arm a timer at `now + d` that cancels the child with reason `Timeout`
//! 3. Wait for the child to reach a terminal state
//! 4. Disarm the timer and map the child's outcome
//!
//! # Critical Invariant: Timed-out Blocks Are Drained
//!
//! The caller resumes only after the child (and everything it launched) has
//! acknowledged the cancellation. A body that ignores cancellation therefore
//! delays the timeout error, but never outlives it.
//!
//! # Algebraic Law: Timeout Composition
//!
//! ```text
//! with_timeout(d1, with_timeout(d2, f)) ≃ with_timeout(min(d1, d2), f)
//! ```
//!
//! Up to which of the two reports the expiry.

use crate::cx::scope::spawn_body;
use crate::cx::{Cx, Scope};
use crate::error::{Error, Result};
use crate::record::task::TaskOutcome;
use crate::runtime::state::SpawnSpec;
use crate::runtime::task_handle::{resolve_value, ValueSlot};
use crate::runtime::RuntimeInner;
use crate::tracing_compat::debug;
use crate::types::{CancelKind, CancelReason, Outcome, StartMode, TaskId};
use std::future::Future;
use std::sync::{Arc, Weak};
use std::task::{Poll, Wake, Waker};
use std::time::Duration;

/// Timer waker that cancels the timed child when the deadline fires.
struct TimeoutWaker {
    runtime: Weak<RuntimeInner>,
    task: TaskId,
}

impl Wake for TimeoutWaker {
    fn wake(self: Arc<Self>) {
        self.wake_by_ref();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        if let Some(runtime) = self.runtime.upgrade() {
            debug!(task_id = %self.task, "timeout elapsed");
            runtime.cancel(self.task, &CancelReason::timeout());
        }
    }
}

/// Runs `body` with a deadline of `duration`.
///
/// # Errors
///
/// `Timeout` if the deadline passed first (the body's task is `Cancelled`
/// afterwards), the body's own error, `Cancelled` if the caller was cancelled,
/// or `NoRuntime` outside a task.
///
/// # Example
///
/// ```no_run
/// use std::time::Duration;
/// use taskweave::combinator::with_timeout;
/// use taskweave::runtime::RuntimeBuilder;
/// use taskweave::time::delay;
///
/// let runtime = RuntimeBuilder::virtual_time().build()?;
/// let err = runtime
///     .run_scope(|_| async {
///         with_timeout(Duration::from_millis(100), |_| async {
///             delay(Duration::from_secs(1)).await
///         })
///         .await
///     })
///     .unwrap_err();
/// assert!(err.is_timeout());
/// # Ok::<(), taskweave::error::Error>(())
/// ```
pub async fn with_timeout<T, F, Fut>(duration: Duration, body: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(Scope) -> Fut + Send + 'static,
    Fut: Future<Output = Result<T>> + Send + 'static,
{
    run_timed(duration, body, "with_timeout")
        .await?
        .ok_or_else(|| Error::timeout(duration))
}

/// Like [`with_timeout`], but an expired deadline yields `Ok(None)`.
///
/// Only this call's own deadline is mapped; a `Timeout` error escaping a
/// nested `with_timeout` in the body is still returned as an error.
///
/// # Errors
///
/// The body's error, `Cancelled` if the caller was cancelled, or `NoRuntime`
/// outside a task.
pub async fn with_timeout_or_none<T, F, Fut>(duration: Duration, body: F) -> Result<Option<T>>
where
    T: Send + 'static,
    F: FnOnce(Scope) -> Fut + Send + 'static,
    Fut: Future<Output = Result<T>> + Send + 'static,
{
    run_timed(duration, body, "with_timeout_or_none").await
}

/// `Ok(None)` means this call's deadline cancelled the body.
async fn run_timed<T, F, Fut>(duration: Duration, body: F, operation: &str) -> Result<Option<T>>
where
    T: Send + 'static,
    F: FnOnce(Scope) -> Fut + Send + 'static,
    Fut: Future<Output = Result<T>> + Send + 'static,
{
    let cx = Cx::current().ok_or_else(|| Error::no_runtime(operation))?;
    cx.checkpoint()?;
    let runtime = Arc::clone(cx.runtime_inner());
    let deadline = cx.now() + duration;

    let slot = Arc::new(ValueSlot::new());
    let core = spawn_body(
        &runtime,
        SpawnSpec {
            parent: Some(cx.task_id()),
            name: None,
            context: cx.context(),
            mode: StartMode::Eager,
            propagate_failure: false,
            unscoped: None,
        },
        Some(Arc::clone(&slot)),
        body,
    );
    let timer = runtime.timer.register(
        deadline,
        Waker::from(Arc::new(TimeoutWaker {
            runtime: Arc::downgrade(&runtime),
            task: core.id(),
        })),
    );

    let outcome = std::future::poll_fn(|task_cx| match core.poll_outcome(task_cx.waker()) {
        Some(outcome) => Poll::Ready(outcome),
        None => Poll::Pending,
    })
    .await;
    runtime.timer.cancel(&timer);

    if is_own_timeout(&outcome) {
        return Ok(None);
    }
    resolve_value(outcome, || slot.take()).map(Some)
}

fn is_own_timeout(outcome: &TaskOutcome) -> bool {
    matches!(outcome, Outcome::Cancelled(reason) if reason.kind() == CancelKind::Timeout)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::combinator::run_non_cancellable;
    use crate::record::task::TaskState;
    use crate::runtime::RuntimeBuilder;
    use crate::time::delay;

    fn init_test(name: &str) {
        crate::test_utils::init_test_logging();
        crate::test_phase!(name);
    }

    #[test]
    fn fast_body_returns_value() {
        init_test("fast_body_returns_value");
        let runtime = RuntimeBuilder::virtual_time().build().unwrap();
        let value = runtime
            .run_scope(|_| async {
                with_timeout(Duration::from_millis(500), |_| async {
                    delay(Duration::from_millis(100)).await?;
                    Ok(11)
                })
                .await
            })
            .unwrap();
        assert_eq!(value, 11);
        assert_eq!(runtime.now().as_millis(), 100);
        crate::test_complete!("fast_body_returns_value");
    }

    #[test]
    fn slow_body_times_out_and_is_cancelled() {
        init_test("slow_body_times_out_and_is_cancelled");
        let runtime = RuntimeBuilder::virtual_time().build().unwrap();
        let (err, finished_at) = runtime
            .run_scope(|scope| async move {
                let inner = scope.deferred(|_| async {
                    let result = with_timeout(Duration::from_millis(100), |body_scope| async move {
                        let job = body_scope.job();
                        delay(Duration::from_secs(5)).await?;
                        Ok(job)
                    })
                    .await;
                    Ok(result.map(|_| ()))
                });
                let err = inner.await_value().await?.unwrap_err();
                Ok((err, scope.now()))
            })
            .unwrap();
        assert!(err.is_timeout());
        assert_eq!(finished_at.as_millis(), 100);
        crate::test_complete!("slow_body_times_out_and_is_cancelled");
    }

    #[test]
    fn or_none_maps_only_its_own_deadline() {
        init_test("or_none_maps_only_its_own_deadline");
        let runtime = RuntimeBuilder::virtual_time().build().unwrap();
        let (outer, nested) = runtime
            .run_scope(|_| async {
                let outer = with_timeout_or_none(Duration::from_millis(50), |_| async {
                    delay(Duration::from_secs(1)).await
                })
                .await?;
                let nested = with_timeout_or_none(Duration::from_secs(1), |_| async {
                    with_timeout(Duration::from_millis(10), |_| async {
                        delay(Duration::from_secs(1)).await
                    })
                    .await
                })
                .await;
                Ok((outer, nested))
            })
            .unwrap();
        assert!(outer.is_none());
        assert!(nested.unwrap_err().is_timeout());
        crate::test_complete!("or_none_maps_only_its_own_deadline");
    }

    #[test]
    fn earlier_cancel_is_not_reported_as_timeout() {
        init_test("earlier_cancel_is_not_reported_as_timeout");
        let runtime = RuntimeBuilder::virtual_time().build().unwrap();
        let result = runtime
            .run_scope(|_| async {
                let result = with_timeout_or_none(Duration::from_millis(50), |scope| async move {
                    scope.cancel();
                    // keeps running past the deadline without observing the cancel
                    run_non_cancellable(delay(Duration::from_millis(100))).await?;
                    Ok(1)
                })
                .await;
                Ok(result)
            })
            .unwrap();
        let err = result.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Cancelled);
        assert!(!err.is_timeout());
        assert_eq!(runtime.now().as_millis(), 100);
        crate::test_complete!("earlier_cancel_is_not_reported_as_timeout");
    }

    #[test]
    fn timed_out_task_observably_cancelled() {
        init_test("timed_out_task_observably_cancelled");
        let runtime = RuntimeBuilder::virtual_time().build().unwrap();
        let seen = Arc::new(parking_lot::Mutex::new(None));
        let slot = Arc::clone(&seen);
        let err = runtime
            .run_scope(move |_| async move {
                with_timeout(Duration::from_millis(20), move |scope| async move {
                    *slot.lock() = Some(scope.job());
                    delay(Duration::from_millis(40)).await
                })
                .await
            })
            .unwrap_err();
        assert!(err.is_timeout());
        let job = seen.lock().take().unwrap();
        assert_eq!(job.state(), TaskState::Cancelled);
        crate::test_complete!("timed_out_task_observably_cancelled");
    }
}
