//! Shield a future from cancellation of the task running it.

use crate::cx::cx::MaskGuard;
use crate::cx::Cx;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

/// Runs `future` with the current task's cancellation masked.
///
/// Checkpoints reached while polling `future` (including the ones inside
/// [`delay`](crate::time::delay)) succeed even if cancellation was requested;
/// the request stays pending and is observed at the first checkpoint after
/// `future` completes. Use it for cleanup that must finish.
///
/// Masking covers the current task only. Children launched from inside are
/// still cancelled with it.
pub fn run_non_cancellable<F: Future>(future: F) -> NonCancellable<F> {
    NonCancellable {
        inner: Box::pin(future),
    }
}

/// Future returned by [`run_non_cancellable`].
#[must_use = "futures do nothing unless polled"]
pub struct NonCancellable<F> {
    inner: Pin<Box<F>>,
}

impl<F> std::fmt::Debug for NonCancellable<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NonCancellable").finish_non_exhaustive()
    }
}

impl<F: Future> Future for NonCancellable<F> {
    type Output = F::Output;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let task = Cx::current();
        let _mask = task.as_ref().map(|task| MaskGuard::new(task.core()));
        self.inner.as_mut().poll(cx)
    }
}
