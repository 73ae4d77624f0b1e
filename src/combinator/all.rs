//! Await a collection of deferred values.
//!
//! # Semantics
//!
//! `all(deferreds)`:
//! 1. Start every lazy deferred
//! 2. Wait for all of them, in any order
//! 3. Return the values in input order
//!
//! The first failure to arrive is returned at once. Every deferred still in
//! flight at that point is cancelled with a fail-fast reason; `all` does not
//! wait for them to acknowledge, their owning scope does.

use crate::error::Result;
use crate::runtime::task_handle::{Deferred, Job};
use crate::tracing_compat::debug;
use crate::types::CancelReason;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

type Pending<T> = Pin<Box<dyn Future<Output = Result<T>> + Send>>;

/// Waits for every deferred and returns their values in input order.
///
/// # Errors
///
/// The first error produced by any of the deferreds, or `Cancelled` if the
/// waiting task is cancelled.
///
/// ```ignore
/// let parts = (0..4).map(|i| scope.deferred(move |_| async move { Ok(i * i) }));
/// let squares = all(parts).await?;
/// ```
pub fn all<T, I>(deferreds: I) -> All<T>
where
    T: Clone + Send + 'static,
    I: IntoIterator<Item = Deferred<T>>,
{
    let mut jobs = Vec::new();
    let waits: Vec<Option<Pending<T>>> = deferreds
        .into_iter()
        .map(|deferred| {
            deferred.start();
            jobs.push(deferred.job().clone());
            let wait: Pending<T> = Box::pin(async move { deferred.await_value().await });
            Some(wait)
        })
        .collect();
    let values = waits.iter().map(|_| None).collect();
    All {
        waits,
        jobs,
        values,
    }
}

/// Future returned by [`all`].
#[must_use = "futures do nothing unless polled"]
pub struct All<T> {
    waits: Vec<Option<Pending<T>>>,
    jobs: Vec<Job>,
    values: Vec<Option<T>>,
}

impl<T> fmt::Debug for All<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("All")
            .field("total", &self.waits.len())
            .field("remaining", &self.waits.iter().filter(|w| w.is_some()).count())
            .finish()
    }
}

impl<T> All<T> {
    fn cancel_in_flight(&mut self) {
        let reason = CancelReason::sibling_failed();
        for (wait, job) in self.waits.iter_mut().zip(&self.jobs) {
            if wait.take().is_some() {
                debug!(task_id = %job.id(), "all: cancelling in-flight deferred");
                job.cancel_with(&reason);
            }
        }
    }
}

// Only boxed futures and plain values are held; nothing is pinned in place.
impl<T> Unpin for All<T> {}

impl<T> Future for All<T> {
    type Output = Result<Vec<T>>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = &mut *self;
        let mut failure = None;
        for (wait, value) in this.waits.iter_mut().zip(this.values.iter_mut()) {
            let Some(future) = wait else {
                continue;
            };
            match future.as_mut().poll(cx) {
                Poll::Pending => {}
                Poll::Ready(Ok(v)) => {
                    *value = Some(v);
                    *wait = None;
                }
                Poll::Ready(Err(err)) => {
                    *wait = None;
                    failure = Some(err);
                    break;
                }
            }
        }
        if let Some(err) = failure {
            this.cancel_in_flight();
            return Poll::Ready(Err(err));
        }
        if this.waits.iter().any(Option::is_some) {
            return Poll::Pending;
        }
        Poll::Ready(Ok(this.values.iter_mut().filter_map(Option::take).collect()))
    }
}
