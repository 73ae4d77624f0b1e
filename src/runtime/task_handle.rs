//! Handles to spawned tasks.
//!
//! [`Job`] observes and controls any task. [`Deferred<T>`] adds the task's
//! value. Dropping a handle never affects the task: it stays owned by its
//! parent (or, for unscoped tasks, by the runtime).

use crate::cx::Cx;
use crate::error::{Error, Result};
use crate::record::task::{TaskCore, TaskOutcome, TaskState};
use crate::runtime::{RuntimeHandle, RuntimeInner};
use crate::types::{CancelReason, ExecutionContext, Outcome, TaskId};
use parking_lot::Mutex;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

/// Write-once cell receiving a deferred's value.
///
/// The value is written when the body returns and only read after the task
/// is terminal, so readers never race the writer.
pub(crate) struct ValueSlot<T> {
    value: Mutex<Option<T>>,
}

impl<T> ValueSlot<T> {
    pub(crate) fn new() -> Self {
        Self {
            value: Mutex::new(None),
        }
    }

    /// Stores `value` unless a value is already present.
    pub(crate) fn put(&self, value: T) {
        let mut slot = self.value.lock();
        if slot.is_none() {
            *slot = Some(value);
        }
    }

    pub(crate) fn take(&self) -> Option<T> {
        self.value.lock().take()
    }

    pub(crate) fn get(&self) -> Option<T>
    where
        T: Clone,
    {
        self.value.lock().clone()
    }
}

/// Converts a terminal outcome plus slot contents into the value a deferred resolves to.
pub(crate) fn resolve_value<T>(outcome: TaskOutcome, value: impl FnOnce() -> Option<T>) -> Result<T> {
    match outcome {
        Outcome::Ok(()) => value().ok_or_else(|| Error::internal("completed task left no value")),
        Outcome::Err(err) => Err(err),
        Outcome::Cancelled(reason) => Err(Error::cancelled(&reason)),
        Outcome::Panicked(payload) => Err(Error::panicked(&payload)),
    }
}

/// Resolves once the task is terminal.
///
/// Starts a lazy task on first poll. While polled from inside a task, the
/// wait is a cancellation checkpoint for the waiting task.
pub(crate) struct WaitOutcome {
    core: Arc<TaskCore>,
    runtime: Arc<RuntimeInner>,
    started: bool,
}

impl WaitOutcome {
    pub(crate) fn new(core: Arc<TaskCore>, runtime: Arc<RuntimeInner>) -> Self {
        Self {
            core,
            runtime,
            started: false,
        }
    }
}

impl Future for WaitOutcome {
    type Output = Result<TaskOutcome>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if !self.started {
            self.started = true;
            self.runtime.start(self.core.id());
        }
        if let Some(current) = Cx::current() {
            current.checkpoint()?;
        }
        match self.core.poll_outcome(cx.waker()) {
            Some(outcome) => Poll::Ready(Ok(outcome)),
            None => Poll::Pending,
        }
    }
}

/// A handle to a launched task.
#[derive(Clone)]
pub struct Job {
    core: Arc<TaskCore>,
    runtime: Arc<RuntimeInner>,
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.core.id())
            .field("name", &self.core.name())
            .field("state", &self.core.state())
            .finish()
    }
}

impl Job {
    pub(crate) fn new(core: Arc<TaskCore>, runtime: Arc<RuntimeInner>) -> Self {
        Self { core, runtime }
    }

    pub(crate) fn core(&self) -> &Arc<TaskCore> {
        &self.core
    }

    /// The task id.
    #[must_use]
    pub fn id(&self) -> TaskId {
        self.core.id()
    }

    /// The task name, if any.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.core.name().map(AsRef::as_ref)
    }

    /// The context the task runs in.
    #[must_use]
    pub fn context(&self) -> ExecutionContext {
        self.core.context()
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> TaskState {
        self.core.state()
    }

    /// True while the task is `Active` (started and not cancelled).
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.core.state() == TaskState::Active
    }

    /// True once the task is terminal, whichever way it ended.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.core.state().is_terminal()
    }

    /// True once cancellation was requested or the task ended `Cancelled`.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.core.is_cancel_requested() || self.core.state() == TaskState::Cancelled
    }

    /// The terminal outcome, once there is one.
    #[must_use]
    pub fn outcome(&self) -> Option<TaskOutcome> {
        self.core.outcome()
    }

    /// Position of this task in the runtime-wide order of terminal transitions.
    #[must_use]
    pub fn finish_seq(&self) -> Option<u64> {
        self.core.finish_seq()
    }

    /// Ids of the task's live children, in creation order.
    #[must_use]
    pub fn children(&self) -> Vec<TaskId> {
        self.runtime.table.lock().children(self.core.id())
    }

    /// Starts a lazy task. Returns true if this call started it.
    pub fn start(&self) -> bool {
        self.runtime.start(self.core.id())
    }

    /// Requests cancellation of the task and its descendants.
    pub fn cancel(&self) {
        self.cancel_with(&CancelReason::user("cancelled through its handle"));
    }

    pub(crate) fn cancel_with(&self, reason: &CancelReason) {
        self.runtime.cancel(self.core.id(), reason);
    }

    /// Waits for the task to become terminal.
    ///
    /// Returns `Ok(())` if it completed or was cancelled, and the stored error
    /// if it failed. Joining starts a lazy task.
    ///
    /// # Errors
    ///
    /// The task's failure, or `Cancelled` if the joining task itself is
    /// cancelled while waiting.
    pub async fn join(&self) -> Result<()> {
        let outcome = WaitOutcome::new(Arc::clone(&self.core), Arc::clone(&self.runtime)).await?;
        join_result(outcome)
    }

    /// Cancels the task, then waits for it to acknowledge.
    ///
    /// # Errors
    ///
    /// As for [`join`](Self::join).
    pub async fn cancel_and_join(&self) -> Result<()> {
        self.cancel();
        self.join().await
    }

    /// Blocks the calling thread until the task is terminal.
    ///
    /// Must not be called from a thread that drives the task's own context.
    ///
    /// # Errors
    ///
    /// The task's failure.
    pub fn join_blocking(&self) -> Result<()> {
        self.runtime.start(self.core.id());
        self.core.wait_terminal(None);
        match self.core.outcome() {
            Some(outcome) => join_result(outcome),
            None => Err(Error::internal("task not terminal after wait")),
        }
    }

    /// A handle to the runtime that owns the task.
    #[must_use]
    pub fn runtime(&self) -> RuntimeHandle {
        RuntimeHandle::from_inner(Arc::clone(&self.runtime))
    }
}

fn join_result(outcome: TaskOutcome) -> Result<()> {
    match outcome {
        Outcome::Ok(()) | Outcome::Cancelled(_) => Ok(()),
        Outcome::Err(err) => Err(err),
        Outcome::Panicked(payload) => Err(Error::panicked(&payload)),
    }
}

/// A handle to a task's eventual value.
pub struct Deferred<T> {
    job: Job,
    slot: Arc<ValueSlot<T>>,
}

impl<T> Clone for Deferred<T> {
    fn clone(&self) -> Self {
        Self {
            job: self.job.clone(),
            slot: Arc::clone(&self.slot),
        }
    }
}

impl<T> fmt::Debug for Deferred<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Deferred").field("job", &self.job).finish()
    }
}

impl<T: Send + 'static> Deferred<T> {
    pub(crate) fn new(job: Job, slot: Arc<ValueSlot<T>>) -> Self {
        Self { job, slot }
    }

    /// The underlying job.
    #[must_use]
    pub fn job(&self) -> &Job {
        &self.job
    }

    /// The task id.
    #[must_use]
    pub fn id(&self) -> TaskId {
        self.job.id()
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> TaskState {
        self.job.state()
    }

    /// True once the task is terminal.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.job.is_completed()
    }

    /// Starts a lazy deferred. Idempotent; returns true if this call started it.
    pub fn start(&self) -> bool {
        self.job.start()
    }

    /// Requests cancellation of the task.
    pub fn cancel(&self) {
        self.job.cancel();
    }

    /// Suspends until the task is terminal and returns its value.
    ///
    /// Any number of tasks may await the same deferred; each gets a clone.
    /// Awaiting starts a lazy deferred.
    ///
    /// # Errors
    ///
    /// The producing task's failure (tagged with its identity), `Cancelled`
    /// if it was cancelled, or `Cancelled` if the awaiting task is cancelled
    /// while waiting.
    pub async fn await_value(&self) -> Result<T>
    where
        T: Clone,
    {
        let outcome = WaitOutcome::new(
            Arc::clone(self.job.core()),
            Arc::clone(&self.job.runtime),
        )
        .await?;
        resolve_value(outcome, || self.slot.get())
    }

    /// Blocks the calling thread until the value is available.
    ///
    /// # Errors
    ///
    /// As for [`await_value`](Self::await_value).
    pub fn get_blocking(&self) -> Result<T>
    where
        T: Clone,
    {
        self.job.runtime.start(self.job.id());
        self.job.core().wait_terminal(None);
        let outcome = self
            .job
            .outcome()
            .ok_or_else(|| Error::internal("task not terminal after wait"))?;
        resolve_value(outcome, || self.slot.get())
    }

    /// Single-consumer wait that moves the value out instead of cloning it.
    ///
    /// Unlike [`await_value`](Self::await_value) it is not a checkpoint: the
    /// caller always outlives the task, which must be its child so that a
    /// cancellation of the caller still reaches it.
    pub(crate) async fn take_value(self) -> Result<T> {
        self.job.runtime.start(self.job.id());
        let core = Arc::clone(self.job.core());
        let outcome = std::future::poll_fn(|cx| match core.poll_outcome(cx.waker()) {
            Some(outcome) => Poll::Ready(outcome),
            None => Poll::Pending,
        })
        .await;
        resolve_value(outcome, || self.slot.take())
    }
}
