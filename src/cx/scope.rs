//! Scope API for launching child tasks.
//!
//! Every task body receives a `Scope` bound to its own task. Children
//! launched through it are owned by that task: the task does not reach a
//! terminal state until every child has, a failing child cancels the rest of
//! the scope, and cancelling the task cancels every descendant.
//!
//! # Soundness Rules for Send Tasks
//!
//! | Component | Bound | Rationale |
//! |-----------|-------|-----------|
//! | Factory | `F: Send + 'static` | Factory may be called on any worker |
//! | Future | `Fut: Send + 'static` | Task may migrate between polls |
//! | Output | `T: Send + 'static` | Value read from a potentially different thread |
//!
//! Borrowed data cannot be captured; share state through `Arc` instead.

use crate::error::{Error, ErrorKind, Result};
use crate::record::task::{TaskCore, TaskOutcome};
use crate::runtime::state::SpawnSpec;
use crate::runtime::task_handle::{Deferred, Job, ValueSlot};
use crate::runtime::{RuntimeHandle, RuntimeInner};
use crate::types::{ExecutionContext, Outcome, PanicPayload, StartMode, TaskId, Time};
use std::fmt;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

/// Handle for launching children of one task.
///
/// Cloning a scope is cheap; all clones launch into the same task.
#[derive(Clone)]
pub struct Scope {
    core: Arc<TaskCore>,
    runtime: Arc<RuntimeInner>,
    next_name: Option<Arc<str>>,
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope")
            .field("task_id", &self.core.id())
            .field("context", &self.core.context())
            .finish_non_exhaustive()
    }
}

impl Scope {
    pub(crate) fn new(core: Arc<TaskCore>, runtime: Arc<RuntimeInner>) -> Self {
        Self {
            core,
            runtime,
            next_name: None,
        }
    }

    /// The id of the task this scope belongs to.
    #[must_use]
    pub fn id(&self) -> TaskId {
        self.core.id()
    }

    /// The context children inherit when launched without one.
    #[must_use]
    pub fn context(&self) -> ExecutionContext {
        self.core.context()
    }

    /// A [`Job`] for the task this scope belongs to.
    #[must_use]
    pub fn job(&self) -> Job {
        Job::new(Arc::clone(&self.core), Arc::clone(&self.runtime))
    }

    /// True while the owning task has no pending cancellation.
    #[must_use]
    pub fn is_active(&self) -> bool {
        !self.core.is_cancel_requested()
    }

    /// Cancels the owning task and therefore every child of this scope.
    pub fn cancel(&self) {
        self.job().cancel();
    }

    /// Current time on the runtime clock.
    #[must_use]
    pub fn now(&self) -> Time {
        self.runtime.timer.now()
    }

    /// A handle to the owning runtime.
    #[must_use]
    pub fn runtime(&self) -> RuntimeHandle {
        RuntimeHandle::from_inner(Arc::clone(&self.runtime))
    }

    /// Returns a scope whose next launches carry `name`.
    ///
    /// ```ignore
    /// scope.named("loader").launch(|_| async { load().await });
    /// ```
    #[must_use]
    pub fn named(&self, name: impl Into<Arc<str>>) -> Self {
        Self {
            next_name: Some(name.into()),
            ..self.clone()
        }
    }

    /// Launches a child in the scope's context. The body's value is dropped.
    pub fn launch<T, F, Fut>(&self, body: F) -> Job
    where
        T: Send + 'static,
        F: FnOnce(Self) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        self.launch_in(self.context(), body)
    }

    /// Launches a child in `context`.
    pub fn launch_in<T, F, Fut>(&self, context: ExecutionContext, body: F) -> Job
    where
        T: Send + 'static,
        F: FnOnce(Self) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let spec = self.child_spec(context, StartMode::Eager);
        let core = spawn_body::<T, _, _>(&self.runtime, spec, None, body);
        Job::new(core, Arc::clone(&self.runtime))
    }

    /// Starts a child computing a value, in the scope's context.
    pub fn deferred<T, F, Fut>(&self, body: F) -> Deferred<T>
    where
        T: Send + 'static,
        F: FnOnce(Self) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        self.deferred_in(self.context(), StartMode::Eager, body)
    }

    /// Creates a child computing a value that does not run until it is
    /// started or awaited.
    pub fn deferred_lazy<T, F, Fut>(&self, body: F) -> Deferred<T>
    where
        T: Send + 'static,
        F: FnOnce(Self) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        self.deferred_in(self.context(), StartMode::Lazy, body)
    }

    /// Creates a child computing a value in `context`.
    ///
    /// A lazy child keeps its scope open until it is started and finishes,
    /// or until the scope is cancelled.
    pub fn deferred_in<T, F, Fut>(
        &self,
        context: ExecutionContext,
        mode: StartMode,
        body: F,
    ) -> Deferred<T>
    where
        T: Send + 'static,
        F: FnOnce(Self) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let slot = Arc::new(ValueSlot::new());
        let spec = self.child_spec(context, mode);
        let core = spawn_body(&self.runtime, spec, Some(Arc::clone(&slot)), body);
        Deferred::new(Job::new(core, Arc::clone(&self.runtime)), slot)
    }

    fn child_spec(&self, context: ExecutionContext, mode: StartMode) -> SpawnSpec {
        SpawnSpec {
            parent: Some(self.core.id()),
            name: self.next_name.clone(),
            context,
            mode,
            propagate_failure: true,
            unscoped: None,
        }
    }
}

/// Registers a task running `body` and returns its core.
pub(crate) fn spawn_body<T, F, Fut>(
    runtime: &Arc<RuntimeInner>,
    spec: SpawnSpec,
    slot: Option<Arc<ValueSlot<T>>>,
    body: F,
) -> Arc<TaskCore>
where
    T: Send + 'static,
    F: FnOnce(Scope) -> Fut + Send + 'static,
    Fut: Future<Output = Result<T>> + Send + 'static,
{
    runtime.spawn_task(spec, |core| {
        let scope = Scope::new(Arc::clone(core), Arc::clone(runtime));
        Box::pin(TaskBody {
            core: Arc::clone(core),
            stage: Stage::Init(body, scope),
            slot,
        })
    })
}

enum Stage<F, Fut> {
    Init(F, Scope),
    Running(Pin<Box<Fut>>),
    Done,
}

/// Adapts a user body to the runtime's task future.
///
/// The factory runs on first poll, never under the task-table lock. Panics in
/// the factory or the future are caught here and become `Panicked` outcomes.
struct TaskBody<T, F, Fut> {
    core: Arc<TaskCore>,
    stage: Stage<F, Fut>,
    slot: Option<Arc<ValueSlot<T>>>,
}

// The body future is boxed and the factory is never pinned.
impl<T, F, Fut> Unpin for TaskBody<T, F, Fut> {}

impl<T, F, Fut> TaskBody<T, F, Fut> {
    fn finish(&self, result: Result<T>) -> TaskOutcome {
        match result {
            Ok(value) => {
                if let Some(slot) = &self.slot {
                    slot.put(value);
                }
                Outcome::Ok(())
            }
            Err(err) if err.kind() == ErrorKind::Cancelled => {
                Outcome::Cancelled(self.core.cancel_reason().unwrap_or_default())
            }
            Err(err) => Outcome::Err(err),
        }
    }
}

impl<T, F, Fut> Future for TaskBody<T, F, Fut>
where
    F: FnOnce(Scope) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    type Output = TaskOutcome;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = &mut *self;
        loop {
            match std::mem::replace(&mut this.stage, Stage::Done) {
                Stage::Init(factory, scope) => {
                    if let Some(reason) = this.core.cancel_reason() {
                        return Poll::Ready(Outcome::Cancelled(reason));
                    }
                    match catch_unwind(AssertUnwindSafe(|| factory(scope))) {
                        Ok(future) => this.stage = Stage::Running(Box::pin(future)),
                        Err(payload) => {
                            return Poll::Ready(Outcome::Panicked(PanicPayload::from_any(
                                payload.as_ref(),
                            )));
                        }
                    }
                }
                Stage::Running(mut future) => {
                    return match catch_unwind(AssertUnwindSafe(|| future.as_mut().poll(cx))) {
                        Ok(Poll::Pending) => {
                            this.stage = Stage::Running(future);
                            Poll::Pending
                        }
                        Ok(Poll::Ready(result)) => Poll::Ready(this.finish(result)),
                        Err(payload) => Poll::Ready(Outcome::Panicked(PanicPayload::from_any(
                            payload.as_ref(),
                        ))),
                    };
                }
                Stage::Done => {
                    return Poll::Ready(Outcome::Err(Error::internal(
                        "task body polled after completion",
                    )));
                }
            }
        }
    }
}
