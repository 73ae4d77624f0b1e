//! Task context and scope API.
//!
//! The [`Cx`] type identifies the running task and exposes its cancellation
//! state. The [`Scope`] type launches children of a task.
//!
//! The free functions here act on the task being polled on the calling
//! thread:
//!
//! ```ignore
//! use taskweave::cx;
//!
//! async fn crunch(items: Vec<u64>) -> taskweave::error::Result<u64> {
//!     let mut total = 0;
//!     for item in items {
//!         cx::checkpoint()?;
//!         total += item;
//!     }
//!     Ok(total)
//! }
//! ```
//!
//! # Module Contents
//!
//! - [`Cx`]: The per-task context
//! - [`Scope`]: API for launching child tasks
//! - [`scope`]: A nested structured scope inside a task
//! - [`with_context`]: Run a block in another execution context

#[allow(clippy::module_inception)]
pub mod cx;
pub mod scope;

pub use cx::Cx;
pub use scope::Scope;

use crate::error::{Error, Result};
use crate::runtime::state::SpawnSpec;
use crate::runtime::task_handle::{Deferred, Job, ValueSlot};
use crate::types::{ExecutionContext, StartMode};
use std::future::Future;
use std::sync::Arc;

/// Observes a pending cancellation of the current task.
///
/// # Errors
///
/// `Cancelled` if cancellation was requested and is not masked, `NoRuntime`
/// outside a task.
pub fn checkpoint() -> Result<()> {
    Cx::current()
        .ok_or_else(|| Error::no_runtime("checkpoint"))?
        .checkpoint()
}

/// True unless the current task has a pending cancellation.
///
/// Always true outside a task.
#[must_use]
pub fn is_active() -> bool {
    Cx::current().map_or(true, |cx| cx.is_active())
}

/// Runs `body` as a nested structured scope of the current task and returns
/// its value once the body and every task it launched have finished.
///
/// Cancelling the current task cancels the nested scope. A failure inside the
/// nested scope is returned here instead of failing the current task, so the
/// caller may handle it.
///
/// # Errors
///
/// The first failure in the nested scope, `Cancelled`, or `NoRuntime` outside
/// a task.
pub async fn scope<T, F, Fut>(body: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(Scope) -> Fut + Send + 'static,
    Fut: Future<Output = Result<T>> + Send + 'static,
{
    let cx = Cx::current().ok_or_else(|| Error::no_runtime("scope"))?;
    let context = cx.context();
    run_nested(&cx, context, body).await
}

/// Runs `body` in `context` and suspends the caller until it is done.
///
/// The block runs as a child of the current task, so it is cancelled with it,
/// and its failure is returned to the caller like [`scope`] does.
///
/// # Errors
///
/// As for [`scope`].
pub async fn with_context<T, F, Fut>(context: ExecutionContext, body: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(Scope) -> Fut + Send + 'static,
    Fut: Future<Output = Result<T>> + Send + 'static,
{
    let cx = Cx::current().ok_or_else(|| Error::no_runtime("with_context"))?;
    run_nested(&cx, context, body).await
}

async fn run_nested<T, F, Fut>(cx: &Cx, context: ExecutionContext, body: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(Scope) -> Fut + Send + 'static,
    Fut: Future<Output = Result<T>> + Send + 'static,
{
    cx.checkpoint()?;
    let runtime = Arc::clone(cx.runtime_inner());
    let slot = Arc::new(ValueSlot::new());
    let core = scope::spawn_body(
        &runtime,
        SpawnSpec {
            parent: Some(cx.task_id()),
            name: None,
            context,
            mode: StartMode::Eager,
            propagate_failure: false,
            unscoped: None,
        },
        Some(Arc::clone(&slot)),
        body,
    );
    Deferred::new(Job::new(core, runtime), slot).take_value().await
}
