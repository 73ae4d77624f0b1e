//! Taskweave: a structured-concurrency task runtime.
//!
//! # Overview
//!
//! Taskweave runs cooperative tasks organised in a tree. Every task is
//! launched from a scope and owned by the task that launched it; a task does
//! not finish before its children do. Cancellation is a request delivered at
//! checkpoints, and it travels down the tree. Failures travel up to the
//! nearest scope, which cancels the rest of its children.
//!
//! # Core Guarantees
//!
//! - **No orphan tasks**: A parent never reaches a terminal state while a child is still running
//! - **Cooperative cancellation**: Cancel is request, then acknowledge at a checkpoint, then finalize
//! - **First failure wins**: Concurrent failures keep their order of arrival; later ones are suppressed
//! - **Timeouts are cancellations**: `with_timeout` cancels a child task and drains it before returning
//! - **Cold flows**: A [`Flow`](stream::Flow) re-runs its producer on every collection
//! - **Deterministic testing**: A virtual clock that jumps to the next timer when the runtime is idle
//!
//! # Module Structure
//!
//! - [`types`]: Core value types (identifiers, time, cancel reasons, outcomes, contexts)
//! - [`record`]: Task records and the task lifecycle
//! - [`runtime`]: Builder, scheduler, task table, handles and the global runtime
//! - [`cx`]: Per-task context and scope API
//! - [`combinator`]: `all`, timeouts and non-cancellable sections
//! - [`time`]: Clocks, the timer driver and `delay`
//! - [`stream`]: Cold flows and their operators
//! - [`util`]: Generation-checked arena
//! - [`error`]: Error types
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use taskweave::runtime::RuntimeBuilder;
//! use taskweave::time::delay;
//!
//! let runtime = RuntimeBuilder::new().build()?;
//! let total = runtime.run_scope(|scope| async move {
//!     let a = scope.deferred(|_| async {
//!         delay(Duration::from_millis(20)).await?;
//!         Ok(20)
//!     });
//!     let b = scope.deferred(|_| async { Ok(22) });
//!     Ok(a.await_value().await? + b.await_value().await?)
//! })?;
//! assert_eq!(total, 42);
//! # Ok::<(), taskweave::error::Error>(())
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::module_inception)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::cast_possible_truncation)]

#[cfg(test)]
#[macro_use]
pub(crate) mod test_utils;

pub mod combinator;
pub mod cx;
pub mod error;
pub mod record;
pub mod runtime;
pub mod stream;
pub mod time;
pub mod tracing_compat;
pub mod types;
pub mod util;

// Re-exports for convenient access to core types
pub use cx::{Cx, Scope};
pub use error::{ConfigError, Error, ErrorCategory, ErrorContext, ErrorKind, Result, ResultExt};
pub use runtime::{Deferred, Job, Runtime, RuntimeBuilder, RuntimeHandle};
pub use stream::Flow;
pub use types::{
    CancelKind, CancelReason, ContextKind, ExecutionContext, Outcome, PanicPayload, StartMode,
    TaskId, Time,
};
