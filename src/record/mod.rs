//! Internal records for runtime entities.
//!
//! These types back the task table. They are public for diagnostics, but only
//! the runtime creates or mutates them.

pub mod task;

pub use task::{TaskCore, TaskOutcome, TaskRecord, TaskState, UnscopedKind};
