//! Core value types shared across the runtime.
//!
//! - [`id`]: `TaskId`, `LaneId`, `Time`
//! - [`cancel`]: cancellation kinds and reasons
//! - [`outcome`]: four-valued body outcome
//! - [`context`]: execution contexts and start modes

pub mod cancel;
pub mod context;
pub mod id;
pub mod outcome;

pub use cancel::{CancelKind, CancelReason};
pub use context::{ContextKind, ExecutionContext, StartMode};
pub use id::{LaneId, TaskId, Time};
pub use outcome::{Outcome, PanicPayload};
