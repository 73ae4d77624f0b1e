//! Combinators for structured concurrency.
//!
//! This module provides the core combinators:
//!
//! - [`all`](mod@all): Await a collection of deferred values, first failure wins
//! - [`timeout`]: Add a deadline to a block, expressed as cancellation of a child
//! - [`non_cancellable`]: Finish a critical section despite cancellation

pub mod all;
pub mod non_cancellable;
pub mod timeout;

pub use all::{all, All};
pub use non_cancellable::{run_non_cancellable, NonCancellable};
pub use timeout::{with_timeout, with_timeout_or_none};
