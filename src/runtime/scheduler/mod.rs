//! Execution backends.
//!
//! - [`worker`]: the shared worker pool behind `Pooled` tasks
//! - [`lane`]: single-threaded FIFO lanes behind `Confined` tasks
//!
//! `Unconfined` tasks have no backend of their own; their cells poll inline on
//! the waking thread (see [`cell`](crate::runtime::cell)).

pub(crate) mod lane;
pub(crate) mod worker;

pub(crate) use lane::Lane;
pub(crate) use worker::WorkerPool;
