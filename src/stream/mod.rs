//! Cold asynchronous flows.
//!
//! A [`Flow`] performs no work until it is collected, and runs its
//! production procedure again from scratch on every collection. Production
//! suspends at each emission until the collector has processed the value,
//! so a slow collector slows the producer down instead of buffering.
//!
//! # Builders
//! - [`flow`]: From a production procedure
//! - [`flow_of`]: Fixed values
//! - [`iter`]: Any re-iterable collection
//! - [`empty`]: No values
//!
//! # Operators
//! - [`Flow::map`], [`Flow::then`], [`Flow::filter`], [`Flow::transform`],
//!   [`Flow::on_each`], [`Flow::take`]
//!
//! # Terminal Operations
//! - [`Flow::collect`], [`Flow::collect_async`], [`Flow::to_vec`],
//!   [`Flow::fold`], [`Flow::count`], [`Flow::first`]
//!
//! # Cancellation
//!
//! Collection runs in the collecting task. Every emission is a checkpoint,
//! so once that task is cancelled the producer is not resumed past its next
//! emission. Infinite flows end only through cancellation, a timeout or a
//! bounding operator such as [`Flow::take`].
//!
//! # Examples
//!
//! ```ignore
//! use taskweave::stream::iter;
//!
//! let sum = iter(vec![1, 2, 3, 4, 5])
//!     .filter(|x| *x % 2 == 0)
//!     .map(|x| x * 2)
//!     .fold(0, |acc, x| acc + x)
//!     .await?;
//! assert_eq!(sum, 12); // (2*2) + (4*2) = 12
//! ```

mod flow;
mod operators;

pub use flow::{empty, flow, flow_of, iter, Emitter, Flow};
