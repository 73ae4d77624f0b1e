//! The source error carried by timeout failures.

use core::fmt;
use std::time::Duration;

/// A `with_timeout` budget ran out before its body finished.
///
/// Timeout errors ([`ErrorKind::Timeout`](crate::error::ErrorKind::Timeout))
/// carry an `Elapsed` as their [`source`](std::error::Error::source).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Elapsed {
    after: Duration,
}

impl Elapsed {
    /// Creates the error for a budget of `after`.
    #[must_use]
    pub const fn new(after: Duration) -> Self {
        Self { after }
    }

    /// The budget that was exceeded.
    #[must_use]
    pub const fn duration(&self) -> Duration {
        self.after
    }
}

impl fmt::Display for Elapsed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "deadline of {:?} has elapsed", self.after)
    }
}

impl std::error::Error for Elapsed {}
