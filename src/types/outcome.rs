//! Four-valued outcome of a task body.
//!
//! A body either produces a value, returns an application error, observes
//! cancellation, or panics. Panics are caught at the task boundary and carried
//! as a [`PanicPayload`] so they never unwind through a worker thread.

use super::cancel::CancelReason;
use crate::error::{Error, ErrorKind};
use core::fmt;
use std::any::Any;

/// Message recovered from a caught panic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PanicPayload {
    message: String,
}

impl PanicPayload {
    /// Creates a payload with the given message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Extracts a readable message from a `catch_unwind` payload.
    #[must_use]
    pub fn from_any(payload: &(dyn Any + Send)) -> Self {
        let message = payload
            .downcast_ref::<&'static str>()
            .map(|s| (*s).to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string());
        Self { message }
    }

    /// The panic message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for PanicPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "panic: {}", self.message)
    }
}

/// Result of running a task body to its end.
///
/// Severity grows `Ok < Err < Cancelled < Panicked`.
#[derive(Debug, Clone)]
pub enum Outcome<T, E> {
    /// The body produced a value.
    Ok(T),
    /// The body returned an application error.
    Err(E),
    /// The body stopped because it observed cancellation.
    Cancelled(CancelReason),
    /// The body panicked.
    Panicked(PanicPayload),
}

impl<T, E> Outcome<T, E> {
    /// Severity rank, 0 for `Ok` up to 3 for `Panicked`.
    #[must_use]
    pub const fn severity(&self) -> u8 {
        match self {
            Self::Ok(_) => 0,
            Self::Err(_) => 1,
            Self::Cancelled(_) => 2,
            Self::Panicked(_) => 3,
        }
    }

    /// True for `Ok`.
    #[must_use]
    pub const fn is_ok(&self) -> bool {
        matches!(self, Self::Ok(_))
    }

    /// True for `Cancelled`.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }

    /// True for `Err` and `Panicked`, the outcomes that count as task failure.
    #[must_use]
    pub const fn is_failure(&self) -> bool {
        matches!(self, Self::Err(_) | Self::Panicked(_))
    }

    /// Maps the success value.
    pub fn map<U, F: FnOnce(T) -> U>(self, f: F) -> Outcome<U, E> {
        match self {
            Self::Ok(v) => Outcome::Ok(f(v)),
            Self::Err(e) => Outcome::Err(e),
            Self::Cancelled(r) => Outcome::Cancelled(r),
            Self::Panicked(p) => Outcome::Panicked(p),
        }
    }
}

impl<T> Outcome<T, Error> {
    /// Classifies a body result: cancellation errors become `Cancelled`.
    #[must_use]
    pub fn from_body_result(result: Result<T, Error>) -> Self {
        match result {
            Ok(v) => Self::Ok(v),
            Err(e) if e.is_cancelled() => Self::Cancelled(CancelReason::default()),
            Err(e) => Self::Err(e),
        }
    }

    /// Converts into a crate `Result`, turning cancellation and panics into errors.
    pub fn into_result(self) -> Result<T, Error> {
        match self {
            Self::Ok(v) => Ok(v),
            Self::Err(e) => Err(e),
            Self::Cancelled(reason) => Err(Error::cancelled(&reason)),
            Self::Panicked(payload) => Err(Error::new(ErrorKind::Panicked)
                .with_message(payload.message().to_string())),
        }
    }
}
