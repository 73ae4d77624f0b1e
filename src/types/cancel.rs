//! Cancellation reasons.
//!
//! A cancellation request always says why it was made. When a task receives
//! several requests, the most severe reason is kept (see
//! [`CancelReason::strengthen`]), so a shutdown is never reported as a plain
//! user cancel.

use core::fmt;

/// Why a task was asked to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CancelKind {
    /// Explicit `cancel()` from user code.
    User,
    /// A `with_timeout` deadline elapsed.
    Timeout,
    /// A sibling (or the task's own body) failed and the scope is failing fast.
    FailFast,
    /// An ancestor was cancelled.
    ParentCancelled,
    /// The runtime is shutting down.
    Shutdown,
}

impl CancelKind {
    /// Relative severity; higher wins when reasons are merged.
    ///
    /// `User` and `Timeout` share the lowest rank, so between the two the
    /// first request stands.
    #[must_use]
    pub const fn severity(self) -> u8 {
        match self {
            Self::User | Self::Timeout => 1,
            Self::FailFast => 2,
            Self::ParentCancelled => 3,
            Self::Shutdown => 4,
        }
    }
}

impl fmt::Display for CancelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::User => "user",
            Self::Timeout => "timeout",
            Self::FailFast => "fail-fast",
            Self::ParentCancelled => "parent cancelled",
            Self::Shutdown => "shutdown",
        };
        f.write_str(label)
    }
}

/// A cancellation kind plus an optional static note.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CancelReason {
    /// The kind of cancellation.
    pub kind: CancelKind,
    /// Optional static description.
    pub message: Option<&'static str>,
}

impl CancelReason {
    /// Creates a reason of the given kind without a note.
    #[must_use]
    pub const fn new(kind: CancelKind) -> Self {
        Self {
            kind,
            message: None,
        }
    }

    /// A user cancellation with a note.
    #[must_use]
    pub const fn user(message: &'static str) -> Self {
        Self {
            kind: CancelKind::User,
            message: Some(message),
        }
    }

    /// A timeout cancellation.
    #[must_use]
    pub const fn timeout() -> Self {
        Self::new(CancelKind::Timeout)
    }

    /// A fail-fast cancellation caused by a failing task in the same scope.
    #[must_use]
    pub const fn sibling_failed() -> Self {
        Self::new(CancelKind::FailFast)
    }

    /// A cancellation inherited from an ancestor.
    #[must_use]
    pub const fn parent_cancelled() -> Self {
        Self::new(CancelKind::ParentCancelled)
    }

    /// A cancellation issued by runtime shutdown.
    #[must_use]
    pub const fn shutdown() -> Self {
        Self::new(CancelKind::Shutdown)
    }

    /// Merges `other` into `self`, keeping the more severe kind.
    ///
    /// Returns `true` if `self` changed.
    pub fn strengthen(&mut self, other: &Self) -> bool {
        if other.kind.severity() > self.kind.severity() {
            *self = other.clone();
            return true;
        }
        if other.kind == self.kind && self.message.is_none() && other.message.is_some() {
            self.message = other.message;
            return true;
        }
        false
    }

    /// The kind of this reason.
    #[must_use]
    pub const fn kind(&self) -> CancelKind {
        self.kind
    }

    /// True for [`CancelKind::Shutdown`].
    #[must_use]
    pub const fn is_shutdown(&self) -> bool {
        matches!(self.kind, CancelKind::Shutdown)
    }
}

impl Default for CancelReason {
    fn default() -> Self {
        Self::new(CancelKind::User)
    }
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if let Some(msg) = self.message {
            write!(f, ": {msg}")?;
        }
        Ok(())
    }
}
