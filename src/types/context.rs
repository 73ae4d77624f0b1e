//! Execution contexts and start modes.

use super::id::LaneId;
use core::fmt;
use core::str::FromStr;

/// Where a task's body runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExecutionContext {
    /// Any worker of the shared pool; consecutive polls may land on different threads.
    Pooled,
    /// Polled inline on whichever thread starts or wakes the task.
    Unconfined,
    /// Always polled on the thread behind the given lane, in submission order.
    Confined(LaneId),
}

impl ExecutionContext {
    /// The kind of context, without the lane identity.
    #[must_use]
    pub const fn kind(self) -> ContextKind {
        match self {
            Self::Pooled => ContextKind::Pooled,
            Self::Unconfined => ContextKind::Unconfined,
            Self::Confined(_) => ContextKind::Confined,
        }
    }
}

impl fmt::Display for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pooled => f.write_str("pooled"),
            Self::Unconfined => f.write_str("unconfined"),
            Self::Confined(lane) => write!(f, "confined({lane})"),
        }
    }
}

/// The configurable default for tasks that are not given an explicit context.
///
/// `Confined` means "the caller's lane" for [`run_scope`](crate::runtime::Runtime::run_scope)
/// roots and the runtime's global lane for unscoped tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "config-file", derive(serde::Deserialize))]
#[cfg_attr(feature = "config-file", serde(rename_all = "lowercase"))]
pub enum ContextKind {
    /// The shared worker pool.
    Pooled,
    /// Inline on the starting/waking thread.
    Unconfined,
    /// A single-threaded FIFO lane.
    #[default]
    Confined,
}

impl FromStr for ContextKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pooled" | "pool" | "default" => Ok(Self::Pooled),
            "unconfined" | "inline" => Ok(Self::Unconfined),
            "confined" | "caller" => Ok(Self::Confined),
            other => Err(format!(
                "unknown execution context '{other}' (expected pooled, unconfined or confined)"
            )),
        }
    }
}

/// Whether a task starts as soon as it is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum StartMode {
    /// Scheduled immediately.
    #[default]
    Eager,
    /// Stays `Created` until awaited, joined or explicitly started.
    Lazy,
}
