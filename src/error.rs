//! Error types and error handling strategy for taskweave.
//!
//! Every fallible operation returns [`Result<T>`](Result). The error taxonomy
//! mirrors how failures travel through a task tree:
//!
//! - **Cancellation** (`Cancelled`, `Timeout`, `FlowAborted`): expected control
//!   flow. A body that returns a `Cancelled` error ends `Cancelled`, never
//!   `Failed`, and never cancels its siblings. `Timeout` and `FlowAborted` are
//!   handled by the operation that raised them; if a body lets one escape it
//!   is reported like any other error so that the caller sees its kind.
//! - **Application** (`User`, `Panicked`): failures raised by task bodies. They
//!   carry the originating task in [`ErrorContext`], travel to the nearest
//!   scope, and cancel the rest of that scope.
//! - **Runtime** (`NoRuntime`, `RuntimeShutdown`, `Config`): misuse or lifecycle
//!   problems of the runtime itself.
//! - **Internal** (`InvalidStateTransition`, `Internal`): runtime bugs.
//!
//! When several failures race inside one scope, the first to arrive is the
//! primary error and the rest are attached as [`Error::suppressed`] causes.

use core::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::time::Elapsed;
use crate::types::{CancelReason, PanicPayload, TaskId};

/// The kind of error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The task observed a cancellation request.
    Cancelled,
    /// A `with_timeout` deadline elapsed.
    Timeout,
    /// Error returned by application code.
    User,
    /// A task body panicked.
    Panicked,
    /// The operation needs a running task context and none is present.
    NoRuntime,
    /// The runtime has shut down.
    RuntimeShutdown,
    /// A task lifecycle transition was rejected.
    InvalidStateTransition,
    /// Invalid runtime configuration.
    Config,
    /// A flow collection was stopped early by a bounded operator.
    FlowAborted,
    /// Runtime bug.
    Internal,
}

/// High-level grouping of [`ErrorKind`]s.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Cooperative cancellation and its specializations.
    Cancellation,
    /// Failures raised by task bodies.
    Application,
    /// Runtime lifecycle and configuration problems.
    Runtime,
    /// Runtime bugs.
    Internal,
}

impl ErrorKind {
    /// Returns the category of this kind.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::Cancelled | Self::Timeout | Self::FlowAborted => ErrorCategory::Cancellation,
            Self::User | Self::Panicked => ErrorCategory::Application,
            Self::NoRuntime | Self::RuntimeShutdown | Self::Config => ErrorCategory::Runtime,
            Self::InvalidStateTransition | Self::Internal => ErrorCategory::Internal,
        }
    }
}

/// Identity of the task an error originated in.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorContext {
    /// The task whose body produced the error.
    pub task_id: Option<TaskId>,
    /// The task's name, if it was given one.
    pub task_name: Option<Arc<str>>,
}

impl ErrorContext {
    /// True when no task identity has been attached yet.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.task_id.is_none() && self.task_name.is_none()
    }
}

/// The main error type for taskweave operations.
#[derive(Debug, Clone)]
pub struct Error {
    kind: ErrorKind,
    message: Option<String>,
    source: Option<Arc<dyn std::error::Error + Send + Sync>>,
    context: ErrorContext,
    suppressed: Vec<Error>,
}

impl Error {
    /// Creates an error of the given kind.
    #[must_use]
    pub const fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            message: None,
            source: None,
            context: ErrorContext {
                task_id: None,
                task_name: None,
            },
            suppressed: Vec::new(),
        }
    }

    /// An application error with a message.
    #[must_use]
    pub fn user(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::User).with_message(message)
    }

    /// A cancellation error carrying the structured reason.
    #[must_use]
    pub fn cancelled(reason: &CancelReason) -> Self {
        Self::new(ErrorKind::Cancelled).with_message(reason.to_string())
    }

    /// The error returned by `with_timeout` when `after` elapsed first.
    #[must_use]
    pub fn timeout(after: Duration) -> Self {
        Self::new(ErrorKind::Timeout)
            .with_message(format!("timed out after {after:?}"))
            .with_source(Elapsed::new(after))
    }

    /// A task body panicked.
    #[must_use]
    pub fn panicked(payload: &PanicPayload) -> Self {
        Self::new(ErrorKind::Panicked).with_message(payload.message().to_string())
    }

    /// `operation` was called outside of a task.
    #[must_use]
    pub fn no_runtime(operation: &str) -> Self {
        Self::new(ErrorKind::NoRuntime)
            .with_message(format!("{operation} must be called from inside a runtime task"))
    }

    /// The runtime no longer accepts work.
    #[must_use]
    pub fn runtime_shutdown() -> Self {
        Self::new(ErrorKind::RuntimeShutdown).with_message("runtime has shut down")
    }

    /// A runtime bug.
    #[must_use]
    pub fn internal(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal).with_message(detail)
    }

    /// Returns the error kind.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the error category.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        self.kind.category()
    }

    /// True if this is a plain cancellation.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self.kind, ErrorKind::Cancelled)
    }

    /// True if this is a `with_timeout` expiry.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self.kind, ErrorKind::Timeout)
    }

    /// Adds a message.
    #[must_use]
    pub fn with_message(mut self, msg: impl Into<String>) -> Self {
        self.message = Some(msg.into());
        self
    }

    /// Replaces the task context.
    #[must_use]
    pub fn with_context(mut self, ctx: ErrorContext) -> Self {
        self.context = ctx;
        self
    }

    /// Adds a source error to the chain.
    #[must_use]
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Arc::new(source));
        self
    }

    /// Attaches the originating task unless one is already recorded.
    ///
    /// An error rethrown by an awaiting parent keeps the identity of the child
    /// that raised it.
    #[must_use]
    pub fn with_task(mut self, task_id: TaskId, task_name: Option<Arc<str>>) -> Self {
        if self.context.is_empty() {
            self.context = ErrorContext {
                task_id: Some(task_id),
                task_name,
            };
        }
        self
    }

    /// Records `other` as a secondary cause.
    ///
    /// Errors that describe the same failure as this one or one already
    /// suppressed are ignored, so a failure that reaches a scope through several
    /// paths is reported once.
    pub fn add_suppressed(&mut self, other: Self) {
        if self.is_same_failure(&other) || self.suppressed.iter().any(|s| s.is_same_failure(&other))
        {
            return;
        }
        self.suppressed.push(other);
    }

    /// Secondary failures that lost the race to become the primary error.
    #[must_use]
    pub fn suppressed(&self) -> &[Self] {
        &self.suppressed
    }

    /// True if both errors describe the same failure of the same task.
    #[must_use]
    pub fn is_same_failure(&self, other: &Self) -> bool {
        self.kind == other.kind
            && self.message == other.message
            && self.context.task_id == other.context.task_id
    }

    /// Returns the error message, if any.
    #[must_use]
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// Returns the task context.
    #[must_use]
    pub fn context(&self) -> &ErrorContext {
        &self.context
    }

    /// Returns the task the error originated in, if known.
    #[must_use]
    pub const fn task_id(&self) -> Option<TaskId> {
        self.context.task_id
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.kind)?;
        if let Some(msg) = &self.message {
            write!(f, ": {msg}")?;
        }
        match (&self.context.task_id, &self.context.task_name) {
            (Some(id), Some(name)) => write!(f, " (in task {id} \"{name}\")")?,
            (Some(id), None) => write!(f, " (in task {id})")?,
            _ => {}
        }
        if !self.suppressed.is_empty() {
            write!(f, " [+{} suppressed]", self.suppressed.len())?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|e| e.as_ref() as _)
    }
}

/// Configuration and builder failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// An environment variable held an unusable value.
    #[error("environment variable {var}={value:?} is invalid: {reason}")]
    InvalidEnv {
        /// Variable name.
        var: String,
        /// The raw value.
        value: String,
        /// Why it was rejected.
        reason: String,
    },
    /// A configuration field held an unusable value.
    #[error("invalid value for {field}: {reason}")]
    InvalidValue {
        /// Field name.
        field: &'static str,
        /// Why it was rejected.
        reason: String,
    },
    /// A configuration file could not be read.
    #[error("cannot read config file {path}: {source}")]
    Io {
        /// The file path.
        path: String,
        /// The I/O failure.
        #[source]
        source: std::io::Error,
    },
    /// A configuration file could not be parsed.
    #[cfg(feature = "config-file")]
    #[error("cannot parse config file: {0}")]
    Toml(#[from] toml::de::Error),
    /// A runtime thread could not be spawned.
    #[error("failed to spawn thread {name}: {source}")]
    ThreadSpawn {
        /// The thread name.
        name: String,
        /// The OS failure.
        #[source]
        source: std::io::Error,
    },
}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        Self::new(ErrorKind::Config)
            .with_message(err.to_string())
            .with_source(err)
    }
}

/// Extension trait for adding a message to foreign results.
#[allow(clippy::result_large_err)]
pub trait ResultExt<T> {
    /// Attach a message on error.
    fn context(self, msg: impl Into<String>) -> Result<T>;
}

impl<T, E: Into<Error>> ResultExt<T> for core::result::Result<T, E> {
    fn context(self, msg: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.into().with_message(msg))
    }
}

/// A specialized Result type for taskweave operations.
#[allow(clippy::result_large_err)]
pub type Result<T> = core::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn display_without_message() {
        assert_eq!(Error::new(ErrorKind::Internal).to_string(), "Internal");
    }

    #[test]
    fn display_with_task_and_suppressed() {
        let mut err = Error::user("boom").with_task(TaskId::new_for_test(3, 0), Some("loader".into()));
        err.add_suppressed(Error::user("second").with_task(TaskId::new_for_test(4, 0), None));
        assert_eq!(
            err.to_string(),
            "User: boom (in task T3 \"loader\") [+1 suppressed]"
        );
    }

    #[test]
    fn with_task_keeps_original_origin() {
        let origin = TaskId::new_for_test(1, 0);
        let err = Error::user("x")
            .with_task(origin, None)
            .with_task(TaskId::new_for_test(2, 0), None);
        assert_eq!(err.task_id(), Some(origin));
    }

    #[test]
    fn suppressed_ignores_duplicates() {
        let child = TaskId::new_for_test(5, 0);
        let mut primary = Error::user("first").with_task(child, None);
        primary.add_suppressed(Error::user("first").with_task(child, None));
        assert!(primary.suppressed().is_empty());

        let other = Error::user("second").with_task(TaskId::new_for_test(6, 0), None);
        primary.add_suppressed(other.clone());
        primary.add_suppressed(other);
        assert_eq!(primary.suppressed().len(), 1);
    }

    #[test]
    fn categories() {
        assert_eq!(ErrorKind::Timeout.category(), ErrorCategory::Cancellation);
        assert_eq!(ErrorKind::Panicked.category(), ErrorCategory::Application);
        assert_eq!(ErrorKind::Config.category(), ErrorCategory::Runtime);
        assert_eq!(
            ErrorKind::InvalidStateTransition.category(),
            ErrorCategory::Internal
        );
    }

    #[test]
    fn timeout_error_exposes_elapsed_source() {
        let err = Error::timeout(Duration::from_millis(250));
        assert!(err.is_timeout());
        assert!(!err.is_cancelled());
        let source = err.source().expect("source missing");
        assert!(source.to_string().contains("250ms"));
    }

    #[test]
    fn config_error_converts() {
        let err: Error = ConfigError::InvalidValue {
            field: "worker_threads",
            reason: "must be at least 1".into(),
        }
        .into();
        assert_eq!(err.kind(), ErrorKind::Config);
        assert!(err.message().unwrap_or_default().contains("worker_threads"));
    }

    #[test]
    fn result_ext_adds_message() {
        let res: core::result::Result<(), ConfigError> = Err(ConfigError::InvalidValue {
            field: "poll_budget",
            reason: "zero".into(),
        });
        let err = res.context("building runtime").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
        assert_eq!(err.message(), Some("building runtime"));
    }
}
