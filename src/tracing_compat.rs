//! Logging facade.
//!
//! Runtime code logs through this module so that it builds whether or not
//! the `tracing-integration` feature is enabled:
//!
//! - **With feature enabled** (default): Re-exports the `tracing` macros.
//! - **Without feature**: No-op macros that compile to nothing.
//!
//! # Usage
//!
//! ```rust,ignore
//! use taskweave::tracing_compat::{debug, info};
//!
//! info!("Starting operation");
//! debug!(task_id = %id, "task spawned");
//! ```
//!
//! # Levels
//!
//! | Level | Events |
//! |-------|--------|
//! | `error` | failures of unscoped tasks nobody handles |
//! | `warn` | task failures, shutdown stragglers |
//! | `info` | runtime shutdown |
//! | `debug` | spawn, cancel requests, cancel observed, worker start/stop |
//! | `trace` | state transitions, timer firing, virtual clock advance |

#[cfg(feature = "tracing-integration")]
pub use tracing::{debug, error, info, trace, warn};

// When tracing is disabled, provide no-op macros
#[cfg(not(feature = "tracing-integration"))]
mod noop {
    //! No-op implementations when tracing is disabled.

    /// No-op trace-level logging macro.
    #[macro_export]
    macro_rules! trace {
        ($($arg:tt)*) => {{}};
    }

    /// No-op debug-level logging macro.
    #[macro_export]
    macro_rules! debug {
        ($($arg:tt)*) => {{}};
    }

    /// No-op info-level logging macro.
    #[macro_export]
    macro_rules! info {
        ($($arg:tt)*) => {{}};
    }

    /// No-op warn-level logging macro.
    #[macro_export]
    macro_rules! warn {
        ($($arg:tt)*) => {{}};
    }

    /// No-op error-level logging macro.
    #[macro_export]
    macro_rules! error {
        ($($arg:tt)*) => {{}};
    }

    pub use crate::{debug, error, info, trace, warn};
}

#[cfg(not(feature = "tracing-integration"))]
pub use noop::*;
