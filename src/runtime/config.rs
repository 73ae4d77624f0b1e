//! Runtime configuration types.
//!
//! These types hold the concrete values that drive runtime behavior. In most
//! cases you should use [`RuntimeBuilder`](super::builder::RuntimeBuilder) to
//! construct a runtime rather than creating a [`RuntimeConfig`] directly.
//!
//! # Defaults
//!
//! | Field | Default |
//! |-------|---------|
//! | `worker_threads` | available CPU parallelism |
//! | `thread_stack_size` | 2 MiB |
//! | `thread_name_prefix` | `"taskweave"` |
//! | `default_context` | `Confined` |
//! | `poll_budget` | 64 |
//! | `shutdown_grace` | 1 s |
//! | `clock` | wall clock |
//! | `on_unhandled_failure` | `None` (logged at `error` level) |

use crate::error::{ConfigError, Error};
use crate::time::VirtualClock;
use crate::types::ContextKind;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Smallest accepted thread stack size.
pub const MIN_THREAD_STACK_SIZE: usize = 32 * 1024;

/// Callback receiving failures of unscoped `launch` tasks.
pub type UnhandledFailureHandler = Arc<dyn Fn(&Error) + Send + Sync>;

/// Callback run on runtime-owned threads.
pub type ThreadHook = Arc<dyn Fn() + Send + Sync>;

/// Which clock drives delays and timeouts.
#[derive(Clone, Default)]
pub enum ClockConfig {
    /// Real monotonic time.
    #[default]
    Wall,
    /// Virtual time that jumps to the next deadline whenever the runtime is idle.
    Virtual(Arc<VirtualClock>),
}

impl fmt::Debug for ClockConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Wall => f.write_str("Wall"),
            Self::Virtual(clock) => f.debug_tuple("Virtual").field(clock).finish(),
        }
    }
}

/// Runtime configuration.
#[derive(Clone)]
pub struct RuntimeConfig {
    /// Number of pool worker threads (default: available parallelism).
    pub worker_threads: usize,
    /// Stack size of every runtime-owned thread.
    pub thread_stack_size: usize,
    /// Prefix of runtime thread names.
    pub thread_name_prefix: String,
    /// Context used by `run_scope` roots and unscoped tasks.
    pub default_context: ContextKind,
    /// Maximum consecutive inline polls of an unconfined task before it is
    /// handed to the pool.
    pub poll_budget: u32,
    /// How long shutdown waits for cancelled unscoped tasks.
    pub shutdown_grace: Duration,
    /// Clock source.
    pub clock: ClockConfig,
    /// Receives failures of unscoped `launch` tasks.
    pub on_unhandled_failure: Option<UnhandledFailureHandler>,
    /// Runs on every runtime thread after it starts.
    pub on_thread_start: Option<ThreadHook>,
    /// Runs on every runtime thread before it exits.
    pub on_thread_stop: Option<ThreadHook>,
}

impl RuntimeConfig {
    /// Normalize configuration values to safe defaults.
    pub fn normalize(&mut self) {
        if self.worker_threads == 0 {
            self.worker_threads = 1;
        }
        if self.thread_stack_size == 0 {
            self.thread_stack_size = 2 * 1024 * 1024;
        }
        if self.poll_budget == 0 {
            self.poll_budget = 1;
        }
        if self.thread_name_prefix.is_empty() {
            self.thread_name_prefix = "taskweave".to_string();
        }
    }

    /// Rejects values that normalization cannot repair.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.thread_stack_size < MIN_THREAD_STACK_SIZE {
            return Err(ConfigError::InvalidValue {
                field: "thread_stack_size",
                reason: format!(
                    "{} bytes is below the minimum of {MIN_THREAD_STACK_SIZE}",
                    self.thread_stack_size
                ),
            });
        }
        if self.thread_name_prefix.contains('\0') {
            return Err(ConfigError::InvalidValue {
                field: "thread_name_prefix",
                reason: "must not contain NUL bytes".into(),
            });
        }
        Ok(())
    }

    pub(crate) fn default_worker_threads() -> usize {
        std::thread::available_parallelism()
            .map_or(1, std::num::NonZeroUsize::get)
            .max(1)
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            worker_threads: Self::default_worker_threads(),
            thread_stack_size: 2 * 1024 * 1024,
            thread_name_prefix: "taskweave".to_string(),
            default_context: ContextKind::Confined,
            poll_budget: 64,
            shutdown_grace: Duration::from_secs(1),
            clock: ClockConfig::Wall,
            on_unhandled_failure: None,
            on_thread_start: None,
            on_thread_stop: None,
        }
    }
}

impl fmt::Debug for RuntimeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeConfig")
            .field("worker_threads", &self.worker_threads)
            .field("thread_stack_size", &self.thread_stack_size)
            .field("thread_name_prefix", &self.thread_name_prefix)
            .field("default_context", &self.default_context)
            .field("poll_budget", &self.poll_budget)
            .field("shutdown_grace", &self.shutdown_grace)
            .field("clock", &self.clock)
            .field("on_unhandled_failure", &self.on_unhandled_failure.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn init_test(name: &str) {
        crate::test_utils::init_test_logging();
        crate::test_phase!(name);
    }

    #[test]
    fn test_default_config_sane() {
        init_test("test_default_config_sane");
        let config = RuntimeConfig::default();
        crate::assert_with_log!(
            config.worker_threads >= 1,
            "worker_threads",
            true,
            config.worker_threads >= 1
        );
        crate::assert_with_log!(
            config.default_context == ContextKind::Confined,
            "default_context",
            ContextKind::Confined,
            config.default_context
        );
        crate::assert_with_log!(
            config.poll_budget == 64,
            "poll_budget",
            64,
            config.poll_budget
        );
        assert!(config.validate().is_ok());
        crate::test_complete!("test_default_config_sane");
    }

    #[test]
    fn test_normalize_repairs_zeroes() {
        init_test("test_normalize_repairs_zeroes");
        let mut config = RuntimeConfig {
            worker_threads: 0,
            thread_stack_size: 0,
            poll_budget: 0,
            thread_name_prefix: String::new(),
            ..RuntimeConfig::default()
        };
        config.normalize();
        crate::assert_with_log!(
            config.worker_threads == 1,
            "worker_threads",
            1,
            config.worker_threads
        );
        crate::assert_with_log!(
            config.thread_stack_size == 2 * 1024 * 1024,
            "thread_stack_size",
            2 * 1024 * 1024,
            config.thread_stack_size
        );
        crate::assert_with_log!(config.poll_budget == 1, "poll_budget", 1, config.poll_budget);
        crate::assert_with_log!(
            config.thread_name_prefix == "taskweave",
            "thread_name_prefix",
            "taskweave",
            config.thread_name_prefix
        );
        crate::test_complete!("test_normalize_repairs_zeroes");
    }

    #[test]
    fn test_validate_rejects_tiny_stack() {
        init_test("test_validate_rejects_tiny_stack");
        let config = RuntimeConfig {
            thread_stack_size: 1024,
            ..RuntimeConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue {
                field: "thread_stack_size",
                ..
            }
        ));
        crate::test_complete!("test_validate_rejects_tiny_stack");
    }
}
