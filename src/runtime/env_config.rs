//! Environment variable and config file support for [`RuntimeBuilder`](super::builder::RuntimeBuilder).
//!
//! # Configuration Precedence
//!
//! Settings are resolved in this order (highest priority first):
//!
//! 1. **Programmatic**: values set via builder methods (`worker_threads(4)`)
//! 2. **Environment variables**: values from `TASKWEAVE_*` env vars
//! 3. **Config file**: values loaded from a TOML file (requires the `config-file` feature)
//! 4. **Defaults**: built-in defaults from [`RuntimeConfig::default()`]
//!
//! # Supported Environment Variables
//!
//! | Variable | Type | Maps to |
//! |----------|------|---------|
//! | `TASKWEAVE_WORKER_THREADS` | `usize` | `worker_threads` |
//! | `TASKWEAVE_THREAD_STACK_SIZE` | `usize` | `thread_stack_size` |
//! | `TASKWEAVE_THREAD_NAME_PREFIX` | `String` | `thread_name_prefix` |
//! | `TASKWEAVE_DEFAULT_CONTEXT` | `pooled` / `unconfined` / `confined` | `default_context` |
//! | `TASKWEAVE_POLL_BUDGET` | `u32` | `poll_budget` |
//! | `TASKWEAVE_SHUTDOWN_GRACE_MS` | `u64` | `shutdown_grace` |

use crate::error::ConfigError;
use crate::runtime::config::RuntimeConfig;
use crate::types::ContextKind;
use std::time::Duration;

/// Environment variable name for worker thread count.
pub const ENV_WORKER_THREADS: &str = "TASKWEAVE_WORKER_THREADS";
/// Environment variable name for thread stack size.
pub const ENV_THREAD_STACK_SIZE: &str = "TASKWEAVE_THREAD_STACK_SIZE";
/// Environment variable name for thread name prefix.
pub const ENV_THREAD_NAME_PREFIX: &str = "TASKWEAVE_THREAD_NAME_PREFIX";
/// Environment variable name for the default execution context.
pub const ENV_DEFAULT_CONTEXT: &str = "TASKWEAVE_DEFAULT_CONTEXT";
/// Environment variable name for the inline poll budget.
pub const ENV_POLL_BUDGET: &str = "TASKWEAVE_POLL_BUDGET";
/// Environment variable name for the shutdown grace period in milliseconds.
pub const ENV_SHUTDOWN_GRACE_MS: &str = "TASKWEAVE_SHUTDOWN_GRACE_MS";

/// Apply environment variable overrides to a [`RuntimeConfig`].
///
/// Only variables that are set in the environment are applied.
/// Returns an error if a variable is set but contains an unparseable value.
pub fn apply_env_overrides(config: &mut RuntimeConfig) -> Result<(), ConfigError> {
    if let Some(val) = read_env(ENV_WORKER_THREADS) {
        config.worker_threads = parse_usize(ENV_WORKER_THREADS, &val)?;
    }
    if let Some(val) = read_env(ENV_THREAD_STACK_SIZE) {
        config.thread_stack_size = parse_usize(ENV_THREAD_STACK_SIZE, &val)?;
    }
    if let Some(val) = read_env(ENV_THREAD_NAME_PREFIX) {
        config.thread_name_prefix = val;
    }
    if let Some(val) = read_env(ENV_DEFAULT_CONTEXT) {
        config.default_context = parse_context(ENV_DEFAULT_CONTEXT, &val)?;
    }
    if let Some(val) = read_env(ENV_POLL_BUDGET) {
        config.poll_budget = parse_u32(ENV_POLL_BUDGET, &val)?;
    }
    if let Some(val) = read_env(ENV_SHUTDOWN_GRACE_MS) {
        config.shutdown_grace = Duration::from_millis(parse_u64(ENV_SHUTDOWN_GRACE_MS, &val)?);
    }
    Ok(())
}

/// Read an environment variable, returning `None` if unset.
fn read_env(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

fn invalid(var_name: &str, val: &str, reason: String) -> ConfigError {
    ConfigError::InvalidEnv {
        var: var_name.to_string(),
        value: val.to_string(),
        reason,
    }
}

fn parse_usize(var_name: &str, val: &str) -> Result<usize, ConfigError> {
    val.trim()
        .parse::<usize>()
        .map_err(|e| invalid(var_name, val, format!("expected unsigned integer ({e})")))
}

fn parse_u32(var_name: &str, val: &str) -> Result<u32, ConfigError> {
    val.trim()
        .parse::<u32>()
        .map_err(|e| invalid(var_name, val, format!("expected u32 ({e})")))
}

fn parse_u64(var_name: &str, val: &str) -> Result<u64, ConfigError> {
    val.trim()
        .parse::<u64>()
        .map_err(|e| invalid(var_name, val, format!("expected u64 ({e})")))
}

fn parse_context(var_name: &str, val: &str) -> Result<ContextKind, ConfigError> {
    val.parse::<ContextKind>()
        .map_err(|reason| invalid(var_name, val, reason))
}

// =========================================================================
// TOML config file support (feature-gated)
// =========================================================================

/// TOML-deserializable runtime configuration.
///
/// Fields mirror [`RuntimeConfig`] and are grouped into tables:
///
/// ```toml
/// [scheduler]
/// worker_threads = 4
/// poll_budget = 64
/// default_context = "pooled"
/// thread_stack_size = 2097152
/// thread_name_prefix = "myapp"
///
/// [shutdown]
/// grace_ms = 500
/// ```
#[cfg(feature = "config-file")]
#[derive(serde::Deserialize, Default, Debug)]
#[serde(deny_unknown_fields)]
pub struct RuntimeTomlConfig {
    /// Scheduler settings.
    #[serde(default)]
    pub scheduler: SchedulerToml,
    /// Shutdown settings.
    #[serde(default)]
    pub shutdown: ShutdownToml,
}

/// Scheduler section of the TOML config.
#[cfg(feature = "config-file")]
#[derive(serde::Deserialize, Default, Debug)]
#[serde(deny_unknown_fields)]
pub struct SchedulerToml {
    /// Number of worker threads.
    pub worker_threads: Option<usize>,
    /// Inline poll budget.
    pub poll_budget: Option<u32>,
    /// Default execution context.
    pub default_context: Option<ContextKind>,
    /// Stack size per runtime thread in bytes.
    pub thread_stack_size: Option<usize>,
    /// Name prefix for runtime threads.
    pub thread_name_prefix: Option<String>,
}

/// Shutdown section of the TOML config.
#[cfg(feature = "config-file")]
#[derive(serde::Deserialize, Default, Debug)]
#[serde(deny_unknown_fields)]
pub struct ShutdownToml {
    /// Grace period for unscoped tasks, in milliseconds.
    pub grace_ms: Option<u64>,
}

/// Apply a parsed TOML config to a [`RuntimeConfig`].
///
/// Only fields that are `Some` in the TOML struct override the config.
#[cfg(feature = "config-file")]
pub fn apply_toml_config(config: &mut RuntimeConfig, toml: &RuntimeTomlConfig) {
    if let Some(v) = toml.scheduler.worker_threads {
        config.worker_threads = v;
    }
    if let Some(v) = toml.scheduler.poll_budget {
        config.poll_budget = v;
    }
    if let Some(v) = toml.scheduler.default_context {
        config.default_context = v;
    }
    if let Some(v) = toml.scheduler.thread_stack_size {
        config.thread_stack_size = v;
    }
    if let Some(ref v) = toml.scheduler.thread_name_prefix {
        config.thread_name_prefix.clone_from(v);
    }
    if let Some(ms) = toml.shutdown.grace_ms {
        config.shutdown_grace = Duration::from_millis(ms);
    }
}

/// Parse a TOML string into a [`RuntimeTomlConfig`].
#[cfg(feature = "config-file")]
pub fn parse_toml_str(toml_str: &str) -> Result<RuntimeTomlConfig, ConfigError> {
    Ok(toml::from_str(toml_str)?)
}

/// Read and parse a TOML file into a [`RuntimeTomlConfig`].
#[cfg(feature = "config-file")]
pub fn parse_toml_file(path: &std::path::Path) -> Result<RuntimeTomlConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })?;
    parse_toml_str(&content)
}

// =========================================================================
// Tests
// =========================================================================


#[cfg(all(test, feature = "config-file"))]
mod toml_tests {
    use super::*;

    #[test]
    fn parse_toml_full_config() {
        let toml_str = r#"
[scheduler]
worker_threads = 8
poll_budget = 256
default_context = "unconfined"
thread_stack_size = 4194304
thread_name_prefix = "myapp"

[shutdown]
grace_ms = 20
"#;
        let parsed = parse_toml_str(toml_str).unwrap();
        let mut config = RuntimeConfig::default();
        apply_toml_config(&mut config, &parsed);
        assert_eq!(config.worker_threads, 8);
        assert_eq!(config.poll_budget, 256);
        assert_eq!(config.default_context, ContextKind::Unconfined);
        assert_eq!(config.thread_stack_size, 4_194_304);
        assert_eq!(config.thread_name_prefix, "myapp");
        assert_eq!(config.shutdown_grace, Duration::from_millis(20));
    }

    #[test]
    fn parse_toml_partial_and_empty() {
        let parsed = parse_toml_str("[scheduler]\nworker_threads = 4\n").unwrap();
        assert_eq!(parsed.scheduler.worker_threads, Some(4));
        assert_eq!(parsed.scheduler.poll_budget, None);
        assert_eq!(parsed.shutdown.grace_ms, None);

        let parsed = parse_toml_str("").unwrap();
        assert_eq!(parsed.scheduler.worker_threads, None);
    }

    #[test]
    fn parse_toml_rejects_bad_input() {
        assert!(matches!(
            parse_toml_str("not valid toml {{{{"),
            Err(ConfigError::Toml(_))
        ));
        assert!(parse_toml_str("[scheduler]\nworker_threads = \"many\"\n").is_err());
        assert!(parse_toml_str("[scheduler]\nsteal_batch_size = 4\n").is_err());
    }

    #[test]
    fn toml_file_not_found() {
        let err = parse_toml_file(std::path::Path::new("/nonexistent/taskweave.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn toml_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("runtime.toml");
        std::fs::write(&path, "[scheduler]\nworker_threads = 2\npoll_budget = 8\n").unwrap();

        let parsed = parse_toml_file(&path).unwrap();
        let mut config = RuntimeConfig::default();
        apply_toml_config(&mut config, &parsed);
        assert_eq!(config.worker_threads, 2);
        assert_eq!(config.poll_budget, 8);
    }
}
