//! Runtime configuration from environment variables and TOML files.

#[macro_use]
mod common;

use common::*;
use parking_lot::Mutex;
use std::time::Duration;
use taskweave::cx::with_context;
use taskweave::runtime::env_config::{
    ENV_DEFAULT_CONTEXT, ENV_POLL_BUDGET, ENV_SHUTDOWN_GRACE_MS, ENV_THREAD_NAME_PREFIX,
    ENV_WORKER_THREADS,
};
use taskweave::runtime::RuntimeBuilder;
use taskweave::{ContextKind, ErrorKind, ExecutionContext};

// Tests in this binary share the process environment.
static ENV_LOCK: Mutex<()> = parking_lot::const_mutex(());

const VARS: [&str; 5] = [
    ENV_WORKER_THREADS,
    ENV_THREAD_NAME_PREFIX,
    ENV_DEFAULT_CONTEXT,
    ENV_POLL_BUDGET,
    ENV_SHUTDOWN_GRACE_MS,
];

fn with_env<R>(vars: &[(&str, &str)], f: impl FnOnce() -> R) -> R {
    let _guard = ENV_LOCK.lock();
    for var in VARS {
        std::env::remove_var(var);
    }
    for (name, value) in vars {
        std::env::set_var(name, value);
    }
    let result = f();
    for (name, _) in vars {
        std::env::remove_var(name);
    }
    result
}

#[test]
fn env_overrides_reach_the_running_runtime() {
    init_test_logging();
    test_phase!("env_overrides_reach_the_running_runtime");
    let builder = with_env(
        &[
            (ENV_WORKER_THREADS, "3"),
            (ENV_THREAD_NAME_PREFIX, "envcfg"),
            (ENV_DEFAULT_CONTEXT, "pooled"),
            (ENV_SHUTDOWN_GRACE_MS, "250"),
        ],
        || RuntimeBuilder::new().with_env_overrides(),
    )
    .unwrap();

    let config = builder.config();
    assert_eq!(config.worker_threads, 3);
    assert_eq!(config.thread_name_prefix, "envcfg");
    assert_eq!(config.default_context, ContextKind::Pooled);
    assert_eq!(config.shutdown_grace, Duration::from_millis(250));

    test_section!("pooled work runs on prefixed workers");
    let runtime = builder.build().unwrap();
    let name = runtime
        .run_scope(|_| async {
            with_context(ExecutionContext::Pooled, |_| async {
                Ok(std::thread::current().name().map(str::to_owned))
            })
            .await
        })
        .unwrap();
    let name = name.unwrap_or_default();
    assert!(name.starts_with("envcfg-worker-"), "ran on {name}");
    test_complete!("env_overrides_reach_the_running_runtime");
}

#[test]
fn invalid_env_value_is_a_config_error() {
    init_test_logging();
    test_phase!("invalid_env_value_is_a_config_error");
    for (var, value) in [
        (ENV_WORKER_THREADS, "many"),
        (ENV_POLL_BUDGET, "-4"),
        (ENV_DEFAULT_CONTEXT, "sideways"),
    ] {
        let err = with_env(&[(var, value)], || RuntimeBuilder::new().with_env_overrides())
            .err()
            .expect("override rejected");
        assert_eq!(err.kind(), ErrorKind::Config);
        let message = err.message().unwrap_or_default();
        assert!(message.contains(var), "{message} names {var}");
    }
    test_complete!("invalid_env_value_is_a_config_error");
}

#[test]
fn builder_calls_after_env_take_precedence() {
    init_test_logging();
    test_phase!("builder_calls_after_env_take_precedence");
    let builder = with_env(
        &[(ENV_WORKER_THREADS, "7"), (ENV_POLL_BUDGET, "9")],
        || RuntimeBuilder::new().with_env_overrides(),
    )
    .unwrap()
    .worker_threads(2);

    assert_eq!(builder.config().worker_threads, 2);
    assert_eq!(builder.config().poll_budget, 9);
    test_complete!("builder_calls_after_env_take_precedence");
}

#[test]
fn unset_env_leaves_defaults() {
    init_test_logging();
    let builder = with_env(&[], || RuntimeBuilder::new().with_env_overrides()).unwrap();
    assert_eq!(builder.config().thread_name_prefix, "taskweave");
    assert_eq!(builder.config().default_context, ContextKind::Confined);
}

#[test]
fn invalid_stack_size_fails_build() {
    init_test_logging();
    let err = RuntimeBuilder::new()
        .thread_stack_size(1024)
        .build()
        .err()
        .expect("tiny stack rejected");
    assert_eq!(err.kind(), ErrorKind::Config);
}

#[cfg(feature = "config-file")]
mod toml_file {
    use super::*;
    use std::io::Write;

    #[test]
    fn toml_file_configures_builder() {
        init_test_logging();
        test_phase!("toml_file_configures_builder");
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[scheduler]
worker_threads = 2
poll_budget = 16
default_context = "pooled"
thread_name_prefix = "fromtoml"

[shutdown]
grace_ms = 100
"#
        )
        .unwrap();

        let builder = RuntimeBuilder::from_toml(file.path()).unwrap();
        let config = builder.config();
        assert_eq!(config.worker_threads, 2);
        assert_eq!(config.poll_budget, 16);
        assert_eq!(config.default_context, ContextKind::Pooled);
        assert_eq!(config.thread_name_prefix, "fromtoml");
        assert_eq!(config.shutdown_grace, ms(100));

        let runtime = builder.build().unwrap();
        assert_eq!(runtime.run_scope(|_| async { Ok(5) }).unwrap(), 5);
        test_complete!("toml_file_configures_builder");
    }

    #[test]
    fn toml_rejects_unknown_keys_and_missing_files() {
        init_test_logging();
        let err = RuntimeBuilder::from_toml_str("[scheduler]\nworkers = 4\n")
            .err()
            .expect("unknown key rejected");
        assert_eq!(err.kind(), ErrorKind::Config);

        let dir = tempfile::tempdir().unwrap();
        let err = RuntimeBuilder::from_toml(dir.path().join("absent.toml"))
            .err()
            .expect("missing file rejected");
        assert_eq!(err.kind(), ErrorKind::Config);
    }

    #[test]
    fn env_layers_over_toml() {
        init_test_logging();
        let builder = with_env(&[(ENV_WORKER_THREADS, "5")], || {
            RuntimeBuilder::from_toml_str("[scheduler]\nworker_threads = 2\npoll_budget = 8\n")
                .and_then(RuntimeBuilder::with_env_overrides)
        })
        .unwrap();
        assert_eq!(builder.config().worker_threads, 5);
        assert_eq!(builder.config().poll_budget, 8);
    }
}
