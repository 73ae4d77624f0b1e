//! The process-wide runtime.
//!
//! Code that has no runtime of its own (typically `main` launching unscoped
//! background work) can use the global runtime. It is built on first use
//! from the defaults plus `TASKWEAVE_*` environment overrides, or from a
//! builder passed to [`init_global`] before that. It lives until
//! [`shutdown_global`] or process exit.

use super::builder::{Runtime, RuntimeBuilder, RuntimeHandle};
use crate::error::{ConfigError, Error, Result};
use crate::tracing_compat::info;
use std::sync::OnceLock;

static GLOBAL: OnceLock<Result<Runtime>> = OnceLock::new();

fn build_default() -> Result<Runtime> {
    RuntimeBuilder::new()
        .thread_name_prefix("taskweave-global")
        .with_env_overrides()?
        .build()
}

/// Handle to the global runtime, building it on first use.
///
/// # Errors
///
/// The configuration error that prevented the global runtime from starting.
/// The error is sticky: later calls return it again.
pub fn global() -> Result<RuntimeHandle> {
    match GLOBAL.get_or_init(build_default) {
        Ok(runtime) => Ok(runtime.handle()),
        Err(err) => Err(err.clone()),
    }
}

/// Builds the global runtime from `builder`.
///
/// # Errors
///
/// A `Config` error if the global runtime already exists, or if `builder`
/// fails to build.
pub fn init_global(builder: RuntimeBuilder) -> Result<RuntimeHandle> {
    let mut fresh = false;
    let slot = GLOBAL.get_or_init(|| {
        fresh = true;
        builder.build()
    });
    match slot {
        Ok(runtime) if fresh => Ok(runtime.handle()),
        Ok(_) => Err(Error::from(ConfigError::InvalidValue {
            field: "global",
            reason: "the global runtime is already initialised".into(),
        })),
        Err(err) => Err(err.clone()),
    }
}

/// Cancels every task on the global runtime and stops its threads.
///
/// The runtime cannot be restarted afterwards; new tasks launched on it are
/// cancelled on arrival.
pub fn shutdown_global() {
    if let Some(Ok(runtime)) = GLOBAL.get() {
        info!("shutting down global runtime");
        runtime.shutdown();
    }
}
