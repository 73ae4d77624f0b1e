//! Runtime builder and handles.

use crate::cx::scope::spawn_body;
use crate::cx::{Cx, Scope};
use crate::error::{Error, Result};
use crate::record::task::UnscopedKind;
use crate::runtime::config::{ClockConfig, RuntimeConfig, ThreadHook};
use crate::runtime::state::{RuntimeSnapshot, SpawnSpec};
use crate::runtime::task_handle::{resolve_value, Deferred, Job, ValueSlot};
use crate::runtime::{spawn_lane_thread, RuntimeInner};
use crate::time::{TimerDriver, VirtualClock};
use crate::tracing_compat::debug;
use crate::types::{ContextKind, ExecutionContext, StartMode, TaskId, Time};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Builder for constructing a runtime with custom configuration.
///
/// Sources are applied in call order, so the documented precedence
/// (programmatic > environment > file > defaults) holds when a file is loaded
/// first, environment overrides come next and explicit setters come last:
///
/// ```no_run
/// use taskweave::runtime::RuntimeBuilder;
///
/// let runtime = RuntimeBuilder::multi_thread()
///     .with_env_overrides()?
///     .worker_threads(4)
///     .build()?;
/// # Ok::<(), taskweave::error::Error>(())
/// ```
#[derive(Clone, Debug)]
pub struct RuntimeBuilder {
    config: RuntimeConfig,
}

impl RuntimeBuilder {
    /// Create a new builder with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: RuntimeConfig::default(),
        }
    }

    /// Set the number of worker threads.
    #[must_use]
    pub fn worker_threads(mut self, n: usize) -> Self {
        self.config.worker_threads = n;
        self
    }

    /// Set the stack size of every runtime thread.
    #[must_use]
    pub fn thread_stack_size(mut self, size: usize) -> Self {
        self.config.thread_stack_size = size;
        self
    }

    /// Set the prefix of runtime thread names.
    #[must_use]
    pub fn thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.thread_name_prefix = prefix.into();
        self
    }

    /// Set the context of `run_scope` roots and unscoped tasks.
    #[must_use]
    pub fn default_context(mut self, kind: ContextKind) -> Self {
        self.config.default_context = kind;
        self
    }

    /// Set how many times in a row an unconfined task may be polled inline.
    #[must_use]
    pub fn poll_budget(mut self, budget: u32) -> Self {
        self.config.poll_budget = budget;
        self
    }

    /// Set how long shutdown waits for unscoped tasks to acknowledge cancellation.
    #[must_use]
    pub fn shutdown_grace(mut self, grace: Duration) -> Self {
        self.config.shutdown_grace = grace;
        self
    }

    /// Select the clock source.
    #[must_use]
    pub fn clock(mut self, clock: ClockConfig) -> Self {
        self.config.clock = clock;
        self
    }

    /// Drive timers with `clock`, advancing it whenever the runtime is idle.
    #[must_use]
    pub fn virtual_clock(self, clock: Arc<VirtualClock>) -> Self {
        self.clock(ClockConfig::Virtual(clock))
    }

    /// Register the receiver of failures of unscoped `launch` tasks.
    #[must_use]
    pub fn on_unhandled_failure<F>(mut self, f: F) -> Self
    where
        F: Fn(&Error) + Send + Sync + 'static,
    {
        self.config.on_unhandled_failure = Some(Arc::new(f));
        self
    }

    /// Register a callback to run when a runtime thread starts.
    #[must_use]
    pub fn on_thread_start<F>(mut self, f: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.config.on_thread_start = Some(Arc::new(f) as ThreadHook);
        self
    }

    /// Register a callback to run when a runtime thread stops.
    #[must_use]
    pub fn on_thread_stop<F>(mut self, f: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.config.on_thread_stop = Some(Arc::new(f) as ThreadHook);
        self
    }

    /// Apply `TASKWEAVE_*` environment variables on top of the current settings.
    ///
    /// # Errors
    ///
    /// A `Config` error naming the variable if one is set to an unparseable value.
    pub fn with_env_overrides(mut self) -> Result<Self> {
        super::env_config::apply_env_overrides(&mut self.config)?;
        Ok(self)
    }

    /// Create a builder from TOML text.
    ///
    /// # Errors
    ///
    /// A `Config` error if the text is not a valid runtime configuration.
    #[cfg(feature = "config-file")]
    pub fn from_toml_str(toml: &str) -> Result<Self> {
        let parsed = super::env_config::parse_toml_str(toml)?;
        let mut builder = Self::new();
        super::env_config::apply_toml_config(&mut builder.config, &parsed);
        Ok(builder)
    }

    /// Create a builder from a TOML file.
    ///
    /// # Errors
    ///
    /// A `Config` error if the file cannot be read or parsed.
    #[cfg(feature = "config-file")]
    pub fn from_toml(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let parsed = super::env_config::parse_toml_file(path.as_ref())?;
        let mut builder = Self::new();
        super::env_config::apply_toml_config(&mut builder.config, &parsed);
        Ok(builder)
    }

    /// The configuration built so far.
    #[must_use]
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Build a runtime from this configuration.
    ///
    /// # Errors
    ///
    /// A `Config` error for invalid settings or a thread that failed to spawn.
    pub fn build(self) -> Result<Runtime> {
        Runtime::with_config(self.config)
    }

    /// One pool worker.
    #[must_use]
    pub fn current_thread() -> Self {
        Self::new().worker_threads(1)
    }

    /// One pool worker per available core.
    #[must_use]
    pub fn multi_thread() -> Self {
        Self::new()
    }

    /// Two pool workers and a fresh [`VirtualClock`], for deterministic tests.
    #[must_use]
    pub fn virtual_time() -> Self {
        Self::new()
            .worker_threads(2)
            .virtual_clock(Arc::new(VirtualClock::new()))
    }
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A running runtime. Dropping it shuts it down.
pub struct Runtime {
    handle: RuntimeHandle,
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("inner", &self.handle.inner)
            .finish()
    }
}

impl Runtime {
    /// Construct a runtime from the given configuration and start its threads.
    ///
    /// # Errors
    ///
    /// A `Config` error for invalid settings or a thread that failed to spawn.
    pub fn with_config(mut config: RuntimeConfig) -> Result<Self> {
        config.normalize();
        config.validate()?;

        let timer = Arc::new(match &config.clock {
            ClockConfig::Wall => TimerDriver::wall(),
            ClockConfig::Virtual(clock) => TimerDriver::virtual_time(Arc::clone(clock)),
        });
        let (inner, global_lane) = RuntimeInner::new(config, Arc::clone(&timer));
        let inner = Arc::new(inner);
        let runtime = Self {
            handle: RuntimeHandle::from_inner(Arc::clone(&inner)),
        };

        let config = &inner.config;
        inner.register_threads(inner.pool.spawn_workers(config)?);
        inner.register_threads([spawn_lane_thread(
            config,
            format!("{}-global", config.thread_name_prefix),
            global_lane,
        )?]);
        inner.register_threads([spawn_timer_thread(config, timer)?]);

        debug!(
            workers = config.worker_threads,
            default_context = ?config.default_context,
            virtual_time = inner.timer.is_virtual(),
            "runtime started"
        );
        Ok(runtime)
    }

    /// Returns a cloneable handle to this runtime.
    #[must_use]
    pub fn handle(&self) -> RuntimeHandle {
        self.handle.clone()
    }

    /// Returns a reference to the runtime configuration.
    #[must_use]
    pub fn config(&self) -> &RuntimeConfig {
        &self.handle.inner.config
    }

    /// See [`RuntimeHandle::run_scope`].
    ///
    /// # Errors
    ///
    /// As for [`RuntimeHandle::run_scope`].
    pub fn run_scope<T, F, Fut>(&self, body: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(Scope) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        self.handle.run_scope(body)
    }

    /// See [`RuntimeHandle::block_on`].
    ///
    /// # Errors
    ///
    /// As for [`RuntimeHandle::block_on`].
    pub fn block_on<F>(&self, future: F) -> Result<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.handle.block_on(future)
    }

    /// See [`RuntimeHandle::launch_unscoped`].
    pub fn launch_unscoped<T, F, Fut>(&self, body: F) -> Job
    where
        T: Send + 'static,
        F: FnOnce(Scope) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        self.handle.launch_unscoped(body)
    }

    /// See [`RuntimeHandle::deferred_unscoped`].
    pub fn deferred_unscoped<T, F, Fut>(&self, body: F) -> Deferred<T>
    where
        T: Send + 'static,
        F: FnOnce(Scope) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        self.handle.deferred_unscoped(body)
    }

    /// See [`RuntimeHandle::cancel`].
    pub fn cancel(&self, task: TaskId) {
        self.handle.cancel(task);
    }

    /// See [`RuntimeHandle::confined_context`].
    ///
    /// # Errors
    ///
    /// As for [`RuntimeHandle::confined_context`].
    pub fn confined_context(&self, name: &str) -> Result<ExecutionContext> {
        self.handle.confined_context(name)
    }

    /// See [`RuntimeHandle::snapshot`].
    #[must_use]
    pub fn snapshot(&self) -> RuntimeSnapshot {
        self.handle.snapshot()
    }

    /// Current time on the runtime clock.
    #[must_use]
    pub fn now(&self) -> Time {
        self.handle.now()
    }

    /// Cancels every root task, waits up to the configured grace period for
    /// them to acknowledge, then stops all runtime threads. Idempotent.
    pub fn shutdown(&self) {
        self.handle.inner.shutdown();
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        self.handle.inner.shutdown();
    }
}

fn spawn_timer_thread(
    config: &RuntimeConfig,
    timer: Arc<TimerDriver>,
) -> std::result::Result<std::thread::JoinHandle<()>, crate::error::ConfigError> {
    let name = format!("{}-timer", config.thread_name_prefix);
    let on_start = config.on_thread_start.clone();
    let on_stop = config.on_thread_stop.clone();
    std::thread::Builder::new()
        .name(name.clone())
        .stack_size(config.thread_stack_size)
        .spawn(move || {
            if let Some(hook) = &on_start {
                hook();
            }
            timer.drive();
            if let Some(hook) = &on_stop {
                hook();
            }
        })
        .map_err(|source| crate::error::ConfigError::ThreadSpawn { name, source })
}

/// Cloneable handle for starting work on a runtime.
///
/// A handle does not keep the runtime's threads alive: once the owning
/// [`Runtime`] is dropped, new tasks are cancelled on arrival.
#[derive(Clone)]
pub struct RuntimeHandle {
    pub(crate) inner: Arc<RuntimeInner>,
}

impl fmt::Debug for RuntimeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeHandle")
            .field("shutdown", &self.inner.is_shutdown())
            .finish_non_exhaustive()
    }
}

impl RuntimeHandle {
    pub(crate) fn from_inner(inner: Arc<RuntimeInner>) -> Self {
        Self { inner }
    }

    /// The runtime of the task being polled on this thread.
    #[must_use]
    pub fn current() -> Option<Self> {
        Cx::current().map(|cx| cx.runtime())
    }

    /// Runs `body` as the root of a new structured scope and blocks the
    /// calling thread until the root and every descendant are terminal.
    ///
    /// With the default `Confined` context the root runs on a lane driven by
    /// the calling thread, and children launched without an explicit context
    /// run there too.
    ///
    /// # Errors
    ///
    /// The first failure of the scope (later ones are attached as
    /// [`suppressed`](Error::suppressed) causes), `Cancelled` if the scope was
    /// cancelled, or `RuntimeShutdown`.
    pub fn run_scope<T, F, Fut>(&self, body: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(Scope) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let inner = &self.inner;
        if inner.is_shutdown() {
            return Err(Error::runtime_shutdown());
        }
        let lane = (inner.config.default_context == ContextKind::Confined)
            .then(|| inner.open_lane("caller"));
        let context = lane.as_ref().map_or_else(
            || inner.unscoped_context(),
            |lane| ExecutionContext::Confined(lane.id()),
        );

        let slot = Arc::new(ValueSlot::new());
        let core = spawn_body(
            inner,
            SpawnSpec {
                parent: None,
                name: None,
                context,
                mode: StartMode::Eager,
                propagate_failure: false,
                unscoped: None,
            },
            Some(Arc::clone(&slot)),
            body,
        );

        match lane {
            Some(lane) => {
                let waker = lane.poke_waker();
                if core.poll_outcome(&waker).is_none() {
                    lane.run_until(|| core.state().is_terminal());
                }
                inner.close_lane(lane.id());
            }
            None => {
                core.wait_terminal(None);
            }
        }

        let outcome = core.outcome().ok_or_else(Error::runtime_shutdown)?;
        resolve_value(outcome, || slot.take())
    }

    /// Runs `future` to completion as a scope root and returns its output.
    ///
    /// # Errors
    ///
    /// `Cancelled` if the root was cancelled, `Panicked`, or `RuntimeShutdown`.
    pub fn block_on<F>(&self, future: F) -> Result<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.run_scope(move |_| async move { Ok(future.await) })
    }

    /// Launches a task outside any scope.
    ///
    /// Nothing joins or cancels an unscoped task automatically: keep the
    /// [`Job`] and cancel it yourself. Its failure is reported to
    /// [`on_unhandled_failure`](RuntimeBuilder::on_unhandled_failure) (or
    /// logged at `error` level) and returned by [`Job::join`].
    pub fn launch_unscoped<T, F, Fut>(&self, body: F) -> Job
    where
        T: Send + 'static,
        F: FnOnce(Scope) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let core = spawn_body::<T, _, _>(
            &self.inner,
            self.unscoped_spec(UnscopedKind::Launch),
            None,
            body,
        );
        Job::new(core, Arc::clone(&self.inner))
    }

    /// Starts a deferred computation outside any scope. Its failure is
    /// delivered only to its awaiters.
    pub fn deferred_unscoped<T, F, Fut>(&self, body: F) -> Deferred<T>
    where
        T: Send + 'static,
        F: FnOnce(Scope) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let slot = Arc::new(ValueSlot::new());
        let core = spawn_body(
            &self.inner,
            self.unscoped_spec(UnscopedKind::Deferred),
            Some(Arc::clone(&slot)),
            body,
        );
        Deferred::new(Job::new(core, Arc::clone(&self.inner)), slot)
    }

    fn unscoped_spec(&self, kind: UnscopedKind) -> SpawnSpec {
        SpawnSpec {
            parent: None,
            name: None,
            context: self.inner.unscoped_context(),
            mode: StartMode::Eager,
            propagate_failure: false,
            unscoped: Some(kind),
        }
    }

    /// Requests cancellation of a task and all of its descendants.
    ///
    /// Unknown or already finished ids are ignored.
    pub fn cancel(&self, task: TaskId) {
        self.inner
            .cancel(task, &crate::types::CancelReason::user("cancelled by id"));
    }

    /// Creates a confined context backed by a new dedicated thread named
    /// `{thread_name_prefix}-{name}`. The thread lives as long as the runtime.
    ///
    /// # Errors
    ///
    /// `RuntimeShutdown`, or a `Config` error if the thread cannot be spawned.
    pub fn confined_context(&self, name: &str) -> Result<ExecutionContext> {
        self.inner.spawn_lane(name).map(ExecutionContext::Confined)
    }

    /// Diagnostics view of the live task graph.
    #[must_use]
    pub fn snapshot(&self) -> RuntimeSnapshot {
        let now = self.inner.timer.now();
        self.inner.table.lock().snapshot(now)
    }

    /// Current time on the runtime clock.
    #[must_use]
    pub fn now(&self) -> Time {
        self.inner.timer.now()
    }

    /// Returns a reference to the runtime configuration.
    #[must_use]
    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    /// True once shutdown has started.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.inner.is_shutdown()
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
    fn builder_presets() {
        init_test("builder_presets");
        assert_eq!(RuntimeBuilder::current_thread().config().worker_threads, 1);
        let virtual_builder = RuntimeBuilder::virtual_time();
        assert!(matches!(
            virtual_builder.config().clock,
            ClockConfig::Virtual(_)
        ));
        let builder = RuntimeBuilder::new()
            .default_context(ContextKind::Pooled)
            .poll_budget(8)
            .thread_name_prefix("svc");
        assert_eq!(builder.config().default_context, ContextKind::Pooled);
        assert_eq!(builder.config().poll_budget, 8);
        assert_eq!(builder.config().thread_name_prefix, "svc");
        crate::test_complete!("builder_presets");
    }

    #[test]
    fn build_rejects_invalid_stack() {
        init_test("build_rejects_invalid_stack");
        let err = RuntimeBuilder::current_thread()
            .thread_stack_size(16)
            .build()
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Config);
        crate::test_complete!("build_rejects_invalid_stack");
    }

    #[test]
    fn run_scope_returns_value() {
        init_test("run_scope_returns_value");
        let runtime = RuntimeBuilder::current_thread().build().unwrap();
        let value = runtime.run_scope(|_| async { Ok(7) }).unwrap();
        assert_eq!(value, 7);
        assert!(runtime.snapshot().tasks.is_empty());
        crate::test_complete!("run_scope_returns_value");
    }

    #[test]
    fn run_scope_after_shutdown_fails() {
        init_test("run_scope_after_shutdown_fails");
        let runtime = RuntimeBuilder::current_thread().build().unwrap();
        runtime.shutdown();
        let err = runtime.run_scope(|_| async { Ok(()) }).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::RuntimeShutdown);
        crate::test_complete!("run_scope_after_shutdown_fails");
    }

    #[test]
    fn block_on_pooled() {
        init_test("block_on_pooled");
        let runtime = RuntimeBuilder::current_thread()
            .default_context(ContextKind::Pooled)
            .build()
            .unwrap();
        let name = runtime
            .block_on(async { std::thread::current().name().map(ToString::to_string) })
            .unwrap();
        assert_eq!(name.as_deref(), Some("taskweave-worker-0"));
        crate::test_complete!("block_on_pooled");
    }
}
