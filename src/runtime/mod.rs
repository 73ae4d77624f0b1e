//! Runtime state and scheduling.
//!
//! This module contains the core runtime machinery:
//!
//! - [`config`]: Runtime configuration types
//! - [`env_config`]: Environment variable and TOML overrides
//! - [`builder`]: Runtime builder, the owning [`Runtime`] and [`RuntimeHandle`]
//! - [`state`]: The task table (task tree, failure aggregation, cancellation fan-out)
//! - [`scheduler`]: Worker pool and confined lanes
//! - [`task_handle`]: [`Job`] and [`Deferred`] handles
//! - [`yield_now`]: Cooperative yield point
//! - [`global`]: The process-wide runtime behind unscoped launches
//!
//! # Runtime Builder
//!
//! The runtime is configured with a fluent, move-based builder API. Each
//! builder method consumes `self` and returns an updated builder.
//!
//! ## Quick Start
//!
//! ```no_run
//! use taskweave::runtime::RuntimeBuilder;
//!
//! let runtime = RuntimeBuilder::new().build()?;
//! let answer = runtime.run_scope(|scope| async move {
//!     let half = scope.deferred(|_| async { Ok(21) });
//!     Ok(half.await_value().await? * 2)
//! })?;
//! assert_eq!(answer, 42);
//! # Ok::<(), taskweave::error::Error>(())
//! ```
//!
//! ## Deterministic Time
//!
//! ```no_run
//! use std::time::Duration;
//! use taskweave::runtime::RuntimeBuilder;
//! use taskweave::time::delay;
//!
//! // An hour of virtual delay completes immediately.
//! let runtime = RuntimeBuilder::virtual_time().build()?;
//! runtime.run_scope(|_| async {
//!     delay(Duration::from_secs(3600)).await
//! })?;
//! # Ok::<(), taskweave::error::Error>(())
//! ```
//!
//! ## Config File + Environment Overrides
//!
//! ```ignore
//! use taskweave::runtime::RuntimeBuilder;
//!
//! // Requires the `config-file` feature.
//! let runtime = RuntimeBuilder::from_toml("config/runtime.toml")?
//!     .with_env_overrides()?
//!     .build()?;
//! ```

pub mod builder;
pub(crate) mod cell;
pub mod config;
pub mod env_config;
pub mod global;
pub(crate) mod scheduler;
pub mod state;
pub mod task_handle;
pub mod yield_now;

pub use builder::{Runtime, RuntimeBuilder, RuntimeHandle};
pub use config::{ClockConfig, RuntimeConfig};
pub use global::{global, init_global, shutdown_global};
pub use state::{RuntimeSnapshot, TaskSnapshot};
pub use task_handle::{Deferred, Job};
pub use yield_now::yield_now;

use crate::error::{Error, Result};
use crate::record::task::{TaskCore, TaskOutcome};
use crate::time::TimerDriver;
use crate::tracing_compat::{debug, error, info, warn};
use crate::types::{CancelReason, ContextKind, ExecutionContext, LaneId, TaskId};
use crate::util::Arena;
use cell::{Dispatch, TaskCell, TaskFuture};
use parking_lot::Mutex;
use scheduler::{Lane, WorkerPool};
use state::{Effect, Effects, SpawnSpec, TaskTable};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

/// State shared by every thread, task and handle of one runtime.
pub(crate) struct RuntimeInner {
    pub(crate) config: RuntimeConfig,
    pub(crate) table: Mutex<TaskTable>,
    pub(crate) pool: WorkerPool,
    pub(crate) timer: Arc<TimerDriver>,
    lanes: Mutex<Arena<Arc<Lane>>>,
    global_lane: LaneId,
    threads: Mutex<Vec<JoinHandle<()>>>,
    shutdown: AtomicBool,
}

impl std::fmt::Debug for RuntimeInner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeInner")
            .field("config", &self.config)
            .field("tasks", &self.table.lock().len())
            .field("queued", &self.pool.queued())
            .field("lanes", &self.lanes.lock().len())
            .field("shutdown", &self.is_shutdown())
            .finish_non_exhaustive()
    }
}

impl RuntimeInner {
    /// Builds the shared state; no thread is started yet.
    pub(crate) fn new(config: RuntimeConfig, timer: Arc<TimerDriver>) -> (Self, Arc<Lane>) {
        let mut lanes = Arena::new();
        let global_id = LaneId::from_arena(lanes.vacant_index());
        let global_lane = Arc::new(Lane::new(global_id, "global"));
        lanes.insert(Arc::clone(&global_lane));
        let inner = Self {
            config,
            table: Mutex::new(TaskTable::new()),
            pool: WorkerPool::new(),
            timer,
            lanes: Mutex::new(lanes),
            global_lane: global_id,
            threads: Mutex::new(Vec::new()),
            shutdown: AtomicBool::new(false),
        };
        (inner, global_lane)
    }

    pub(crate) fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    pub(crate) fn register_threads(&self, handles: impl IntoIterator<Item = JoinHandle<()>>) {
        self.threads.lock().extend(handles);
    }

    /// Runs `f` under the table lock, then applies the effects it produced.
    pub(crate) fn with_table<R>(&self, f: impl FnOnce(&mut TaskTable, &mut Effects) -> R) -> R {
        let mut effects = Effects::new();
        let result = {
            let mut table = self.table.lock();
            f(&mut table, &mut effects)
        };
        self.apply(effects);
        result
    }

    fn apply(&self, effects: Effects) {
        for effect in effects {
            match effect {
                Effect::Schedule(cell) => cell.schedule(),
                Effect::Discard(cell) => cell.discard(),
                Effect::Wake(waker) => waker.wake(),
                Effect::Unhandled(err) => self.report_unhandled(&err),
            }
        }
    }

    fn report_unhandled(&self, err: &Error) {
        match &self.config.on_unhandled_failure {
            Some(handler) => handler(err),
            None => {
                error!(
                    task_id = ?err.task_id(),
                    error = %err,
                    "unhandled failure in unscoped task"
                );
            }
        }
    }

    /// Where tasks of `context` are dispatched.
    fn dispatch_for(&self, context: ExecutionContext) -> Dispatch {
        match context {
            ExecutionContext::Pooled => Dispatch::Pool,
            ExecutionContext::Unconfined => Dispatch::Inline,
            ExecutionContext::Confined(lane) => self
                .lanes
                .lock()
                .get(lane.arena_index())
                .map_or(Dispatch::Pool, |lane| Dispatch::Lane(Arc::clone(lane))),
        }
    }

    /// Context given to tasks launched outside any scope.
    pub(crate) fn unscoped_context(&self) -> ExecutionContext {
        match self.config.default_context {
            ContextKind::Pooled => ExecutionContext::Pooled,
            ContextKind::Unconfined => ExecutionContext::Unconfined,
            ContextKind::Confined => ExecutionContext::Confined(self.global_lane),
        }
    }

    /// Inserts a task whose body future is built from its core.
    pub(crate) fn spawn_task(
        self: &Arc<Self>,
        spec: SpawnSpec,
        make_future: impl FnOnce(&Arc<TaskCore>) -> TaskFuture,
    ) -> Arc<TaskCore> {
        let dispatch = self.dispatch_for(spec.context);
        self.with_table(|table, effects| {
            table.spawn(
                spec,
                |core| {
                    let future = make_future(&core);
                    Arc::new(TaskCell::new(core, Arc::clone(self), future, dispatch))
                },
                effects,
            )
        })
    }

    /// Starts a lazy task. Returns true if this call started it.
    pub(crate) fn start(&self, id: TaskId) -> bool {
        self.with_table(|table, effects| table.start(id, effects))
    }

    /// Requests cancellation of `id` and its descendants.
    pub(crate) fn cancel(&self, id: TaskId, reason: &CancelReason) {
        self.with_table(|table, effects| table.request_cancel(id, reason, effects));
    }

    /// Called by a cell when its body returned.
    pub(crate) fn body_finished(&self, id: TaskId, outcome: TaskOutcome) {
        self.with_table(|table, effects| table.body_finished(id, outcome, effects));
    }

    /// Registers a new lane driven by the caller.
    pub(crate) fn open_lane(&self, name: &str) -> Arc<Lane> {
        let mut lanes = self.lanes.lock();
        let id = LaneId::from_arena(lanes.vacant_index());
        let lane = Arc::new(Lane::new(id, name));
        lanes.insert(Arc::clone(&lane));
        lane
    }

    /// Unregisters and closes a lane; work still queued on it moves to the pool.
    pub(crate) fn close_lane(&self, id: LaneId) {
        let lane = self.lanes.lock().remove(id.arena_index());
        if let Some(lane) = lane {
            for cell in lane.close() {
                self.pool.push(cell);
            }
        }
    }

    /// Creates a lane with its own thread.
    pub(crate) fn spawn_lane(&self, name: &str) -> Result<LaneId> {
        if self.is_shutdown() {
            return Err(Error::runtime_shutdown());
        }
        let lane = self.open_lane(name);
        let thread_name = format!("{}-{name}", self.config.thread_name_prefix);
        match spawn_lane_thread(&self.config, thread_name, Arc::clone(&lane)) {
            Ok(handle) => {
                self.register_threads([handle]);
                debug!(lane = %lane.id(), name, "dedicated lane created");
                Ok(lane.id())
            }
            Err(err) => {
                self.close_lane(lane.id());
                Err(err.into())
            }
        }
    }

    /// Cancels every root task, waits up to the grace period, then stops all threads.
    pub(crate) fn shutdown(&self) {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        info!(grace = ?self.config.shutdown_grace, "runtime shutting down");

        let roots = {
            let mut table = self.table.lock();
            table.close();
            table.roots()
        };
        for root in &roots {
            self.cancel(root.id(), &CancelReason::shutdown());
        }
        let deadline = Instant::now() + self.config.shutdown_grace;
        for root in &roots {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if !root.wait_terminal(Some(remaining)) {
                warn!(task_id = %root.id(), "task did not acknowledge shutdown within grace period");
            }
        }

        for cell in self.pool.shutdown() {
            cell.abandon();
        }
        let lanes: Vec<Arc<Lane>> = self.lanes.lock().drain();
        for lane in lanes {
            for cell in lane.close() {
                cell.abandon();
            }
        }
        self.timer.stop();

        let current = std::thread::current().id();
        let handles = std::mem::take(&mut *self.threads.lock());
        for handle in handles {
            if handle.thread().id() == current {
                continue;
            }
            if handle.join().is_err() {
                warn!("runtime thread panicked");
            }
        }

        let mut effects = Effects::new();
        let records = self.table.lock().drain(&mut effects);
        drop(records);
        self.apply(effects);
        info!("runtime shut down");
    }
}

pub(crate) fn spawn_lane_thread(
    config: &RuntimeConfig,
    name: String,
    lane: Arc<Lane>,
) -> std::result::Result<JoinHandle<()>, crate::error::ConfigError> {
    let on_start = config.on_thread_start.clone();
    let on_stop = config.on_thread_stop.clone();
    std::thread::Builder::new()
        .name(name.clone())
        .stack_size(config.thread_stack_size)
        .spawn(move || {
            if let Some(hook) = &on_start {
                hook();
            }
            lane.run_dedicated();
            if let Some(hook) = &on_stop {
                hook();
            }
        })
        .map_err(|source| crate::error::ConfigError::ThreadSpawn { name, source })
}
