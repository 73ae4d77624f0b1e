//! Pooled execution: a shared injector drained by the worker threads.
//!
//! Any worker may run any pooled task, so a pooled task can resume on a
//! different thread after every suspension. Idle workers park on a condition
//! variable; `push` notifies under the same lock the workers re-check the
//! queue under, so a wakeup is never lost.

use crate::error::ConfigError;
use crate::runtime::cell::TaskCell;
use crate::runtime::config::RuntimeConfig;
use crate::tracing_compat::{debug, trace};
use crossbeam_queue::SegQueue;
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::thread::JoinHandle;

/// Identifier for a pool worker.
pub type WorkerId = usize;

#[derive(Debug, Default)]
struct IdleState {
    sleepers: usize,
    shutdown: bool,
}

#[derive(Debug, Default)]
struct PoolShared {
    injector: SegQueue<Arc<TaskCell>>,
    idle: Mutex<IdleState>,
    wakeup: Condvar,
}

/// The shared worker pool.
#[derive(Debug, Clone, Default)]
pub(crate) struct WorkerPool {
    shared: Arc<PoolShared>,
}

impl WorkerPool {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Queues a scheduled cell. Cells pushed after shutdown are dropped.
    pub(crate) fn push(&self, cell: Arc<TaskCell>) {
        let idle = self.shared.idle.lock();
        if idle.shutdown {
            drop(idle);
            cell.abandon();
            return;
        }
        self.shared.injector.push(cell);
        if idle.sleepers > 0 {
            self.shared.wakeup.notify_one();
        }
    }

    /// Number of queued cells.
    pub(crate) fn queued(&self) -> usize {
        self.shared.injector.len()
    }

    /// Starts `config.worker_threads` workers.
    pub(crate) fn spawn_workers(
        &self,
        config: &RuntimeConfig,
    ) -> Result<Vec<JoinHandle<()>>, ConfigError> {
        (0..config.worker_threads)
            .map(|id| {
                let name = format!("{}-worker-{id}", config.thread_name_prefix);
                let worker = Worker {
                    id,
                    shared: Arc::clone(&self.shared),
                };
                let on_start = config.on_thread_start.clone();
                let on_stop = config.on_thread_stop.clone();
                std::thread::Builder::new()
                    .name(name.clone())
                    .stack_size(config.thread_stack_size)
                    .spawn(move || {
                        if let Some(hook) = &on_start {
                            hook();
                        }
                        worker.run_loop();
                        if let Some(hook) = &on_stop {
                            hook();
                        }
                    })
                    .map_err(|source| ConfigError::ThreadSpawn { name, source })
            })
            .collect()
    }

    /// Stops the workers and returns every cell still queued.
    pub(crate) fn shutdown(&self) -> Vec<Arc<TaskCell>> {
        self.shared.idle.lock().shutdown = true;
        self.shared.wakeup.notify_all();
        let mut leftover = Vec::new();
        while let Some(cell) = self.shared.injector.pop() {
            leftover.push(cell);
        }
        leftover
    }
}

/// A pool worker thread.
#[derive(Debug)]
struct Worker {
    id: WorkerId,
    shared: Arc<PoolShared>,
}

impl Worker {
    fn run_loop(&self) {
        debug!(worker_id = self.id, "worker started");
        loop {
            if let Some(cell) = self.shared.injector.pop() {
                trace!(worker_id = self.id, task_id = %cell.task_id(), "worker running task");
                cell.run();
                continue;
            }

            let mut idle = self.shared.idle.lock();
            if idle.shutdown {
                break;
            }
            if !self.shared.injector.is_empty() {
                continue;
            }
            idle.sleepers += 1;
            self.shared.wakeup.wait(&mut idle);
            idle.sleepers -= 1;
        }
        debug!(worker_id = self.id, "worker stopped");
    }
}
