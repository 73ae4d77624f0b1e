//! Confined lanes: FIFO queues drained by exactly one thread.
//!
//! A lane is driven either by a dedicated runtime thread
//! ([`Lane::run_dedicated`]) or by a thread blocked in `run_scope`
//! ([`Lane::run_until`]). Either way tasks run one at a time in the order
//! they were scheduled, which gives confined code deterministic interleaving.
//!
//! Pushing to a closed lane fails and hands the cell back; the caller then
//! falls back to the pool.

use crate::runtime::cell::TaskCell;
use crate::tracing_compat::{debug, trace};
use crate::types::LaneId;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::Arc;
use std::task::{Wake, Waker};

#[derive(Debug, Default)]
struct LaneQueue {
    tasks: VecDeque<Arc<TaskCell>>,
    poked: bool,
    closed: bool,
}

/// A single-threaded FIFO execution lane.
#[derive(Debug)]
pub(crate) struct Lane {
    id: LaneId,
    name: Arc<str>,
    queue: Mutex<LaneQueue>,
    ready: Condvar,
}

impl Lane {
    pub(crate) fn new(id: LaneId, name: impl Into<Arc<str>>) -> Self {
        Self {
            id,
            name: name.into(),
            queue: Mutex::new(LaneQueue::default()),
            ready: Condvar::new(),
        }
    }

    pub(crate) const fn id(&self) -> LaneId {
        self.id
    }

    /// Appends a scheduled cell, or returns it if the lane is closed.
    pub(crate) fn push(&self, cell: Arc<TaskCell>) -> Result<(), Arc<TaskCell>> {
        let mut queue = self.queue.lock();
        if queue.closed {
            return Err(cell);
        }
        queue.tasks.push_back(cell);
        drop(queue);
        self.ready.notify_one();
        Ok(())
    }

    /// Wakes the driving thread without queueing work.
    pub(crate) fn poke(&self) {
        self.queue.lock().poked = true;
        self.ready.notify_one();
    }

    /// A waker that pokes this lane.
    pub(crate) fn poke_waker(self: &Arc<Self>) -> Waker {
        Waker::from(Arc::new(LanePoke(Arc::clone(self))))
    }

    /// Closes the lane and returns the cells still queued.
    pub(crate) fn close(&self) -> Vec<Arc<TaskCell>> {
        let mut queue = self.queue.lock();
        queue.closed = true;
        let leftover = queue.tasks.drain(..).collect();
        drop(queue);
        self.ready.notify_all();
        leftover
    }

    /// Runs queued tasks until the lane is closed.
    pub(crate) fn run_dedicated(&self) {
        debug!(lane = %self.id, name = %self.name, "lane thread started");
        loop {
            let next = {
                let mut queue = self.queue.lock();
                loop {
                    if queue.closed {
                        break None;
                    }
                    if let Some(cell) = queue.tasks.pop_front() {
                        break Some(cell);
                    }
                    queue.poked = false;
                    self.ready.wait(&mut queue);
                }
            };
            match next {
                Some(cell) => {
                    trace!(lane = %self.id, task_id = %cell.task_id(), "lane running task");
                    cell.run();
                }
                None => break,
            }
        }
        debug!(lane = %self.id, name = %self.name, "lane thread stopped");
    }

    /// Runs queued tasks on the calling thread until `done` holds.
    ///
    /// Whatever makes `done` true must [`poke`](Self::poke) the lane
    /// afterwards, or the thread may sleep through it.
    pub(crate) fn run_until(&self, done: impl Fn() -> bool) {
        loop {
            let next = {
                let mut queue = self.queue.lock();
                loop {
                    if let Some(cell) = queue.tasks.pop_front() {
                        break Some(cell);
                    }
                    if done() || queue.closed {
                        break None;
                    }
                    if queue.poked {
                        queue.poked = false;
                        continue;
                    }
                    self.ready.wait(&mut queue);
                }
            };
            match next {
                Some(cell) => cell.run(),
                None => return,
            }
        }
    }
}

struct LanePoke(Arc<Lane>);

impl Wake for LanePoke {
    fn wake(self: Arc<Self>) {
        self.0.poke();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        self.0.poke();
    }
}
