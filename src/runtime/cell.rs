//! Schedulable task cells.
//!
//! A [`TaskCell`] owns a task's boxed body future and is its waker. Waking a
//! cell schedules it onto the backend chosen when the task was spawned:
//!
//! ```text
//!            wake            pop            Pending
//!   IDLE ──────────► SCHEDULED ────► RUNNING ───────► IDLE
//!                                      │  ▲
//!                                 wake │  │ re-dispatch
//!                                      ▼  │
//!                                    NOTIFIED
//!
//!   RUNNING ── Ready ──► COMPLETE
//! ```
//!
//! A wake that arrives while the cell is running is remembered (`NOTIFIED`)
//! and the cell is re-dispatched to the back of its queue after the current
//! poll. The cell is therefore queued at most once and polled by at most one
//! thread at a time.

use crate::cx::Cx;
use crate::record::task::{TaskCore, TaskOutcome};
use crate::runtime::scheduler::Lane;
use crate::runtime::RuntimeInner;
use crate::tracing_compat::trace;
use crate::types::TaskId;
use parking_lot::Mutex;
use std::cell::Cell;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll, Wake, Waker};

/// The type-erased body future of a task.
pub(crate) type TaskFuture = Pin<Box<dyn Future<Output = TaskOutcome> + Send>>;

const IDLE: u8 = 0;
const SCHEDULED: u8 = 1;
const RUNNING: u8 = 2;
const NOTIFIED: u8 = 3;
const COMPLETE: u8 = 4;

/// Nesting limit for inline polls on one thread.
const MAX_INLINE_DEPTH: u32 = 32;

thread_local! {
    static INLINE_DEPTH: Cell<u32> = const { Cell::new(0) };
}

struct InlineDepthGuard;

impl InlineDepthGuard {
    fn enter() -> Option<Self> {
        INLINE_DEPTH.with(|depth| {
            let current = depth.get();
            (current < MAX_INLINE_DEPTH).then(|| {
                depth.set(current + 1);
                Self
            })
        })
    }
}

impl Drop for InlineDepthGuard {
    fn drop(&mut self) {
        INLINE_DEPTH.with(|depth| depth.set(depth.get().saturating_sub(1)));
    }
}

/// Where a cell goes when it is scheduled. Resolved once, at spawn.
pub(crate) enum Dispatch {
    /// The shared worker pool.
    Pool,
    /// A confined lane; falls back to the pool once the lane is closed.
    Lane(Arc<Lane>),
    /// Polled on the scheduling thread, within the poll budget.
    Inline,
}

impl fmt::Debug for Dispatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pool => f.write_str("Pool"),
            Self::Lane(lane) => write!(f, "Lane({})", lane.id()),
            Self::Inline => f.write_str("Inline"),
        }
    }
}

/// A task's body plus its scheduling state.
pub(crate) struct TaskCell {
    core: Arc<TaskCore>,
    runtime: Arc<RuntimeInner>,
    future: Mutex<Option<TaskFuture>>,
    state: AtomicU8,
    dispatch: Dispatch,
    inline_streak: AtomicU32,
}

impl fmt::Debug for TaskCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskCell")
            .field("task_id", &self.core.id())
            .field("state", &self.state.load(Ordering::Relaxed))
            .field("dispatch", &self.dispatch)
            .finish_non_exhaustive()
    }
}

impl TaskCell {
    pub(crate) fn new(
        core: Arc<TaskCore>,
        runtime: Arc<RuntimeInner>,
        future: TaskFuture,
        dispatch: Dispatch,
    ) -> Self {
        Self {
            core,
            runtime,
            future: Mutex::new(Some(future)),
            state: AtomicU8::new(IDLE),
            dispatch,
            inline_streak: AtomicU32::new(0),
        }
    }

    pub(crate) fn task_id(&self) -> TaskId {
        self.core.id()
    }

    /// Makes the cell runnable. No-op if it is already queued or finished.
    pub(crate) fn schedule(self: &Arc<Self>) {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            let next = match current {
                IDLE => SCHEDULED,
                RUNNING => NOTIFIED,
                _ => return,
            };
            match self
                .state
                .compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => {
                    if next == SCHEDULED {
                        self.runtime.timer.work_started();
                        self.dispatch();
                    }
                    return;
                }
                Err(actual) => current = actual,
            }
        }
    }

    /// Hands a `SCHEDULED` cell to its backend. The caller has counted it as started work.
    fn dispatch(self: &Arc<Self>) {
        match &self.dispatch {
            Dispatch::Pool => self.runtime.pool.push(Arc::clone(self)),
            Dispatch::Lane(lane) => {
                if let Err(cell) = lane.push(Arc::clone(self)) {
                    self.runtime.pool.push(cell);
                }
            }
            Dispatch::Inline => {
                let streak = self.inline_streak.fetch_add(1, Ordering::Relaxed);
                if streak < self.runtime.config.poll_budget {
                    if let Some(_depth) = InlineDepthGuard::enter() {
                        self.run();
                        return;
                    }
                }
                self.inline_streak.store(0, Ordering::Relaxed);
                trace!(task_id = %self.core.id(), "inline budget spent, moving to pool");
                self.runtime.pool.push(Arc::clone(self));
            }
        }
    }

    /// Polls the body once (or more, for inline re-wakes). Called by whichever
    /// backend dequeued the cell; balances the `work_started` of the schedule.
    pub(crate) fn run(self: &Arc<Self>) {
        if self
            .state
            .compare_exchange(SCHEDULED, RUNNING, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            // discarded while queued
            self.runtime.timer.work_finished();
            return;
        }

        let waker = Waker::from(Arc::clone(self));
        let mut cx = Context::from_waker(&waker);
        loop {
            let poll = {
                let mut slot = self.future.lock();
                let poll = match slot.as_mut() {
                    Some(future) => {
                        let _current = Cx::set_current(Some(Cx::new(
                            Arc::clone(&self.core),
                            Arc::clone(&self.runtime),
                        )));
                        future.as_mut().poll(&mut cx)
                    }
                    None => Poll::Pending,
                };
                if poll.is_ready() {
                    *slot = None;
                }
                poll
            };

            match poll {
                Poll::Ready(outcome) => {
                    self.state.store(COMPLETE, Ordering::Release);
                    self.runtime.body_finished(self.core.id(), outcome);
                    break;
                }
                Poll::Pending => {
                    match self.state.compare_exchange(
                        RUNNING,
                        IDLE,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    ) {
                        Ok(_) | Err(COMPLETE) => break,
                        Err(_) => {}
                    }
                    // woken during the poll
                    if matches!(self.dispatch, Dispatch::Inline)
                        && self.inline_streak.fetch_add(1, Ordering::Relaxed)
                            < self.runtime.config.poll_budget
                    {
                        if self.transition(NOTIFIED, RUNNING) {
                            continue;
                        }
                        break;
                    }
                    self.inline_streak.store(0, Ordering::Relaxed);
                    if !self.transition(NOTIFIED, SCHEDULED) {
                        break;
                    }
                    self.runtime.timer.work_started();
                    match &self.dispatch {
                        Dispatch::Lane(lane) => {
                            if let Err(cell) = lane.push(Arc::clone(self)) {
                                self.runtime.pool.push(cell);
                            }
                        }
                        Dispatch::Pool | Dispatch::Inline => {
                            self.runtime.pool.push(Arc::clone(self));
                        }
                    }
                    break;
                }
            }
        }
        if !matches!(self.dispatch, Dispatch::Inline) {
            self.inline_streak.store(0, Ordering::Relaxed);
        }
        self.runtime.timer.work_finished();
    }

    fn transition(&self, from: u8, to: u8) -> bool {
        self.state
            .compare_exchange(from, to, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Drops the body without running it further.
    pub(crate) fn discard(&self) {
        self.state.store(COMPLETE, Ordering::Release);
        // a running body is left to its poller
        let future = self.future.try_lock().and_then(|mut slot| slot.take());
        drop(future);
    }

    /// Discards a cell that was scheduled but will never be run.
    pub(crate) fn abandon(&self) {
        self.discard();
        self.runtime.timer.work_finished();
    }
}

impl Wake for TaskCell {
    fn wake(self: Arc<Self>) {
        self.schedule();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        self.schedule();
    }
}
