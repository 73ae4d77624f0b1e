//! Task records.
//!
//! A task is split in two halves:
//!
//! - [`TaskCore`] is shared (`Arc`) between the task table, the scheduled cell,
//!   the task's own [`Cx`](crate::cx::Cx) and every handle. It holds what
//!   outlives the table entry: identity, lifecycle state, the cancellation
//!   request, and the terminal outcome with its waiters.
//! - [`TaskRecord`] lives in the task table and holds the tree links and
//!   bookkeeping that the scheduler mutates under the table lock. It is
//!   removed as soon as the task is terminal.

use crate::error::{Error, ErrorKind, Result};
use crate::runtime::cell::TaskCell;
use crate::types::{CancelReason, ExecutionContext, Outcome, TaskId};
use parking_lot::{Condvar, Mutex, RwLock};
use smallvec::SmallVec;
use std::sync::Arc;
use std::task::Waker;
use std::time::{Duration, Instant};

/// Terminal outcome stored for a task. The value of a deferred is kept separately.
pub type TaskOutcome = Outcome<(), Error>;

/// Lifecycle state of a task.
///
/// ```text
/// Created ──► Active ──► Completed
///    │          │  └───► Failed
///    │          ▼           ▲
///    │      Cancelling ─────┘
///    │          │
///    └──────────┴──► Cancelled
/// ```
///
/// `Cancelling` may end `Failed` when a genuine failure (of the task itself or
/// one of its children) happens while it is winding down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskState {
    /// Created lazily; not scheduled yet.
    Created,
    /// Scheduled or running.
    Active,
    /// Cancellation requested; waiting for the body and children to acknowledge.
    Cancelling,
    /// Body and every child finished without failure or cancellation.
    Completed,
    /// Acknowledged a cancellation.
    Cancelled,
    /// The body or a propagating child failed.
    Failed,
}

impl TaskState {
    /// True for `Completed`, `Cancelled` and `Failed`.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Failed)
    }

    /// Whether `self -> next` is a legal lifecycle step.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Created, Self::Active | Self::Cancelled)
                | (
                    Self::Active,
                    Self::Cancelling | Self::Completed | Self::Cancelled | Self::Failed
                )
                | (Self::Cancelling, Self::Cancelled | Self::Failed)
        )
    }
}

#[derive(Debug, Default)]
struct CancelState {
    reason: Option<CancelReason>,
    mask_depth: u32,
}

#[derive(Debug)]
struct Completion {
    state: TaskState,
    outcome: Option<TaskOutcome>,
    finish_seq: Option<u64>,
    waiters: Vec<Waker>,
}

/// Shared half of a task: identity, lifecycle and terminal outcome.
#[derive(Debug)]
pub struct TaskCore {
    id: TaskId,
    name: Option<Arc<str>>,
    parent: Option<TaskId>,
    context: ExecutionContext,
    cancel: RwLock<CancelState>,
    completion: Mutex<Completion>,
    terminal: Condvar,
}

impl TaskCore {
    pub(crate) fn new(
        id: TaskId,
        name: Option<Arc<str>>,
        parent: Option<TaskId>,
        context: ExecutionContext,
    ) -> Self {
        Self {
            id,
            name,
            parent,
            context,
            cancel: RwLock::new(CancelState::default()),
            completion: Mutex::new(Completion {
                state: TaskState::Created,
                outcome: None,
                finish_seq: None,
                waiters: Vec::new(),
            }),
            terminal: Condvar::new(),
        }
    }

    /// The task id.
    #[must_use]
    pub const fn id(&self) -> TaskId {
        self.id
    }

    /// The task name, if any.
    #[must_use]
    pub fn name(&self) -> Option<&Arc<str>> {
        self.name.as_ref()
    }

    /// The parent task, `None` for roots and unscoped tasks.
    #[must_use]
    pub const fn parent(&self) -> Option<TaskId> {
        self.parent
    }

    /// The context the task runs in.
    #[must_use]
    pub const fn context(&self) -> ExecutionContext {
        self.context
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> TaskState {
        self.completion.lock().state
    }

    /// Applies a non-terminal lifecycle step, rejecting illegal ones.
    pub(crate) fn transition(&self, next: TaskState) -> Result<TaskState> {
        let mut completion = self.completion.lock();
        let prev = completion.state;
        if prev == next {
            return Ok(prev);
        }
        if !prev.can_transition_to(next) || next.is_terminal() {
            return Err(Error::new(ErrorKind::InvalidStateTransition)
                .with_message(format!("task {}: {prev:?} -> {next:?}", self.id)));
        }
        completion.state = next;
        Ok(prev)
    }

    /// Publishes the terminal state and returns the wakers of everyone waiting on it.
    pub(crate) fn finish(&self, outcome: TaskOutcome, seq: u64) -> Result<Vec<Waker>> {
        let next = match &outcome {
            Outcome::Ok(()) => TaskState::Completed,
            Outcome::Cancelled(_) => TaskState::Cancelled,
            Outcome::Err(_) | Outcome::Panicked(_) => TaskState::Failed,
        };
        let mut completion = self.completion.lock();
        let prev = completion.state;
        if !prev.can_transition_to(next) {
            return Err(Error::new(ErrorKind::InvalidStateTransition)
                .with_message(format!("task {}: {prev:?} -> {next:?}", self.id)));
        }
        completion.state = next;
        completion.outcome = Some(outcome);
        completion.finish_seq = Some(seq);
        let waiters = std::mem::take(&mut completion.waiters);
        drop(completion);
        self.terminal.notify_all();
        Ok(waiters)
    }

    /// The terminal outcome, once the task is terminal.
    #[must_use]
    pub fn outcome(&self) -> Option<TaskOutcome> {
        self.completion.lock().outcome.clone()
    }

    /// Position of this task in the runtime-wide order of terminal transitions.
    #[must_use]
    pub fn finish_seq(&self) -> Option<u64> {
        self.completion.lock().finish_seq
    }

    /// Returns the terminal outcome, or registers `waker` to be woken when there is one.
    pub(crate) fn poll_outcome(&self, waker: &Waker) -> Option<TaskOutcome> {
        let mut completion = self.completion.lock();
        if let Some(outcome) = &completion.outcome {
            return Some(outcome.clone());
        }
        if !completion.waiters.iter().any(|w| w.will_wake(waker)) {
            completion.waiters.push(waker.clone());
        }
        None
    }

    /// Blocks the calling thread until the task is terminal or `timeout` passes.
    ///
    /// Returns true if the task is terminal.
    pub(crate) fn wait_terminal(&self, timeout: Option<Duration>) -> bool {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut completion = self.completion.lock();
        while completion.outcome.is_none() {
            match deadline {
                Some(deadline) => {
                    if self.terminal.wait_until(&mut completion, deadline).timed_out() {
                        return completion.outcome.is_some();
                    }
                }
                None => self.terminal.wait(&mut completion),
            }
        }
        true
    }

    /// Records a cancellation request. Returns true if none was pending before.
    pub(crate) fn request_cancel(&self, reason: &CancelReason) -> bool {
        let mut cancel = self.cancel.write();
        match &mut cancel.reason {
            Some(existing) => {
                existing.strengthen(reason);
                false
            }
            None => {
                cancel.reason = Some(reason.clone());
                true
            }
        }
    }

    /// The pending cancellation reason, if cancellation was requested.
    #[must_use]
    pub fn cancel_reason(&self) -> Option<CancelReason> {
        self.cancel.read().reason.clone()
    }

    /// True once cancellation was requested, masked or not.
    #[must_use]
    pub fn is_cancel_requested(&self) -> bool {
        self.cancel.read().reason.is_some()
    }

    /// Err(Cancelled) if cancellation is pending and not masked.
    pub(crate) fn checkpoint(&self) -> Result<()> {
        let cancel = self.cancel.read();
        match &cancel.reason {
            Some(reason) if cancel.mask_depth == 0 => Err(Error::cancelled(reason)),
            _ => Ok(()),
        }
    }

    pub(crate) fn mask(&self) {
        self.cancel.write().mask_depth += 1;
    }

    pub(crate) fn unmask(&self) {
        let mut cancel = self.cancel.write();
        cancel.mask_depth = cancel.mask_depth.saturating_sub(1);
    }

    /// Current mask nesting depth.
    #[must_use]
    pub fn mask_depth(&self) -> u32 {
        self.cancel.read().mask_depth
    }
}

/// How an unscoped task reports failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnscopedKind {
    /// Failures go to the unhandled-failure handler (and to `join`).
    Launch,
    /// Failures are kept for awaiters only.
    Deferred,
}

/// Table-side half of a task: tree links and finalization bookkeeping.
#[derive(Debug)]
pub struct TaskRecord {
    /// Shared half.
    pub core: Arc<TaskCore>,
    /// Non-terminal children in creation order.
    pub children: SmallVec<[TaskId; 4]>,
    /// The body has returned (or will never run).
    pub body_done: bool,
    /// The body observed cancellation on its own, without a request.
    pub body_cancelled: bool,
    /// Failures of this task are forwarded to the parent.
    pub propagate_failure: bool,
    /// Set for tasks launched outside any scope.
    pub unscoped: Option<UnscopedKind>,
    /// First failure that reached this task; later ones are suppressed into it.
    pub failure: Option<Error>,
    /// The schedulable body, until it finishes.
    pub(crate) cell: Option<Arc<TaskCell>>,
}

impl TaskRecord {
    pub(crate) fn new(
        core: Arc<TaskCore>,
        propagate_failure: bool,
        unscoped: Option<UnscopedKind>,
        cell: Arc<TaskCell>,
    ) -> Self {
        Self {
            core,
            children: SmallVec::new(),
            body_done: false,
            body_cancelled: false,
            propagate_failure,
            unscoped,
            failure: None,
            cell: Some(cell),
        }
    }

    /// The task id.
    #[must_use]
    pub fn id(&self) -> TaskId {
        self.core.id()
    }

    /// The parent id.
    #[must_use]
    pub fn parent(&self) -> Option<TaskId> {
        self.core.parent()
    }

    /// Records a failure. The first one wins; later ones become suppressed causes.
    ///
    /// Returns true if `err` became the primary failure.
    pub fn record_failure(&mut self, err: Error) -> bool {
        match &mut self.failure {
            Some(primary) => {
                primary.add_suppressed(err);
                false
            }
            None => {
                self.failure = Some(err);
                true
            }
        }
    }

    /// True once the body is done and every child is terminal.
    #[must_use]
    pub fn is_finalizable(&self) -> bool {
        self.body_done && self.children.is_empty()
    }

    /// The outcome the task ends with, given what has been recorded so far.
    ///
    /// Failure beats cancellation, which beats completion. A body that returned
    /// normally after cancellation was requested still ends `Cancelled`.
    #[must_use]
    pub fn terminal_outcome(&self) -> TaskOutcome {
        if let Some(err) = &self.failure {
            return Outcome::Err(err.clone());
        }
        match self.core.cancel_reason() {
            Some(reason) => Outcome::Cancelled(reason),
            None if self.body_cancelled => Outcome::Cancelled(CancelReason::default()),
            None => Outcome::Ok(()),
        }
    }
}
