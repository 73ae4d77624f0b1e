//! The task table.
//!
//! Every live task has a [`TaskRecord`] here, indexed by its [`TaskId`]. All
//! tree mutations (attaching children, failure aggregation, cancellation
//! fan-out, finalization) happen under the single table lock, which makes
//! "first failure wins" a matter of arrival order under that lock.
//!
//! Operations never wake anything while the lock is held. They push
//! [`Effect`]s instead, which the runtime applies after unlocking.
//!
//! Lock order: table, then a task's core.

use crate::error::Error;
use crate::record::task::{TaskCore, TaskOutcome, TaskRecord, TaskState, UnscopedKind};
use crate::runtime::cell::TaskCell;
use crate::tracing_compat::{debug, trace, warn};
use crate::types::{CancelKind, CancelReason, ExecutionContext, Outcome, StartMode, TaskId, Time};
use crate::util::Arena;
use smallvec::SmallVec;
use std::sync::Arc;
use std::task::Waker;

/// Deferred side effect of a table operation.
#[derive(Debug)]
pub(crate) enum Effect {
    /// Make the cell runnable.
    Schedule(Arc<TaskCell>),
    /// Drop the cell's body unrun.
    Discard(Arc<TaskCell>),
    /// Wake a waiter.
    Wake(Waker),
    /// Report a failed unscoped launch.
    Unhandled(Error),
}

pub(crate) type Effects = SmallVec<[Effect; 8]>;

/// Everything the table needs to insert a task.
#[derive(Debug)]
pub(crate) struct SpawnSpec {
    pub parent: Option<TaskId>,
    pub name: Option<Arc<str>>,
    pub context: ExecutionContext,
    pub mode: StartMode,
    pub propagate_failure: bool,
    pub unscoped: Option<UnscopedKind>,
}

/// Point-in-time view of one live task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskSnapshot {
    /// Task identifier.
    pub id: TaskId,
    /// Optional human-friendly name.
    pub name: Option<String>,
    /// Parent task, if any.
    pub parent: Option<TaskId>,
    /// Current lifecycle state.
    pub state: TaskState,
    /// Execution context.
    pub context: ExecutionContext,
    /// Live children in creation order.
    pub children: Vec<TaskId>,
}

/// Point-in-time view of the task graph.
///
/// Tasks leave the table once terminal, so only live tasks appear.
#[derive(Debug, Clone)]
pub struct RuntimeSnapshot {
    /// Runtime clock at the time of the snapshot.
    pub now: Time,
    /// Live tasks, in table order.
    pub tasks: Vec<TaskSnapshot>,
}

impl RuntimeSnapshot {
    /// Looks up a task by id.
    #[must_use]
    pub fn task(&self, id: TaskId) -> Option<&TaskSnapshot> {
        self.tasks.iter().find(|t| t.id == id)
    }

    /// Live tasks without a parent.
    pub fn roots(&self) -> impl Iterator<Item = &TaskSnapshot> {
        self.tasks.iter().filter(|t| t.parent.is_none())
    }
}

/// Cancellation reason handed to the descendants of a cancelled task.
fn inherited_reason(reason: &CancelReason) -> CancelReason {
    match reason.kind() {
        CancelKind::Shutdown | CancelKind::FailFast => reason.clone(),
        _ => CancelReason::parent_cancelled(),
    }
}

/// Live tasks and their tree links.
#[derive(Debug, Default)]
pub(crate) struct TaskTable {
    tasks: Arena<TaskRecord>,
    finish_seq: u64,
    closed: bool,
}

impl TaskTable {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn len(&self) -> usize {
        self.tasks.len()
    }

    pub(crate) fn get(&self, id: TaskId) -> Option<&TaskRecord> {
        self.tasks.get(id.arena_index())
    }

    fn get_mut(&mut self, id: TaskId) -> Option<&mut TaskRecord> {
        self.tasks.get_mut(id.arena_index())
    }

    /// Live children of `id`, in creation order.
    pub(crate) fn children(&self, id: TaskId) -> Vec<TaskId> {
        self.get(id)
            .map(|record| record.children.to_vec())
            .unwrap_or_default()
    }

    /// Inserts a task. `make_cell` builds the schedulable cell from the new core.
    ///
    /// The task is cancelled on the spot when its parent is gone or already
    /// cancelling, or when the table is closed for shutdown.
    pub(crate) fn spawn<F>(
        &mut self,
        spec: SpawnSpec,
        make_cell: F,
        effects: &mut Effects,
    ) -> Arc<TaskCore>
    where
        F: FnOnce(Arc<TaskCore>) -> Arc<TaskCell>,
    {
        let SpawnSpec {
            parent,
            name,
            context,
            mode,
            propagate_failure,
            unscoped,
        } = spec;

        let id = TaskId::from_arena(self.tasks.vacant_index());
        let core = Arc::new(TaskCore::new(id, name, parent, context));
        let cell = make_cell(Arc::clone(&core));
        let idx = self.tasks.insert(TaskRecord::new(
            Arc::clone(&core),
            propagate_failure,
            unscoped,
            cell,
        ));
        debug_assert_eq!(idx, id.arena_index());

        let refusal = if self.closed {
            Some(CancelReason::shutdown())
        } else {
            match parent {
                None => None,
                Some(parent_id) => match self.get_mut(parent_id) {
                    Some(parent_record) => {
                        let reason = parent_record.core.cancel_reason();
                        if reason.is_none() {
                            parent_record.children.push(id);
                        }
                        reason.as_ref().map(inherited_reason)
                    }
                    None => Some(CancelReason::parent_cancelled()),
                },
            }
        };

        debug!(
            task_id = %id,
            parent = ?parent,
            name = ?core.name(),
            context = %context,
            lazy = matches!(mode, StartMode::Lazy),
            "task spawned"
        );

        if let Some(reason) = refusal {
            debug!(task_id = %id, reason = %reason, "task cancelled at spawn");
            if let Some(record) = self.get_mut(id) {
                record.core.request_cancel(&reason);
                record.body_done = true;
                if let Some(cell) = record.cell.take() {
                    effects.push(Effect::Discard(cell));
                }
            }
            self.try_finalize(id, effects);
            return core;
        }

        if mode == StartMode::Eager {
            self.start(id, effects);
        }
        core
    }

    /// Moves a `Created` task to `Active` and schedules it. Idempotent.
    pub(crate) fn start(&mut self, id: TaskId, effects: &mut Effects) -> bool {
        let Some(record) = self.get_mut(id) else {
            return false;
        };
        if record.core.state() != TaskState::Created {
            return false;
        }
        if record.core.transition(TaskState::Active).is_err() {
            return false;
        }
        trace!(task_id = %id, "task started");
        if let Some(cell) = &record.cell {
            effects.push(Effect::Schedule(Arc::clone(cell)));
        }
        true
    }

    /// Requests cancellation of `id` and, transitively, of every descendant.
    ///
    /// `Created` tasks are finished as `Cancelled` right away; `Active` ones
    /// move to `Cancelling` and are woken so that their next checkpoint
    /// observes the request.
    pub(crate) fn request_cancel(&mut self, id: TaskId, reason: &CancelReason, effects: &mut Effects) {
        let mut stack: SmallVec<[(TaskId, CancelReason); 8]> = SmallVec::new();
        stack.push((id, reason.clone()));
        let mut created = SmallVec::<[TaskId; 4]>::new();

        while let Some((task_id, reason)) = stack.pop() {
            let Some(record) = self.get_mut(task_id) else {
                continue;
            };
            let state = record.core.state();
            if state.is_terminal() {
                continue;
            }
            let first = record.core.request_cancel(&reason);
            match state {
                TaskState::Created => {
                    record.body_done = true;
                    if let Some(cell) = record.cell.take() {
                        effects.push(Effect::Discard(cell));
                    }
                    created.push(task_id);
                }
                TaskState::Active => {
                    let _ = record.core.transition(TaskState::Cancelling);
                    if let Some(cell) = &record.cell {
                        effects.push(Effect::Schedule(Arc::clone(cell)));
                    }
                }
                _ => {}
            }
            if first {
                debug!(task_id = %task_id, reason = %reason, "cancel requested");
            }
            let inherited = inherited_reason(&reason);
            for child in record.children.iter().rev() {
                stack.push((*child, inherited.clone()));
            }
        }

        for task_id in created {
            self.try_finalize(task_id, effects);
        }
    }

    /// Records the end of a task's body and finalizes what can be finalized.
    pub(crate) fn body_finished(&mut self, id: TaskId, outcome: TaskOutcome, effects: &mut Effects) {
        let Some(record) = self.get_mut(id) else {
            return;
        };
        record.body_done = true;
        record.cell = None;
        let failure = match outcome {
            Outcome::Ok(()) => None,
            Outcome::Cancelled(_) => {
                record.body_cancelled = true;
                trace!(task_id = %id, "body acknowledged cancellation");
                None
            }
            Outcome::Err(err) => Some(err),
            Outcome::Panicked(payload) => Some(Error::panicked(&payload)),
        };
        if let Some(err) = failure {
            self.fail(id, err, effects);
        }
        self.try_finalize(id, effects);
    }

    /// Records a body failure and propagates it up the propagating ancestors.
    ///
    /// The topmost ancestor reached (or the task itself) is cancelled, which
    /// takes down every sibling of the failing task.
    fn fail(&mut self, id: TaskId, err: Error, effects: &mut Effects) {
        let Some(record) = self.get_mut(id) else {
            return;
        };
        let err = err.with_task(id, record.core.name().cloned());
        warn!(task_id = %id, error = %err, "task failed");
        record.record_failure(err.clone());

        let mut top = id;
        loop {
            let Some(record) = self.get(top) else {
                break;
            };
            if !record.propagate_failure {
                break;
            }
            let Some(parent) = record.parent() else {
                break;
            };
            let Some(parent_record) = self.get_mut(parent) else {
                break;
            };
            if parent_record.record_failure(err.clone()) {
                debug!(task_id = %parent, child = %id, "child failure recorded");
            } else {
                warn!(task_id = %parent, child = %id, "concurrent child failure suppressed");
            }
            top = parent;
        }

        let has_live_work = self
            .get(top)
            .is_some_and(|record| !record.children.is_empty() || !record.body_done);
        if has_live_work {
            self.request_cancel(top, &CancelReason::sibling_failed(), effects);
        }
    }

    /// Finishes `id` if its body is done and it has no live children, then
    /// walks up to the parent, which may have been waiting on it.
    fn try_finalize(&mut self, id: TaskId, effects: &mut Effects) {
        let mut next = Some(id);
        while let Some(task_id) = next.take() {
            let Some(record) = self.get(task_id) else {
                return;
            };
            if !record.is_finalizable() {
                return;
            }
            let outcome = record.terminal_outcome();
            let seq = self.finish_seq;
            self.finish_seq += 1;

            let Some(record) = self.tasks.remove(task_id.arena_index()) else {
                return;
            };
            match record.core.finish(outcome.clone(), seq) {
                Ok(waiters) => effects.extend(waiters.into_iter().map(Effect::Wake)),
                Err(err) => {
                    warn!(task_id = %task_id, error = %err, "finalize rejected");
                }
            }
            debug!(task_id = %task_id, state = ?record.core.state(), seq, "task finished");

            if record.unscoped == Some(UnscopedKind::Launch) {
                if let Outcome::Err(err) = outcome {
                    effects.push(Effect::Unhandled(err));
                }
            }

            if let Some(parent) = record.parent() {
                if let Some(parent_record) = self.get_mut(parent) {
                    parent_record.children.retain(|child| *child != task_id);
                    next = Some(parent);
                }
            }
        }
    }

    /// Ids of live tasks without a parent.
    pub(crate) fn roots(&self) -> Vec<Arc<TaskCore>> {
        self.tasks
            .iter()
            .filter(|(_, record)| record.parent().is_none())
            .map(|(_, record)| Arc::clone(&record.core))
            .collect()
    }

    /// Refuses new tasks from now on.
    pub(crate) fn close(&mut self) {
        self.closed = true;
    }

    /// Finishes every remaining task as cancelled and empties the table.
    pub(crate) fn drain(&mut self, effects: &mut Effects) -> Vec<TaskRecord> {
        let records = self.tasks.drain();
        let reason = CancelReason::shutdown();
        for record in &records {
            if record.core.state().is_terminal() {
                continue;
            }
            record.core.request_cancel(&reason);
            let seq = self.finish_seq;
            self.finish_seq += 1;
            if let Ok(waiters) = record
                .core
                .finish(Outcome::Cancelled(reason.clone()), seq)
            {
                effects.extend(waiters.into_iter().map(Effect::Wake));
            }
            if let Some(cell) = &record.cell {
                effects.push(Effect::Discard(Arc::clone(cell)));
            }
        }
        records
    }

    /// Diagnostics view of every live task.
    pub(crate) fn snapshot(&self, now: Time) -> RuntimeSnapshot {
        let tasks = self
            .tasks
            .iter()
            .map(|(_, record)| TaskSnapshot {
                id: record.id(),
                name: record.core.name().map(ToString::to_string),
                parent: record.parent(),
                state: record.core.state(),
                context: record.core.context(),
                children: record.children.to_vec(),
            })
            .collect();
        RuntimeSnapshot { now, tasks }
    }
}
