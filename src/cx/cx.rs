//! The per-task context.
//!
//! A `Cx` identifies the task being polled on the current thread and gives
//! access to its cancellation state and to the runtime that owns it:
//!
//! - Querying identity (task id, name, execution context)
//! - Checking cancellation status at checkpoints
//! - Masking cancellation for short critical sections
//! - Reading the runtime clock
//!
//! The runtime installs the context in a thread-local while it polls a task
//! body, so free functions such as [`checkpoint`](super::checkpoint) and
//! [`delay`](crate::time::delay) find it without it being passed around.
//!
//! # Thread Safety
//!
//! `Cx` is `Send + Sync` and cheap to clone. The semantic contract is that a
//! `Cx` belongs to one task: checkpoints observe that task's cancellation,
//! whichever thread the call happens on.

use crate::error::Result;
use crate::record::task::TaskCore;
use crate::runtime::{RuntimeHandle, RuntimeInner};
use crate::time::TimerDriver;
use crate::tracing_compat::debug;
use crate::types::{CancelReason, ExecutionContext, TaskId, Time};
use std::cell::RefCell;
use std::fmt;
use std::sync::Arc;

thread_local! {
    static CURRENT_CX: RefCell<Option<Cx>> = const { RefCell::new(None) };
}

/// Guard that restores the previous Cx on drop.
pub(crate) struct CurrentCxGuard {
    prev: Option<Cx>,
}

impl Drop for CurrentCxGuard {
    fn drop(&mut self) {
        let prev = self.prev.take();
        CURRENT_CX.with(|slot| {
            *slot.borrow_mut() = prev;
        });
    }
}

/// The context of one task.
#[derive(Clone)]
pub struct Cx {
    core: Arc<TaskCore>,
    runtime: Arc<RuntimeInner>,
}

impl fmt::Debug for Cx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cx")
            .field("task_id", &self.core.id())
            .field("name", &self.core.name())
            .field("context", &self.core.context())
            .finish()
    }
}

impl Cx {
    pub(crate) fn new(core: Arc<TaskCore>, runtime: Arc<RuntimeInner>) -> Self {
        Self { core, runtime }
    }

    /// Returns the context of the task being polled on this thread, if any.
    #[must_use]
    pub fn current() -> Option<Self> {
        CURRENT_CX.with(|slot| slot.borrow().clone())
    }

    /// Sets the current task context for the duration of the guard.
    #[must_use]
    pub(crate) fn set_current(cx: Option<Self>) -> CurrentCxGuard {
        let prev = CURRENT_CX.with(|slot| {
            let mut guard = slot.borrow_mut();
            let prev = guard.take();
            *guard = cx;
            prev
        });
        CurrentCxGuard { prev }
    }

    pub(crate) fn core(&self) -> &Arc<TaskCore> {
        &self.core
    }

    pub(crate) fn runtime_inner(&self) -> &Arc<RuntimeInner> {
        &self.runtime
    }

    pub(crate) fn timer_driver(&self) -> &Arc<TimerDriver> {
        &self.runtime.timer
    }

    /// The task id.
    #[must_use]
    pub fn task_id(&self) -> TaskId {
        self.core.id()
    }

    /// The task name, if any.
    #[must_use]
    pub fn task_name(&self) -> Option<&str> {
        self.core.name().map(AsRef::as_ref)
    }

    /// The context the task runs in.
    #[must_use]
    pub fn context(&self) -> ExecutionContext {
        self.core.context()
    }

    /// Checks for cancellation and returns an error if cancelled.
    ///
    /// If the context is currently masked (via [`masked`](Self::masked)),
    /// this returns `Ok(())` even when cancellation is pending, deferring the
    /// cancellation until the mask is released.
    ///
    /// # Errors
    ///
    /// `Cancelled` if cancellation is pending and the context is not masked.
    ///
    /// # Example
    ///
    /// ```ignore
    /// async fn crunch(cx: &Cx, items: &[Item]) -> Result<()> {
    ///     for item in items {
    ///         cx.checkpoint()?;
    ///         process(item);
    ///     }
    ///     Ok(())
    /// }
    /// ```
    pub fn checkpoint(&self) -> Result<()> {
        let result = self.core.checkpoint();
        if let Err(err) = &result {
            debug!(task_id = %self.core.id(), reason = ?err.message(), "cancel observed at checkpoint");
        }
        result
    }

    /// True once cancellation was requested, masked or not.
    #[must_use]
    pub fn is_cancel_requested(&self) -> bool {
        self.core.is_cancel_requested()
    }

    /// The pending cancellation reason, if any.
    #[must_use]
    pub fn cancel_reason(&self) -> Option<CancelReason> {
        self.core.cancel_reason()
    }

    /// True while no cancellation has been requested.
    #[must_use]
    pub fn is_active(&self) -> bool {
        !self.core.is_cancel_requested()
    }

    /// Current time on the runtime clock.
    #[must_use]
    pub fn now(&self) -> Time {
        self.runtime.timer.now()
    }

    /// A handle to the runtime that owns the task.
    #[must_use]
    pub fn runtime(&self) -> RuntimeHandle {
        RuntimeHandle::from_inner(Arc::clone(&self.runtime))
    }

    /// Executes `f` with cancellation masked.
    ///
    /// While masked, [`checkpoint`](Self::checkpoint) succeeds even if
    /// cancellation was requested. Masking nests: cancellation becomes
    /// observable again once every mask is released.
    ///
    /// Keep masked sections short and follow them with a checkpoint.
    pub fn masked<F, R>(&self, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let _guard = MaskGuard::new(&self.core);
        f()
    }
}

/// Holds one level of cancellation masking until dropped.
pub(crate) struct MaskGuard<'a> {
    core: &'a TaskCore,
}

impl<'a> MaskGuard<'a> {
    pub(crate) fn new(core: &'a TaskCore) -> Self {
        core.mask();
        Self { core }
    }
}

impl Drop for MaskGuard<'_> {
    fn drop(&mut self) {
        self.core.unmask();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::RuntimeBuilder;

    #[test]
    fn no_context_outside_tasks() {
        crate::test_utils::init_test_logging();
        assert!(Cx::current().is_none());
    }

    #[test]
    fn context_is_installed_while_polling() {
        crate::test_utils::init_test_logging();
        crate::test_phase!("context_is_installed_while_polling");
        let runtime = RuntimeBuilder::current_thread().build().unwrap();
        let (id, is_active) = runtime
            .run_scope(|scope| async move {
                let cx = Cx::current().ok_or_else(|| crate::error::Error::internal("no cx"))?;
                assert_eq!(cx.task_id(), scope.id());
                Ok((cx.task_id(), cx.is_active()))
            })
            .unwrap();
        assert!(is_active);
        assert!(runtime.snapshot().task(id).is_none());
        assert!(Cx::current().is_none());
        crate::test_complete!("context_is_installed_while_polling");
    }

    #[test]
    fn masked_defers_cancellation() {
        crate::test_utils::init_test_logging();
        crate::test_phase!("masked_defers_cancellation");
        let runtime = RuntimeBuilder::current_thread().build().unwrap();
        let result = runtime.run_scope(|scope| async move {
            let cx = Cx::current().ok_or_else(|| crate::error::Error::internal("no cx"))?;
            scope.cancel();
            let inside = cx.masked(|| cx.checkpoint());
            crate::assert_with_log!(inside.is_ok(), "masked checkpoint", true, inside.is_ok());
            assert_eq!(cx.core().mask_depth(), 0);
            cx.checkpoint()?;
            Ok(())
        });
        assert!(result.unwrap_err().is_cancelled());
        crate::test_complete!("masked_defers_cancellation");
    }
}
