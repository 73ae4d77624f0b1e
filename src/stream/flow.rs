//! Cold flows.
//!
//! A [`Flow`] stores a production procedure and nothing else. Every terminal
//! operation runs the procedure again from the start, in the collecting task,
//! and hands each emitted value to the collector before production resumes.

use crate::cx::Cx;
use crate::error::{Error, ErrorKind, Result};
use parking_lot::Mutex;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

pub(crate) type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

type Producer<T> = dyn Fn(Emitter<T>) -> BoxFuture<Result<()>> + Send + Sync;
type Sink<T> = dyn FnMut(T) -> BoxFuture<Result<()>> + Send;

/// A cold asynchronous sequence of `T`.
///
/// Cloning a flow clones the recipe, not any produced values.
pub struct Flow<T> {
    producer: Arc<Producer<T>>,
}

impl<T> Clone for Flow<T> {
    fn clone(&self) -> Self {
        Self {
            producer: Arc::clone(&self.producer),
        }
    }
}

impl<T> fmt::Debug for Flow<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Flow").finish_non_exhaustive()
    }
}

/// The producer's side of one collection.
pub struct Emitter<T> {
    sink: Arc<Mutex<Box<Sink<T>>>>,
}

impl<T> Clone for Emitter<T> {
    fn clone(&self) -> Self {
        Self {
            sink: Arc::clone(&self.sink),
        }
    }
}

impl<T> fmt::Debug for Emitter<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Emitter").finish_non_exhaustive()
    }
}

impl<T: Send + 'static> Emitter<T> {
    /// Hands `value` to the collector and waits until it has been processed.
    ///
    /// This is a cancellation checkpoint: once the collecting task is
    /// cancelled, no further value is emitted.
    ///
    /// # Errors
    ///
    /// `Cancelled`, or whatever the collector returned for this value.
    /// Producers should propagate it with `?`.
    pub async fn emit(&self, value: T) -> Result<()> {
        if let Some(cx) = Cx::current() {
            cx.checkpoint()?;
        }
        let pending = {
            let mut sink = self.sink.lock();
            (*sink)(value)
        };
        pending.await
    }
}

/// Builds a flow from a production procedure.
///
/// The procedure runs once per collection.
///
/// ```ignore
/// let ticks = flow(|emitter| async move {
///     for i in 0..3 {
///         delay(Duration::from_millis(100)).await?;
///         emitter.emit(i).await?;
///     }
///     Ok(())
/// });
/// ```
pub fn flow<T, F, Fut>(producer: F) -> Flow<T>
where
    T: Send + 'static,
    F: Fn(Emitter<T>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    Flow {
        producer: Arc::new(move |emitter| Box::pin(producer(emitter)) as BoxFuture<Result<()>>),
    }
}

/// A flow emitting `values` in order.
pub fn flow_of<T>(values: impl Into<Vec<T>>) -> Flow<T>
where
    T: Clone + Send + Sync + 'static,
{
    let values: Vec<T> = values.into();
    let values: Arc<[T]> = values.into();
    flow(move |emitter| {
        let values = Arc::clone(&values);
        async move {
            for value in values.iter() {
                emitter.emit(value.clone()).await?;
            }
            Ok(())
        }
    })
}

/// A flow emitting the items of a re-iterable collection.
pub fn iter<I>(items: I) -> Flow<I::Item>
where
    I: IntoIterator + Clone + Send + Sync + 'static,
    I::Item: Send + 'static,
    I::IntoIter: Send,
{
    flow(move |emitter| {
        let items = items.clone();
        async move {
            for item in items {
                emitter.emit(item).await?;
            }
            Ok(())
        }
    })
}

/// A flow that completes without emitting.
pub fn empty<T: Send + 'static>() -> Flow<T> {
    flow(|_| async { Ok(()) })
}

/// Marks a collection that an operator stopped on purpose.
///
/// Each early-stopping operator run gets its own id so that an abort raised
/// downstream is never mistaken for one raised by a nested operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FlowAbort {
    id: u64,
}

impl FlowAbort {
    pub(crate) fn new() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self {
            id: NEXT.fetch_add(1, Ordering::Relaxed),
        }
    }

    pub(crate) fn to_error(self) -> Error {
        Error::new(ErrorKind::FlowAborted)
            .with_message("flow collection stopped early")
            .with_source(self)
    }

    pub(crate) fn raised(self, err: &Error) -> bool {
        err.kind() == ErrorKind::FlowAborted
            && std::error::Error::source(err)
                .and_then(|source| source.downcast_ref::<Self>())
                .is_some_and(|abort| *abort == self)
    }
}

impl fmt::Display for FlowAbort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "flow abort #{}", self.id)
    }
}

impl std::error::Error for FlowAbort {}

impl<T: Send + 'static> Flow<T> {
    /// Runs the production procedure, calling `on_each` for every value.
    ///
    /// # Errors
    ///
    /// The producer's error, or `Cancelled` if the collecting task is
    /// cancelled.
    pub async fn collect<F>(&self, mut on_each: F) -> Result<()>
    where
        F: FnMut(T) + Send + 'static,
    {
        self.collect_async(move |value| {
            on_each(value);
            std::future::ready(Ok(()))
        })
        .await
    }

    /// Like [`collect`](Self::collect), with a suspending collector.
    ///
    /// Production does not continue past an emission until the future
    /// returned by `on_each` has completed. An error from `on_each` stops
    /// the collection and is returned.
    ///
    /// # Errors
    ///
    /// As for [`collect`](Self::collect), plus the collector's own errors.
    pub async fn collect_async<F, Fut>(&self, mut on_each: F) -> Result<()>
    where
        F: FnMut(T) -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        if let Some(cx) = Cx::current() {
            cx.checkpoint()?;
        }
        let sink: Box<Sink<T>> =
            Box::new(move |value| Box::pin(on_each(value)) as BoxFuture<Result<()>>);
        let emitter = Emitter {
            sink: Arc::new(Mutex::new(sink)),
        };
        (self.producer)(emitter).await
    }

    /// Collects every value into a vector.
    ///
    /// # Errors
    ///
    /// As for [`collect`](Self::collect).
    pub async fn to_vec(&self) -> Result<Vec<T>> {
        let items = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&items);
        self.collect(move |value| sink.lock().push(value)).await?;
        let mut items = items.lock();
        Ok(std::mem::take(&mut *items))
    }

    /// Folds every value into an accumulator.
    ///
    /// # Errors
    ///
    /// As for [`collect`](Self::collect).
    pub async fn fold<A, F>(&self, init: A, mut f: F) -> Result<A>
    where
        A: Send + 'static,
        F: FnMut(A, T) -> A + Send + 'static,
    {
        let acc = Arc::new(Mutex::new(Some(init)));
        let sink = Arc::clone(&acc);
        self.collect(move |value| {
            let mut slot = sink.lock();
            if let Some(current) = slot.take() {
                *slot = Some(f(current, value));
            }
        })
        .await?;
        let result = acc.lock().take();
        result.ok_or_else(|| Error::internal("fold accumulator lost"))
    }

    /// Counts the values.
    ///
    /// # Errors
    ///
    /// As for [`collect`](Self::collect).
    pub async fn count(&self) -> Result<usize> {
        self.fold(0_usize, |n, _| n + 1).await
    }

    /// The first value, stopping production right after it.
    ///
    /// # Errors
    ///
    /// As for [`collect`](Self::collect).
    pub async fn first(&self) -> Result<Option<T>> {
        let abort = FlowAbort::new();
        let found = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&found);
        let result = self
            .collect_async(move |value| {
                *sink.lock() = Some(value);
                std::future::ready(Err(abort.to_error()))
            })
            .await;
        match result {
            Err(err) if !abort.raised(&err) => Err(err),
            _ => Ok(found.lock().take()),
        }
    }
}
