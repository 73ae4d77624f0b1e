//! Intermediate flow operators.
//!
//! Each operator returns a new cold [`Flow`] whose production procedure
//! collects the upstream flow. Nothing runs until a terminal operation is
//! called on the result.

use super::flow::{flow, Emitter, Flow, FlowAbort};
use crate::error::Result;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

impl<T: Send + 'static> Flow<T> {
    /// Transforms each value with `f`.
    #[must_use]
    pub fn map<U, F>(&self, f: F) -> Flow<U>
    where
        U: Send + 'static,
        F: Fn(T) -> U + Send + Sync + 'static,
    {
        self.pipe(move |value, emitter| {
            let out = f(value);
            async move { emitter.emit(out).await }
        })
    }

    /// Transforms each value with a suspending `f`.
    #[must_use]
    pub fn then<U, F, Fut>(&self, f: F) -> Flow<U>
    where
        U: Send + 'static,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<U>> + Send + 'static,
    {
        self.pipe(move |value, emitter| {
            let pending = f(value);
            async move { emitter.emit(pending.await?).await }
        })
    }

    /// Keeps the values matching `predicate`.
    #[must_use]
    pub fn filter<F>(&self, predicate: F) -> Self
    where
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        self.pipe(move |value, emitter| {
            let keep = predicate(&value);
            async move {
                if keep {
                    emitter.emit(value).await
                } else {
                    Ok(())
                }
            }
        })
    }

    /// Calls `f` for every value, which may emit any number of values
    /// downstream.
    ///
    /// ```ignore
    /// let doubled = numbers.transform(|n, out| async move {
    ///     out.emit(n).await?;
    ///     out.emit(n).await
    /// });
    /// ```
    #[must_use]
    pub fn transform<U, F, Fut>(&self, f: F) -> Flow<U>
    where
        U: Send + 'static,
        F: Fn(T, Emitter<U>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.pipe(f)
    }

    /// Runs `f` on every value before passing it on.
    #[must_use]
    pub fn on_each<F>(&self, f: F) -> Self
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.pipe(move |value, emitter| {
            f(&value);
            async move { emitter.emit(value).await }
        })
    }

    /// Passes on the first `n` values, then stops the upstream producer.
    #[must_use]
    pub fn take(&self, n: usize) -> Self {
        let upstream = self.clone();
        flow(move |emitter: Emitter<T>| {
            let upstream = upstream.clone();
            async move {
                if n == 0 {
                    return Ok(());
                }
                let abort = FlowAbort::new();
                let remaining = Arc::new(AtomicUsize::new(n));
                let result = upstream
                    .collect_async(move |value| {
                        let emitter = emitter.clone();
                        let remaining = Arc::clone(&remaining);
                        async move {
                            emitter.emit(value).await?;
                            if remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
                                return Err(abort.to_error());
                            }
                            Ok(())
                        }
                    })
                    .await;
                match result {
                    Err(err) if abort.raised(&err) => Ok(()),
                    other => other,
                }
            }
        })
    }

    /// Builds a flow that collects `self` and feeds every value through `step`.
    fn pipe<U, S, Fut>(&self, step: S) -> Flow<U>
    where
        U: Send + 'static,
        S: Fn(T, Emitter<U>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let upstream = self.clone();
        let step = Arc::new(step);
        flow(move |emitter: Emitter<U>| {
            let upstream = upstream.clone();
            let step = Arc::clone(&step);
            async move {
                upstream
                    .collect_async(move |value| step(value, emitter.clone()))
                    .await
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::error::Error;
    use crate::stream::{flow, flow_of, iter};
    use futures_lite::future::block_on;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn chained_operators() {
        crate::test_utils::init_test_logging();
        let out = block_on(
            iter(1..=10)
                .filter(|n| n % 2 == 0)
                .map(|n| n * 10)
                .then(|n| async move { Ok(n + 1) })
                .to_vec(),
        )
        .unwrap();
        assert_eq!(out, vec![21, 41, 61, 81, 101]);
    }

    #[test]
    fn transform_emits_many() {
        crate::test_utils::init_test_logging();
        let out = block_on(
            flow_of(vec![1, 2])
                .transform(|n, emitter| async move {
                    emitter.emit(n).await?;
                    emitter.emit(-n).await
                })
                .to_vec(),
        )
        .unwrap();
        assert_eq!(out, vec![1, -1, 2, -2]);
    }

    #[test]
    fn take_bounds_an_infinite_flow() {
        crate::test_utils::init_test_logging();
        let produced = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&produced);
        let naturals = flow(move |emitter| {
            let counter = Arc::clone(&counter);
            async move {
                let mut n = 0_u64;
                loop {
                    counter.fetch_add(1, Ordering::SeqCst);
                    emitter.emit(n).await?;
                    n += 1;
                }
            }
        });
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        block_on(
            naturals
                .on_each(move |n| sink.lock().push(*n))
                .take(3)
                .collect(|_| {}),
        )
        .unwrap();
        assert_eq!(*seen.lock(), vec![0, 1, 2]);
        assert_eq!(produced.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn nested_take_keeps_outer_running() {
        crate::test_utils::init_test_logging();
        let out = block_on(iter(0..100).take(5).take(2).to_vec()).unwrap();
        assert_eq!(out, vec![0, 1]);
        assert!(block_on(iter(0..3).take(0).to_vec()).unwrap().is_empty());
    }

    #[test]
    fn errors_pass_through_operators() {
        crate::test_utils::init_test_logging();
        let err = block_on(
            flow(|emitter| async move {
                emitter.emit(1).await?;
                Err(Error::user("producer broke"))
            })
            .map(|n: i32| n + 1)
            .take(5)
            .to_vec(),
        )
        .unwrap_err();
        assert_eq!(err.message(), Some("producer broke"));
    }
}
