//! End-to-end tests for cold flows running inside the runtime.

#[macro_use]
mod common;

use common::*;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use taskweave::stream::{flow, flow_of, iter, Emitter, Flow};
use taskweave::time::delay;
use taskweave::Error;

/// A finite flow of `len` values that counts every production step.
fn counted(len: usize, produced: Arc<AtomicUsize>) -> Flow<usize> {
    flow(move |out: Emitter<usize>| {
        let produced = Arc::clone(&produced);
        async move {
            for i in 0..len {
                produced.fetch_add(1, Ordering::SeqCst);
                out.emit(i).await?;
            }
            Ok(())
        }
    })
}

#[test]
fn collecting_twice_reruns_the_producer() {
    init_test_logging();
    test_phase!("collecting_twice_reruns_the_producer");
    let runtime = virtual_runtime();
    let produced = Arc::new(AtomicUsize::new(0));
    let numbers = counted(5, Arc::clone(&produced));

    test_section!("nothing runs before collection");
    let doubled = numbers.map(|n| n * 2);
    assert_eq!(produced.load(Ordering::SeqCst), 0);

    let (first, second) = runtime
        .run_scope(move |_| async move {
            let first = doubled.to_vec().await?;
            let second = doubled.to_vec().await?;
            Ok((first, second))
        })
        .unwrap();

    assert_eq!(first, vec![0, 2, 4, 6, 8]);
    assert_eq!(first, second);
    assert_eq!(produced.load(Ordering::SeqCst), 10);
    test_complete!("collecting_twice_reruns_the_producer");
}

#[test]
fn concurrent_collections_share_no_state() {
    init_test_logging();
    test_phase!("concurrent_collections_share_no_state");
    let runtime = virtual_runtime();
    let ticks = iter(0..4_u32).then(|i| async move {
        delay(ms(10)).await?;
        Ok(i)
    });

    let (a, b) = runtime
        .run_scope(move |scope| async move {
            let left = ticks.clone();
            let a = scope.deferred(move |_| async move { left.to_vec().await });
            let b = scope.deferred(move |_| async move { ticks.fold(0, |acc, i| acc + i).await });
            Ok((a.await_value().await?, b.await_value().await?))
        })
        .unwrap();

    assert_eq!(a, vec![0, 1, 2, 3]);
    assert_eq!(b, 6);
    // both ran side by side
    assert_eq!(runtime.now().as_millis(), 40);
    test_complete!("concurrent_collections_share_no_state");
}

#[test]
fn producer_waits_for_slow_consumer() {
    init_test_logging();
    test_phase!("producer_waits_for_slow_consumer");
    let runtime = virtual_runtime();
    let log = EventLog::new();
    let producer_log = log.clone();
    let consumer_log = log.clone();

    let numbers = flow(move |out: Emitter<u32>| {
        let log = producer_log.clone();
        async move {
            for i in 0..3 {
                log.push(format!("emit:{i}"));
                out.emit(i).await?;
            }
            Ok(())
        }
    });

    runtime
        .run_scope(move |_| async move {
            numbers
                .collect_async(move |i| {
                    let log = consumer_log.clone();
                    async move {
                        delay(ms(100)).await?;
                        log.push(format!("consumed:{i}"));
                        Ok(())
                    }
                })
                .await
        })
        .unwrap();

    assert_eq!(
        log.events(),
        vec!["emit:0", "consumed:0", "emit:1", "consumed:1", "emit:2", "consumed:2"]
    );
    assert_eq!(runtime.now().as_millis(), 300);
    test_complete!("producer_waits_for_slow_consumer");
}

#[test]
fn take_bounds_an_infinite_flow() {
    init_test_logging();
    test_phase!("take_bounds_an_infinite_flow");
    let runtime = virtual_runtime();
    let produced = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&produced);

    let naturals = flow(move |out: Emitter<u64>| {
        let counter = Arc::clone(&counter);
        async move {
            let mut n = 0;
            loop {
                counter.fetch_add(1, Ordering::SeqCst);
                out.emit(n).await?;
                n += 1;
            }
        }
    });

    let (evens, first) = runtime
        .run_scope(move |_| async move {
            let evens = naturals
                .filter(|n| n % 2 == 0)
                .map(|n| n * 10)
                .take(3)
                .to_vec()
                .await?;
            let first = naturals.first().await?;
            Ok((evens, first))
        })
        .unwrap();

    assert_eq!(evens, vec![0, 20, 40]);
    assert_eq!(first, Some(0));
    // 5 values for the three evens, then one for `first`
    assert_eq!(produced.load(Ordering::SeqCst), 6);
    test_complete!("take_bounds_an_infinite_flow");
}

#[test]
fn cancelling_the_collector_stops_the_producer() {
    init_test_logging();
    test_phase!("cancelling_the_collector_stops_the_producer");
    let runtime = virtual_runtime();
    let produced = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&produced);

    runtime
        .run_scope(move |scope| async move {
            let collector = scope.launch(move |_| async move {
                let ticks = flow(move |out: Emitter<usize>| {
                    let counter = Arc::clone(&counter);
                    async move {
                        loop {
                            let n = counter.fetch_add(1, Ordering::SeqCst);
                            out.emit(n).await?;
                            delay(ms(10)).await?;
                        }
                    }
                });
                ticks.collect(|_| {}).await
            });
            delay(ms(35)).await?;
            collector.cancel_and_join().await?;
            assert!(collector.is_cancelled());
            Ok(())
        })
        .unwrap();

    // emitted at 0, 10, 20 and 30 ms, nothing after the cancel at 35
    assert_eq!(produced.load(Ordering::SeqCst), 4);
    test_complete!("cancelling_the_collector_stops_the_producer");
}

#[test]
fn producer_error_reaches_the_collector() {
    init_test_logging();
    test_phase!("producer_error_reaches_the_collector");
    let runtime = virtual_runtime();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);

    let failing = flow(|out: Emitter<&'static str>| async move {
        out.emit("ok").await?;
        Err(Error::user("source dried up"))
    });

    let err = runtime
        .run_scope(move |_| async move {
            failing
                .transform(|s, out| async move {
                    out.emit(s).await?;
                    out.emit(s).await
                })
                .collect(move |s| sink.lock().push(s))
                .await
        })
        .unwrap_err();

    assert_eq!(err.message(), Some("source dried up"));
    assert_eq!(*seen.lock(), vec!["ok", "ok"]);
    test_complete!("producer_error_reaches_the_collector");
}

#[test]
fn on_each_and_count() {
    init_test_logging();
    test_phase!("on_each_and_count");
    let runtime = virtual_runtime();
    let log = EventLog::new();
    let peek = log.clone();

    let count = runtime
        .run_scope(move |_| async move {
            flow_of(vec!["a", "b", "c"])
                .on_each(move |s| peek.push(*s))
                .count()
                .await
        })
        .unwrap();

    assert_eq!(count, 3);
    assert_eq!(log.events(), vec!["a", "b", "c"]);
    test_complete!("on_each_and_count");
}
