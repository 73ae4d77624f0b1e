//! Clock sources and the timer driver.
//!
//! The driver keeps pending timers in a min-heap ordered by `(deadline,
//! registration order)`, so timers sharing a deadline fire in the order they
//! were registered. A dedicated runtime thread runs [`TimerDriver::drive`]:
//!
//! - With a [`WallClock`] it sleeps until the earliest deadline.
//! - With a [`VirtualClock`] time never passes on its own. The driver jumps
//!   the clock straight to the earliest deadline, but only once the runtime is
//!   quiescent (no task scheduled or running). A delay of an hour then costs
//!   nothing, and everything runnable at the current instant happens before
//!   time moves.

use crate::tracing_compat::trace;
use crate::types::Time;
use parking_lot::{Condvar, Mutex};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::Waker;

/// Source of the current time.
pub trait TimeSource: Send + Sync + fmt::Debug {
    /// Returns the current time.
    fn now(&self) -> Time;
}

/// Monotonic wall-clock time, measured from the clock's creation.
#[derive(Debug)]
pub struct WallClock {
    epoch: std::time::Instant,
}

impl WallClock {
    /// Creates a clock whose epoch is now.
    #[must_use]
    pub fn new() -> Self {
        Self {
            epoch: std::time::Instant::now(),
        }
    }
}

impl Default for WallClock {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for WallClock {
    fn now(&self) -> Time {
        let nanos = u64::try_from(self.epoch.elapsed().as_nanos()).unwrap_or(u64::MAX);
        Time::from_nanos(nanos)
    }
}

/// Manually driven time for deterministic tests.
///
/// ```
/// use taskweave::time::{TimeSource, VirtualClock};
/// use taskweave::types::Time;
///
/// let clock = VirtualClock::new();
/// clock.advance(std::time::Duration::from_millis(5));
/// assert_eq!(clock.now(), Time::from_millis(5));
/// ```
#[derive(Debug, Default)]
pub struct VirtualClock {
    now: AtomicU64,
}

impl VirtualClock {
    /// A clock starting at [`Time::ZERO`].
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A clock starting at `time`.
    #[must_use]
    pub fn starting_at(time: Time) -> Self {
        Self {
            now: AtomicU64::new(time.as_nanos()),
        }
    }

    /// Moves time forward by `by`.
    pub fn advance(&self, by: std::time::Duration) {
        let nanos = u64::try_from(by.as_nanos()).unwrap_or(u64::MAX);
        let _ = self
            .now
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                Some(n.saturating_add(nanos))
            });
    }

    /// Moves time forward to `time`; never moves it backwards.
    pub fn advance_to(&self, time: Time) {
        self.now.fetch_max(time.as_nanos(), Ordering::AcqRel);
    }
}

impl TimeSource for VirtualClock {
    fn now(&self) -> Time {
        Time::from_nanos(self.now.load(Ordering::Acquire))
    }
}

/// Handle to a registered timer, used to replace its waker or cancel it.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct TimerHandle {
    id: u64,
    deadline: Time,
}

impl TimerHandle {
    /// The deadline the timer was registered for.
    #[must_use]
    pub const fn deadline(&self) -> Time {
        self.deadline
    }
}

#[derive(Default)]
struct TimerQueue {
    heap: BinaryHeap<Reverse<(Time, u64)>>,
    wakers: HashMap<u64, Waker>,
    next_id: u64,
    stopped: bool,
}

impl TimerQueue {
    fn earliest(&mut self) -> Option<Time> {
        while let Some(Reverse((deadline, id))) = self.heap.peek().copied() {
            if self.wakers.contains_key(&id) {
                return Some(deadline);
            }
            // cancelled entry
            self.heap.pop();
        }
        None
    }

    fn take_expired(&mut self, now: Time) -> Vec<Waker> {
        let mut fired = Vec::new();
        while let Some(Reverse((deadline, id))) = self.heap.peek().copied() {
            if deadline > now {
                break;
            }
            self.heap.pop();
            if let Some(waker) = self.wakers.remove(&id) {
                fired.push(waker);
            }
        }
        fired
    }
}

/// Timer registry shared by every task of a runtime.
pub struct TimerDriver {
    clock: Arc<dyn TimeSource>,
    virtual_clock: Option<Arc<VirtualClock>>,
    queue: Mutex<TimerQueue>,
    changed: Condvar,
    busy: AtomicUsize,
}

impl fmt::Debug for TimerDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerDriver")
            .field("now", &self.now())
            .field("virtual", &self.is_virtual())
            .field("pending", &self.pending_count())
            .finish()
    }
}

impl TimerDriver {
    /// A driver backed by a wall clock.
    #[must_use]
    pub fn wall() -> Self {
        Self::build(Arc::new(WallClock::new()), None)
    }

    /// A driver backed by `clock`, advanced automatically whenever the runtime is idle.
    #[must_use]
    pub fn virtual_time(clock: Arc<VirtualClock>) -> Self {
        let source: Arc<dyn TimeSource> = clock.clone();
        Self::build(source, Some(clock))
    }

    fn build(clock: Arc<dyn TimeSource>, virtual_clock: Option<Arc<VirtualClock>>) -> Self {
        Self {
            clock,
            virtual_clock,
            queue: Mutex::new(TimerQueue::default()),
            changed: Condvar::new(),
            busy: AtomicUsize::new(0),
        }
    }

    /// Current time on the driver's clock.
    #[must_use]
    pub fn now(&self) -> Time {
        self.clock.now()
    }

    /// True when backed by a [`VirtualClock`].
    #[must_use]
    pub fn is_virtual(&self) -> bool {
        self.virtual_clock.is_some()
    }

    /// Registers `waker` to be woken once `deadline` has passed.
    pub fn register(&self, deadline: Time, waker: Waker) -> TimerHandle {
        let mut queue = self.queue.lock();
        let id = queue.next_id;
        queue.next_id += 1;
        queue.heap.push(Reverse((deadline, id)));
        queue.wakers.insert(id, waker);
        drop(queue);
        trace!(timer_id = id, deadline = %deadline, "timer registered");
        self.changed.notify_one();
        TimerHandle { id, deadline }
    }

    /// Replaces the waker of a pending timer. Returns false if it already fired.
    pub fn update_waker(&self, handle: &TimerHandle, waker: &Waker) -> bool {
        let mut queue = self.queue.lock();
        match queue.wakers.get_mut(&handle.id) {
            Some(existing) => {
                if !existing.will_wake(waker) {
                    existing.clone_from(waker);
                }
                true
            }
            None => false,
        }
    }

    /// Cancels a pending timer. Returns false if it already fired.
    pub fn cancel(&self, handle: &TimerHandle) -> bool {
        self.queue.lock().wakers.remove(&handle.id).is_some()
    }

    /// Earliest pending deadline.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Time> {
        self.queue.lock().earliest()
    }

    /// Number of pending timers.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.queue.lock().wakers.len()
    }

    /// Wakes every timer whose deadline has passed. Returns how many fired.
    pub fn process_timers(&self) -> usize {
        let now = self.clock.now();
        let fired = self.queue.lock().take_expired(now);
        let count = fired.len();
        for waker in fired {
            waker.wake();
        }
        count
    }

    /// Marks one unit of runnable work (a scheduled or running task).
    pub(crate) fn work_started(&self) {
        self.busy.fetch_add(1, Ordering::AcqRel);
    }

    /// Ends one unit of runnable work started with [`work_started`](Self::work_started).
    pub(crate) fn work_finished(&self) {
        if self.busy.fetch_sub(1, Ordering::AcqRel) == 1 && self.is_virtual() {
            let _queue = self.queue.lock();
            self.changed.notify_all();
        }
    }

    /// True when no task is scheduled or running.
    #[must_use]
    pub fn is_quiescent(&self) -> bool {
        self.busy.load(Ordering::Acquire) == 0
    }

    /// Timer loop. Returns after [`stop`](Self::stop).
    pub(crate) fn drive(&self) {
        let mut queue = self.queue.lock();
        loop {
            if queue.stopped {
                break;
            }
            let now = self.clock.now();
            let fired = queue.take_expired(now);
            if !fired.is_empty() {
                trace!(count = fired.len(), now = %now, "timers fired");
                parking_lot::MutexGuard::unlocked(&mut queue, || {
                    for waker in fired {
                        waker.wake();
                    }
                });
                continue;
            }
            match (queue.earliest(), &self.virtual_clock) {
                (None, _) => self.changed.wait(&mut queue),
                (Some(deadline), Some(clock)) => {
                    if self.is_quiescent() {
                        trace!(from = %now, to = %deadline, "advancing virtual clock");
                        clock.advance_to(deadline);
                    } else {
                        self.changed.wait(&mut queue);
                    }
                }
                (Some(deadline), None) => {
                    let _ = self
                        .changed
                        .wait_for(&mut queue, deadline.duration_since(now));
                }
            }
        }
    }

    /// Stops [`drive`](Self::drive) and drops every pending timer without waking it.
    pub(crate) fn stop(&self) {
        let mut queue = self.queue.lock();
        queue.stopped = true;
        queue.heap.clear();
        let wakers = std::mem::take(&mut queue.wakers);
        drop(queue);
        self.changed.notify_all();
        drop(wakers);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::task::Wake;
    use std::time::Duration;

    struct FlagWaker(AtomicBool);

    impl Wake for FlagWaker {
        fn wake(self: Arc<Self>) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    fn flag() -> (Arc<FlagWaker>, Waker) {
        let state = Arc::new(FlagWaker(AtomicBool::new(false)));
        let waker = Waker::from(state.clone());
        (state, waker)
    }

    fn init_test(name: &str) {
        crate::test_utils::init_test_logging();
        crate::test_phase!(name);
    }

    #[test]
    fn virtual_clock_never_goes_backwards() {
        init_test("virtual_clock_never_goes_backwards");
        let clock = VirtualClock::starting_at(Time::from_secs(2));
        clock.advance_to(Time::from_secs(1));
        assert_eq!(clock.now(), Time::from_secs(2));
        clock.advance(Duration::from_millis(500));
        assert_eq!(clock.now(), Time::from_millis(2500));
        crate::test_complete!("virtual_clock_never_goes_backwards");
    }

    #[test]
    fn expired_timers_fire_in_deadline_order() {
        init_test("expired_timers_fire_in_deadline_order");
        let clock = Arc::new(VirtualClock::new());
        let driver = TimerDriver::virtual_time(clock.clone());
        let (late, late_waker) = flag();
        let (early, early_waker) = flag();
        driver.register(Time::from_millis(20), late_waker);
        driver.register(Time::from_millis(10), early_waker);
        assert_eq!(driver.next_deadline(), Some(Time::from_millis(10)));

        clock.advance_to(Time::from_millis(10));
        assert_eq!(driver.process_timers(), 1);
        assert!(early.0.load(Ordering::SeqCst));
        assert!(!late.0.load(Ordering::SeqCst));

        clock.advance_to(Time::from_millis(25));
        assert_eq!(driver.process_timers(), 1);
        assert!(late.0.load(Ordering::SeqCst));
        crate::test_complete!("expired_timers_fire_in_deadline_order");
    }

    #[test]
    fn cancelled_timer_never_fires() {
        init_test("cancelled_timer_never_fires");
        let clock = Arc::new(VirtualClock::new());
        let driver = TimerDriver::virtual_time(clock.clone());
        let (state, waker) = flag();
        let handle = driver.register(Time::from_millis(5), waker);
        assert!(driver.cancel(&handle));
        assert!(!driver.cancel(&handle));
        assert_eq!(driver.next_deadline(), None);
        clock.advance_to(Time::from_millis(5));
        assert_eq!(driver.process_timers(), 0);
        assert!(!state.0.load(Ordering::SeqCst));
        crate::test_complete!("cancelled_timer_never_fires");
    }

    #[test]
    fn update_waker_redirects_wakeup() {
        init_test("update_waker_redirects_wakeup");
        let clock = Arc::new(VirtualClock::new());
        let driver = TimerDriver::virtual_time(clock.clone());
        let (first, first_waker) = flag();
        let (second, second_waker) = flag();
        let handle = driver.register(Time::from_millis(1), first_waker);
        assert!(driver.update_waker(&handle, &second_waker));
        clock.advance_to(Time::from_millis(1));
        driver.process_timers();
        assert!(!first.0.load(Ordering::SeqCst));
        assert!(second.0.load(Ordering::SeqCst));
        assert!(!driver.update_waker(&handle, &second_waker));
        crate::test_complete!("update_waker_redirects_wakeup");
    }

    #[test]
    fn drive_advances_virtual_time_only_when_quiescent() {
        init_test("drive_advances_virtual_time_only_when_quiescent");
        let clock = Arc::new(VirtualClock::new());
        let driver = Arc::new(TimerDriver::virtual_time(clock.clone()));
        let (state, waker) = flag();
        driver.work_started();
        driver.register(Time::from_secs(3600), waker);

        let thread = {
            let driver = driver.clone();
            std::thread::spawn(move || driver.drive())
        };
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(clock.now(), Time::ZERO, "clock moved while work was pending");

        driver.work_finished();
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while !state.0.load(Ordering::SeqCst) && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(1));
        }
        crate::assert_with_log!(
            state.0.load(Ordering::SeqCst),
            "timer fired after quiescence",
            true,
            state.0.load(Ordering::SeqCst)
        );
        assert_eq!(clock.now(), Time::from_secs(3600));

        driver.stop();
        thread.join().expect("timer thread panicked");
        crate::test_complete!("drive_advances_virtual_time_only_when_quiescent");
    }
}
