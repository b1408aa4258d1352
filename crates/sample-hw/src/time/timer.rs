use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use log::warn;

use super::clock::VirtualClock;
use crate::lock;

/// Identifier of a timer within its clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

impl TimerId {
    pub(super) const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw identifier value.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

type TimerCallback = Box<dyn Fn() + Send + Sync>;

/// State shared between a [`Timer`] handle and the clock's queue.
///
/// `gate` serializes a running callback against freeing; `freed` is only set
/// while holding `gate`.
pub(super) struct TimerCore {
    id: TimerId,
    gate: Mutex<()>,
    freed: AtomicBool,
    callback: TimerCallback,
}

impl TimerCore {
    pub(super) const fn id(&self) -> TimerId {
        self.id
    }

    /// Runs the callback unless the timer was freed. Returns whether it ran.
    pub(super) fn fire(&self) -> bool {
        let _gate = lock(&self.gate);
        if self.freed.load(Ordering::Acquire) {
            return false;
        }
        (self.callback)();
        true
    }
}

/// One-shot timer on a [`VirtualClock`].
///
/// Arming replaces any previous deadline. Dropping the handle (or calling
/// [`Timer::free`]) cancels it: the drop blocks while the callback is
/// running and the callback never runs afterwards.
pub struct Timer {
    core: Arc<TimerCore>,
    clock: VirtualClock,
}

impl Timer {
    pub(super) fn new(id: TimerId, clock: VirtualClock, callback: TimerCallback) -> Self {
        Self {
            core: Arc::new(TimerCore {
                id,
                gate: Mutex::new(()),
                freed: AtomicBool::new(false),
                callback,
            }),
            clock,
        }
    }

    /// Returns this timer's identifier.
    #[must_use]
    pub fn id(&self) -> TimerId {
        self.core.id()
    }

    /// Arms the timer to fire at absolute virtual time `expire_ns`.
    pub fn modify(&self, expire_ns: u64) {
        self.clock.scheduler().arm(&self.core, expire_ns);
    }

    /// Arms the timer to fire `delta_ns` after the current virtual time.
    ///
    /// A deadline past the end of virtual time can never be reached; the
    /// timer is left disarmed and `false` is returned.
    pub fn modify_in(&self, delta_ns: u64) -> bool {
        let mut scheduler = self.clock.scheduler();
        let now = scheduler.now_ns();
        let Some(deadline) = now.checked_add(delta_ns) else {
            scheduler.disarm(self.core.id());
            warn!(
                "timer {}: {delta_ns} ns from {now} ns overflows, left disarmed",
                self.core.id().get()
            );
            return false;
        };
        scheduler.arm(&self.core, deadline);
        true
    }

    /// Disarms the timer without waiting for a running callback.
    ///
    /// Returns `true` if the timer was armed.
    pub fn delete(&self) -> bool {
        self.clock.scheduler().disarm(self.core.id())
    }

    /// Returns `true` while the timer is armed.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.expire_time().is_some()
    }

    /// Returns the armed deadline, if any.
    #[must_use]
    pub fn expire_time(&self) -> Option<u64> {
        self.clock.scheduler().expire_time(self.core.id())
    }

    /// Cancels and releases the timer. Equivalent to dropping it.
    pub fn free(self) {
        drop(self);
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        let _gate = lock(&self.core.gate);
        self.core.freed.store(true, Ordering::Release);
        self.clock.scheduler().disarm(self.core.id());
    }
}

impl fmt::Debug for Timer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Timer")
            .field("id", &self.core.id())
            .field("expire_time", &self.expire_time())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    use crate::time::VirtualClock;

    fn counting_timer(clock: &VirtualClock) -> (super::Timer, Arc<AtomicUsize>) {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let timer = clock.new_timer(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        (timer, hits)
    }

    #[test]
    fn modify_replaces_previous_deadline() {
        let clock = VirtualClock::new();
        let (timer, hits) = counting_timer(&clock);
        timer.modify(100);
        timer.modify(300);
        assert_eq!(timer.expire_time(), Some(300));
        clock.advance(200);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        clock.advance(100);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn deadline_past_end_of_time_leaves_timer_disarmed() {
        let clock = VirtualClock::new();
        let (timer, hits) = counting_timer(&clock);
        clock.advance_to(u64::MAX - 5);
        timer.modify_in(2);
        assert!(!timer.modify_in(10));
        assert!(!timer.is_pending());
        assert_eq!(clock.advance_to(u64::MAX), 0);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn delete_disarms_and_reports_prior_state() {
        let clock = VirtualClock::new();
        let (timer, hits) = counting_timer(&clock);
        timer.modify_in(10);
        assert!(timer.delete());
        assert!(!timer.delete());
        clock.advance(100);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn freed_timer_never_fires() {
        let clock = VirtualClock::new();
        let (timer, hits) = counting_timer(&clock);
        timer.modify_in(10);
        timer.free();
        assert_eq!(clock.pending_timers(), 0);
        assert_eq!(clock.advance(100), 0);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn free_waits_for_in_flight_callback() {
        let clock = VirtualClock::new();
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let release_rx = std::sync::Mutex::new(release_rx);
        let finished = Arc::new(AtomicUsize::new(0));
        let done = Arc::clone(&finished);

        let timer = clock.new_timer(move || {
            entered_tx.send(()).unwrap();
            release_rx.lock().unwrap().recv().unwrap();
            done.fetch_add(1, Ordering::SeqCst);
        });
        timer.modify(5);

        let stepper = {
            let clock = clock.clone();
            thread::spawn(move || clock.advance(10))
        };
        entered_rx.recv().unwrap();

        let freer = thread::spawn(move || timer.free());
        thread::sleep(Duration::from_millis(20));
        assert_eq!(finished.load(Ordering::SeqCst), 0);
        assert!(!freer.is_finished());

        release_tx.send(()).unwrap();
        freer.join().unwrap();
        assert_eq!(finished.load(Ordering::SeqCst), 1);
        assert_eq!(stepper.join().unwrap(), 1);
    }

    #[test]
    fn callback_may_rearm_its_own_timer() {
        let clock = VirtualClock::new();
        let slot: Arc<std::sync::Mutex<Option<super::Timer>>> = Arc::default();
        let hits = Arc::new(AtomicUsize::new(0));
        let timer = {
            let slot = Arc::clone(&slot);
            let hits = Arc::clone(&hits);
            clock.new_timer(move || {
                if hits.fetch_add(1, Ordering::SeqCst) < 2 {
                    if let Some(timer) = slot.lock().unwrap().as_ref() {
                        timer.modify_in(10);
                    }
                }
            })
        };
        timer.modify(10);
        *slot.lock().unwrap() = Some(timer);

        assert_eq!(clock.advance(100), 3);
        assert_eq!(hits.load(Ordering::SeqCst), 3);
        slot.lock().unwrap().take();
    }
}
