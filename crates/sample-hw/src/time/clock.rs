use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use super::timer::{Timer, TimerCore, TimerId};
use crate::lock;

/// Nanoseconds in one virtual second.
pub const NANOSECONDS_PER_SECOND: u64 = 1_000_000_000;

/// Shared handle to a monotonic virtual clock and its timer queue.
///
/// Clones refer to the same timeline. Stepping is serialized, so at most one
/// thread fires timers at a time.
#[derive(Clone, Default)]
pub struct VirtualClock {
    shared: Arc<ClockShared>,
}

#[derive(Default)]
struct ClockShared {
    scheduler: Mutex<Scheduler>,
    stepping: Mutex<()>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct QueueKey {
    deadline_ns: u64,
    seq: u64,
}

#[derive(Default)]
pub(super) struct Scheduler {
    now_ns: u64,
    next_timer_id: u64,
    next_seq: u64,
    queue: BTreeMap<QueueKey, Arc<TimerCore>>,
    armed: HashMap<TimerId, QueueKey>,
}

impl Scheduler {
    pub(super) const fn now_ns(&self) -> u64 {
        self.now_ns
    }

    pub(super) fn arm(&mut self, core: &Arc<TimerCore>, deadline_ns: u64) {
        self.disarm(core.id());
        let key = QueueKey {
            deadline_ns,
            seq: self.next_seq,
        };
        self.next_seq = self.next_seq.wrapping_add(1);
        self.queue.insert(key, Arc::clone(core));
        self.armed.insert(core.id(), key);
    }

    pub(super) fn disarm(&mut self, id: TimerId) -> bool {
        self.armed.remove(&id).is_some_and(|key| self.queue.remove(&key).is_some())
    }

    pub(super) fn expire_time(&self, id: TimerId) -> Option<u64> {
        self.armed.get(&id).map(|key| key.deadline_ns)
    }

    fn pop_due(&mut self, limit_ns: u64) -> Option<Arc<TimerCore>> {
        let (key, _) = self.queue.first_key_value()?;
        if key.deadline_ns > limit_ns {
            return None;
        }
        let (key, core) = self.queue.pop_first()?;
        self.armed.remove(&core.id());
        self.now_ns = self.now_ns.max(key.deadline_ns);
        Some(core)
    }
}

impl VirtualClock {
    /// Creates a clock at virtual time zero with no timers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the current virtual time in nanoseconds.
    #[must_use]
    pub fn now_ns(&self) -> u64 {
        self.scheduler().now_ns
    }

    /// Creates a disarmed timer that runs `callback` each time it fires.
    ///
    /// The callback runs on the thread stepping the clock. It must not step
    /// the clock itself or free its own timer.
    pub fn new_timer<F>(&self, callback: F) -> Timer
    where
        F: Fn() + Send + Sync + 'static,
    {
        let id = {
            let mut scheduler = self.scheduler();
            let id = TimerId::new(scheduler.next_timer_id);
            scheduler.next_timer_id = scheduler.next_timer_id.wrapping_add(1);
            id
        };
        Timer::new(id, self.clone(), Box::new(callback))
    }

    /// Returns the earliest armed deadline, if any timer is armed.
    #[must_use]
    pub fn next_deadline(&self) -> Option<u64> {
        self.scheduler()
            .queue
            .first_key_value()
            .map(|(key, _)| key.deadline_ns)
    }

    /// Returns the number of armed timers.
    #[must_use]
    pub fn pending_timers(&self) -> usize {
        self.scheduler().armed.len()
    }

    /// Fires at most one timer whose deadline is at or before `limit_ns`.
    ///
    /// Virtual time moves to the fired timer's deadline; it does not move to
    /// `limit_ns` when nothing is due. Returns `true` when a callback ran.
    pub fn fire_next(&self, limit_ns: u64) -> bool {
        let _stepping = lock(&self.shared.stepping);
        while let Some(ran) = self.fire_one(limit_ns) {
            if ran {
                return true;
            }
        }
        false
    }

    /// Advances virtual time by `delta_ns`, firing every timer that comes due.
    ///
    /// Returns the number of callbacks that ran.
    pub fn advance(&self, delta_ns: u64) -> usize {
        let _stepping = lock(&self.shared.stepping);
        let target = self.now_ns().saturating_add(delta_ns);
        self.run_until(target)
    }

    /// Advances virtual time to `target_ns`, firing every timer that comes due.
    ///
    /// A target in the past fires nothing and leaves time unchanged.
    pub fn advance_to(&self, target_ns: u64) -> usize {
        let _stepping = lock(&self.shared.stepping);
        self.run_until(target_ns)
    }

    fn run_until(&self, target_ns: u64) -> usize {
        let mut fired = 0;
        while let Some(ran) = self.fire_one(target_ns) {
            if ran {
                fired += 1;
            }
        }
        let mut scheduler = self.scheduler();
        scheduler.now_ns = scheduler.now_ns.max(target_ns);
        fired
    }

    fn fire_one(&self, limit_ns: u64) -> Option<bool> {
        let core = self.scheduler().pop_due(limit_ns)?;
        Some(core.fire())
    }

    pub(super) fn scheduler(&self) -> MutexGuard<'_, Scheduler> {
        lock(&self.shared.scheduler)
    }
}

impl fmt::Debug for VirtualClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scheduler = self.scheduler();
        f.debug_struct("VirtualClock")
            .field("now_ns", &scheduler.now_ns)
            .field("pending_timers", &scheduler.armed.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use super::VirtualClock;

    #[test]
    fn advance_moves_time_without_timers() {
        let clock = VirtualClock::new();
        assert_eq!(clock.advance(250), 0);
        assert_eq!(clock.now_ns(), 250);
        assert_eq!(clock.advance_to(100), 0);
        assert_eq!(clock.now_ns(), 250);
    }

    #[test]
    fn timers_fire_in_deadline_order_at_their_deadline() {
        let clock = VirtualClock::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        let late = {
            let log = Arc::clone(&log);
            let inner = clock.clone();
            clock.new_timer(move || log.lock().unwrap().push(("late", inner.now_ns())))
        };
        let early = {
            let log = Arc::clone(&log);
            let inner = clock.clone();
            clock.new_timer(move || log.lock().unwrap().push(("early", inner.now_ns())))
        };
        late.modify(300);
        early.modify(100);

        assert_eq!(clock.next_deadline(), Some(100));
        assert_eq!(clock.advance(1_000), 2);
        assert_eq!(*log.lock().unwrap(), vec![("early", 100), ("late", 300)]);
        assert_eq!(clock.now_ns(), 1_000);
        assert_eq!(clock.pending_timers(), 0);
    }

    #[test]
    fn fire_next_stops_after_one_callback() {
        let clock = VirtualClock::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let timers = (0..2)
            .map(|_| {
                let hits = Arc::clone(&hits);
                clock.new_timer(move || {
                    hits.fetch_add(1, Ordering::SeqCst);
                })
            })
            .collect::<Vec<_>>();
        timers[0].modify(10);
        timers[1].modify(20);

        assert!(clock.fire_next(50));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(clock.now_ns(), 10);
        assert!(clock.fire_next(50));
        assert!(!clock.fire_next(50));
        assert_eq!(clock.now_ns(), 20);
    }

    #[test]
    fn timers_beyond_the_limit_stay_armed() {
        let clock = VirtualClock::new();
        let timer = clock.new_timer(|| {});
        timer.modify(500);
        assert_eq!(clock.advance(499), 0);
        assert!(timer.is_pending());
        assert_eq!(clock.advance(1), 1);
        assert!(!timer.is_pending());
    }

    #[test]
    fn debug_output_reports_time_and_pending_count() {
        let clock = VirtualClock::new();
        let timer = clock.new_timer(|| {});
        timer.modify_in(5);
        let rendered = format!("{clock:?}");
        assert!(rendered.contains("now_ns: 0"));
        assert!(rendered.contains("pending_timers: 1"));
    }
}
