use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use log::{debug, warn};

use super::{IrqHandler, IrqNumber, IrqReturn};
use crate::fault::InterruptBindError;
use crate::lock;

/// Delivery counters for one line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LineStats {
    /// Low-to-high transitions.
    pub raised: u64,
    /// High-to-low transitions.
    pub lowered: u64,
    /// Handler invocations.
    pub delivered: u64,
    /// Invocations whose handler returned [`IrqReturn::None`].
    pub unhandled: u64,
}

struct Binding {
    name: &'static str,
    handler: IrqHandler,
    gate: Mutex<()>,
    live: AtomicBool,
}

impl Binding {
    fn invoke(&self, irq: IrqNumber) -> Option<IrqReturn> {
        let _gate = lock(&self.gate);
        if !self.live.load(Ordering::Acquire) {
            return None;
        }
        Some((self.handler)(irq))
    }
}

#[derive(Default)]
struct LineState {
    asserted: bool,
    binding: Option<Arc<Binding>>,
    stats: LineStats,
}

/// Shared handle to the host's interrupt controller.
///
/// Lines are level-triggered: a raised line stays asserted until a device
/// lowers it, and [`InterruptController::dispatch_pending`] delivers to its
/// handler on every call while it remains asserted.
#[derive(Clone)]
pub struct InterruptController {
    lines: Arc<Mutex<Vec<LineState>>>,
}

impl InterruptController {
    /// Creates a controller with `line_count` lines numbered from zero.
    #[must_use]
    pub fn new(line_count: u32) -> Self {
        let lines = (0..line_count).map(|_| LineState::default()).collect();
        Self {
            lines: Arc::new(Mutex::new(lines)),
        }
    }

    /// Returns the number of lines.
    #[must_use]
    pub fn line_count(&self) -> u32 {
        u32::try_from(self.lines().len()).unwrap_or(u32::MAX)
    }

    /// Returns a device-side handle for raising and lowering `irq`.
    #[must_use]
    pub fn line(&self, irq: IrqNumber) -> Option<IrqLine> {
        (irq < self.line_count()).then(|| IrqLine {
            controller: self.clone(),
            irq,
        })
    }

    /// Binds `handler` to `irq` under `name`.
    ///
    /// # Errors
    ///
    /// Returns [`InterruptBindError::NoSuchLine`] for an out-of-range line and
    /// [`InterruptBindError::AlreadyBound`] when the line already has a handler.
    pub fn request_irq(
        &self,
        irq: IrqNumber,
        name: &'static str,
        handler: IrqHandler,
    ) -> Result<(), InterruptBindError> {
        let mut lines = self.lines();
        let line = slot_mut(&mut lines, irq).ok_or(InterruptBindError::NoSuchLine { irq })?;
        if let Some(existing) = &line.binding {
            return Err(InterruptBindError::AlreadyBound {
                irq,
                owner: existing.name,
            });
        }
        line.binding = Some(Arc::new(Binding {
            name,
            handler,
            gate: Mutex::new(()),
            live: AtomicBool::new(true),
        }));
        debug!("irq {irq}: bound handler `{name}`");
        Ok(())
    }

    /// Unbinds the handler on `irq`.
    ///
    /// Returns once any in-flight invocation has finished; the handler is never
    /// invoked afterwards.
    ///
    /// # Panics
    ///
    /// Panics if `irq` has no bound handler. Freeing an unbound line is a
    /// driver bug.
    pub fn free_irq(&self, irq: IrqNumber) {
        let binding = slot_mut(&mut self.lines(), irq).and_then(|line| line.binding.take());
        let Some(binding) = binding else {
            panic!("free_irq: irq {irq} has no bound handler");
        };
        let _gate = lock(&binding.gate);
        binding.live.store(false, Ordering::Release);
        debug!("irq {irq}: unbound handler `{}`", binding.name);
    }

    /// Returns `true` if a handler is bound to `irq`.
    #[must_use]
    pub fn is_bound(&self, irq: IrqNumber) -> bool {
        slot(&self.lines(), irq).is_some_and(|line| line.binding.is_some())
    }

    /// Returns the name the handler on `irq` was bound with.
    #[must_use]
    pub fn bound_name(&self, irq: IrqNumber) -> Option<&'static str> {
        slot(&self.lines(), irq).and_then(|line| line.binding.as_ref().map(|b| b.name))
    }

    /// Returns `true` while `irq` is asserted.
    #[must_use]
    pub fn is_asserted(&self, irq: IrqNumber) -> bool {
        slot(&self.lines(), irq).is_some_and(|line| line.asserted)
    }

    /// Returns delivery counters for `irq`.
    #[must_use]
    pub fn stats(&self, irq: IrqNumber) -> Option<LineStats> {
        slot(&self.lines(), irq).map(|line| line.stats)
    }

    /// Invokes the handler of every asserted line once.
    ///
    /// Handlers run with no controller lock held, so they may access devices
    /// that lower lines. Returns the number of handler invocations.
    pub fn dispatch_pending(&self) -> usize {
        let pending = self
            .lines()
            .iter()
            .zip(0..)
            .filter(|(line, _)| line.asserted)
            .filter_map(|(line, irq)| line.binding.clone().map(|binding| (irq, binding)))
            .collect::<Vec<_>>();

        let mut delivered = 0;
        for (irq, binding) in pending {
            let Some(verdict) = binding.invoke(irq) else {
                continue;
            };
            delivered += 1;
            let mut lines = self.lines();
            if let Some(line) = slot_mut(&mut lines, irq) {
                line.stats.delivered += 1;
                if verdict == IrqReturn::None {
                    line.stats.unhandled += 1;
                    warn!("irq {irq}: handler `{}` did not handle interrupt", binding.name);
                }
            }
        }
        delivered
    }

    fn set_level(&self, irq: IrqNumber, level: bool) {
        let mut lines = self.lines();
        let Some(line) = slot_mut(&mut lines, irq) else {
            return;
        };
        if line.asserted == level {
            return;
        }
        line.asserted = level;
        if level {
            line.stats.raised += 1;
        } else {
            line.stats.lowered += 1;
        }
    }

    fn lines(&self) -> MutexGuard<'_, Vec<LineState>> {
        lock(&self.lines)
    }
}

fn slot(lines: &[LineState], irq: IrqNumber) -> Option<&LineState> {
    lines.get(usize::try_from(irq).ok()?)
}

fn slot_mut(lines: &mut [LineState], irq: IrqNumber) -> Option<&mut LineState> {
    lines.get_mut(usize::try_from(irq).ok()?)
}

impl fmt::Debug for InterruptController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let lines = self.lines();
        let asserted = lines
            .iter()
            .zip(0u32..)
            .filter(|(line, _)| line.asserted)
            .map(|(_, irq)| irq)
            .collect::<Vec<_>>();
        f.debug_struct("InterruptController")
            .field("lines", &lines.len())
            .field("asserted", &asserted)
            .finish()
    }
}

/// Device-side handle to one interrupt line.
#[derive(Clone)]
pub struct IrqLine {
    controller: InterruptController,
    irq: IrqNumber,
}

impl IrqLine {
    /// Returns the line number.
    #[must_use]
    pub const fn number(&self) -> IrqNumber {
        self.irq
    }

    /// Asserts the line. Raising an asserted line has no effect.
    pub fn raise(&self) {
        self.controller.set_level(self.irq, true);
    }

    /// Deasserts the line. Lowering a deasserted line has no effect.
    pub fn lower(&self) {
        self.controller.set_level(self.irq, false);
    }

    /// Returns `true` while the line is asserted.
    #[must_use]
    pub fn is_asserted(&self) -> bool {
        self.controller.is_asserted(self.irq)
    }
}

impl fmt::Debug for IrqLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IrqLine")
            .field("irq", &self.irq)
            .field("asserted", &self.is_asserted())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::InterruptController;
    use crate::fault::InterruptBindError;
    use crate::irq::{IrqHandler, IrqReturn};

    fn counting_handler(verdict: IrqReturn) -> (IrqHandler, Arc<AtomicUsize>) {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let handler: IrqHandler = Arc::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            verdict
        });
        (handler, hits)
    }

    #[test]
    fn raise_and_lower_track_transitions() {
        let controller = InterruptController::new(4);
        let line = controller.line(2).unwrap();
        line.raise();
        line.raise();
        assert!(controller.is_asserted(2));
        line.lower();
        line.lower();
        assert!(!line.is_asserted());
        let stats = controller.stats(2).unwrap();
        assert_eq!((stats.raised, stats.lowered), (1, 1));
    }

    #[test]
    fn out_of_range_lines_are_rejected() {
        let controller = InterruptController::new(4);
        assert!(controller.line(4).is_none());
        let (handler, _) = counting_handler(IrqReturn::Handled);
        assert_eq!(
            controller.request_irq(9, "test", handler),
            Err(InterruptBindError::NoSuchLine { irq: 9 })
        );
    }

    #[test]
    fn second_bind_reports_existing_owner() {
        let controller = InterruptController::new(4);
        let (first, _) = counting_handler(IrqReturn::Handled);
        let (second, _) = counting_handler(IrqReturn::Handled);
        controller.request_irq(1, "first", first).unwrap();
        assert_eq!(
            controller.request_irq(1, "second", second),
            Err(InterruptBindError::AlreadyBound {
                irq: 1,
                owner: "first"
            })
        );
        assert_eq!(controller.bound_name(1), Some("first"));
    }

    #[test]
    fn unacknowledged_level_line_is_redelivered() {
        let controller = InterruptController::new(4);
        let (handler, hits) = counting_handler(IrqReturn::Handled);
        controller.request_irq(3, "sticky", handler).unwrap();
        controller.line(3).unwrap().raise();

        assert_eq!(controller.dispatch_pending(), 1);
        assert_eq!(controller.dispatch_pending(), 1);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
        assert_eq!(controller.stats(3).unwrap().delivered, 2);
    }

    #[test]
    fn deasserted_or_unbound_lines_are_not_delivered() {
        let controller = InterruptController::new(4);
        let (handler, hits) = counting_handler(IrqReturn::Handled);
        controller.request_irq(0, "idle", handler).unwrap();
        controller.line(1).unwrap().raise();
        assert_eq!(controller.dispatch_pending(), 0);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn unhandled_verdicts_are_counted() {
        let controller = InterruptController::new(2);
        let (handler, _) = counting_handler(IrqReturn::None);
        controller.request_irq(0, "confused", handler).unwrap();
        controller.line(0).unwrap().raise();
        controller.dispatch_pending();
        assert_eq!(controller.stats(0).unwrap().unhandled, 1);
    }

    #[test]
    fn handler_can_lower_its_own_line() {
        let controller = InterruptController::new(2);
        let line = controller.line(0).unwrap();
        let ack = line.clone();
        controller
            .request_irq(
                0,
                "acking",
                Arc::new(move |_| {
                    ack.lower();
                    IrqReturn::Handled
                }),
            )
            .unwrap();
        line.raise();
        assert_eq!(controller.dispatch_pending(), 1);
        assert!(!line.is_asserted());
        assert_eq!(controller.dispatch_pending(), 0);
    }

    #[test]
    fn freed_handler_is_not_invoked() {
        let controller = InterruptController::new(2);
        let (handler, hits) = counting_handler(IrqReturn::Handled);
        controller.request_irq(1, "gone", handler).unwrap();
        controller.free_irq(1);
        assert!(!controller.is_bound(1));
        controller.line(1).unwrap().raise();
        assert_eq!(controller.dispatch_pending(), 0);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    #[should_panic(expected = "has no bound handler")]
    fn freeing_an_unbound_line_panics() {
        InterruptController::new(2).free_irq(0);
    }
}
