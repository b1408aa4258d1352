//! Register protocol and firing-policy coverage for the sample timer.

#![allow(clippy::pedantic, clippy::nursery)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use log as _;
use proptest::prelude::*;
use rstest as _;
use sample_hw::irq::{InterruptController, IrqHandler, IrqReturn};
use sample_hw::memory::{REG_CONTROL, REG_DOORBELL};
use sample_hw::pci::PciDevice;
use sample_hw::time::VirtualClock;
use sample_hw::{
    AccessKind, Machine, MachineConfig, ProtocolViolation, SampleTimer, SampleTimerConfig,
};
#[cfg(feature = "serde")]
use serde as _;
use thiserror as _;

const PERIOD: u64 = 1_000_000;
const LINE: u32 = 5;

struct Rig {
    clock: VirtualClock,
    irqs: InterruptController,
    timer: SampleTimer,
}

fn rig() -> Rig {
    let clock = VirtualClock::new();
    let irqs = InterruptController::new(8);
    let line = irqs.line(LINE).expect("line exists");
    let timer = SampleTimer::new(SampleTimerConfig { period_ns: PERIOD }, clock.clone(), line);
    Rig { clock, irqs, timer }
}

proptest! {
    #[test]
    fn property_control_register_echoes_last_write(values in prop::collection::vec(any::<u8>(), 1..32)) {
        let rig = rig();
        for value in &values {
            rig.timer.write(REG_CONTROL, *value);
        }
        let last = *values.last().expect("non-empty");
        prop_assert_eq!(rig.timer.read(REG_CONTROL), u8::from(last != 0));
    }

    #[test]
    fn property_disable_between_firings_allows_exactly_one_more(split in 1..PERIOD) {
        let rig = rig();
        rig.timer.write(REG_CONTROL, 1);
        prop_assert_eq!(rig.clock.advance(PERIOD), 1);

        rig.clock.advance(split);
        rig.timer.write(REG_CONTROL, 0);
        prop_assert_eq!(rig.clock.advance(PERIOD - split), 1);
        prop_assert_eq!(rig.clock.advance(10 * PERIOD), 0);
        prop_assert!(!rig.timer.timer_pending());
        prop_assert_eq!(rig.timer.diag().firings, 2);
    }
}

#[test]
fn ack_write_deasserts_line_immediately() {
    let rig = rig();
    rig.timer.write(REG_CONTROL, 1);
    rig.clock.advance(PERIOD);
    assert!(rig.irqs.is_asserted(LINE));

    rig.timer.write(REG_DOORBELL, 0);
    assert!(!rig.irqs.is_asserted(LINE));
    assert_eq!(rig.irqs.stats(LINE).map(|s| (s.raised, s.lowered)), Some((1, 1)));
}

#[test]
fn unacknowledged_line_is_redelivered_on_every_dispatch() {
    let rig = rig();
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&hits);
    let handler: IrqHandler = Arc::new(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        IrqReturn::Handled
    });
    rig.irqs.request_irq(LINE, "silent", handler).expect("line free");

    rig.timer.write(REG_CONTROL, 1);
    rig.clock.advance(PERIOD);
    for _ in 0..3 {
        assert_eq!(rig.irqs.dispatch_pending(), 1);
    }
    assert_eq!(hits.load(Ordering::SeqCst), 3);

    rig.timer.write(REG_DOORBELL, 1);
    assert_eq!(rig.irqs.dispatch_pending(), 0);
}

#[test]
fn teardown_before_deadline_means_callback_never_runs() {
    let rig = rig();
    rig.timer.write(REG_CONTROL, 1);
    assert_eq!(rig.clock.pending_timers(), 1);

    rig.timer.exit();
    assert_eq!(rig.clock.pending_timers(), 0);
    assert_eq!(rig.clock.advance(100 * PERIOD), 0);
    assert_eq!(rig.timer.diag().firings, 0);
    assert!(!rig.irqs.is_asserted(LINE));
}

#[test]
fn undefined_register_write_changes_nothing() {
    let rig = rig();
    rig.timer.write(0x40, 1);
    assert!(!rig.timer.is_enabled());
    assert!(!rig.timer.has_timer());
    assert_eq!(rig.clock.pending_timers(), 0);
    assert_eq!(
        rig.timer.diag().last_violation,
        Some(ProtocolViolation::UndefinedRegister {
            offset: 0x40,
            access: AccessKind::Write,
        })
    );
}

#[test]
fn re_enable_restarts_the_period_from_now() {
    let rig = rig();
    rig.timer.write(REG_CONTROL, 1);
    rig.clock.advance(PERIOD / 2);
    rig.timer.write(REG_CONTROL, 1);
    assert_eq!(rig.clock.next_deadline(), Some(PERIOD / 2 + PERIOD));
    assert_eq!(rig.clock.pending_timers(), 1);
}

#[test]
fn concurrent_detach_never_raises_after_teardown_returns() {
    for _ in 0..16 {
        let rig = rig();
        rig.timer.write(REG_CONTROL, 1);
        let stop = Arc::new(AtomicBool::new(false));

        let stepper = {
            let clock = rig.clock.clone();
            let stop = Arc::clone(&stop);
            thread::spawn(move || {
                while !stop.load(Ordering::SeqCst) {
                    clock.advance(PERIOD);
                }
            })
        };

        while rig.timer.diag().firings < 3 {
            thread::yield_now();
        }
        rig.timer.exit();
        rig.timer.irq_line().lower();
        let raised = rig.irqs.stats(LINE).map(|s| s.raised);

        for _ in 0..1_000 {
            thread::yield_now();
        }
        stop.store(true, Ordering::SeqCst);
        stepper.join().expect("stepper thread");

        assert!(!rig.irqs.is_asserted(LINE));
        assert_eq!(rig.irqs.stats(LINE).map(|s| s.raised), raised);
        assert_eq!(rig.clock.pending_timers(), 0);
    }
}

#[test]
fn dma_stub_reads_zero_and_never_interrupts() {
    let mut machine = Machine::new(MachineConfig::default());
    let (slot, dma) = machine.attach_sample_dma().expect("slot free");
    let dev = machine.bus().device(slot).expect("attached");
    let irq = dev.irq().expect("line routed");

    let window = dev.iomap(0).expect("BAR 0 maps");
    for offset in [0x0, 0x8, 0x40, 0x7f] {
        window.iowrite8(0xa5, offset);
        assert_eq!(window.ioread8(offset), 0);
    }
    machine.advance(10 * PERIOD);
    assert_eq!(machine.dispatch_interrupts(), 0);
    assert!(!machine.interrupts().is_asserted(irq));
    assert_eq!(machine.interrupts().stats(irq).map(|s| s.raised), Some(0));
    assert_eq!(dma.diag().writes, 4);
    assert_eq!(dma.diag().reads, 4);
}

#[test]
fn bus_reset_leaves_enable_timer_and_line_untouched() {
    let mut machine = Machine::new(MachineConfig::default());
    let (slot, timer) = machine.attach_sample_timer().expect("slot free");
    let irq = timer.irq_line().number();
    timer.write(REG_CONTROL, 1);
    machine.advance(MachineConfig::default().timer.period_ns);
    assert!(machine.interrupts().is_asserted(irq));
    let deadline = machine.clock().next_deadline();

    assert!(machine.reset(slot));
    assert!(timer.is_enabled());
    assert!(timer.timer_pending());
    assert_eq!(machine.clock().next_deadline(), deadline);
    assert!(machine.interrupts().is_asserted(irq));
    assert_eq!(timer.read(REG_CONTROL), 1);

    machine.detach(slot);
    assert!(!machine.reset(slot));
}
