//! End-to-end run: one machine, the timer driver and a fixed number of periods.

use std::fmt;

use log::info;
use sample_hw::memory::REG_CONTROL;
use sample_hw::pci::SlotId;
use sample_hw::{AttachError, Machine, MachineConfig};
use thiserror::Error;

use crate::driver::{TimerDriver, DRIVER_NAME};

/// What to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DemoOptions {
    /// Timer periods to step through.
    pub periods: u32,
    /// Disable the timer once this many periods have elapsed.
    pub disable_after: Option<u32>,
    /// Also attach the DMA stub and touch its window.
    pub with_dma: bool,
}

impl Default for DemoOptions {
    fn default() -> Self {
        Self {
            periods: 3,
            disable_after: None,
            with_dma: false,
        }
    }
}

/// Failures setting up a demo run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DemoError {
    /// A device could not be placed on the bus.
    #[error(transparent)]
    Attach(#[from] AttachError),
    /// The driver declined the timer.
    #[error("driver did not bind the timer in {slot}")]
    NotBound {
        /// Slot of the unbound timer.
        slot: SlotId,
    },
}

/// Outcome of a demo run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DemoReport {
    /// Periods stepped.
    pub periods: u32,
    /// Timer callbacks that ran.
    pub timer_firings: usize,
    /// Interrupts the driver handled.
    pub interrupts_handled: u32,
    /// Handler invocations counted by the interrupt controller.
    pub interrupts_delivered: u64,
    /// Line state at the end of the run.
    pub line_asserted: bool,
    /// Enable register at the end of the run.
    pub timer_enabled: bool,
    /// DMA stub reads performed, when it was attached.
    pub dma_reads: Option<u32>,
}

impl fmt::Display for DemoReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let yes_no = |flag: bool| if flag { "yes" } else { "no" };
        writeln!(f, "periods: {}", self.periods)?;
        writeln!(f, "timer firings: {}", self.timer_firings)?;
        writeln!(f, "interrupts handled: {}", self.interrupts_handled)?;
        writeln!(f, "interrupts delivered: {}", self.interrupts_delivered)?;
        writeln!(f, "line asserted: {}", yes_no(self.line_asserted))?;
        write!(f, "timer enabled: {}", yes_no(self.timer_enabled))?;
        if let Some(reads) = self.dma_reads {
            write!(f, "\ndma reads: {reads}")?;
        }
        Ok(())
    }
}

/// Builds a machine from `config`, binds the timer driver and steps the clock.
///
/// # Errors
///
/// Returns [`DemoError`] when a device cannot be attached or the driver does
/// not bind the timer.
pub fn run_demo(config: MachineConfig, options: DemoOptions) -> Result<DemoReport, DemoError> {
    let mut machine = Machine::new(config);
    let driver = TimerDriver::new();
    machine.register_driver(driver.boxed());

    let (slot, timer) = machine.attach_sample_timer()?;
    if !driver.is_bound(slot) {
        return Err(DemoError::NotBound { slot });
    }

    let dma_reads = if options.with_dma {
        let (dma_slot, dma) = machine.attach_sample_dma()?;
        if let Some(dev) = machine.bus().device(dma_slot) {
            if let Ok(window) = dev.iomap(0) {
                info!("{dma_slot}: dma control reads {:#x}", window.ioread8(REG_CONTROL));
            }
            dev.release_region(0);
        }
        Some(dma.diag().reads)
    } else {
        None
    };

    let mut timer_firings = 0;
    for period in 1..=options.periods {
        timer_firings += machine.advance(config.timer.period_ns);
        if options.disable_after == Some(period) {
            info!("{slot}: disabling timer after {period} period(s)");
            driver.set_enabled(slot, false);
        }
    }

    let interrupts_delivered = driver
        .irq(slot)
        .and_then(|irq| machine.interrupts().stats(irq))
        .map_or(0, |stats| stats.delivered);
    let report = DemoReport {
        periods: options.periods,
        timer_firings,
        interrupts_handled: driver.interrupt_count(slot).unwrap_or(0),
        interrupts_delivered,
        line_asserted: timer.irq_line().is_asserted(),
        timer_enabled: timer.is_enabled(),
        dma_reads,
    };

    machine.unregister_driver(DRIVER_NAME);
    machine.detach(slot);
    Ok(report)
}
