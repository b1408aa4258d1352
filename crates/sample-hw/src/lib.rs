//! Emulated PCI sample hardware.
//!
//! The crate models a small machine: a [`VirtualClock`](time::VirtualClock)
//! driving one-shot timers, a level-triggered
//! [`InterruptController`](irq::InterruptController), and a [`PciBus`](pci::PciBus)
//! that assigns BAR windows and binds drivers to devices. On top of that sit
//! two sample devices: a periodic timer that raises an interrupt every period
//! and a DMA stub that only logs its register traffic.

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Host-facing configuration and identifiers.
pub mod api;
/// Per-device diagnostic counters.
pub mod diag;
/// Error taxonomy.
pub mod fault;
/// Interrupt lines and handler dispatch.
pub mod irq;
/// Machine assembly and time stepping.
pub mod machine;
/// Register-window layout.
pub mod memory;
/// PCI bus, device and driver contracts.
pub mod pci;
/// Sample device models.
pub mod peripherals;
/// Virtual time and timers.
pub mod time;

pub use api::{
    MachineConfig, SampleTimerConfig, SAMPLE_DMA_DEVICE_ID, SAMPLE_DMA_VENDOR_ID,
    SAMPLE_TIMER_DEVICE_ID, SAMPLE_TIMER_VENDOR_ID,
};
pub use diag::DeviceDiag;
pub use fault::{AccessKind, AttachError, InterruptBindError, ProtocolViolation, ResourceError};
pub use irq::{IrqHandler, IrqNumber, IrqReturn};
pub use machine::Machine;
pub use peripherals::{SampleDma, SampleTimer};

/// Locks `mutex`, recovering the guard if a panicking holder poisoned it.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
use proptest as _;
