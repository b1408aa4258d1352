use crate::diag::DeviceDiag;

use super::PciDeviceInfo;

/// Number of BAR slots in a type-0 configuration header.
pub const PCI_NUM_BARS: u8 = 6;

/// Address space a BAR decodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BarKind {
    /// Memory space.
    Memory,
    /// I/O port space.
    Io,
}

/// Size and kind of one implemented BAR.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BarDescriptor {
    /// Decoded address space.
    pub kind: BarKind,
    /// Window size in bytes; a power of two.
    pub size: u64,
}

impl BarDescriptor {
    /// A memory BAR of `size` bytes.
    #[must_use]
    pub const fn memory(size: u64) -> Self {
        Self {
            kind: BarKind::Memory,
            size,
        }
    }

    /// An I/O BAR of `size` bytes.
    #[must_use]
    pub const fn io(size: u64) -> Self {
        Self {
            kind: BarKind::Io,
            size,
        }
    }
}

/// Contract between the bus and an emulated device model.
///
/// Register accesses arrive already bounds-checked against the BAR size.
/// Devices use interior mutability because accesses may come from the driver
/// thread while the device's own timers fire on the clock thread.
pub trait PciDevice: Send + Sync {
    /// Identity advertised to drivers.
    fn info(&self) -> PciDeviceInfo;

    /// Human-readable device description.
    fn description(&self) -> &'static str;

    /// Describes BAR `index`, or `None` when unimplemented.
    fn bar(&self, index: u8) -> Option<BarDescriptor>;

    /// Interrupt pin (1 = INTA#), or 0 when the device raises no interrupts.
    fn interrupt_pin(&self) -> u8 {
        0
    }

    /// Services a single-byte read at `offset` within BAR `bar`.
    fn mmio_read(&self, bar: u8, offset: u64) -> u8;

    /// Services a single-byte write at `offset` within BAR `bar`.
    fn mmio_write(&self, bar: u8, offset: u64, value: u8);

    /// Device reset hook.
    fn reset(&self) {}

    /// Teardown hook, called exactly once when the device leaves the bus.
    fn exit(&self) {}

    /// Snapshot of the device's diagnostic counters.
    fn diag(&self) -> DeviceDiag {
        DeviceDiag::default()
    }
}
