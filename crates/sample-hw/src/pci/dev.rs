use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use log::{debug, info, warn};

use super::{BarDescriptor, BarKind, PciDevice, PciDeviceInfo, SlotId, PCI_NUM_BARS};
use crate::fault::{AccessKind, InterruptBindError, ResourceError};
use crate::irq::{InterruptController, IrqHandler, IrqNumber};
use crate::lock;
use crate::memory::validate_window_access;

/// Resource flag: the BAR decodes I/O port space.
pub const IORESOURCE_IO: u64 = 0x0000_0100;
/// Resource flag: the BAR decodes memory space.
pub const IORESOURCE_MEM: u64 = 0x0000_0200;

/// Value returned by reads that hit no device.
const OPEN_BUS: u8 = 0xFF;

#[derive(Debug, Clone, Copy)]
pub(super) struct BarResource {
    pub(super) descriptor: BarDescriptor,
    pub(super) base: u64,
    claimed: bool,
    mapped: bool,
}

impl BarResource {
    pub(super) const fn new(descriptor: BarDescriptor, base: u64) -> Self {
        Self {
            descriptor,
            base,
            claimed: false,
            mapped: false,
        }
    }
}

/// Bus-side bookkeeping for one occupied slot.
#[derive(Debug)]
pub(super) struct SlotResources {
    present: bool,
    enabled: bool,
    bars: [Option<BarResource>; PCI_NUM_BARS as usize],
}

impl SlotResources {
    pub(super) const fn new(bars: [Option<BarResource>; PCI_NUM_BARS as usize]) -> Self {
        Self {
            present: true,
            enabled: false,
            bars,
        }
    }

    pub(super) fn mark_gone(&mut self) {
        self.present = false;
        self.enabled = false;
    }

    fn bar(&self, bar: u8) -> Option<&BarResource> {
        self.bars.get(usize::from(bar)).and_then(Option::as_ref)
    }

    fn bar_mut(&mut self, bar: u8) -> Option<&mut BarResource> {
        self.bars.get_mut(usize::from(bar)).and_then(Option::as_mut)
    }
}

/// Driver-facing handle to a device on the bus.
///
/// Cheap to clone. All clones refer to the same slot.
#[derive(Clone)]
pub struct PciDev {
    slot: SlotId,
    info: PciDeviceInfo,
    irq: Option<IrqNumber>,
    device: Arc<dyn PciDevice>,
    resources: Arc<Mutex<SlotResources>>,
    interrupts: InterruptController,
}

impl PciDev {
    pub(super) fn new(
        slot: SlotId,
        irq: Option<IrqNumber>,
        device: Arc<dyn PciDevice>,
        resources: SlotResources,
        interrupts: InterruptController,
    ) -> Self {
        Self {
            slot,
            info: device.info(),
            irq,
            device,
            resources: Arc::new(Mutex::new(resources)),
            interrupts,
        }
    }

    /// Bus slot the device occupies.
    #[must_use]
    pub const fn slot(&self) -> SlotId {
        self.slot
    }

    /// Identity the device advertises.
    #[must_use]
    pub const fn info(&self) -> PciDeviceInfo {
        self.info
    }

    /// Interrupt line routed to the device, if any.
    #[must_use]
    pub const fn irq(&self) -> Option<IrqNumber> {
        self.irq
    }

    /// Human-readable device description.
    #[must_use]
    pub fn description(&self) -> &'static str {
        self.device.description()
    }

    /// Underlying device model.
    #[must_use]
    pub fn device(&self) -> &Arc<dyn PciDevice> {
        &self.device
    }

    /// Turns on decoding for the device.
    ///
    /// # Errors
    ///
    /// Returns [`ResourceError::DeviceGone`] once the device has been detached.
    pub fn enable_device(&self) -> Result<(), ResourceError> {
        let mut resources = self.resources();
        if !resources.present {
            return Err(ResourceError::DeviceGone);
        }
        resources.enabled = true;
        debug!("{}: device enabled", self.slot);
        Ok(())
    }

    /// Turns off decoding for the device.
    pub fn disable_device(&self) {
        self.resources().enabled = false;
        debug!("{}: device disabled", self.slot);
    }

    /// Returns `true` between [`enable_device`](Self::enable_device) and
    /// [`disable_device`](Self::disable_device).
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.resources().enabled
    }

    /// Bus address of BAR `bar`, or 0 when unimplemented.
    #[must_use]
    pub fn resource_start(&self, bar: u8) -> u64 {
        self.resources().bar(bar).map_or(0, |res| res.base)
    }

    /// Size of BAR `bar`, or 0 when unimplemented.
    #[must_use]
    pub fn resource_len(&self, bar: u8) -> u64 {
        self.resources().bar(bar).map_or(0, |res| res.descriptor.size)
    }

    /// `IORESOURCE_*` flags of BAR `bar`, or 0 when unimplemented.
    #[must_use]
    pub fn resource_flags(&self, bar: u8) -> u64 {
        self.resources()
            .bar(bar)
            .map_or(0, |res| match res.descriptor.kind {
                BarKind::Memory => IORESOURCE_MEM,
                BarKind::Io => IORESOURCE_IO,
            })
    }

    /// Claims and maps memory BAR `bar`.
    ///
    /// The claim is held until [`release_region`](Self::release_region); the
    /// mapping until the returned region is dropped or unmapped.
    ///
    /// # Errors
    ///
    /// Returns a [`ResourceError`] when the device is gone, the BAR is missing
    /// or not a memory BAR, or the region is already claimed.
    pub fn iomap(&self, bar: u8) -> Result<MappedRegion, ResourceError> {
        let mut resources = self.resources();
        if !resources.present {
            return Err(ResourceError::DeviceGone);
        }
        let res = resources
            .bar_mut(bar)
            .ok_or(ResourceError::NoSuchBar { bar })?;
        if res.descriptor.kind != BarKind::Memory {
            return Err(ResourceError::NotMemoryBar { bar });
        }
        if res.claimed {
            return Err(ResourceError::RegionBusy { bar });
        }
        res.claimed = true;
        res.mapped = true;
        debug!(
            "{}: mapped BAR {bar} at {:#x} ({} bytes)",
            self.slot, res.base, res.descriptor.size
        );
        Ok(MappedRegion {
            slot: self.slot,
            bar,
            base: res.base,
            len: res.descriptor.size,
            device: Arc::clone(&self.device),
            resources: Arc::clone(&self.resources),
        })
    }

    /// Drops the claim on BAR `bar`. Releasing an unclaimed region is logged
    /// and otherwise ignored.
    pub fn release_region(&self, bar: u8) {
        match self.resources().bar_mut(bar) {
            Some(res) if res.claimed => {
                res.claimed = false;
                debug!("{}: released BAR {bar}", self.slot);
            }
            _ => warn!("{}: release of unclaimed BAR {bar}", self.slot),
        }
    }

    /// Returns `true` while BAR `bar` is claimed.
    #[must_use]
    pub fn is_region_claimed(&self, bar: u8) -> bool {
        self.resources().bar(bar).is_some_and(|res| res.claimed)
    }

    /// Returns `true` while a [`MappedRegion`] for BAR `bar` is alive.
    #[must_use]
    pub fn is_mapped(&self, bar: u8) -> bool {
        self.resources().bar(bar).is_some_and(|res| res.mapped)
    }

    /// Binds `handler` to the device's interrupt line.
    ///
    /// # Errors
    ///
    /// Returns [`InterruptBindError::NoInterruptLine`] when no line is routed
    /// to the device, otherwise whatever the controller reports.
    pub fn request_irq(
        &self,
        name: &'static str,
        handler: IrqHandler,
    ) -> Result<IrqNumber, InterruptBindError> {
        let irq = self.irq.ok_or(InterruptBindError::NoInterruptLine)?;
        self.interrupts.request_irq(irq, name, handler)?;
        info!("{}: `{name}` bound to irq {irq}", self.slot);
        Ok(irq)
    }

    /// Unbinds the handler from the device's interrupt line.
    ///
    /// # Panics
    ///
    /// Panics if the device has no line or no handler is bound to it.
    pub fn free_irq(&self) {
        let Some(irq) = self.irq else {
            panic!("free_irq: {} has no interrupt line", self.slot);
        };
        self.interrupts.free_irq(irq);
    }

    pub(super) fn mark_gone(&self) {
        self.resources().mark_gone();
    }

    fn resources(&self) -> MutexGuard<'_, SlotResources> {
        lock(&self.resources)
    }
}

impl fmt::Debug for PciDev {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PciDev")
            .field("slot", &self.slot)
            .field("info", &self.info)
            .field("irq", &self.irq)
            .field("description", &self.device.description())
            .finish_non_exhaustive()
    }
}

/// A live mapping of one memory BAR.
///
/// Accesses are single bytes relative to the window base. Dropping the region
/// unmaps it; the claim on the BAR stays until the driver releases it.
pub struct MappedRegion {
    slot: SlotId,
    bar: u8,
    base: u64,
    len: u64,
    device: Arc<dyn PciDevice>,
    resources: Arc<Mutex<SlotResources>>,
}

impl MappedRegion {
    /// BAR index backing the mapping.
    #[must_use]
    pub const fn bar(&self) -> u8 {
        self.bar
    }

    /// Bus address of the window.
    #[must_use]
    pub const fn base(&self) -> u64 {
        self.base
    }

    /// Window length in bytes.
    #[must_use]
    pub const fn len(&self) -> u64 {
        self.len
    }

    /// Returns `true` for a zero-length window.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Reads one byte. Out-of-window reads and reads of a detached device
    /// return `0xff`.
    #[must_use]
    pub fn ioread8(&self, offset: u64) -> u8 {
        if let Err(violation) = validate_window_access(offset, self.len, AccessKind::Read) {
            warn!("{}: {violation}", self.slot);
            return OPEN_BUS;
        }
        if !lock(&self.resources).present {
            debug!("{}: read at {offset:#x} after detach", self.slot);
            return OPEN_BUS;
        }
        self.device.mmio_read(self.bar, offset)
    }

    /// Writes one byte. Out-of-window writes and writes to a detached device
    /// are dropped.
    pub fn iowrite8(&self, value: u8, offset: u64) {
        if let Err(violation) = validate_window_access(offset, self.len, AccessKind::Write) {
            warn!("{}: {violation}", self.slot);
            return;
        }
        if !lock(&self.resources).present {
            debug!("{}: write {value:#x} at {offset:#x} after detach", self.slot);
            return;
        }
        self.device.mmio_write(self.bar, offset, value);
    }

    /// Tears down the mapping.
    pub fn unmap(self) {
        drop(self);
    }
}

impl Drop for MappedRegion {
    fn drop(&mut self) {
        if let Some(res) = lock(&self.resources).bar_mut(self.bar) {
            res.mapped = false;
        }
        debug!("{}: unmapped BAR {}", self.slot, self.bar);
    }
}

impl fmt::Debug for MappedRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MappedRegion")
            .field("slot", &self.slot)
            .field("bar", &self.bar)
            .field("base", &format_args!("{:#x}", self.base))
            .field("len", &self.len)
            .finish()
    }
}
