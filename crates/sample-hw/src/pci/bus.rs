use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use log::{info, warn};

use super::dev::{BarResource, SlotResources};
use super::{BarKind, PciDev, PciDevice, PciDriver, PCI_NUM_BARS};
use crate::fault::AttachError;
use crate::irq::{InterruptController, IrqNumber};

/// Device slots on the bus.
pub const PCI_SLOT_COUNT: u8 = 32;

/// Minimum alignment of memory BARs.
const MMIO_ALIGN: u64 = 0x1000;
/// Minimum alignment of I/O BARs.
const IO_ALIGN: u64 = 0x4;
/// Base of the I/O port aperture.
const IO_APERTURE_BASE: u64 = 0xC000;

/// Device number of an occupied bus slot. Displays as `00:dd.0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotId(u8);

impl SlotId {
    /// Raw device number.
    #[must_use]
    pub const fn get(self) -> u8 {
        self.0
    }
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "00:{:02x}.0", self.0)
    }
}

struct Slot {
    dev: PciDev,
    driver: Option<&'static str>,
}

/// A single PCI segment: device slots, BAR assignment and driver binding.
pub struct PciBus {
    interrupts: InterruptController,
    next_mmio: u64,
    next_io: u64,
    slots: BTreeMap<SlotId, Slot>,
    drivers: Vec<Box<dyn PciDriver>>,
}

impl PciBus {
    /// Creates an empty bus whose memory BARs are placed from `mmio_base` up.
    #[must_use]
    pub const fn new(interrupts: InterruptController, mmio_base: u64) -> Self {
        Self {
            interrupts,
            next_mmio: mmio_base,
            next_io: IO_APERTURE_BASE,
            slots: BTreeMap::new(),
            drivers: Vec::new(),
        }
    }

    /// Interrupt controller the bus routes device lines to.
    #[must_use]
    pub const fn interrupts(&self) -> &InterruptController {
        &self.interrupts
    }

    /// Places `device` in the lowest free slot, assigns its BARs and offers it
    /// to the registered drivers.
    ///
    /// # Errors
    ///
    /// Returns [`AttachError`] when no slot is free or a BAR does not fit in
    /// the aperture.
    pub fn attach(
        &mut self,
        device: Arc<dyn PciDevice>,
        irq: Option<IrqNumber>,
    ) -> Result<SlotId, AttachError> {
        let slot = (0..PCI_SLOT_COUNT)
            .map(SlotId)
            .find(|slot| !self.slots.contains_key(slot))
            .ok_or(AttachError::NoFreeSlot)?;

        let mut bars = [None; PCI_NUM_BARS as usize];
        let (mut next_mmio, mut next_io) = (self.next_mmio, self.next_io);
        for index in 0..PCI_NUM_BARS {
            let Some(descriptor) = device.bar(index) else {
                continue;
            };
            let (cursor, min_align) = match descriptor.kind {
                BarKind::Memory => (&mut next_mmio, MMIO_ALIGN),
                BarKind::Io => (&mut next_io, IO_ALIGN),
            };
            let exhausted = AttachError::ApertureExhausted {
                size: descriptor.size,
            };
            let align = descriptor.size.max(min_align);
            let base = cursor.checked_next_multiple_of(align).ok_or(exhausted)?;
            *cursor = base.checked_add(align).ok_or(exhausted)?;
            bars[usize::from(index)] = Some(BarResource::new(descriptor, base));
        }
        self.next_mmio = next_mmio;
        self.next_io = next_io;

        let dev = PciDev::new(
            slot,
            irq,
            device,
            SlotResources::new(bars),
            self.interrupts.clone(),
        );
        info!(
            "{slot}: attached {} ({}), irq {irq:?}",
            dev.info(),
            dev.description()
        );
        self.slots.insert(slot, Slot { dev, driver: None });
        for index in 0..self.drivers.len() {
            if self.try_probe(slot, index) {
                break;
            }
        }
        Ok(slot)
    }

    /// Removes the device in `slot`: its driver is unbound first, then the
    /// device is torn down.
    ///
    /// # Panics
    ///
    /// Panics if `slot` is empty. Detaching twice is a host bug.
    pub fn detach(&mut self, slot: SlotId) {
        let Some(entry) = self.slots.remove(&slot) else {
            panic!("detach: slot {slot} is empty");
        };
        if let Some(name) = entry.driver {
            if let Some(driver) = self.drivers.iter_mut().find(|d| d.name() == name) {
                driver.remove(&entry.dev);
                info!("{slot}: unbound from `{name}`");
            }
        }
        entry.dev.mark_gone();
        entry.dev.device().exit();
        info!("{slot}: detached");
    }

    /// Runs the reset hook of the device in `slot`. Bindings, mappings and
    /// the interrupt line are left as they are.
    ///
    /// Returns `false` when `slot` is empty.
    pub fn reset(&self, slot: SlotId) -> bool {
        let Some(entry) = self.slots.get(&slot) else {
            warn!("{slot}: reset of empty slot");
            return false;
        };
        info!("{slot}: reset");
        entry.dev.device().reset();
        true
    }

    /// Registers `driver` and probes every unbound device it matches.
    ///
    /// Returns the number of devices the driver bound. A second driver with
    /// the same name is rejected.
    pub fn register_driver(&mut self, driver: Box<dyn PciDriver>) -> usize {
        let name = driver.name();
        if self.drivers.iter().any(|d| d.name() == name) {
            warn!("driver `{name}` is already registered");
            return 0;
        }
        info!("registered driver `{name}`");
        self.drivers.push(driver);
        let index = self.drivers.len() - 1;
        let unbound: Vec<SlotId> = self
            .slots
            .iter()
            .filter(|(_, entry)| entry.driver.is_none())
            .map(|(slot, _)| *slot)
            .collect();
        unbound
            .into_iter()
            .filter(|slot| self.try_probe(*slot, index))
            .count()
    }

    /// Unbinds driver `name` from every device and hands it back.
    pub fn unregister_driver(&mut self, name: &str) -> Option<Box<dyn PciDriver>> {
        let index = self.drivers.iter().position(|d| d.name() == name)?;
        let mut driver = self.drivers.remove(index);
        for (slot, entry) in &mut self.slots {
            if entry.driver == Some(driver.name()) {
                driver.remove(&entry.dev);
                entry.driver = None;
                info!("{slot}: unbound from `{name}`");
            }
        }
        info!("unregistered driver `{name}`");
        Some(driver)
    }

    /// Handle to the device in `slot`.
    #[must_use]
    pub fn device(&self, slot: SlotId) -> Option<PciDev> {
        self.slots.get(&slot).map(|entry| entry.dev.clone())
    }

    /// Name of the driver bound to `slot`.
    #[must_use]
    pub fn bound_driver(&self, slot: SlotId) -> Option<&'static str> {
        self.slots.get(&slot).and_then(|entry| entry.driver)
    }

    /// Occupied slots in ascending order.
    pub fn slots(&self) -> impl Iterator<Item = SlotId> + '_ {
        self.slots.keys().copied()
    }

    fn try_probe(&mut self, slot: SlotId, index: usize) -> bool {
        let Some(entry) = self.slots.get_mut(&slot) else {
            return false;
        };
        let Some(driver) = self.drivers.get_mut(index) else {
            return false;
        };
        if entry.driver.is_some() {
            return false;
        }
        let Some(id) = driver.match_device(&entry.dev.info()) else {
            return false;
        };
        let name = driver.name();
        match driver.probe(&entry.dev, &id) {
            Ok(()) => {
                info!("{slot}: bound to `{name}`");
                entry.driver = Some(name);
                true
            }
            Err(err) => {
                warn!("{slot}: probe by `{name}` failed: {err}");
                false
            }
        }
    }
}

impl fmt::Debug for PciBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let drivers: Vec<&str> = self.drivers.iter().map(|d| d.name()).collect();
        f.debug_struct("PciBus")
            .field("slots", &self.slots.keys().collect::<Vec<_>>())
            .field("drivers", &drivers)
            .finish_non_exhaustive()
    }
}
