//! A complete emulated machine: clock, interrupt controller and PCI bus.

use std::collections::BTreeMap;
use std::sync::Arc;

use log::{debug, info};

use crate::api::MachineConfig;
use crate::fault::AttachError;
use crate::irq::{InterruptController, IrqLine, IrqNumber};
use crate::peripherals::{SampleDma, SampleTimer};
use crate::pci::{PciBus, PciDevice, PciDriver, SlotId};
use crate::time::VirtualClock;

/// Owns the shared clock, the interrupt controller and the bus, and wires
/// sample devices onto them.
#[derive(Debug)]
pub struct Machine {
    config: MachineConfig,
    clock: VirtualClock,
    interrupts: InterruptController,
    bus: PciBus,
    irq_owners: BTreeMap<SlotId, IrqNumber>,
}

impl Machine {
    /// Builds an empty machine.
    #[must_use]
    pub fn new(config: MachineConfig) -> Self {
        let clock = VirtualClock::new();
        let interrupts = InterruptController::new(config.irq_lines);
        let bus = PciBus::new(interrupts.clone(), config.mmio_base);
        info!(
            "machine: {} irq lines, MMIO aperture at {:#x}",
            config.irq_lines, config.mmio_base
        );
        Self {
            config,
            clock,
            interrupts,
            bus,
            irq_owners: BTreeMap::new(),
        }
    }

    /// Configuration the machine was built with.
    #[must_use]
    pub const fn config(&self) -> &MachineConfig {
        &self.config
    }

    /// Shared virtual clock.
    #[must_use]
    pub const fn clock(&self) -> &VirtualClock {
        &self.clock
    }

    /// Interrupt controller.
    #[must_use]
    pub const fn interrupts(&self) -> &InterruptController {
        &self.interrupts
    }

    /// PCI bus.
    #[must_use]
    pub const fn bus(&self) -> &PciBus {
        &self.bus
    }

    /// Plugs in a sample timer on the next free interrupt line.
    ///
    /// # Errors
    ///
    /// Returns [`AttachError`] when no line or bus slot is free.
    pub fn attach_sample_timer(&mut self) -> Result<(SlotId, Arc<SampleTimer>), AttachError> {
        let line = self.claim_line()?;
        let irq = line.number();
        let timer = Arc::new(SampleTimer::new(
            self.config.timer,
            self.clock.clone(),
            line,
        ));
        let device: Arc<dyn PciDevice> = Arc::clone(&timer) as Arc<dyn PciDevice>;
        let slot = self.bus.attach(device, Some(irq))?;
        self.irq_owners.insert(slot, irq);
        Ok((slot, timer))
    }

    /// Plugs in a DMA stub on the next free interrupt line.
    ///
    /// # Errors
    ///
    /// Returns [`AttachError`] when no line or bus slot is free.
    pub fn attach_sample_dma(&mut self) -> Result<(SlotId, Arc<SampleDma>), AttachError> {
        let irq = self.claim_line()?.number();
        let dma = Arc::new(SampleDma::new());
        let device: Arc<dyn PciDevice> = Arc::clone(&dma) as Arc<dyn PciDevice>;
        let slot = self.bus.attach(device, Some(irq))?;
        self.irq_owners.insert(slot, irq);
        Ok((slot, dma))
    }

    /// Unplugs the device in `slot` and frees its line for reuse.
    ///
    /// The line keeps whatever level the device left it at until the next
    /// device routed to it is attached.
    ///
    /// # Panics
    ///
    /// Panics if `slot` is empty.
    pub fn detach(&mut self, slot: SlotId) {
        self.bus.detach(slot);
        self.irq_owners.remove(&slot);
    }

    /// Resets the device in `slot`. Returns `false` when `slot` is empty.
    pub fn reset(&self, slot: SlotId) -> bool {
        self.bus.reset(slot)
    }

    /// Registers a driver with the bus. Returns the number of devices it bound.
    pub fn register_driver(&mut self, driver: Box<dyn PciDriver>) -> usize {
        self.bus.register_driver(driver)
    }

    /// Unregisters driver `name`, unbinding it from every device.
    pub fn unregister_driver(&mut self, name: &str) -> Option<Box<dyn PciDriver>> {
        self.bus.unregister_driver(name)
    }

    /// Advances virtual time by `delta_ns`, dispatching pending interrupts
    /// after every timer firing.
    ///
    /// Returns the number of timer callbacks that ran.
    pub fn advance(&self, delta_ns: u64) -> usize {
        let target = self.clock.now_ns().saturating_add(delta_ns);
        let mut fired = 0;
        while self.clock.fire_next(target) {
            fired += 1;
            self.interrupts.dispatch_pending();
        }
        let late = self.clock.advance_to(target);
        if late > 0 {
            self.interrupts.dispatch_pending();
        }
        debug!(
            "machine: advanced to {} ns, {} timer(s) fired",
            self.clock.now_ns(),
            fired + late
        );
        fired + late
    }

    /// Delivers every asserted line to its handler once.
    ///
    /// Returns the number of handler invocations.
    pub fn dispatch_interrupts(&self) -> usize {
        self.interrupts.dispatch_pending()
    }

    /// Picks the lowest unowned line and wires it fresh, deasserted.
    fn claim_line(&self) -> Result<IrqLine, AttachError> {
        let line = (self.config.first_irq..self.config.irq_lines)
            .find(|irq| !self.irq_owners.values().any(|owned| owned == irq))
            .and_then(|irq| self.interrupts.line(irq))
            .ok_or(AttachError::NoFreeIrq)?;
        line.lower();
        Ok(line)
    }
}
