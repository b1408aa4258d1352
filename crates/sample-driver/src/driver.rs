//! Driver for the sample timer.
//!
//! Binding maps BAR 0, claims the device's interrupt line and enables the
//! timer. Every interrupt bumps a per-device counter and acknowledges the
//! device through the doorbell register.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::{error, info, warn};
use sample_hw::irq::{IrqHandler, IrqNumber, IrqReturn};
use sample_hw::memory::{REG_CONTROL, REG_DOORBELL};
use sample_hw::pci::{MappedRegion, PciDev, PciDeviceId, PciDriver, ProbeError, SlotId};
use sample_hw::{SAMPLE_TIMER_DEVICE_ID, SAMPLE_TIMER_VENDOR_ID};

/// Name the driver registers under, also used for its interrupt handlers.
pub const DRIVER_NAME: &str = "pst-timer";

/// Devices the driver binds to.
pub const PCI_SAMPLE_TIMER_IDS: [PciDeviceId; 1] = [PciDeviceId::new(
    SAMPLE_TIMER_VENDOR_ID,
    SAMPLE_TIMER_DEVICE_ID,
)];

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// State shared between one binding and its interrupt handler.
struct BindingShared {
    slot: SlotId,
    window: Mutex<Option<MappedRegion>>,
    count: AtomicU32,
}

impl BindingShared {
    fn read(&self, offset: u64) -> Option<u8> {
        lock(&self.window).as_ref().map(|window| window.ioread8(offset))
    }

    fn write(&self, value: u8, offset: u64) -> bool {
        lock(&self.window)
            .as_ref()
            .map(|window| window.iowrite8(value, offset))
            .is_some()
    }

    fn on_interrupt(&self, irq: IrqNumber) -> IrqReturn {
        self.count.fetch_add(1, Ordering::AcqRel);
        if self.write(1, REG_DOORBELL) {
            IrqReturn::Handled
        } else {
            warn!("{}: irq {irq} arrived after unmap", self.slot);
            IrqReturn::None
        }
    }

    fn unmap(&self) {
        if let Some(window) = lock(&self.window).take() {
            window.unmap();
        }
    }
}

struct Binding {
    shared: Arc<BindingShared>,
    irq: Option<IrqNumber>,
}

/// Sample timer driver.
///
/// Cloning yields another handle to the same driver instance: register one
/// clone with the bus and keep another to observe and steer bound devices.
#[derive(Clone, Default)]
pub struct TimerDriver {
    bindings: Arc<Mutex<BTreeMap<SlotId, Binding>>>,
}

impl TimerDriver {
    /// Creates a driver with no bound devices.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Boxed handle for [`PciBus::register_driver`](sample_hw::pci::PciBus::register_driver).
    #[must_use]
    pub fn boxed(&self) -> Box<dyn PciDriver> {
        Box::new(self.clone())
    }

    /// Returns `true` while the device in `slot` is bound.
    #[must_use]
    pub fn is_bound(&self, slot: SlotId) -> bool {
        self.bindings().contains_key(&slot)
    }

    /// Slots currently bound, in ascending order.
    #[must_use]
    pub fn bound_slots(&self) -> Vec<SlotId> {
        self.bindings().keys().copied().collect()
    }

    /// Interrupts handled for the device in `slot` since it was bound.
    #[must_use]
    pub fn interrupt_count(&self, slot: SlotId) -> Option<u32> {
        self.shared(slot)
            .map(|shared| shared.count.load(Ordering::Acquire))
    }

    /// Interrupt line the binding owns. `None` when the device is unbound or
    /// its line could not be claimed.
    #[must_use]
    pub fn irq(&self, slot: SlotId) -> Option<IrqNumber> {
        self.bindings().get(&slot).and_then(|binding| binding.irq)
    }

    /// Enables or disables the timer in `slot`. Returns `false` when unbound.
    pub fn set_enabled(&self, slot: SlotId, enabled: bool) -> bool {
        self.shared(slot)
            .is_some_and(|shared| shared.write(u8::from(enabled), REG_CONTROL))
    }

    /// Reads the enable register of the timer in `slot`.
    #[must_use]
    pub fn is_enabled(&self, slot: SlotId) -> Option<bool> {
        self.shared(slot)
            .and_then(|shared| shared.read(REG_CONTROL))
            .map(|value| value != 0)
    }

    fn shared(&self, slot: SlotId) -> Option<Arc<BindingShared>> {
        self.bindings()
            .get(&slot)
            .map(|binding| Arc::clone(&binding.shared))
    }

    fn bindings(&self) -> MutexGuard<'_, BTreeMap<SlotId, Binding>> {
        lock(&self.bindings)
    }
}

impl PciDriver for TimerDriver {
    fn name(&self) -> &'static str {
        DRIVER_NAME
    }

    fn id_table(&self) -> &[PciDeviceId] {
        &PCI_SAMPLE_TIMER_IDS
    }

    fn probe(&mut self, dev: &PciDev, _id: &PciDeviceId) -> Result<(), ProbeError> {
        let slot = dev.slot();
        dev.enable_device()?;
        info!(
            "{slot}: {} ({}), BAR 0 at {:#x}, {} bytes, flags {:#x}",
            dev.info(),
            dev.description(),
            dev.resource_start(0),
            dev.resource_len(0),
            dev.resource_flags(0)
        );

        let window = match dev.iomap(0) {
            Ok(window) => window,
            Err(err) => {
                error!("{slot}: cannot map BAR 0: {err}");
                dev.disable_device();
                return Err(err.into());
            }
        };
        let shared = Arc::new(BindingShared {
            slot,
            window: Mutex::new(Some(window)),
            count: AtomicU32::new(0),
        });

        let handler_state = Arc::clone(&shared);
        let handler: IrqHandler = Arc::new(move |irq| handler_state.on_interrupt(irq));
        // A missing interrupt does not fail the bind: the device stays mapped
        // and enabled, it just never gets serviced.
        let irq = match dev.request_irq(DRIVER_NAME, handler) {
            Ok(irq) => Some(irq),
            Err(err) => {
                error!("{slot}: cannot bind interrupt: {err}");
                None
            }
        };

        if let Some(state) = shared.read(REG_CONTROL) {
            info!("{slot}: timer state on bind {state}");
        }
        shared.count.store(0, Ordering::Release);
        shared.write(1, REG_CONTROL);

        self.bindings().insert(slot, Binding { shared, irq });
        info!("{slot}: bound, irq {irq:?}");
        Ok(())
    }

    /// # Panics
    ///
    /// Panics if `dev` is not bound to this driver.
    fn remove(&mut self, dev: &PciDev) {
        let slot = dev.slot();
        let Some(binding) = self.bindings().remove(&slot) else {
            panic!("{DRIVER_NAME}: remove of unbound device {slot}");
        };
        if binding.irq.is_some() {
            dev.free_irq();
        }
        binding.shared.unmap();
        dev.release_region(0);
        dev.disable_device();
        info!(
            "{slot}: unbound after {} interrupt(s)",
            binding.shared.count.load(Ordering::Acquire)
        );
    }
}

impl std::fmt::Debug for TimerDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimerDriver")
            .field("bound", &self.bound_slots())
            .finish()
    }
}
