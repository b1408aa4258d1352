use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use log::{debug, info, trace, warn};

use crate::api::{SampleTimerConfig, SAMPLE_TIMER_DEVICE_ID, SAMPLE_TIMER_VENDOR_ID};
use crate::diag::DeviceDiag;
use crate::fault::{AccessKind, ProtocolViolation};
use crate::irq::IrqLine;
use crate::lock;
use crate::memory::{decode_timer_register, TimerRegister, WINDOW_BYTES};
use crate::pci::{BarDescriptor, PciDevice, PciDeviceInfo};
use crate::time::{Timer, VirtualClock};

/// Description the sample timer reports on the bus.
pub const SAMPLE_TIMER_DESCRIPTION: &str = "PCI-based Sample Timer";

/// Mutable device state, guarded by one lock.
///
/// The timer slot is empty until the first enable and after teardown.
#[derive(Debug, Default)]
struct TimerState {
    enabled: bool,
    timer: Option<Timer>,
    detached: bool,
    diag: DeviceDiag,
}

struct TimerShared {
    config: SampleTimerConfig,
    clock: VirtualClock,
    irq: IrqLine,
    state: Mutex<TimerState>,
}

impl TimerShared {
    fn state(&self) -> MutexGuard<'_, TimerState> {
        lock(&self.state)
    }

    fn read(&self, offset: u64) -> u8 {
        let mut state = self.state();
        state.diag.record_read();
        match decode_timer_register(offset) {
            Some(TimerRegister::Control) => u8::from(state.enabled),
            Some(TimerRegister::Doorbell) => 0,
            None => {
                Self::violation(&mut state, offset, AccessKind::Read);
                0
            }
        }
    }

    fn write(self: &Arc<Self>, offset: u64, value: u8) {
        let mut state = self.state();
        if state.detached {
            debug!("sample timer: write {value:#x} at {offset:#x} after teardown ignored");
            return;
        }
        state.diag.record_write();
        match decode_timer_register(offset) {
            Some(TimerRegister::Control) => {
                let enable = value != 0;
                debug!(
                    "sample timer: control {} -> {}",
                    u8::from(state.enabled),
                    u8::from(enable)
                );
                state.enabled = enable;
                // Disabling leaves an armed timer alone; the next firing sees
                // the cleared flag and does not re-arm.
                if enable {
                    let timer = state.timer.get_or_insert_with(|| self.new_timer());
                    timer.modify_in(self.config.period_ns);
                }
            }
            Some(TimerRegister::Doorbell) => {
                state.diag.record_ack();
                self.irq.lower();
            }
            None => Self::violation(&mut state, offset, AccessKind::Write),
        }
    }

    fn new_timer(self: &Arc<Self>) -> Timer {
        let weak: Weak<Self> = Arc::downgrade(self);
        self.clock.new_timer(move || {
            if let Some(shared) = weak.upgrade() {
                shared.fire();
            }
        })
    }

    fn fire(&self) {
        let mut state = self.state();
        if state.detached {
            return;
        }
        state.diag.record_firing();
        self.irq.raise();
        if state.enabled {
            let period = self.config.period_ns;
            if state.timer.as_ref().is_some_and(|timer| timer.modify_in(period)) {
                state.diag.record_rearm();
                trace!("sample timer: fired, re-armed");
            } else {
                warn!("sample timer: next deadline is out of range, going dormant");
            }
        } else {
            debug!("sample timer: fired while disabled, going dormant");
        }
    }

    /// Marks the device detached and frees its timer outside the state lock.
    ///
    /// Returns `false` when teardown already happened.
    fn teardown(&self) -> bool {
        let timer = {
            let mut state = self.state();
            if state.detached {
                return false;
            }
            state.detached = true;
            state.timer.take()
        };
        drop(timer);
        true
    }

    fn violation(state: &mut TimerState, offset: u64, access: AccessKind) {
        let violation = ProtocolViolation::UndefinedRegister { offset, access };
        warn!("sample timer: {violation}");
        state.diag.record_violation(violation);
    }
}

/// Periodic timer device.
///
/// Register window (single-byte accesses):
///
/// | offset | read            | write                                   |
/// |--------|-----------------|-----------------------------------------|
/// | `0x0`  | enabled (0/1)   | non-zero enables and arms one period out |
/// | `0x8`  | 0               | any value deasserts the interrupt line  |
///
/// Each firing raises the line and re-arms only while enabled, so a device
/// disabled mid-period fires exactly once more.
pub struct SampleTimer {
    shared: Arc<TimerShared>,
}

impl SampleTimer {
    /// Creates a disabled timer device driving `irq` off `clock`.
    ///
    /// A zero period would re-arm at the current instant forever; it is
    /// raised to one nanosecond.
    #[must_use]
    pub fn new(mut config: SampleTimerConfig, clock: VirtualClock, irq: IrqLine) -> Self {
        if config.period_ns == 0 {
            warn!("sample timer: zero period raised to 1 ns");
            config.period_ns = 1;
        }
        info!(
            "sample timer: loaded, irq {}, period {} ns",
            irq.number(),
            config.period_ns
        );
        Self {
            shared: Arc::new(TimerShared {
                config,
                clock,
                irq,
                state: Mutex::new(TimerState::default()),
            }),
        }
    }

    /// Services a register read at window offset `offset`.
    #[must_use]
    pub fn read(&self, offset: u64) -> u8 {
        self.shared.read(offset)
    }

    /// Services a register write at window offset `offset`.
    pub fn write(&self, offset: u64, value: u8) {
        self.shared.write(offset, value);
    }

    /// Current value of the enable flag.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.shared.state().enabled
    }

    /// Returns `true` once the first enable allocated the timer, until teardown.
    #[must_use]
    pub fn has_timer(&self) -> bool {
        self.shared.state().timer.is_some()
    }

    /// Returns `true` while a firing is scheduled.
    #[must_use]
    pub fn timer_pending(&self) -> bool {
        self.shared
            .state()
            .timer
            .as_ref()
            .is_some_and(Timer::is_pending)
    }

    /// Returns `true` after teardown.
    #[must_use]
    pub fn is_detached(&self) -> bool {
        self.shared.state().detached
    }

    /// The interrupt line this device drives.
    #[must_use]
    pub fn irq_line(&self) -> &IrqLine {
        &self.shared.irq
    }

    /// Configuration the device was created with.
    #[must_use]
    pub fn config(&self) -> SampleTimerConfig {
        self.shared.config
    }

    /// Snapshot of the diagnostic counters.
    #[must_use]
    pub fn diag(&self) -> DeviceDiag {
        self.shared.state().diag
    }
}

impl PciDevice for SampleTimer {
    fn info(&self) -> PciDeviceInfo {
        PciDeviceInfo::new(SAMPLE_TIMER_VENDOR_ID, SAMPLE_TIMER_DEVICE_ID)
    }

    fn description(&self) -> &'static str {
        SAMPLE_TIMER_DESCRIPTION
    }

    fn bar(&self, index: u8) -> Option<BarDescriptor> {
        (index == 0).then_some(BarDescriptor::memory(WINDOW_BYTES))
    }

    fn interrupt_pin(&self) -> u8 {
        1
    }

    fn mmio_read(&self, _bar: u8, offset: u64) -> u8 {
        self.read(offset)
    }

    fn mmio_write(&self, _bar: u8, offset: u64, value: u8) {
        self.write(offset, value);
    }

    fn reset(&self) {
        info!("sample timer: reset");
    }

    /// # Panics
    ///
    /// Panics when called a second time.
    fn exit(&self) {
        assert!(self.shared.teardown(), "sample timer: teardown called twice");
        info!("sample timer: unloaded");
    }

    fn diag(&self) -> DeviceDiag {
        Self::diag(self)
    }
}

impl Drop for SampleTimer {
    fn drop(&mut self) {
        self.shared.teardown();
    }
}

impl fmt::Debug for SampleTimer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state();
        f.debug_struct("SampleTimer")
            .field("irq", &self.shared.irq.number())
            .field("enabled", &state.enabled)
            .field("timer", &state.timer)
            .field("detached", &state.detached)
            .finish()
    }
}
