//! Host-facing configuration and the fixed identifiers both sides agree on.

use crate::time::NANOSECONDS_PER_SECOND;

/// Vendor ID advertised by the sample timer.
pub const SAMPLE_TIMER_VENDOR_ID: u16 = 0x1234;
/// Device ID advertised by the sample timer.
pub const SAMPLE_TIMER_DEVICE_ID: u16 = 0x0086;
/// Vendor ID advertised by the sample DMA stub.
pub const SAMPLE_DMA_VENDOR_ID: u16 = 0x1235;
/// Device ID advertised by the sample DMA stub.
pub const SAMPLE_DMA_DEVICE_ID: u16 = 0x0086;

/// Default sample timer period: one virtual second.
pub const DEFAULT_TIMER_PERIOD_NS: u64 = NANOSECONDS_PER_SECOND;
/// Default number of interrupt controller lines.
pub const DEFAULT_IRQ_LINES: u32 = 16;
/// Default first line handed out to attached devices.
pub const DEFAULT_FIRST_IRQ: u32 = 10;
/// Default base of the MMIO aperture BARs are assigned from.
pub const DEFAULT_MMIO_BASE: u64 = 0xFEBF_0000;

/// Sample timer configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[cfg_attr(feature = "serde", serde(default, deny_unknown_fields))]
pub struct SampleTimerConfig {
    /// Virtual time between firings, in nanoseconds.
    pub period_ns: u64,
}

impl Default for SampleTimerConfig {
    fn default() -> Self {
        Self {
            period_ns: DEFAULT_TIMER_PERIOD_NS,
        }
    }
}

/// Top-level configuration of an emulated [`Machine`](crate::machine::Machine).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[cfg_attr(feature = "serde", serde(default, deny_unknown_fields))]
pub struct MachineConfig {
    /// Number of interrupt controller lines.
    pub irq_lines: u32,
    /// First line assigned to an attached device; later devices get the next ones.
    pub first_irq: u32,
    /// Base address of the MMIO aperture.
    pub mmio_base: u64,
    /// Sample timer settings.
    pub timer: SampleTimerConfig,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            irq_lines: DEFAULT_IRQ_LINES,
            first_irq: DEFAULT_FIRST_IRQ,
            mmio_base: DEFAULT_MMIO_BASE,
            timer: SampleTimerConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{MachineConfig, DEFAULT_IRQ_LINES, DEFAULT_TIMER_PERIOD_NS};

    #[test]
    fn default_config_uses_one_second_period() {
        let config = MachineConfig::default();
        assert_eq!(config.timer.period_ns, DEFAULT_TIMER_PERIOD_NS);
        assert_eq!(config.irq_lines, DEFAULT_IRQ_LINES);
        assert!(config.first_irq < config.irq_lines);
    }
}
