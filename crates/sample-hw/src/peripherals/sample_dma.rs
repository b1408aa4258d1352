use std::sync::Mutex;

use log::{debug, info};

use crate::api::{SAMPLE_DMA_DEVICE_ID, SAMPLE_DMA_VENDOR_ID};
use crate::diag::DeviceDiag;
use crate::lock;
use crate::memory::WINDOW_BYTES;
use crate::pci::{BarDescriptor, PciDevice, PciDeviceInfo};

/// Description the DMA stub reports on the bus.
pub const SAMPLE_DMA_DESCRIPTION: &str = "PCI-based Sample DMA";

/// Placeholder DMA engine. Reads return 0, writes are accepted; both are only
/// logged. It advertises an interrupt pin but never raises its line.
#[derive(Debug, Default)]
pub struct SampleDma {
    diag: Mutex<DeviceDiag>,
}

impl SampleDma {
    /// Creates the stub.
    #[must_use]
    pub fn new() -> Self {
        info!("sample dma: loaded");
        Self::default()
    }

    /// Snapshot of the access counters.
    #[must_use]
    pub fn diag(&self) -> DeviceDiag {
        *lock(&self.diag)
    }
}

impl PciDevice for SampleDma {
    fn info(&self) -> PciDeviceInfo {
        PciDeviceInfo::new(SAMPLE_DMA_VENDOR_ID, SAMPLE_DMA_DEVICE_ID)
    }

    fn description(&self) -> &'static str {
        SAMPLE_DMA_DESCRIPTION
    }

    fn bar(&self, index: u8) -> Option<BarDescriptor> {
        (index == 0).then_some(BarDescriptor::memory(WINDOW_BYTES))
    }

    fn interrupt_pin(&self) -> u8 {
        1
    }

    fn mmio_read(&self, bar: u8, offset: u64) -> u8 {
        debug!("sample dma: read BAR {bar} offset {offset:#x}");
        lock(&self.diag).record_read();
        0
    }

    fn mmio_write(&self, bar: u8, offset: u64, value: u8) {
        debug!("sample dma: write {value:#x} to BAR {bar} offset {offset:#x}");
        lock(&self.diag).record_write();
    }

    fn reset(&self) {
        info!("sample dma: reset");
    }

    fn exit(&self) {
        info!("sample dma: unloaded");
    }

    fn diag(&self) -> DeviceDiag {
        Self::diag(self)
    }
}

#[cfg(test)]
mod tests {
    use super::SampleDma;
    use crate::pci::PciDevice;

    #[test]
    fn reads_zero_and_counts_traffic() {
        let dma = SampleDma::new();
        dma.mmio_write(0, 0x10, 0xaa);
        assert_eq!(dma.mmio_read(0, 0x10), 0);
        let diag = dma.diag();
        assert_eq!((diag.reads, diag.writes), (1, 1));
        assert_eq!(dma.interrupt_pin(), 1);
    }
}
