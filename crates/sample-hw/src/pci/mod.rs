//! Minimal PCI-style bus: device identity, BAR windows, driver binding.

mod bus;
mod dev;
mod device;
mod driver;
mod ids;

pub use bus::{PciBus, SlotId, PCI_SLOT_COUNT};
pub use dev::{MappedRegion, PciDev, IORESOURCE_IO, IORESOURCE_MEM};
pub use device::{BarDescriptor, BarKind, PciDevice, PCI_NUM_BARS};
pub use driver::{PciDriver, ProbeError};
pub use ids::{PciDeviceId, PciDeviceInfo, PCI_ANY_ID, PCI_CLASS_OTHERS};
