use thiserror::Error;

use super::{PciDev, PciDeviceId, PciDeviceInfo};
use crate::fault::ResourceError;

/// Reasons a driver declines or fails to bind a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum ProbeError {
    /// A required resource could not be acquired.
    #[error(transparent)]
    Resource(#[from] ResourceError),
    /// The driver matched the ID but refuses this particular device.
    #[error("device is not supported by this driver")]
    Unsupported,
}

/// Contract between the bus and a device driver.
pub trait PciDriver: Send {
    /// Unique driver name.
    fn name(&self) -> &'static str;

    /// Match table; the first matching entry is passed to [`PciDriver::probe`].
    fn id_table(&self) -> &[PciDeviceId];

    /// Binds the driver to `dev`.
    ///
    /// # Errors
    ///
    /// Returns a [`ProbeError`] when the device cannot be bound; the bus then
    /// leaves it unbound.
    fn probe(&mut self, dev: &PciDev, id: &PciDeviceId) -> Result<(), ProbeError>;

    /// Unbinds the driver from a device it successfully probed.
    fn remove(&mut self, dev: &PciDev);

    /// Returns the first table entry matching `info`.
    fn match_device(&self, info: &PciDeviceInfo) -> Option<PciDeviceId> {
        self.id_table().iter().find(|id| id.matches(info)).copied()
    }
}
