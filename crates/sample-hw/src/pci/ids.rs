use std::fmt;

/// Wildcard for [`PciDeviceId`] fields.
pub const PCI_ANY_ID: u16 = 0xFFFF;
/// Base class code for devices that fit no other class.
pub const PCI_CLASS_OTHERS: u8 = 0xFF;

/// Identity a device model advertises in its configuration header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PciDeviceInfo {
    /// Vendor ID.
    pub vendor_id: u16,
    /// Device ID.
    pub device_id: u16,
    /// Subsystem vendor ID.
    pub subsystem_vendor_id: u16,
    /// Subsystem device ID.
    pub subsystem_device_id: u16,
    /// Revision ID.
    pub revision: u8,
    /// Base class code.
    pub class: u8,
    /// Subclass code.
    pub subclass: u8,
    /// Programming interface.
    pub prog_if: u8,
}

impl PciDeviceInfo {
    /// Creates an identity in the "other" class with zero subsystem IDs.
    #[must_use]
    pub const fn new(vendor_id: u16, device_id: u16) -> Self {
        Self {
            vendor_id,
            device_id,
            subsystem_vendor_id: 0,
            subsystem_device_id: 0,
            revision: 0,
            class: PCI_CLASS_OTHERS,
            subclass: 0,
            prog_if: 0,
        }
    }

    /// Returns `(class << 16) | (subclass << 8) | prog_if`.
    #[must_use]
    pub const fn class_code(&self) -> u32 {
        ((self.class as u32) << 16) | ((self.subclass as u32) << 8) | (self.prog_if as u32)
    }
}

impl fmt::Display for PciDeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04x}:{:04x}", self.vendor_id, self.device_id)
    }
}

/// Driver-side match entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PciDeviceId {
    /// Vendor ID, or [`PCI_ANY_ID`].
    pub vendor: u16,
    /// Device ID, or [`PCI_ANY_ID`].
    pub device: u16,
    /// Subsystem vendor ID, or [`PCI_ANY_ID`].
    pub subvendor: u16,
    /// Subsystem device ID, or [`PCI_ANY_ID`].
    pub subdevice: u16,
    /// Class code compared under `class_mask`.
    pub class: u32,
    /// Mask applied before comparing class codes; zero ignores the class.
    pub class_mask: u32,
}

impl PciDeviceId {
    /// Matches one vendor/device pair with wildcard subsystem fields.
    #[must_use]
    pub const fn new(vendor: u16, device: u16) -> Self {
        Self {
            vendor,
            device,
            subvendor: PCI_ANY_ID,
            subdevice: PCI_ANY_ID,
            class: 0,
            class_mask: 0,
        }
    }

    /// Returns `true` if `info` satisfies every non-wildcard field.
    #[must_use]
    pub const fn matches(&self, info: &PciDeviceInfo) -> bool {
        if self.vendor != PCI_ANY_ID && self.vendor != info.vendor_id {
            return false;
        }
        if self.device != PCI_ANY_ID && self.device != info.device_id {
            return false;
        }
        if self.subvendor != PCI_ANY_ID && self.subvendor != info.subsystem_vendor_id {
            return false;
        }
        if self.subdevice != PCI_ANY_ID && self.subdevice != info.subsystem_device_id {
            return false;
        }
        self.class_mask == 0 || (info.class_code() & self.class_mask) == (self.class & self.class_mask)
    }
}
