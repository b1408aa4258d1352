use thiserror::Error;

use crate::irq::IrqNumber;

/// Direction of a register-window access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum AccessKind {
    /// Device read.
    Read,
    /// Device write.
    Write,
}

impl std::fmt::Display for AccessKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Read => f.write_str("read"),
            Self::Write => f.write_str("write"),
        }
    }
}

/// Resource acquisition failures surfaced to the caller of `probe`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum ResourceError {
    /// The device does not implement the requested BAR.
    #[error("BAR {bar} is not implemented by the device")]
    NoSuchBar {
        /// Requested BAR index.
        bar: u8,
    },
    /// The BAR exists but decodes I/O space, not memory.
    #[error("BAR {bar} is not a memory BAR")]
    NotMemoryBar {
        /// Requested BAR index.
        bar: u8,
    },
    /// The BAR region is already claimed by another mapping.
    #[error("BAR {bar} region is already claimed")]
    RegionBusy {
        /// Requested BAR index.
        bar: u8,
    },
    /// The device was detached from its bus slot.
    #[error("device is no longer attached to the bus")]
    DeviceGone,
}

/// Failures placing a device on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum AttachError {
    /// Every bus slot is occupied.
    #[error("no free bus slot")]
    NoFreeSlot,
    /// The MMIO aperture cannot hold another BAR of this size.
    #[error("MMIO aperture exhausted placing a {size}-byte BAR")]
    ApertureExhausted {
        /// Size of the BAR that did not fit.
        size: u64,
    },
    /// The device needs an interrupt but every line is handed out.
    #[error("no free interrupt line")]
    NoFreeIrq,
}

/// Interrupt-line claim failures.
///
/// Drivers are free to treat these as non-fatal; the sample timer driver logs
/// them and keeps its register mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum InterruptBindError {
    /// The device has no interrupt pin routed to a line.
    #[error("device has no interrupt line assigned")]
    NoInterruptLine,
    /// The interrupt number is outside the controller's range.
    #[error("irq {irq} does not exist on this controller")]
    NoSuchLine {
        /// Requested interrupt number.
        irq: IrqNumber,
    },
    /// Another handler already owns the line; sharing is not supported.
    #[error("irq {irq} is already bound to `{owner}`")]
    AlreadyBound {
        /// Requested interrupt number.
        irq: IrqNumber,
        /// Name the current owner registered with.
        owner: &'static str,
    },
}

/// Stray or malformed register-window traffic.
///
/// Violations are never returned as errors. Devices log them and record them
/// in their diagnostics, the way hardware tolerates bad bus cycles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum ProtocolViolation {
    /// Access to an offset with no register behind it.
    #[error("{access} of undefined register at offset {offset:#x}")]
    UndefinedRegister {
        /// Offset relative to the window base.
        offset: u64,
        /// Access direction.
        access: AccessKind,
    },
    /// Access past the end of the mapped window.
    #[error("{access} at offset {offset:#x} is outside the {len}-byte window")]
    OutOfWindow {
        /// Offset relative to the window base.
        offset: u64,
        /// Window length in bytes.
        len: u64,
        /// Access direction.
        access: AccessKind,
    },
}

impl ProtocolViolation {
    /// Returns the offending offset.
    #[must_use]
    pub const fn offset(self) -> u64 {
        match self {
            Self::UndefinedRegister { offset, .. } | Self::OutOfWindow { offset, .. } => offset,
        }
    }

    /// Returns the access direction that caused the violation.
    #[must_use]
    pub const fn access(self) -> AccessKind {
        match self {
            Self::UndefinedRegister { access, .. } | Self::OutOfWindow { access, .. } => access,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{AccessKind, AttachError, InterruptBindError, ProtocolViolation, ResourceError};

    #[test]
    fn violation_messages_carry_offset_and_direction() {
        let violation = ProtocolViolation::UndefinedRegister {
            offset: 0x40,
            access: AccessKind::Write,
        };
        assert_eq!(
            violation.to_string(),
            "write of undefined register at offset 0x40"
        );
        assert_eq!(violation.offset(), 0x40);
        assert_eq!(violation.access(), AccessKind::Write);
    }

    #[test]
    fn out_of_window_message_names_window_length() {
        let violation = ProtocolViolation::OutOfWindow {
            offset: 0x80,
            len: 128,
            access: AccessKind::Read,
        };
        assert_eq!(
            violation.to_string(),
            "read at offset 0x80 is outside the 128-byte window"
        );
    }

    #[test]
    fn resource_and_irq_errors_render() {
        assert_eq!(
            ResourceError::RegionBusy { bar: 0 }.to_string(),
            "BAR 0 region is already claimed"
        );
        assert_eq!(
            InterruptBindError::AlreadyBound {
                irq: 5,
                owner: "other"
            }
            .to_string(),
            "irq 5 is already bound to `other`"
        );
        assert_eq!(AttachError::NoFreeIrq.to_string(), "no free interrupt line");
    }
}
