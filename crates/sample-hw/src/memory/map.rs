//! Fixed register map of the sample timer window.

/// Size in bytes of every sample device's MMIO window.
pub const WINDOW_BYTES: u64 = 128;
/// Control register: reads back the enable bit, writes arm or disarm.
pub const REG_CONTROL: u64 = 0x0;
/// Doorbell register: any write deasserts the interrupt line.
pub const REG_DOORBELL: u64 = 0x8;

/// Registers implemented by the sample timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerRegister {
    /// Enable/disable control at [`REG_CONTROL`].
    Control,
    /// Interrupt acknowledge doorbell at [`REG_DOORBELL`].
    Doorbell,
}

impl TimerRegister {
    /// Returns the window offset of this register.
    #[must_use]
    pub const fn offset(self) -> u64 {
        match self {
            Self::Control => REG_CONTROL,
            Self::Doorbell => REG_DOORBELL,
        }
    }
}

/// Decodes a window offset into the register it addresses.
///
/// Only exact offsets decode; the registers are byte-wide.
#[must_use]
pub const fn decode_timer_register(offset: u64) -> Option<TimerRegister> {
    match offset {
        REG_CONTROL => Some(TimerRegister::Control),
        REG_DOORBELL => Some(TimerRegister::Doorbell),
        _ => None,
    }
}

const _: () = assert!(REG_CONTROL < WINDOW_BYTES && REG_DOORBELL < WINDOW_BYTES);
const _: () = assert!(REG_CONTROL != REG_DOORBELL);

#[cfg(test)]
mod tests {
    use super::{decode_timer_register, TimerRegister, REG_CONTROL, REG_DOORBELL, WINDOW_BYTES};

    #[test]
    fn registers_decode_at_their_offsets() {
        for register in [TimerRegister::Control, TimerRegister::Doorbell] {
            assert_eq!(decode_timer_register(register.offset()), Some(register));
        }
    }

    #[test]
    fn every_other_offset_is_undefined() {
        let defined = (0..WINDOW_BYTES)
            .filter(|offset| decode_timer_register(*offset).is_some())
            .collect::<Vec<_>>();
        assert_eq!(defined, vec![REG_CONTROL, REG_DOORBELL]);
        assert_eq!(decode_timer_register(0x1), None);
        assert_eq!(decode_timer_register(0x40), None);
    }
}
