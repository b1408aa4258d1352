//! Register-window layout and access validation shared by the sample devices.

/// Window-relative access checks.
pub mod access;
/// Fixed register map of the sample devices.
pub mod map;

pub use access::{validate_window_access, ACCESS_BYTES};
pub use map::{decode_timer_register, TimerRegister, REG_CONTROL, REG_DOORBELL, WINDOW_BYTES};
