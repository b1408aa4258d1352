//! Window-relative access legality checks.

use crate::fault::{AccessKind, ProtocolViolation};

/// Width in bytes of every register-window access.
pub const ACCESS_BYTES: u64 = 1;

/// Checks that a single-byte access at `offset` lies inside a window of `len` bytes.
///
/// # Errors
///
/// Returns [`ProtocolViolation::OutOfWindow`] when the access falls past the
/// end of the window.
pub const fn validate_window_access(
    offset: u64,
    len: u64,
    access: AccessKind,
) -> Result<(), ProtocolViolation> {
    match offset.checked_add(ACCESS_BYTES) {
        Some(end) if end <= len => Ok(()),
        _ => Err(ProtocolViolation::OutOfWindow {
            offset,
            len,
            access,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::validate_window_access;
    use crate::fault::{AccessKind, ProtocolViolation};

    #[test]
    fn last_byte_of_window_is_accessible() {
        assert_eq!(validate_window_access(127, 128, AccessKind::Read), Ok(()));
    }

    #[test]
    fn offsets_past_the_window_are_rejected() {
        assert_eq!(
            validate_window_access(128, 128, AccessKind::Write),
            Err(ProtocolViolation::OutOfWindow {
                offset: 128,
                len: 128,
                access: AccessKind::Write,
            })
        );
        assert!(validate_window_access(u64::MAX, 128, AccessKind::Read).is_err());
    }
}
