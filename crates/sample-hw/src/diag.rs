//! Per-device diagnostic counters.

use crate::fault::ProtocolViolation;

/// Diagnostic counters kept by each sample device.
///
/// All counters saturate. They are observation-only and never influence
/// device behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct DeviceDiag {
    /// Register-window reads serviced.
    pub reads: u32,
    /// Register-window writes serviced.
    pub writes: u32,
    /// Timer firings that reached the device.
    pub firings: u32,
    /// Times the timer was re-armed from its own firing.
    pub rearms: u32,
    /// Doorbell writes (interrupt acknowledgements).
    pub acks: u32,
    /// Stray accesses to undefined offsets.
    pub protocol_violations: u32,
    /// Most recent stray access, if any.
    pub last_violation: Option<ProtocolViolation>,
}

impl DeviceDiag {
    /// Creates zeroed counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[allow(clippy::missing_const_for_fn)]
    pub(crate) fn record_read(&mut self) {
        self.reads = self.reads.saturating_add(1);
    }

    #[allow(clippy::missing_const_for_fn)]
    pub(crate) fn record_write(&mut self) {
        self.writes = self.writes.saturating_add(1);
    }

    #[allow(clippy::missing_const_for_fn)]
    pub(crate) fn record_firing(&mut self) {
        self.firings = self.firings.saturating_add(1);
    }

    #[allow(clippy::missing_const_for_fn)]
    pub(crate) fn record_rearm(&mut self) {
        self.rearms = self.rearms.saturating_add(1);
    }

    #[allow(clippy::missing_const_for_fn)]
    pub(crate) fn record_ack(&mut self) {
        self.acks = self.acks.saturating_add(1);
    }

    /// Records a stray access and remembers it as the latest one.
    #[allow(clippy::missing_const_for_fn)]
    pub fn record_violation(&mut self, violation: ProtocolViolation) {
        self.protocol_violations = self.protocol_violations.saturating_add(1);
        self.last_violation = Some(violation);
    }
}
