//! Emulated sample devices.

/// DMA stub that only logs register traffic.
pub mod sample_dma;
/// Periodic timer that raises a level interrupt.
pub mod sample_timer;

pub use sample_dma::{SampleDma, SAMPLE_DMA_DESCRIPTION};
pub use sample_timer::{SampleTimer, SAMPLE_TIMER_DESCRIPTION};
