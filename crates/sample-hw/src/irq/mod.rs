//! Level-triggered interrupt lines and handler dispatch.

mod controller;

pub use controller::{InterruptController, IrqLine, LineStats};

/// Interrupt line number on an [`InterruptController`].
pub type IrqNumber = u32;

/// Handler verdict, mirroring whether the device was actually serviced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IrqReturn {
    /// The handler did not recognize the interrupt.
    None,
    /// The handler serviced the interrupt.
    Handled,
}

/// Interrupt handler bound to a line. Receives the line number.
pub type IrqHandler = std::sync::Arc<dyn Fn(IrqNumber) -> IrqReturn + Send + Sync>;
