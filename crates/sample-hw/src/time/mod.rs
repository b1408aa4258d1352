//! Deterministic virtual time used by the emulated devices.
//!
//! A [`VirtualClock`] owns the current virtual time and a queue of armed
//! one-shot [`Timer`]s. Time only moves when the host calls
//! [`VirtualClock::advance`], [`VirtualClock::advance_to`] or
//! [`VirtualClock::fire_next`]; due timers fire in deadline order with the
//! clock set to their deadline, on the thread that stepped the clock.
//!
//! Timer callbacks run with no clock lock held, so a callback may re-arm its
//! own timer. Freeing a timer waits for an in-flight callback and guarantees
//! the callback never runs again.

mod clock;
mod timer;

pub use clock::{VirtualClock, NANOSECONDS_PER_SECOND};
pub use timer::{Timer, TimerId};
