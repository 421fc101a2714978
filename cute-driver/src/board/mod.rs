//! Board specialisations.
//!
//! A board wraps a [`DriverContext`](crate::context::DriverContext) and
//! exposes the protocol-specific lifecycle its firmware uses.

pub mod high;

pub use high::BoardHigh;

use crate::envelope::Envelope;

/// Common surface of every board.
pub trait Board {
    /// Stable board name.
    fn name(&self) -> &'static str;

    /// Bring up the protocols this board uses.
    fn init(&mut self) -> Envelope;
}
