//! cute-driver: result envelope and driver task lifecycle for embedded
//! boards.
//!
//! Every driver operation reports through an [`Envelope`]. Tasks are
//! created, executed and destroyed on a [`DriverContext`]; boards such as
//! [`BoardHigh`] wrap a context for the protocols they use. The [`ffi`]
//! module exports the same surface to C.

pub mod board;
pub mod config;
pub mod context;
pub mod envelope;
pub mod error;
pub mod ffi;
pub mod heap;
pub mod protocol;
pub mod task;
pub mod tracing;

pub use board::{Board, BoardHigh};
pub use config::{DriverConfig, InitPolicy};
pub use context::DriverContext;
pub use envelope::{Envelope, EnvelopeCode, CUTE_STACK_MAXIMUM};
pub use error::{Error, Result};
pub use heap::{HeapBuffer, HeapLedger};
pub use protocol::{EchoOutput, EchoParams, LoopbackParams, ProtocolId, TaskParams};
pub use task::{TaskHandle, TaskPhase};

const fn parse_version_part(s: &str) -> u32 {
    let bytes = s.as_bytes();
    let mut value = 0u32;
    let mut i = 0;
    while i < bytes.len() {
        value = value * 10 + (bytes[i] - b'0') as u32;
        i += 1;
    }
    value
}

/// Crate version packed as `major << 16 | minor << 8 | patch`.
///
/// Zero is reserved for "unspecified", so a 0.0.0 build reports 1.
pub const DRIVER_VERSION: u32 = {
    let packed = (parse_version_part(env!("CARGO_PKG_VERSION_MAJOR")) << 16)
        | (parse_version_part(env!("CARGO_PKG_VERSION_MINOR")) << 8)
        | parse_version_part(env!("CARGO_PKG_VERSION_PATCH"));
    if packed == 0 {
        1
    } else {
        packed
    }
};

pub fn driver_version() -> u32 {
    DRIVER_VERSION
}
