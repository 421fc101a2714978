//! Result envelope returned by every driver operation.
//!
//! An [`Envelope`] is a closed sum type: each variant carries only its own
//! payload, so reading inline bytes out of a heap result (or the other way
//! round) cannot be written. Inline storage is a fixed
//! [`CUTE_STACK_MAXIMUM`]-byte array, which keeps the envelope a fixed-size
//! value that can be returned by value.
//!
//! Payload and message limits differ on purpose:
//!
//! - [`Envelope::stack_ok`] rejects data longer than the inline capacity
//!   with [`Error::PayloadTooLarge`]. Payload bytes are never dropped.
//! - [`Envelope::internal_err`] and [`Envelope::driver_err`] truncate
//!   messages to the inline capacity. The kept bytes are an exact prefix of
//!   the original message, and the truncation is logged at `warn`.

use std::borrow::Cow;
use std::fmt;

use strum::{Display, EnumIter, FromRepr};

use crate::error::{Error, Result};
use crate::heap::HeapBuffer;
use crate::tracing::prelude::*;

/// Inline payload capacity in bytes.
pub const CUTE_STACK_MAXIMUM: usize = 256;

/// Discriminant of an envelope, numbered as on the C ABI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter, FromRepr)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[repr(u32)]
pub enum EnvelopeCode {
    Empty = 0,
    StackOk = 1,
    HeapOk = 2,
    InternalError = 3,
    DriverError = 4,
}

/// Fixed-capacity inline byte storage.
#[derive(Clone, Copy)]
pub struct InlineBytes {
    len: usize,
    data: [u8; CUTE_STACK_MAXIMUM],
}

impl InlineBytes {
    /// Copy `bytes` in, rejecting anything over capacity.
    pub fn copy_from(bytes: &[u8]) -> Result<Self> {
        if bytes.len() > CUTE_STACK_MAXIMUM {
            return Err(Error::PayloadTooLarge {
                len: bytes.len(),
                max: CUTE_STACK_MAXIMUM,
            });
        }
        let mut data = [0u8; CUTE_STACK_MAXIMUM];
        data[..bytes.len()].copy_from_slice(bytes);
        Ok(Self {
            len: bytes.len(),
            data,
        })
    }

    /// Copy at most capacity bytes in. The flag reports whether any were cut.
    pub fn truncated_from(bytes: &[u8]) -> (Self, bool) {
        let kept = bytes.len().min(CUTE_STACK_MAXIMUM);
        let mut data = [0u8; CUTE_STACK_MAXIMUM];
        data[..kept].copy_from_slice(&bytes[..kept]);
        (Self { len: kept, data }, kept < bytes.len())
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.len]
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl PartialEq for InlineBytes {
    fn eq(&self, other: &Self) -> bool {
        self.as_slice() == other.as_slice()
    }
}

impl Eq for InlineBytes {}

impl fmt::Debug for InlineBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InlineBytes({})", hex::encode(self.as_slice()))
    }
}

/// Outcome of a driver operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Envelope {
    /// Nothing to report.
    Empty,
    /// Small payload copied inline.
    Stack(InlineBytes),
    /// Large payload referenced, not copied.
    Heap(HeapBuffer),
    /// Subsystem failure with its message.
    InternalError(InlineBytes),
    /// Protocol or board failure with its message.
    DriverError(InlineBytes),
}

impl Envelope {
    pub fn empty() -> Self {
        Envelope::Empty
    }

    /// Copy `data` into inline storage.
    pub fn stack_ok(data: &[u8]) -> Result<Self> {
        Ok(Envelope::Stack(InlineBytes::copy_from(data)?))
    }

    /// Reference `buffer` without copying it.
    ///
    /// The envelope does not own the buffer; whoever allocated it decides
    /// when it is released.
    pub fn heap_ok(buffer: &HeapBuffer) -> Self {
        Envelope::Heap(buffer.clone())
    }

    /// Internal error; messages over capacity are truncated.
    pub fn internal_err(message: impl AsRef<str>) -> Self {
        Envelope::InternalError(inline_message(message.as_ref()))
    }

    /// Driver error; messages over capacity are truncated.
    pub fn driver_err(message: impl AsRef<str>) -> Self {
        Envelope::DriverError(inline_message(message.as_ref()))
    }

    pub fn code(&self) -> EnvelopeCode {
        match self {
            Envelope::Empty => EnvelopeCode::Empty,
            Envelope::Stack(_) => EnvelopeCode::StackOk,
            Envelope::Heap(_) => EnvelopeCode::HeapOk,
            Envelope::InternalError(_) => EnvelopeCode::InternalError,
            Envelope::DriverError(_) => EnvelopeCode::DriverError,
        }
    }

    /// Payload or message length in bytes; zero for `Empty`.
    pub fn len(&self) -> usize {
        match self {
            Envelope::Empty => 0,
            Envelope::Heap(buffer) => buffer.len(),
            Envelope::Stack(bytes)
            | Envelope::InternalError(bytes)
            | Envelope::DriverError(bytes) => bytes.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Envelope::Empty | Envelope::Stack(_) | Envelope::Heap(_))
    }

    pub fn is_err(&self) -> bool {
        !self.is_ok()
    }

    /// Inline payload, for `STACK_OK` only.
    pub fn inline_bytes(&self) -> Option<&[u8]> {
        match self {
            Envelope::Stack(bytes) => Some(bytes.as_slice()),
            _ => None,
        }
    }

    /// Heap reference, for `HEAP_OK` only.
    pub fn heap(&self) -> Option<&HeapBuffer> {
        match self {
            Envelope::Heap(buffer) => Some(buffer),
            _ => None,
        }
    }

    /// Error message, for the two error codes only.
    pub fn error_message(&self) -> Option<Cow<'_, str>> {
        match self {
            Envelope::InternalError(bytes) | Envelope::DriverError(bytes) => {
                Some(String::from_utf8_lossy(bytes.as_slice()))
            }
            _ => None,
        }
    }

    /// Copy of the payload for either ok variant carrying data.
    pub fn to_vec(&self) -> Option<Vec<u8>> {
        match self {
            Envelope::Stack(bytes) => Some(bytes.as_slice().to_vec()),
            Envelope::Heap(buffer) => Some(buffer.to_vec()),
            _ => None,
        }
    }

    /// Turn the two error codes back into crate errors.
    pub fn check(&self) -> Result<()> {
        match self {
            Envelope::InternalError(_) => Err(Error::Internal(self.message_string())),
            Envelope::DriverError(_) => Err(Error::Driver(self.message_string())),
            _ => Ok(()),
        }
    }

    fn message_string(&self) -> String {
        self.error_message().map(Cow::into_owned).unwrap_or_default()
    }
}

impl From<&Error> for Envelope {
    fn from(error: &Error) -> Self {
        if error.is_driver_fault() {
            Envelope::driver_err(error.to_string())
        } else {
            Envelope::internal_err(error.to_string())
        }
    }
}

impl From<Error> for Envelope {
    fn from(error: Error) -> Self {
        Envelope::from(&error)
    }
}

impl fmt::Display for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Envelope::Empty => write!(f, "{}", self.code()),
            Envelope::Stack(_) | Envelope::Heap(_) => {
                write!(f, "{} ({} bytes)", self.code(), self.len())
            }
            Envelope::InternalError(_) | Envelope::DriverError(_) => {
                write!(f, "{}: {}", self.code(), self.message_string())
            }
        }
    }
}

fn inline_message(message: &str) -> InlineBytes {
    let (bytes, truncated) = InlineBytes::truncated_from(message.as_bytes());
    if truncated {
        warn!(
            len = message.len(),
            max = CUTE_STACK_MAXIMUM,
            "Error message truncated to inline capacity"
        );
    }
    bytes
}
