//! The `cute_driver_result` struct and its constructors.

#![allow(non_camel_case_types)]

use std::ffi::{c_char, c_void, CStr};

use crate::envelope::{Envelope, EnvelopeCode, CUTE_STACK_MAXIMUM};
use crate::error::{Error, Result};
use crate::heap::HeapBuffer;

/// Inline length of a task handle result.
pub const TASK_REF_LEN: usize = 12;

/// Payload storage: inline bytes or a pointer, selected by `code`.
#[repr(C)]
#[derive(Clone, Copy)]
pub union cute_driver_payload {
    pub heap_data: *mut c_void,
    pub stack_data: [u8; CUTE_STACK_MAXIMUM],
}

/// C layout of an [`Envelope`].
///
/// Only `len` bytes of `stack_data` are meaningful. `heap_data` is only
/// meaningful for `HEAP_OK`; the driver owns that memory.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct cute_driver_result {
    pub code: u32,
    pub len: u32,
    pub result: cute_driver_payload,
}

impl cute_driver_result {
    pub fn empty() -> Self {
        Self::inline(EnvelopeCode::Empty, &[])
    }

    fn inline(code: EnvelopeCode, bytes: &[u8]) -> Self {
        let mut stack_data = [0u8; CUTE_STACK_MAXIMUM];
        let len = bytes.len().min(CUTE_STACK_MAXIMUM);
        stack_data[..len].copy_from_slice(&bytes[..len]);
        Self {
            code: code as u32,
            len: len as u32,
            result: cute_driver_payload { stack_data },
        }
    }

    fn heap(data: *mut c_void, len: u32) -> Self {
        Self {
            code: EnvelopeCode::HeapOk as u32,
            len,
            result: cute_driver_payload { heap_data: data },
        }
    }

    /// Lower an envelope to its C form.
    ///
    /// Heap payloads are copied into `stash` and the result points there,
    /// so the pointer stays valid for as long as the caller keeps `stash`
    /// untouched.
    pub fn from_envelope(envelope: &Envelope, stash: &mut Vec<u8>) -> Self {
        match envelope {
            Envelope::Heap(buffer) => {
                *stash = buffer.to_vec();
                match u32::try_from(stash.len()) {
                    Ok(len) => Self::heap(stash.as_mut_ptr().cast(), len),
                    Err(_) => Self::from_envelope_plain(&Envelope::internal_err(
                        "heap payload exceeds u32 length",
                    )),
                }
            }
            other => Self::from_envelope_plain(other),
        }
    }

    /// Lower an envelope without a stash.
    ///
    /// A heap payload has nowhere to live here, so it becomes an
    /// `INTERNAL_ERROR` rather than a pointer to freed memory.
    pub fn from_envelope_plain(envelope: &Envelope) -> Self {
        match envelope {
            Envelope::Empty => Self::empty(),
            Envelope::Stack(bytes) => Self::inline(EnvelopeCode::StackOk, bytes.as_slice()),
            Envelope::InternalError(bytes) => {
                Self::inline(EnvelopeCode::InternalError, bytes.as_slice())
            }
            Envelope::DriverError(bytes) => {
                Self::inline(EnvelopeCode::DriverError, bytes.as_slice())
            }
            Envelope::Heap(_) => {
                Self::inline(EnvelopeCode::InternalError, b"heap payload requires a stash")
            }
        }
    }

    pub fn code(&self) -> Option<EnvelopeCode> {
        EnvelopeCode::from_repr(self.code)
    }

    /// Inline bytes for `STACK_OK` and the error codes.
    pub fn inline_bytes(&self) -> Option<&[u8]> {
        match self.code()? {
            EnvelopeCode::StackOk | EnvelopeCode::InternalError | EnvelopeCode::DriverError => {
                let len = (self.len as usize).min(CUTE_STACK_MAXIMUM);
                // SAFETY: every constructor for these codes initializes stack_data.
                let data = unsafe { &self.result.stack_data };
                Some(&data[..len])
            }
            _ => None,
        }
    }

    /// Table id and slot key carried by a successful create.
    ///
    /// The payload is 12 bytes: the issuing table's id (u32 LE) followed
    /// by the slot key (u64 LE).
    pub fn task_ref(&self) -> Option<(u32, u64)> {
        if self.code() != Some(EnvelopeCode::StackOk) {
            return None;
        }
        let bytes: [u8; TASK_REF_LEN] = self.inline_bytes()?.try_into().ok()?;
        let (table, key) = bytes.split_at(4);
        Some((
            u32::from_le_bytes(table.try_into().ok()?),
            u64::from_le_bytes(key.try_into().ok()?),
        ))
    }

    /// Raise the C form back to an envelope.
    ///
    /// # Safety
    ///
    /// For `HEAP_OK`, `heap_data` must be null or point to `len` readable
    /// bytes. They are copied; the envelope does not borrow C memory.
    pub unsafe fn to_envelope(&self) -> Result<Envelope> {
        let code = self
            .code()
            .ok_or_else(|| Error::Internal(format!("invalid result code {}", self.code)))?;
        let message =
            || String::from_utf8_lossy(self.inline_bytes().unwrap_or_default()).into_owned();
        match code {
            EnvelopeCode::Empty => Ok(Envelope::empty()),
            EnvelopeCode::StackOk => Envelope::stack_ok(self.inline_bytes().unwrap_or_default()),
            EnvelopeCode::InternalError => Ok(Envelope::internal_err(message())),
            EnvelopeCode::DriverError => Ok(Envelope::driver_err(message())),
            EnvelopeCode::HeapOk => {
                let data = self.result.heap_data;
                if data.is_null() {
                    return Err(Error::Internal("HEAP_OK with null pointer".into()));
                }
                let bytes = std::slice::from_raw_parts(data.cast::<u8>(), self.len as usize);
                Ok(Envelope::heap_ok(&HeapBuffer::new(bytes.to_vec())))
            }
        }
    }
}

impl From<&Envelope> for cute_driver_result {
    fn from(envelope: &Envelope) -> Self {
        Self::from_envelope_plain(envelope)
    }
}

impl Default for cute_driver_result {
    fn default() -> Self {
        Self::empty()
    }
}

/// Read a C string for an error message, tolerating null and bad UTF-8.
///
/// # Safety
///
/// `message` must be null or a valid NUL-terminated string.
unsafe fn c_message(message: *const c_char) -> String {
    if message.is_null() {
        return String::from("(null)");
    }
    CStr::from_ptr(message).to_string_lossy().into_owned()
}

#[no_mangle]
pub extern "C" fn cute_empty_ok() -> cute_driver_result {
    cute_driver_result::empty()
}

/// # Safety
///
/// `data` must point to `length` readable bytes when `length` is non-zero
/// and within capacity.
#[no_mangle]
pub unsafe extern "C" fn cute_stack_ok(length: u32, data: *const c_void) -> cute_driver_result {
    let length = length as usize;
    if length > CUTE_STACK_MAXIMUM {
        return cute_driver_result::from(&Envelope::from(Error::PayloadTooLarge {
            len: length,
            max: CUTE_STACK_MAXIMUM,
        }));
    }
    if length == 0 {
        return cute_driver_result::inline(EnvelopeCode::StackOk, &[]);
    }
    if data.is_null() {
        return cute_driver_result::from(&Envelope::internal_err("cute_stack_ok: null data"));
    }
    let bytes = std::slice::from_raw_parts(data.cast::<u8>(), length);
    cute_driver_result::inline(EnvelopeCode::StackOk, bytes)
}

/// The pointer is recorded as given; the caller keeps ownership.
#[no_mangle]
pub extern "C" fn cute_heap_ok(length: u32, data: *mut c_void) -> cute_driver_result {
    cute_driver_result::heap(data, length)
}

/// # Safety
///
/// `message` must be null or a valid NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn cute_internal_err(message: *const c_char) -> cute_driver_result {
    cute_driver_result::from(&Envelope::internal_err(c_message(message)))
}

/// # Safety
///
/// `message` must be null or a valid NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn cute_driver_err(message: *const c_char) -> cute_driver_result {
    cute_driver_result::from(&Envelope::driver_err(c_message(message)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::CString;

    #[test]
    fn test_layout() {
        assert_eq!(std::mem::size_of::<cute_driver_payload>(), CUTE_STACK_MAXIMUM);
        assert_eq!(std::mem::offset_of!(cute_driver_result, result), 8);
    }

    #[test]
    fn test_empty() {
        let raw = cute_empty_ok();
        assert_eq!(raw.code(), Some(EnvelopeCode::Empty));
        assert_eq!(raw.len, 0);
    }

    #[test]
    fn test_stack_ok() {
        let data = [1u8, 2, 3, 4];
        let raw = unsafe { cute_stack_ok(4, data.as_ptr().cast()) };
        assert_eq!(raw.code(), Some(EnvelopeCode::StackOk));
        assert_eq!(raw.inline_bytes().unwrap(), &data);

        let max = [9u8; CUTE_STACK_MAXIMUM];
        let raw = unsafe { cute_stack_ok(CUTE_STACK_MAXIMUM as u32, max.as_ptr().cast()) };
        assert_eq!(raw.len as usize, CUTE_STACK_MAXIMUM);
    }

    #[test]
    fn test_stack_ok_oversize_never_reads() {
        let raw = unsafe { cute_stack_ok(CUTE_STACK_MAXIMUM as u32 + 1, std::ptr::null()) };
        assert_eq!(raw.code(), Some(EnvelopeCode::InternalError));
    }

    #[test]
    fn test_heap_ok_references_caller_memory() {
        let mut data = vec![5u8; 1000];
        let raw = cute_heap_ok(1000, data.as_mut_ptr().cast());
        assert_eq!(raw.code(), Some(EnvelopeCode::HeapOk));
        assert_eq!(unsafe { raw.result.heap_data }, data.as_mut_ptr().cast::<c_void>());

        let envelope = unsafe { raw.to_envelope() }.unwrap();
        assert_eq!(envelope.to_vec().unwrap(), data);
    }

    #[test]
    fn test_error_messages() {
        let msg = CString::new("bus fault").unwrap();
        let raw = unsafe { cute_driver_err(msg.as_ptr()) };
        assert_eq!(raw.code(), Some(EnvelopeCode::DriverError));
        assert_eq!(raw.inline_bytes().unwrap(), b"bus fault");

        let long = CString::new("x".repeat(400)).unwrap();
        let raw = unsafe { cute_internal_err(long.as_ptr()) };
        assert_eq!(raw.len as usize, CUTE_STACK_MAXIMUM);

        let raw = unsafe { cute_internal_err(std::ptr::null()) };
        assert_eq!(raw.inline_bytes().unwrap(), b"(null)");
    }

    #[test]
    fn test_from_envelope_heap_uses_stash() {
        let buffer = HeapBuffer::new(vec![3u8; 600]);
        let mut stash = Vec::new();
        let raw = cute_driver_result::from_envelope(&Envelope::heap_ok(&buffer), &mut stash);
        assert_eq!(raw.len, 600);
        assert_eq!(unsafe { raw.result.heap_data }, stash.as_mut_ptr().cast::<c_void>());
    }

    #[test]
    fn test_heap_without_stash_is_error() {
        let buffer = HeapBuffer::new(vec![0xAA; 600]);
        let raw = cute_driver_result::from(&Envelope::heap_ok(&buffer));
        assert_eq!(raw.code(), Some(EnvelopeCode::InternalError));
        assert_eq!(raw.inline_bytes().unwrap(), b"heap payload requires a stash");
    }

    #[test]
    fn test_task_ref() {
        let mut payload = 3u32.to_le_bytes().to_vec();
        payload.extend_from_slice(&77u64.to_le_bytes());
        let raw = cute_driver_result::from(&Envelope::stack_ok(&payload).unwrap());
        assert_eq!(raw.task_ref(), Some((3, 77)));

        let short = cute_driver_result::from(&Envelope::stack_ok(&77u64.to_le_bytes()).unwrap());
        assert_eq!(short.task_ref(), None);
        assert_eq!(cute_empty_ok().task_ref(), None);
    }

    #[test]
    fn test_invalid_code() {
        let mut raw = cute_empty_ok();
        raw.code = 9;
        assert!(unsafe { raw.to_envelope() }.is_err());
    }
}
