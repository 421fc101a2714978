//! C-side task parameter structs.

#![allow(non_camel_case_types)]

use std::ffi::c_void;

use crate::config::DriverConfig;
use crate::error::{Error, Result};
use crate::protocol::echo::ECHO;
use crate::protocol::loopback::{self, LOOPBACK};
use crate::protocol::{EchoParams, LoopbackParams, ProtocolId, TaskParams};

/// Parameters for an echo task. A null pointer means defaults.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct cute_echo_input {
    pub initial_count: i32,
}

/// Parameters for a loopback task. `data` must point to `len` bytes.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct cute_loopback_input {
    pub len: u32,
    pub data: *const u8,
}

/// Decode the opaque parameter pointer passed to a create call.
///
/// Lengths are checked against `config` before any caller memory is
/// copied.
///
/// # Safety
///
/// `parameter` must be null or point to the input struct belonging to
/// `protocol`, and any data it references must be readable.
pub unsafe fn decode(
    protocol: ProtocolId,
    parameter: *const c_void,
    config: &DriverConfig,
) -> Result<TaskParams> {
    match protocol {
        ECHO => Ok(TaskParams::Echo(decode_echo(parameter))),
        LOOPBACK => {
            let input = parameter
                .cast::<cute_loopback_input>()
                .as_ref()
                .ok_or_else(|| missing(loopback::NAME))?;
            let len = input.len as usize;
            if len > config.max_loopback_len {
                return Err(Error::InvalidParameter {
                    protocol: loopback::NAME,
                    reason: format!("{len} bytes exceeds limit of {}", config.max_loopback_len),
                });
            }
            let data = match (len, input.data.is_null()) {
                (0, _) => Vec::new(),
                (_, true) => return Err(missing(loopback::NAME)),
                (len, false) => std::slice::from_raw_parts(input.data, len).to_vec(),
            };
            Ok(TaskParams::Loopback(LoopbackParams { data }))
        }
        other => Err(Error::UnknownProtocol(other)),
    }
}

fn missing(protocol: &'static str) -> Error {
    Error::InvalidParameter {
        protocol,
        reason: "null parameter".into(),
    }
}

/// Echo parameters from a `cute_echo_input` pointer.
///
/// # Safety
///
/// `parameter` must be null or point to a `cute_echo_input`.
pub unsafe fn decode_echo(parameter: *const c_void) -> EchoParams {
    let input = parameter.cast::<cute_echo_input>().as_ref().copied().unwrap_or_default();
    EchoParams {
        initial_count: input.initial_count,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ptr;

    fn decode_default(protocol: ProtocolId, parameter: *const c_void) -> Result<TaskParams> {
        unsafe { decode(protocol, parameter, &DriverConfig::default()) }
    }

    #[test]
    fn test_echo_defaults_on_null() {
        let params = decode_default(ECHO, ptr::null()).unwrap();
        assert_eq!(params, TaskParams::Echo(EchoParams::default()));
    }

    #[test]
    fn test_echo_input() {
        let input = cute_echo_input { initial_count: 41 };
        let params = decode_default(ECHO, (&input as *const cute_echo_input).cast()).unwrap();
        assert_eq!(params, TaskParams::Echo(EchoParams { initial_count: 41 }));
    }

    #[test]
    fn test_loopback_input_copies_data() {
        let data = [1u8, 2, 3];
        let input = cute_loopback_input {
            len: 3,
            data: data.as_ptr(),
        };
        let params = decode_default(LOOPBACK, (&input as *const cute_loopback_input).cast());
        assert_eq!(params.unwrap(), TaskParams::Loopback(LoopbackParams { data: data.to_vec() }));
    }

    #[test]
    fn test_loopback_null_rejected() {
        let err = decode_default(LOOPBACK, ptr::null()).unwrap_err();
        assert!(err.is_driver_fault());

        let input = cute_loopback_input {
            len: 4,
            data: ptr::null(),
        };
        let err = decode_default(LOOPBACK, (&input as *const cute_loopback_input).cast());
        assert!(err.unwrap_err().is_driver_fault());
    }

    #[test]
    fn test_loopback_length_checked_before_copy() {
        // Only one byte is readable; a copy of the claimed length would
        // read far past it.
        let byte = [7u8];
        let input = cute_loopback_input {
            len: u32::MAX,
            data: byte.as_ptr(),
        };
        let err = decode_default(LOOPBACK, (&input as *const cute_loopback_input).cast());
        assert!(matches!(
            err.unwrap_err(),
            Error::InvalidParameter { protocol: "loopback", .. }
        ));

        let config = DriverConfig {
            max_loopback_len: 16,
            ..Default::default()
        };
        let input = cute_loopback_input {
            len: 17,
            data: byte.as_ptr(),
        };
        let parameter = (&input as *const cute_loopback_input).cast();
        let err = unsafe { decode(LOOPBACK, parameter, &config) };
        assert!(err.unwrap_err().is_driver_fault());
    }

    #[test]
    fn test_unknown_protocol() {
        let err = decode_default(1, ptr::null()).unwrap_err();
        assert!(matches!(err, Error::UnknownProtocol(1)));
    }
}
