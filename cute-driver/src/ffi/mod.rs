//! C ABI.
//!
//! Firmware talks to the driver through `cute_driver_result` values and a
//! handful of `extern "C"` functions. The generic lifecycle lives on one
//! process-wide context created by `init_driver`; the `board_high` surface
//! has its own, see [`board_high`].
//!
//! Nothing here unwinds into C: every failure comes back as an error
//! result.

use parking_lot::{const_mutex, Mutex};
use std::ffi::c_void;

pub mod board_high;
pub mod handles;
pub mod input;
pub mod raw;

pub use handles::{HandleTable, TaskKey};
pub use input::{cute_echo_input, cute_loopback_input};
pub use raw::{cute_driver_payload, cute_driver_result};

use crate::config::DriverConfig;
use crate::context::DriverContext;
use crate::envelope::Envelope;
use crate::error::{Error, Result};
use crate::protocol::{ProtocolId, ProtocolRegistry};
use crate::tracing::prelude::*;

struct Runtime {
    ctx: DriverContext,
    tasks: HandleTable,
}

static RUNTIME: Mutex<Option<Runtime>> = const_mutex(None);

/// Configuration for contexts created through the C surface.
///
/// Also installs the stdout subscriber, unless the host already has one.
pub(crate) fn runtime_config() -> Result<DriverConfig> {
    let config = DriverConfig::from_env()?;
    crate::tracing::try_init_stdout(crate::tracing::parse_level(&config.log_level));
    Ok(config)
}

fn not_initialized() -> cute_driver_result {
    cute_driver_result::from(&Envelope::from(Error::NotInitialized))
}

#[no_mangle]
pub extern "C" fn init_driver() -> cute_driver_result {
    let mut runtime = RUNTIME.lock();
    if runtime.is_none() {
        let config = match runtime_config() {
            Ok(config) => config,
            Err(e) => {
                error!(error = %e, "Driver configuration rejected");
                return cute_driver_result::from(&Envelope::from(e));
            }
        };
        *runtime = Some(Runtime {
            ctx: DriverContext::new(config),
            tasks: HandleTable::default(),
        });
    }
    match runtime.as_mut() {
        Some(rt) => cute_driver_result::from(&rt.ctx.init()),
        None => not_initialized(),
    }
}

/// An unknown protocol is a `DRIVER_ERROR` whether or not the driver is
/// initialized.
///
/// # Safety
///
/// `parameter` must be null or point to the input struct for `protocol`
/// (`cute_echo_input` or `cute_loopback_input`).
#[no_mangle]
pub unsafe extern "C" fn create_driver_task(
    protocol: ProtocolId,
    parameter: *mut c_void,
) -> cute_driver_result {
    if ProtocolRegistry.find(protocol).is_none() {
        warn!(protocol, "Create for unknown protocol");
        return cute_driver_result::from(&Envelope::from(Error::UnknownProtocol(protocol)));
    }
    let mut runtime = RUNTIME.lock();
    let Some(rt) = runtime.as_mut() else {
        return not_initialized();
    };
    match input::decode(protocol, parameter.cast_const(), rt.ctx.config()) {
        Ok(params) => {
            let handle = rt.ctx.create_task(protocol, params);
            rt.tasks.insert(handle)
        }
        Err(e) => {
            warn!(protocol, error = %e, "Task parameters rejected");
            cute_driver_result::from(&Envelope::from(e))
        }
    }
}

/// # Safety
///
/// `handle` must be null or point to a result returned by
/// `create_driver_task`. A `HEAP_OK` result stays valid until the next
/// execute or destroy of the same task.
#[no_mangle]
pub unsafe extern "C" fn execute_driver_task(
    protocol: ProtocolId,
    handle: *mut cute_driver_result,
) -> cute_driver_result {
    let Some(raw) = handle.as_ref() else {
        return cute_driver_result::from(&Envelope::internal_err("null task handle"));
    };
    let mut runtime = RUNTIME.lock();
    let Some(Runtime { ctx, tasks }) = runtime.as_mut() else {
        return not_initialized();
    };
    tasks.execute(ctx, protocol, raw)
}

/// Release the task and reset `*handle` to `EMPTY`. Null is ignored.
///
/// # Safety
///
/// `handle` must be null or point to a writable `cute_driver_result`.
#[no_mangle]
pub unsafe extern "C" fn destroy_driver_task(
    protocol: ProtocolId,
    handle: *mut cute_driver_result,
) {
    let Some(raw) = handle.as_mut() else {
        return;
    };
    if let Some(Runtime { ctx, tasks }) = RUNTIME.lock().as_mut() {
        tasks.destroy(ctx, protocol, raw);
    }
    *raw = cute_driver_result::empty();
}

/// Tear down the process-wide context and every task still on it.
#[no_mangle]
pub extern "C" fn shutdown_driver() {
    if let Some(Runtime { mut ctx, mut tasks }) = RUNTIME.lock().take() {
        tasks.drain(&mut ctx);
        ctx.shutdown();
    }
}

#[no_mangle]
pub extern "C" fn get_driver_version() -> u32 {
    crate::DRIVER_VERSION
}
