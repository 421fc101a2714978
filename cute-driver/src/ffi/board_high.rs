//! C surface of the `board_high` board.
//!
//! The board runs on its own context, independent of `init_driver`.

use parking_lot::{const_mutex, Mutex};
use std::ffi::{c_char, c_void};

use super::handles::HandleTable;
use super::input;
use super::raw::cute_driver_result;
use crate::board::BoardHigh;
use crate::envelope::Envelope;
use crate::error::Error;
use crate::protocol::echo::ECHO;
use crate::tracing::prelude::*;

struct BoardRuntime {
    board: BoardHigh,
    tasks: HandleTable,
}

static BOARD: Mutex<Option<BoardRuntime>> = const_mutex(None);

static BOARD_HIGH_NAME_C: &[u8] = b"board_high\0";

fn not_initialized() -> cute_driver_result {
    cute_driver_result::from(&Envelope::from(Error::NotInitialized))
}

#[no_mangle]
pub extern "C" fn init_board_high() -> cute_driver_result {
    let mut runtime = BOARD.lock();
    if runtime.is_none() {
        let config = match super::runtime_config() {
            Ok(config) => config,
            Err(e) => {
                error!(error = %e, "Board configuration rejected");
                return cute_driver_result::from(&Envelope::from(e));
            }
        };
        *runtime = Some(BoardRuntime {
            board: BoardHigh::new(config),
            tasks: HandleTable::default(),
        });
    }
    match runtime.as_mut() {
        Some(rt) => cute_driver_result::from(&rt.board.init_board_high()),
        None => not_initialized(),
    }
}

/// Tear the board down, destroying any tasks still alive, and reset
/// `*handle` to `EMPTY`.
///
/// # Safety
///
/// `handle` must be null or point to a writable `cute_driver_result`.
#[no_mangle]
pub unsafe extern "C" fn destroy_board_high(handle: *mut cute_driver_result) {
    if let Some(BoardRuntime { mut board, mut tasks }) = BOARD.lock().take() {
        if !tasks.is_empty() {
            warn!(live = tasks.len(), "Board destroyed with live echo tasks");
        }
        tasks.drain(board.context_mut());
        board.destroy_board_high();
    }
    if let Some(raw) = handle.as_mut() {
        *raw = cute_driver_result::empty();
    }
}

/// # Safety
///
/// `parameter` must be null or point to a `cute_echo_input`.
#[no_mangle]
pub unsafe extern "C" fn create_echo_task(parameter: *mut c_void) -> cute_driver_result {
    let mut runtime = BOARD.lock();
    let Some(rt) = runtime.as_mut() else {
        return not_initialized();
    };
    let params = input::decode_echo(parameter.cast_const());
    let handle = rt.board.create_echo_task(params);
    rt.tasks.insert(handle)
}

/// # Safety
///
/// `handle` must be null or point to a result returned by
/// `create_echo_task`.
#[no_mangle]
pub unsafe extern "C" fn execute_echo_task(handle: *mut cute_driver_result) -> cute_driver_result {
    let Some(raw) = handle.as_ref() else {
        return cute_driver_result::from(&Envelope::internal_err("null task handle"));
    };
    let mut runtime = BOARD.lock();
    let Some(BoardRuntime { board, tasks }) = runtime.as_mut() else {
        return not_initialized();
    };
    tasks.execute(board.context(), ECHO, raw)
}

/// Release the echo task and reset `*handle` to `EMPTY`. Null is ignored.
///
/// # Safety
///
/// `handle` must be null or point to a writable `cute_driver_result`.
#[no_mangle]
pub unsafe extern "C" fn destroy_echo_task(handle: *mut cute_driver_result) {
    let Some(raw) = handle.as_mut() else {
        return;
    };
    if let Some(BoardRuntime { board, tasks }) = BOARD.lock().as_mut() {
        tasks.destroy(board.context_mut(), ECHO, raw);
    }
    *raw = cute_driver_result::empty();
}

/// Static NUL-terminated board name. Never freed.
#[no_mangle]
pub extern "C" fn get_board_high_name() -> *const c_char {
    BOARD_HIGH_NAME_C.as_ptr().cast()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::CStr;

    #[test]
    fn test_name_is_c_string() {
        let name = unsafe { CStr::from_ptr(get_board_high_name()) };
        assert_eq!(name.to_str().unwrap(), BoardHigh::get_board_high_name());
    }
}
