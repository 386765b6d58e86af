//! C ABI exported to the managed layer.
//!
//! Every function returns a value from the [`super::codes`] contract unless
//! its doc says otherwise. Out-parameters are written only on
//! [`super::codes::SUCCESSFUL`]. String buffers are caller-owned UTF-8
//! destinations; the written byte length comes back through `out_len`.

use crate::api::codes::{self, SdkError};
use crate::api::sdk;
use crate::engine_notifier::{self, EngineCallback};
use crate::logging;
use std::os::raw::c_char;
use std::time::Duration;

fn translate(result: Result<(), SdkError>) -> i32 {
    match result {
        Ok(()) => codes::SUCCESSFUL,
        Err(e) => sdk::report_error(&e),
    }
}

fn write_str(buffer: *mut c_char, capacity: i32, out_len: *mut i32, value: &str) -> i32 {
    if buffer.is_null() || out_len.is_null() || capacity < 0 {
        return codes::UNKNOWN_ERROR;
    }
    let bytes = value.as_bytes();
    if bytes.len() > capacity as usize {
        sdk::set_error_message(format!(
            "string of {} bytes does not fit the {}-byte buffer",
            bytes.len(),
            capacity
        ));
        return codes::UNKNOWN_ERROR_CHECK_ERROR_MESSAGE;
    }
    unsafe {
        std::ptr::copy_nonoverlapping(bytes.as_ptr(), buffer as *mut u8, bytes.len());
        *out_len = bytes.len() as i32;
    }
    codes::SUCCESSFUL
}

/// Connect to the eye tracker service. `state_ptr` is registered as a state
/// mirror cell until the matching `gazelink_dispose` call.
#[no_mangle]
pub extern "C" fn gazelink_initialize(state_ptr: *mut i32, timeout_ms: u64) -> i32 {
    if state_ptr.is_null() {
        return codes::UNKNOWN_ERROR;
    }
    translate(sdk::initialize(
        state_ptr as usize,
        Duration::from_millis(timeout_ms),
    ))
}

#[no_mangle]
pub extern "C" fn gazelink_dispose(state_ptr: *mut i32) -> i32 {
    if state_ptr.is_null() {
        return codes::UNKNOWN_ERROR;
    }
    translate(sdk::dispose(state_ptr as usize))
}

#[no_mangle]
pub extern "C" fn gazelink_get_tracker_availability(out_availability: *mut i32) -> i32 {
    if out_availability.is_null() {
        return codes::UNKNOWN_ERROR;
    }
    match sdk::tracker_availability() {
        Ok(availability) => {
            unsafe { *out_availability = availability.as_i32() };
            codes::SUCCESSFUL
        }
        Err(e) => sdk::report_error(&e),
    }
}

/// Start the gaze data stream and write the UDP port into `out_port`.
#[no_mangle]
pub extern "C" fn gazelink_get_gaze_stream_port(out_port: *mut i32) -> i32 {
    if out_port.is_null() {
        return codes::UNKNOWN_ERROR;
    }
    match sdk::gaze_stream_port() {
        Ok(port) => {
            unsafe { *out_port = port };
            codes::SUCCESSFUL
        }
        Err(e) => sdk::report_error(&e),
    }
}

#[no_mangle]
pub extern "C" fn gazelink_stop_gaze_stream() -> i32 {
    translate(sdk::stop_gaze_stream())
}

#[no_mangle]
pub extern "C" fn gazelink_subscribe_events() -> i32 {
    translate(sdk::subscribe_events())
}

#[no_mangle]
pub extern "C" fn gazelink_unsubscribe_events() -> i32 {
    translate(sdk::unsubscribe_events())
}

/// Begin calibration. `request_ptr` must point at 8 writable bytes,
/// `response_ptr` at 16 readable bytes, `status_ptr` and `index_ptr` at
/// `i32` cells; all four must stay valid until the procedure finishes.
#[no_mangle]
pub extern "C" fn gazelink_start_calibration(
    request_ptr: *mut u8,
    response_ptr: *const u8,
    status_ptr: *mut i32,
    index_ptr: *mut i32,
) -> i32 {
    if request_ptr.is_null() || response_ptr.is_null() || status_ptr.is_null() || index_ptr.is_null()
    {
        return codes::UNKNOWN_ERROR;
    }
    translate(sdk::start_calibration(
        request_ptr as usize,
        response_ptr as usize,
        status_ptr as usize,
        index_ptr as usize,
    ))
}

#[no_mangle]
pub extern "C" fn gazelink_ready_to_display_point() -> i32 {
    translate(sdk::ready_to_display_point())
}

#[no_mangle]
pub extern "C" fn gazelink_abort_calibration() -> i32 {
    translate(sdk::abort_calibration())
}

/// Service and firmware versions joined with `'\n'`.
#[no_mangle]
pub extern "C" fn gazelink_get_versions(
    buffer: *mut c_char,
    capacity: i32,
    out_len: *mut i32,
) -> i32 {
    match sdk::versions() {
        Ok(versions) => write_str(buffer, capacity, out_len, &versions),
        Err(e) => sdk::report_error(&e),
    }
}

/// Returns the written byte length of the last error message, or 0 when the
/// buffer is unusable. Not an error code.
#[no_mangle]
pub extern "C" fn gazelink_get_last_error_message(buffer: *mut c_char, capacity: i32) -> i32 {
    if buffer.is_null() || capacity < 0 {
        return 0;
    }
    let message = sdk::last_error_message();
    let bytes = message.as_bytes();
    let written = bytes.len().min(capacity as usize);
    unsafe {
        std::ptr::copy_nonoverlapping(bytes.as_ptr(), buffer as *mut u8, written);
    }
    written as i32
}

/// Dominant eye value; [`crate::api::types::Eye::Both`] when not connected.
/// Not an error code.
#[no_mangle]
pub extern "C" fn gazelink_get_dominant_eye() -> i32 {
    sdk::dominant_eye().as_i32()
}

/// 1 when the tracker is calibrated, 0 otherwise. Not an error code.
#[no_mangle]
pub extern "C" fn gazelink_is_calibrated() -> i32 {
    i32::from(sdk::is_calibrated())
}

/// Register a callback receiving tracker availability ordinals. Pass `None`
/// (null) to clear.
#[no_mangle]
pub extern "C" fn gazelink_set_availability_callback(callback: Option<EngineCallback>) {
    engine_notifier::set_availability_callback(callback);
}

/// Register a callback receiving raw SDK state values. Pass `None` (null)
/// to clear.
#[no_mangle]
pub extern "C" fn gazelink_set_state_callback(callback: Option<EngineCallback>) {
    engine_notifier::set_state_callback(callback);
}

/// Cap logging: 0 trace, 1 debug, 2 info, 3 warn, anything else error.
#[no_mangle]
pub extern "C" fn gazelink_set_log_level(level: i32) {
    logging::set_level_from_code(level);
}

/// Plugin version as a dotted triple. Returns the written byte length.
#[no_mangle]
pub extern "C" fn gazelink_get_plugin_version(buffer: *mut c_char, capacity: i32) -> i32 {
    if buffer.is_null() || capacity < 0 {
        return 0;
    }
    let version = env!("CARGO_PKG_VERSION");
    let bytes = version.as_bytes();
    let written = bytes.len().min(capacity as usize);
    unsafe {
        std::ptr::copy_nonoverlapping(bytes.as_ptr(), buffer as *mut u8, written);
    }
    written as i32
}
