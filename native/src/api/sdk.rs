//! Top-level SDK operations called by the managed layer (through the C ABI
//! in [`crate::api::ffi`]) or by embedding Rust code directly.

use crate::api::codes::SdkError;
use crate::api::types::{ActionResult, Eye, TrackerAvailability};
use crate::calibration::CalibrationProcedure;
use crate::buffers::IntCell;
use crate::ipc::{service_socket_path, ConnectionDelegates, ServiceClient};
use crate::service::EyeTrackerService;
use crate::state::StateFlags;
use crate::{engine_notifier, logging, CALIBRATION, SDK_STATE, SERVICE};
use log::{debug, error, warn};
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;

static LAST_ERROR: Mutex<String> = Mutex::new(String::new());
static BOOTSTRAP: Once = Once::new();

/// One-time process setup: logging, crash reporting, environment.
fn bootstrap() {
    BOOTSTRAP.call_once(|| {
        let _ = dotenvy::dotenv();
        logging::init_logger();
        logging::init_crash_logger();
        let dsn = std::env::var("SENTRY_DSN").ok();
        let environment = std::env::var("SENTRY_ENVIRONMENT").ok();
        logging::init_sentry(dsn.as_deref(), environment.as_deref());
    });
}

fn service() -> Result<Arc<EyeTrackerService>, SdkError> {
    SERVICE.load_full().ok_or(SdkError::NotConnected)
}

fn current_calibration() -> Option<Arc<CalibrationProcedure>> {
    CALIBRATION.lock().unwrap().clone()
}

/// Last error message stored for [`crate::api::codes::UNKNOWN_ERROR_CHECK_ERROR_MESSAGE`].
pub fn last_error_message() -> String {
    LAST_ERROR.lock().unwrap().clone()
}

pub fn set_error_message(message: impl Into<String>) {
    *LAST_ERROR.lock().unwrap() = message.into();
}

/// Log `error`, store its message when the code contract asks the managed
/// layer to fetch one, and return the raw code.
pub fn report_error(error: &SdkError) -> i32 {
    let code = error.code();
    if code == super::codes::UNKNOWN_ERROR_CHECK_ERROR_MESSAGE {
        set_error_message(error.to_string());
    }
    log::error!("[SDK] {}", error);
    code
}

/// Connect to the eye tracker service and register `state_addr` as a state
/// mirror cell. The cell keeps receiving the raw flag value until it is
/// passed to [`dispose`].
pub fn initialize(state_addr: usize, timeout: Duration) -> Result<(), SdkError> {
    bootstrap();
    debug!(
        "[INIT] initialize, timeout = {:?} pointer = {:#x}",
        timeout, state_addr
    );
    SDK_STATE.register_mirror(IntCell::new(state_addr));
    if SDK_STATE.is_in(StateFlags::CONNECTED) {
        return Err(SdkError::AlreadyConnected);
    }

    let delegates = ConnectionDelegates::new()
        .on_availability_changed(|availability| {
            debug!("[SERVICE] tracker availability changed: {}", availability);
            engine_notifier::send_availability_changed(availability);
        })
        .on_present_point(|next| match current_calibration() {
            Some(procedure) => procedure.show_next_point(next),
            None => {
                warn!("[CALIBRATION] point pushed with no ongoing procedure");
                crate::api::types::CalibrationPointResponse {
                    x: 0.0,
                    y: 0.0,
                    display_start_ms: 0,
                }
            }
        })
        .on_calibration_finished(|result| {
            if let Some(procedure) = current_calibration() {
                procedure.finish(result);
            }
        })
        .on_disconnected(|| {
            warn!("[IPC] service connection lost");
            SDK_STATE.set(StateFlags::empty());
            if let Some(procedure) = CALIBRATION.lock().unwrap().take() {
                procedure.finish(ActionResult::error("Service disconnected."));
            }
        });

    let path = service_socket_path();
    let client = match ServiceClient::connect(&path, timeout, delegates) {
        Ok(client) => client,
        Err(e) => {
            SDK_STATE.unregister_mirror(state_addr);
            error!("[INIT] failed to connect to service at {:?}: {}", path, e);
            return Err(e.into());
        }
    };

    SERVICE.store(Some(Arc::new(EyeTrackerService::new(client))));
    SDK_STATE.set(StateFlags::CONNECTED);
    Ok(())
}

/// Detach the state cell registered by [`initialize`]. The connection is
/// torn down once the last cell is gone.
pub fn dispose(state_addr: usize) -> Result<(), SdkError> {
    debug!("[CLEANUP] dispose, pointer = {:#x}", state_addr);
    if SDK_STATE.is_disconnected() {
        SDK_STATE.unregister_mirror(state_addr);
        return Ok(());
    }
    if SDK_STATE.mirror_count() > 1 {
        SDK_STATE.unregister_mirror(state_addr);
        return Ok(());
    }

    SDK_STATE.set(StateFlags::empty());
    SDK_STATE.unregister_mirror(state_addr);
    if let Some(service) = SERVICE.swap(None) {
        service.shutdown();
    }
    let _ = CALIBRATION.lock().unwrap().take();
    debug!("[CLEANUP] disconnected from service");
    Ok(())
}

pub fn tracker_availability() -> Result<TrackerAvailability, SdkError> {
    debug!("[SDK] tracker_availability");
    if !SDK_STATE.is_in(StateFlags::CONNECTED) {
        return Err(SdkError::NotConnected);
    }
    service()?.tracker_availability()
}

/// Start the gaze data stream; returns the UDP port the service publishes
/// samples on.
pub fn gaze_stream_port() -> Result<i32, SdkError> {
    debug!("[SDK] gaze_stream_port");
    if !SDK_STATE.is_in(StateFlags::CONNECTED) {
        return Err(SdkError::NotConnected);
    }
    let port = service()?.start_gaze_stream()?;
    SDK_STATE.add(StateFlags::ATTACHED_TO_GAZE_STREAM);
    Ok(port)
}

/// Tell the service the gaze stream is no longer needed. The attached flag
/// is dropped even when the service call fails.
pub fn stop_gaze_stream() -> Result<(), SdkError> {
    debug!("[SDK] stop_gaze_stream");
    if !SDK_STATE.is_in(StateFlags::ATTACHED_TO_GAZE_STREAM) {
        return Ok(());
    }
    let result = service().and_then(|service| service.stop_gaze_stream());
    SDK_STATE.remove(StateFlags::ATTACHED_TO_GAZE_STREAM);
    result
}

pub fn subscribe_events() -> Result<(), SdkError> {
    debug!("[SDK] subscribe_events");
    if !SDK_STATE.is_in(StateFlags::CONNECTED) {
        return Err(SdkError::NotConnected);
    }
    if SDK_STATE.is_in(StateFlags::SUBSCRIBED_TO_EVENTS) {
        return Err(SdkError::AlreadySubscribed);
    }
    service()?.subscribe_events()?;
    SDK_STATE.add(StateFlags::SUBSCRIBED_TO_EVENTS);
    Ok(())
}

pub fn unsubscribe_events() -> Result<(), SdkError> {
    debug!("[SDK] unsubscribe_events");
    if !SDK_STATE.is_in(StateFlags::SUBSCRIBED_TO_EVENTS) {
        return Ok(());
    }
    if !SDK_STATE.is_in(StateFlags::CONNECTED) {
        return Ok(());
    }
    service()?.unsubscribe_events()?;
    SDK_STATE.remove(StateFlags::SUBSCRIBED_TO_EVENTS);
    debug!("[SDK] unsubscribed from hardware events");
    Ok(())
}

/// Begin a calibration procedure over the four engine-owned memory regions.
/// See [`crate::calibration`] for the buffer contract.
pub fn start_calibration(
    request_addr: usize,
    response_addr: usize,
    status_addr: usize,
    index_addr: usize,
) -> Result<(), SdkError> {
    debug!("[SDK] start_calibration");
    if !SDK_STATE.is_in(StateFlags::CONNECTED) {
        return Err(SdkError::NotConnected);
    }
    if SDK_STATE.is_in(StateFlags::CALIBRATING) {
        return Err(SdkError::AnotherCalibrationOngoing);
    }

    let procedure = Arc::new(CalibrationProcedure::new(
        request_addr,
        response_addr,
        status_addr,
        index_addr,
    ));
    procedure.set_status_listener(|_, new_status| {
        if new_status.is_finished() {
            SDK_STATE.remove(StateFlags::CALIBRATING);
        }
    });

    service()?.start_calibration()?;

    *CALIBRATION.lock().unwrap() = Some(procedure);
    SDK_STATE.add(StateFlags::CALIBRATING);
    Ok(())
}

/// Report that the engine is ready to display calibration points; the first
/// point lands in the request buffer.
pub fn ready_to_display_point() -> Result<(), SdkError> {
    debug!("[SDK] ready_to_display_point");
    if !SDK_STATE.is_in(StateFlags::CONNECTED) {
        return Err(SdkError::NotConnected);
    }
    if !SDK_STATE.is_in(StateFlags::CALIBRATING) {
        return Err(SdkError::NoCalibrationOngoing);
    }
    let procedure = current_calibration().ok_or(SdkError::NoCalibrationOngoing)?;
    match service()?.ready_for_point() {
        Ok(point) => {
            procedure.set_point(point);
            Ok(())
        }
        Err(SdkError::Service(message)) => {
            procedure.finish(ActionResult::error(message.clone()));
            Err(SdkError::Service(message))
        }
        Err(e) => Err(e),
    }
}

/// Abort the ongoing calibration. The procedure always finishes failed:
/// either with the service's error or with "Aborted by user.".
pub fn abort_calibration() -> Result<(), SdkError> {
    debug!("[SDK] abort_calibration");
    if !SDK_STATE.is_in(StateFlags::CONNECTED) {
        return Err(SdkError::NotConnected);
    }
    if !SDK_STATE.is_in(StateFlags::CALIBRATING) {
        return Err(SdkError::NoCalibrationOngoing);
    }
    let procedure = match current_calibration() {
        Some(procedure) if !procedure.is_finished() => procedure,
        _ => return Ok(()),
    };
    SDK_STATE.remove(StateFlags::CALIBRATING);
    match service()?.abort_calibration() {
        Ok(()) => {
            procedure.finish(ActionResult::error("Aborted by user."));
            Ok(())
        }
        Err(SdkError::Service(message)) => {
            procedure.finish(ActionResult::error(message.clone()));
            Err(SdkError::Service(message))
        }
        Err(e) => {
            procedure.finish(ActionResult::error("Aborted by user."));
            Err(e)
        }
    }
}

/// Service and firmware versions joined with `'\n'`.
pub fn versions() -> Result<String, SdkError> {
    debug!("[SDK] versions");
    if !SDK_STATE.is_in(StateFlags::CONNECTED) {
        return Err(SdkError::NotConnected);
    }
    let (service_version, firmware_version) = service()?.versions()?;
    Ok(format!("{}\n{}", service_version, firmware_version))
}

/// Dominant eye; [`Eye::Both`] when not connected or on a service failure.
pub fn dominant_eye() -> Eye {
    debug!("[SDK] dominant_eye");
    if !SDK_STATE.is_in(StateFlags::CONNECTED) {
        return Eye::Both;
    }
    match service().and_then(|service| service.dominant_eye()) {
        Ok(eye) => eye,
        Err(e) => {
            warn!("[SDK] dominant eye query failed: {}", e);
            Eye::Both
        }
    }
}

/// Whether the tracker has a valid calibration; `false` when not connected
/// or on a service failure.
pub fn is_calibrated() -> bool {
    debug!("[SDK] is_calibrated");
    if !SDK_STATE.is_in(StateFlags::CONNECTED) {
        return false;
    }
    match service().and_then(|service| service.is_calibrated()) {
        Ok(calibrated) => calibrated,
        Err(e) => {
            warn!("[SDK] calibration query failed: {}", e);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::codes;
    use crate::api::types::{CalibrationPoint, CalibrationPointResponse, Version};
    use crate::calibration::{
        encode_calibration_point, encode_point_response, CALIBRATION_POINT_SIZE,
        POINT_RESPONSE_SIZE,
    };
    use crate::testkit::{temp_socket_path, MockEyeTrackerService};
    use std::time::Instant;

    // The SDK state is process-global; tests touching it run serialized.
    static SDK_GUARD: Mutex<()> = Mutex::new(());

    fn read_i32(cell: &i32) -> i32 {
        unsafe { std::ptr::read_volatile(cell) }
    }

    fn wait_for(what: &str, condition: impl Fn() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if condition() {
                return;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        panic!("timed out waiting for {}", what);
    }

    #[test]
    fn lifecycle_against_mock_service() {
        let _guard = SDK_GUARD.lock().unwrap_or_else(|e| e.into_inner());
        let path = temp_socket_path("lifecycle");
        std::env::set_var(crate::ipc::SOCKET_ENV_VAR, &path);

        let mut state: i32 = -1;
        let state_addr = &mut state as *mut i32 as usize;

        // No service listening yet: binding fails and the mirror is released.
        let err = initialize(state_addr, Duration::from_millis(200)).unwrap_err();
        assert_eq!(err.code(), codes::FAILED_TO_BIND_TO_SERVICE);
        assert_eq!(crate::SDK_STATE.mirror_count(), 0);

        let mock = MockEyeTrackerService::start(&path).unwrap();
        initialize(state_addr, Duration::from_secs(2)).unwrap();
        assert_eq!(read_i32(&state), 1);

        // A second handle attaches to the live connection and detaches
        // without tearing it down.
        let mut second_state: i32 = -1;
        let second_addr = &mut second_state as *mut i32 as usize;
        let err = initialize(second_addr, Duration::from_secs(2)).unwrap_err();
        assert_eq!(err.code(), codes::SDK_ALREADY_CONNECTED);
        assert_eq!(read_i32(&second_state), 1);
        dispose(second_addr).unwrap();
        assert_eq!(read_i32(&state), 1);

        mock.configure(|behavior| behavior.availability = 0);
        assert_eq!(
            tracker_availability().unwrap(),
            TrackerAvailability::Available
        );

        mock.configure(|behavior| behavior.gaze_stream = Ok(50123));
        assert_eq!(gaze_stream_port().unwrap(), 50123);
        assert_eq!(read_i32(&state), 1 | 4);
        stop_gaze_stream().unwrap();
        assert_eq!(read_i32(&state), 1);

        // Service-reported failure travels through the C ABI as code 1 plus
        // a retrievable message.
        mock.configure(|behavior| behavior.gaze_stream = Err("camera busy".to_string()));
        let mut port: i32 = 0;
        assert_eq!(
            crate::api::ffi::gazelink_get_gaze_stream_port(&mut port),
            codes::UNKNOWN_ERROR_CHECK_ERROR_MESSAGE
        );
        assert_eq!(last_error_message(), "camera busy");
        assert_eq!(read_i32(&state), 1);

        let (availability_tx, availability_rx) = std::sync::mpsc::channel();
        crate::engine_notifier::register_availability_hook(move |availability| {
            let _ = availability_tx.send(availability);
        });
        subscribe_events().unwrap();
        assert!(mock.is_subscribed());
        assert_eq!(read_i32(&state), 1 | 8);
        let err = subscribe_events().unwrap_err();
        assert_eq!(err.code(), codes::ALREADY_SUBSCRIBED_TO_EVENTS);
        mock.notify_availability(1).unwrap();
        assert_eq!(
            availability_rx.recv_timeout(Duration::from_secs(2)).unwrap(),
            1
        );

        mock.configure(|behavior| {
            behavior.service_version = Version::new(3, 1, 0);
            behavior.firmware_version = Version::new(0, 9, 2);
        });
        assert_eq!(versions().unwrap(), "3.1.0\n0.9.2");
        mock.configure(|behavior| behavior.dominant_eye = 1);
        assert_eq!(dominant_eye(), Eye::Right);
        mock.configure(|behavior| behavior.calibrated = true);
        assert!(is_calibrated());

        // Calibration round trip over the shared buffers.
        let mut request = [0u8; CALIBRATION_POINT_SIZE];
        let mut response = [0u8; POINT_RESPONSE_SIZE];
        let mut status: i32 = 0;
        let mut index: i32 = 0;
        let request_addr = request.as_mut_ptr() as usize;
        let response_addr = response.as_mut_ptr() as usize;
        let status_addr = &mut status as *mut i32 as usize;
        let index_addr = &mut index as *mut i32 as usize;

        start_calibration(request_addr, response_addr, status_addr, index_addr).unwrap();
        assert_eq!(read_i32(&status), 1);
        assert_eq!(read_i32(&state), 1 | 8 | 2);

        let err =
            start_calibration(request_addr, response_addr, status_addr, index_addr).unwrap_err();
        assert_eq!(err.code(), codes::ANOTHER_CALIBRATION_IS_ONGOING);

        mock.configure(|behavior| behavior.ready_point = Ok(CalibrationPoint { x: 0.5, y: 0.5 }));
        ready_to_display_point().unwrap();
        assert_eq!(
            request,
            encode_calibration_point(&CalibrationPoint { x: 0.5, y: 0.5 })
        );
        assert_eq!(read_i32(&index), 1);

        response = encode_point_response(&CalibrationPointResponse {
            x: 0.5,
            y: 0.5,
            display_start_ms: 123_456_789,
        });
        let displayed = mock.present_point(0.25, 0.75).unwrap();
        assert_eq!(
            displayed,
            CalibrationPointResponse {
                x: 0.5,
                y: 0.5,
                display_start_ms: 123_456_789,
            }
        );
        assert_eq!(
            request,
            encode_calibration_point(&CalibrationPoint { x: 0.25, y: 0.75 })
        );
        assert_eq!(read_i32(&index), 2);

        mock.finish_calibration(ActionResult::success()).unwrap();
        wait_for("calibration to finish", || read_i32(&status) == 2);
        wait_for("calibrating flag to clear", || read_i32(&state) == (1 | 8));

        // Abort flow on a fresh procedure.
        status = 0;
        index = 0;
        start_calibration(request_addr, response_addr, status_addr, index_addr).unwrap();
        assert_eq!(read_i32(&status), 1);
        abort_calibration().unwrap();
        assert_eq!(read_i32(&status), 3);
        assert_eq!(read_i32(&state), 1 | 8);
        let err = abort_calibration().unwrap_err();
        assert_eq!(err.code(), codes::NO_CALIBRATION_IS_ONGOING);

        unsubscribe_events().unwrap();
        assert_eq!(read_i32(&state), 1);

        dispose(state_addr).unwrap();
        assert_eq!(read_i32(&state), 0);
        assert_eq!(
            tracker_availability().unwrap_err().code(),
            codes::SDK_IS_NOT_CONNECTED_TO_SERVICE
        );
        drop(mock);
    }

    #[test]
    fn service_disconnect_fails_ongoing_calibration() {
        let _guard = SDK_GUARD.lock().unwrap_or_else(|e| e.into_inner());
        let path = temp_socket_path("disconnect");
        std::env::set_var(crate::ipc::SOCKET_ENV_VAR, &path);
        let mock = MockEyeTrackerService::start(&path).unwrap();

        let mut state: i32 = -1;
        let state_addr = &mut state as *mut i32 as usize;
        initialize(state_addr, Duration::from_secs(2)).unwrap();
        assert_eq!(read_i32(&state), 1);

        let mut request = [0u8; CALIBRATION_POINT_SIZE];
        let mut response = [0u8; POINT_RESPONSE_SIZE];
        let mut status: i32 = 0;
        let mut index: i32 = 0;
        start_calibration(
            request.as_mut_ptr() as usize,
            response.as_mut_ptr() as usize,
            &mut status as *mut i32 as usize,
            &mut index as *mut i32 as usize,
        )
        .unwrap();
        assert_eq!(read_i32(&status), 1);

        // Service process dies mid-calibration.
        drop(mock);
        wait_for("state reset on disconnect", || read_i32(&state) == 0);
        wait_for("calibration failure on disconnect", || {
            read_i32(&status) == 3
        });

        dispose(state_addr).unwrap();
    }
}
