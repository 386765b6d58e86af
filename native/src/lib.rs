pub mod api;
pub mod buffers;
pub mod calibration;
pub mod engine_notifier;
pub mod ipc;
pub mod logging;
pub mod service;
pub mod state;
pub mod testkit;

use arc_swap::ArcSwapOption;
use calibration::CalibrationProcedure;
use service::EyeTrackerService;
use state::SdkState;
use std::sync::{Arc, Mutex};

// Global instances shared between the engine thread and the IPC reader task.
pub static SDK_STATE: SdkState = SdkState::new();
pub static SERVICE: ArcSwapOption<EyeTrackerService> = ArcSwapOption::const_empty();
pub static CALIBRATION: Mutex<Option<Arc<CalibrationProcedure>>> = Mutex::new(None);

// Re-export the SDK surface for embedding Rust code.
pub use api::codes::{self, SdkError};
pub use api::sdk::{
    abort_calibration, dispose, dominant_eye, gaze_stream_port, initialize, is_calibrated,
    last_error_message, ready_to_display_point, start_calibration, stop_gaze_stream,
    subscribe_events, tracker_availability, unsubscribe_events, versions,
};
pub use api::types::{
    ActionResult, CalibrationPoint, CalibrationPointResponse, Eye, TrackerAvailability, Version,
};
pub use calibration::CalibrationStatus;
pub use state::StateFlags;

pub fn get_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}
