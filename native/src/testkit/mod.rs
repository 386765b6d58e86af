//! Test collaborators shipped with the bridge: an in-process service
//! standing in for the real eye tracker process, so engine test suites can
//! drive the full lifecycle without hardware.

pub mod mock_service;

pub use mock_service::{MockEyeTrackerService, ServiceBehavior};

use std::path::PathBuf;

/// Socket path under the system temp directory, unique per process.
pub fn temp_socket_path(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("gazelink-{}-{}.sock", name, std::process::id()))
}
