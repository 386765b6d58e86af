//! Error code contract shared with the managed layer.
//!
//! The managed side switches on these raw values; they must never change.

use crate::ipc::IpcError;
use thiserror::Error;

// universal codes
pub const SUCCESSFUL: i32 = 0;
pub const UNKNOWN_ERROR_CHECK_ERROR_MESSAGE: i32 = 1;
pub const SDK_IS_NOT_CONNECTED_TO_SERVICE: i32 = 2;
pub const UNKNOWN_ERROR: i32 = 3;
// initialization error codes
pub const SDK_ALREADY_CONNECTED: i32 = 10;
pub const FAILED_TO_BIND_TO_SERVICE: i32 = 11;
pub const INITIALIZATION_TIMEOUT: i32 = 12;
// calibration error codes
pub const ANOTHER_CALIBRATION_IS_ONGOING: i32 = 20;
pub const NO_CALIBRATION_IS_ONGOING: i32 = 21;
pub const CALIBRATION_TIMEOUT: i32 = 22;
// reading gaze data
pub const NO_VALID_GAZE_AVAILABLE: i32 = 30;
// events
pub const ALREADY_SUBSCRIBED_TO_EVENTS: i32 = 40;

/// Failures surfaced to the managed layer through the code contract.
#[derive(Error, Debug)]
pub enum SdkError {
    #[error("SDK is not connected to the eye tracker service")]
    NotConnected,
    #[error("SDK is already connected")]
    AlreadyConnected,
    #[error("failed to bind to the eye tracker service: {0}")]
    FailedToBind(String),
    #[error("service did not connect before the timeout")]
    InitializationTimeout,
    #[error("another calibration is ongoing")]
    AnotherCalibrationOngoing,
    #[error("no calibration is ongoing")]
    NoCalibrationOngoing,
    #[error("already subscribed to eye tracker events")]
    AlreadySubscribed,
    /// Error message reported by the service itself.
    #[error("{0}")]
    Service(String),
    #[error("unexpected reply from service")]
    UnexpectedReply,
    #[error(transparent)]
    Ipc(#[from] IpcError),
}

impl SdkError {
    /// Translate into the C ABI error code contract. Errors mapping to
    /// [`UNKNOWN_ERROR_CHECK_ERROR_MESSAGE`] carry a message worth storing
    /// for retrieval by the managed layer.
    pub fn code(&self) -> i32 {
        match self {
            Self::NotConnected => SDK_IS_NOT_CONNECTED_TO_SERVICE,
            Self::AlreadyConnected => SDK_ALREADY_CONNECTED,
            Self::FailedToBind(_) => FAILED_TO_BIND_TO_SERVICE,
            Self::InitializationTimeout => INITIALIZATION_TIMEOUT,
            Self::AnotherCalibrationOngoing => ANOTHER_CALIBRATION_IS_ONGOING,
            Self::NoCalibrationOngoing => NO_CALIBRATION_IS_ONGOING,
            Self::AlreadySubscribed => ALREADY_SUBSCRIBED_TO_EVENTS,
            Self::Service(_) => UNKNOWN_ERROR_CHECK_ERROR_MESSAGE,
            Self::UnexpectedReply => UNKNOWN_ERROR,
            Self::Ipc(IpcError::Bind(_)) => FAILED_TO_BIND_TO_SERVICE,
            Self::Ipc(IpcError::ConnectTimeout) => INITIALIZATION_TIMEOUT,
            Self::Ipc(_) => UNKNOWN_ERROR_CHECK_ERROR_MESSAGE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_follow_the_managed_contract() {
        assert_eq!(SdkError::NotConnected.code(), 2);
        assert_eq!(SdkError::AlreadyConnected.code(), 10);
        assert_eq!(SdkError::InitializationTimeout.code(), 12);
        assert_eq!(SdkError::AnotherCalibrationOngoing.code(), 20);
        assert_eq!(SdkError::NoCalibrationOngoing.code(), 21);
        assert_eq!(SdkError::AlreadySubscribed.code(), 40);
        assert_eq!(SdkError::Service("boom".into()).code(), 1);
        assert_eq!(SdkError::Ipc(IpcError::ConnectTimeout).code(), 12);
        assert_eq!(SdkError::Ipc(IpcError::Disconnected).code(), 1);
    }
}
