//! Typed facade over the eye tracker service contract.

use crate::api::codes::SdkError;
use crate::api::types::{CalibrationPoint, Eye, TrackerAvailability, Version};
use crate::ipc::{ClientMessageBody, ServiceClient, ServiceMessageBody};

/// One live connection to the service, exposing the remote contract as typed
/// calls. Replaced wholesale on reconnect.
pub struct EyeTrackerService {
    client: ServiceClient,
}

impl EyeTrackerService {
    pub fn new(client: ServiceClient) -> Self {
        Self { client }
    }

    /// Tear the connection down without firing the disconnect delegate.
    pub fn shutdown(&self) {
        self.client.begin_shutdown();
    }

    pub fn tracker_availability(&self) -> Result<TrackerAvailability, SdkError> {
        match self.request(ClientMessageBody::GetTrackerAvailability)? {
            ServiceMessageBody::IntValue { value } => Ok(TrackerAvailability::from_i32(value)),
            other => Err(unexpected(other)),
        }
    }

    /// Ask the service to start streaming gaze data; returns the UDP port
    /// the stream is published on.
    pub fn start_gaze_stream(&self) -> Result<i32, SdkError> {
        match self.request(ClientMessageBody::StartGazeStream)? {
            ServiceMessageBody::IntValue { value } => Ok(value),
            other => Err(unexpected(other)),
        }
    }

    pub fn stop_gaze_stream(&self) -> Result<(), SdkError> {
        self.expect_ack(ClientMessageBody::StopGazeStream)
    }

    pub fn subscribe_events(&self) -> Result<(), SdkError> {
        self.expect_ack(ClientMessageBody::SubscribeToTrackerEvents)
    }

    pub fn unsubscribe_events(&self) -> Result<(), SdkError> {
        self.expect_ack(ClientMessageBody::UnsubscribeFromTrackerEvents)
    }

    pub fn versions(&self) -> Result<(Version, Version), SdkError> {
        match self.request(ClientMessageBody::GetVersions)? {
            ServiceMessageBody::Versions { service, firmware } => Ok((service, firmware)),
            other => Err(unexpected(other)),
        }
    }

    pub fn dominant_eye(&self) -> Result<Eye, SdkError> {
        match self.request(ClientMessageBody::GetDominantEye)? {
            ServiceMessageBody::IntValue { value } => Ok(Eye::from_i32(value)),
            other => Err(unexpected(other)),
        }
    }

    pub fn is_calibrated(&self) -> Result<bool, SdkError> {
        match self.request(ClientMessageBody::IsCalibrated)? {
            ServiceMessageBody::BoolValue { value } => Ok(value),
            other => Err(unexpected(other)),
        }
    }

    pub fn start_calibration(&self) -> Result<(), SdkError> {
        self.expect_ack(ClientMessageBody::StartCalibration)
    }

    /// Tell the service the engine is ready to display points; the reply
    /// carries the first point of the sequence.
    pub fn ready_for_point(&self) -> Result<CalibrationPoint, SdkError> {
        match self.request(ClientMessageBody::ReadyForPoint)? {
            ServiceMessageBody::InitialPoint { x, y } => Ok(CalibrationPoint { x, y }),
            other => Err(unexpected(other)),
        }
    }

    pub fn abort_calibration(&self) -> Result<(), SdkError> {
        self.expect_ack(ClientMessageBody::AbortCalibration)
    }

    fn request(&self, body: ClientMessageBody) -> Result<ServiceMessageBody, SdkError> {
        match self.client.request(body)? {
            ServiceMessageBody::Error { message } => Err(SdkError::Service(message)),
            reply => Ok(reply),
        }
    }

    fn expect_ack(&self, body: ClientMessageBody) -> Result<(), SdkError> {
        match self.request(body)? {
            ServiceMessageBody::Success => Ok(()),
            other => Err(unexpected(other)),
        }
    }
}

fn unexpected(reply: ServiceMessageBody) -> SdkError {
    log::error!("[SERVICE] unexpected reply: {:?}", reply);
    SdkError::UnexpectedReply
}
