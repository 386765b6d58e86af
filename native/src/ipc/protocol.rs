// Wire protocol to the eye tracker service: length-prefixed JSON frames.

use crate::api::types::{ActionResult, Version};
use crate::ipc::IpcError;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt};

/// Upper bound on a single frame body. Anything larger is a protocol
/// violation and terminates the connection.
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Message sent from the bridge to the service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientMessage {
    /// Correlation id echoed by the service reply. `None` for messages that
    /// answer a service-originated request (the service's id is echoed
    /// instead) or expect no reply.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<u32>,

    #[serde(flatten)]
    pub body: ClientMessageBody,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessageBody {
    GetTrackerAvailability,
    StartGazeStream,
    StopGazeStream,
    SubscribeToTrackerEvents,
    UnsubscribeFromTrackerEvents,
    GetVersions,
    GetDominantEye,
    IsCalibrated,
    StartCalibration,
    ReadyForPoint,
    AbortCalibration,
    /// Answer to a service [`ServiceMessageBody::PresentPoint`] push: the
    /// point the engine was displaying when the push arrived.
    PointDisplayed {
        x: f32,
        y: f32,
        display_start_ms: i64,
    },
}

/// Message sent from the service to the bridge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceMessage {
    /// Echo of the request id for replies; a fresh id on service-originated
    /// requests that need an answer; `None` for one-way events.
    pub message_id: Option<u32>,

    #[serde(flatten)]
    pub body: ServiceMessageBody,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServiceMessageBody {
    // replies
    Success,
    Error { message: String },
    IntValue { value: i32 },
    BoolValue { value: bool },
    Versions { service: Version, firmware: Version },
    InitialPoint { x: f32, y: f32 },
    // service-originated
    TrackerAvailabilityChanged { availability: i32 },
    PresentPoint { x: f32, y: f32 },
    CalibrationFinished { result: ActionResult },
}

impl ServiceMessageBody {
    /// True for bodies that answer a bridge request and must be routed to
    /// the waiter registered under the echoed correlation id.
    pub fn is_reply(&self) -> bool {
        matches!(
            self,
            Self::Success
                | Self::Error { .. }
                | Self::IntValue { .. }
                | Self::BoolValue { .. }
                | Self::Versions { .. }
                | Self::InitialPoint { .. }
        )
    }
}

/// Frame a message: 4-byte little-endian body length, then the JSON body.
pub fn encode_frame<T: Serialize>(message: &T) -> Result<Vec<u8>, IpcError> {
    let body = serde_json::to_vec(message)?;
    if body.len() > MAX_FRAME_SIZE {
        return Err(IpcError::FrameTooLarge(body.len()));
    }
    let mut frame = Vec::with_capacity(4 + body.len());
    frame.extend_from_slice(&(body.len() as u32).to_le_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Read one frame body from the stream.
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Vec<u8>, IpcError> {
    let mut length = [0u8; 4];
    reader.read_exact(&mut length).await?;
    let length = u32::from_le_bytes(length) as usize;
    if length > MAX_FRAME_SIZE {
        return Err(IpcError::FrameTooLarge(length));
    }
    let mut body = vec![0u8; length];
    reader.read_exact(&mut body).await?;
    Ok(body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_carries_tag_and_correlation_id() {
        let message = ClientMessage {
            message_id: Some(7),
            body: ClientMessageBody::StartGazeStream,
        };
        let json = serde_json::to_string(&message).unwrap();
        assert_eq!(json, r#"{"message_id":7,"type":"StartGazeStream"}"#);
    }

    #[test]
    fn missing_correlation_id_parses_as_none() {
        let message: ServiceMessage =
            serde_json::from_str(r#"{"type":"TrackerAvailabilityChanged","availability":2}"#)
                .unwrap();
        assert_eq!(message.message_id, None);
        assert!(!message.body.is_reply());
    }

    #[test]
    fn replies_are_distinguished_from_events() {
        let reply: ServiceMessage =
            serde_json::from_str(r#"{"message_id":3,"type":"IntValue","value":6300}"#).unwrap();
        assert!(reply.body.is_reply());
        match reply.body {
            ServiceMessageBody::IntValue { value } => assert_eq!(value, 6300),
            other => panic!("unexpected body: {:?}", other),
        }
    }

    #[test]
    fn frames_round_trip_through_the_codec() {
        let message = ClientMessage {
            message_id: None,
            body: ClientMessageBody::PointDisplayed {
                x: 0.25,
                y: 0.75,
                display_start_ms: 1_700_000_000_123,
            },
        };
        let frame = encode_frame(&message).unwrap();
        let length = u32::from_le_bytes(frame[..4].try_into().unwrap()) as usize;
        assert_eq!(length, frame.len() - 4);

        let decoded: ClientMessage = serde_json::from_slice(&frame[4..]).unwrap();
        match decoded.body {
            ClientMessageBody::PointDisplayed {
                x,
                y,
                display_start_ms,
            } => {
                assert_eq!(x, 0.25);
                assert_eq!(y, 0.75);
                assert_eq!(display_start_ms, 1_700_000_000_123);
            }
            other => panic!("unexpected body: {:?}", other),
        }
    }

    #[tokio::test]
    async fn oversized_frames_are_rejected_before_allocation() {
        let mut stream: &[u8] = &[0xff, 0xff, 0xff, 0x7f];
        match read_frame(&mut stream).await {
            Err(IpcError::FrameTooLarge(_)) => {}
            other => panic!("unexpected result: {:?}", other),
        }
    }
}
