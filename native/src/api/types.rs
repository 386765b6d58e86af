use serde::{Deserialize, Serialize};
use std::fmt;

/// Point the engine should display next, in viewport coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationPoint {
    pub x: f32,
    pub y: f32,
}

/// Point the engine actually displayed plus the moment display started
/// (milliseconds since the Unix epoch).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationPointResponse {
    pub x: f32,
    pub y: f32,
    pub display_start_ms: i64,
}

/// Success/error pair used across the service contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionResult {
    pub success: bool,
    #[serde(default)]
    pub error_message: String,
}

impl ActionResult {
    pub fn success() -> Self {
        Self {
            success: true,
            error_message: String::new(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error_message: message.into(),
        }
    }
}

/// Availability of the eye tracker hardware as reported by the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum TrackerAvailability {
    Available = 0,
    Disconnected = 1,
    Calibrating = 2,
    Unavailable = 3,
    NotCalibrated = 4,
    Unknown = 5,
}

impl TrackerAvailability {
    pub fn from_i32(value: i32) -> Self {
        match value {
            0 => Self::Available,
            1 => Self::Disconnected,
            2 => Self::Calibrating,
            3 => Self::Unavailable,
            4 => Self::NotCalibrated,
            _ => Self::Unknown,
        }
    }

    pub fn as_i32(self) -> i32 {
        self as i32
    }
}

/// Dominant eye reported by the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum Eye {
    Left = 0,
    Right = 1,
    Both = 2,
}

impl Eye {
    pub fn from_i32(value: i32) -> Self {
        match value {
            0 => Self::Left,
            1 => Self::Right,
            _ => Self::Both,
        }
    }

    pub fn as_i32(self) -> i32 {
        self as i32
    }
}

/// Semantic version of the service or the tracker firmware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl Version {
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn availability_ordinals_are_stable() {
        assert_eq!(TrackerAvailability::Available.as_i32(), 0);
        assert_eq!(
            TrackerAvailability::from_i32(4),
            TrackerAvailability::NotCalibrated
        );
        assert_eq!(TrackerAvailability::from_i32(99), TrackerAvailability::Unknown);
    }

    #[test]
    fn unknown_eye_defaults_to_both() {
        assert_eq!(Eye::from_i32(7), Eye::Both);
    }

    #[test]
    fn version_formats_as_dotted_triple() {
        assert_eq!(Version::new(3, 1, 0).to_string(), "3.1.0");
    }
}
