pub mod client;
pub mod protocol;

pub use client::{ConnectionDelegates, ServiceClient};
pub use protocol::{
    ClientMessage, ClientMessageBody, ServiceMessage, ServiceMessageBody, MAX_FRAME_SIZE,
};

use std::path::PathBuf;
use thiserror::Error;

/// Default socket the service publishes on the device.
pub const DEFAULT_SOCKET_PATH: &str = "/dev/socket/eyetracker";

/// Environment override for the service socket, used by integration setups.
pub const SOCKET_ENV_VAR: &str = "GAZELINK_SERVICE_SOCKET";

pub fn service_socket_path() -> PathBuf {
    std::env::var_os(SOCKET_ENV_VAR)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_SOCKET_PATH))
}

#[derive(Error, Debug)]
pub enum IpcError {
    #[error("failed to reach service socket: {0}")]
    Bind(std::io::Error),
    #[error("service did not accept the connection in time")]
    ConnectTimeout,
    #[error("service did not answer the request in time")]
    RequestTimeout,
    #[error("service connection lost")]
    Disconnected,
    #[error("frame of {0} bytes exceeds the protocol limit")]
    FrameTooLarge(usize),
    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to start IPC runtime: {0}")]
    Runtime(String),
}
