// In-process stand-in for the eye tracker service, speaking the real wire
// protocol over a Unix socket. Tests drive the service side of a calibration
// the same way the remote process would.

use crate::api::types::{
    ActionResult, CalibrationPoint, CalibrationPointResponse, Version,
};
use crate::ipc::protocol::{
    encode_frame, read_frame, ClientMessage, ClientMessageBody, ServiceMessage, ServiceMessageBody,
};
use log::{debug, error};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::UnixListener;
use tokio::sync::mpsc;

/// Canned replies the mock answers bridge requests with.
pub struct ServiceBehavior {
    pub availability: i32,
    pub dominant_eye: i32,
    pub calibrated: bool,
    /// Port reply for a gaze stream start, or a service-side error message.
    pub gaze_stream: Result<i32, String>,
    pub service_version: Version,
    pub firmware_version: Version,
    pub start_calibration: ActionResult,
    /// Initial point handed out on readiness, or a service-side error.
    pub ready_point: Result<CalibrationPoint, String>,
    pub abort: ActionResult,
}

impl Default for ServiceBehavior {
    fn default() -> Self {
        Self {
            availability: 0,
            dominant_eye: 2,
            calibrated: false,
            gaze_stream: Ok(6300),
            service_version: Version::new(1, 0, 0),
            firmware_version: Version::new(1, 0, 0),
            start_calibration: ActionResult::success(),
            ready_point: Ok(CalibrationPoint { x: 0.0, y: 0.0 }),
            abort: ActionResult::success(),
        }
    }
}

struct Shared {
    behavior: Mutex<ServiceBehavior>,
    writer_tx: Mutex<Option<mpsc::UnboundedSender<Vec<u8>>>>,
    subscribed: AtomicBool,
    displayed_tx: Mutex<std::sync::mpsc::Sender<CalibrationPointResponse>>,
}

/// One mock service bound to a socket path. Dropping it closes the socket
/// and removes the file.
pub struct MockEyeTrackerService {
    // Keeps the accept and writer tasks alive for the mock's lifetime.
    _runtime: tokio::runtime::Runtime,
    shared: Arc<Shared>,
    displayed_rx: Mutex<std::sync::mpsc::Receiver<CalibrationPointResponse>>,
    next_id: AtomicU32,
    path: PathBuf,
}

impl MockEyeTrackerService {
    /// Bind `path` and start accepting bridge connections (one at a time).
    pub fn start(path: &Path) -> Result<Self, String> {
        let _ = std::fs::remove_file(path);
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .map_err(|e| format!("failed to start mock runtime: {}", e))?;

        let listener = runtime
            .block_on(async { UnixListener::bind(path) })
            .map_err(|e| format!("failed to bind {:?}: {}", path, e))?;

        let (displayed_tx, displayed_rx) = std::sync::mpsc::channel();
        let shared = Arc::new(Shared {
            behavior: Mutex::new(ServiceBehavior::default()),
            writer_tx: Mutex::new(None),
            subscribed: AtomicBool::new(false),
            displayed_tx: Mutex::new(displayed_tx),
        });

        let accept_shared = Arc::clone(&shared);
        runtime.spawn(async move {
            loop {
                let (stream, _) = match listener.accept().await {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        error!("[MOCK] accept failed: {}", e);
                        break;
                    }
                };
                debug!("[MOCK] bridge connected");
                let (mut read_half, mut write_half) = stream.into_split();

                let (writer_tx, mut writer_rx) = mpsc::unbounded_channel::<Vec<u8>>();
                *accept_shared.writer_tx.lock().unwrap() = Some(writer_tx.clone());
                let writer = tokio::spawn(async move {
                    while let Some(frame) = writer_rx.recv().await {
                        if write_half.write_all(&frame).await.is_err() {
                            break;
                        }
                    }
                });

                while let Ok(body) = read_frame(&mut read_half).await {
                    let message: ClientMessage = match serde_json::from_slice(&body) {
                        Ok(message) => message,
                        Err(e) => {
                            error!("[MOCK] malformed frame from bridge: {}", e);
                            break;
                        }
                    };
                    if let Some(reply) = accept_shared.answer(message.body) {
                        let envelope = ServiceMessage {
                            message_id: message.message_id,
                            body: reply,
                        };
                        match encode_frame(&envelope) {
                            Ok(frame) => {
                                let _ = writer_tx.send(frame);
                            }
                            Err(e) => error!("[MOCK] failed to encode reply: {}", e),
                        }
                    }
                }

                debug!("[MOCK] bridge disconnected");
                *accept_shared.writer_tx.lock().unwrap() = None;
                writer.abort();
            }
        });

        Ok(Self {
            _runtime: runtime,
            shared,
            displayed_rx: Mutex::new(displayed_rx),
            next_id: AtomicU32::new(1),
            path: path.to_path_buf(),
        })
    }

    /// Adjust the canned replies.
    pub fn configure<F: FnOnce(&mut ServiceBehavior)>(&self, adjust: F) {
        adjust(&mut self.shared.behavior.lock().unwrap());
    }

    pub fn is_subscribed(&self) -> bool {
        self.shared.subscribed.load(Ordering::Relaxed)
    }

    pub fn socket_path(&self) -> &Path {
        &self.path
    }

    /// Push an availability change event to the bridge.
    pub fn notify_availability(&self, availability: i32) -> Result<(), String> {
        self.send(ServiceMessage {
            message_id: None,
            body: ServiceMessageBody::TrackerAvailabilityChanged { availability },
        })
    }

    /// Push the next calibration point and wait for the bridge to report the
    /// point the engine was displaying.
    pub fn present_point(&self, x: f32, y: f32) -> Result<CalibrationPointResponse, String> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.send(ServiceMessage {
            message_id: Some(id),
            body: ServiceMessageBody::PresentPoint { x, y },
        })?;
        self.displayed_rx
            .lock()
            .unwrap()
            .recv_timeout(Duration::from_secs(2))
            .map_err(|e| format!("no displayed-point reply: {}", e))
    }

    /// End the calibration from the service side.
    pub fn finish_calibration(&self, result: ActionResult) -> Result<(), String> {
        self.send(ServiceMessage {
            message_id: None,
            body: ServiceMessageBody::CalibrationFinished { result },
        })
    }

    fn send(&self, message: ServiceMessage) -> Result<(), String> {
        let frame = encode_frame(&message).map_err(|e| e.to_string())?;
        let guard = self.shared.writer_tx.lock().unwrap();
        match guard.as_ref() {
            Some(tx) => tx.send(frame).map_err(|_| "bridge disconnected".to_string()),
            None => Err("no bridge connected".to_string()),
        }
    }
}

impl Shared {
    fn answer(&self, request: ClientMessageBody) -> Option<ServiceMessageBody> {
        let behavior = self.behavior.lock().unwrap();
        let reply = match request {
            ClientMessageBody::GetTrackerAvailability => ServiceMessageBody::IntValue {
                value: behavior.availability,
            },
            ClientMessageBody::StartGazeStream => match &behavior.gaze_stream {
                Ok(port) => ServiceMessageBody::IntValue { value: *port },
                Err(message) => ServiceMessageBody::Error {
                    message: message.clone(),
                },
            },
            ClientMessageBody::StopGazeStream => ServiceMessageBody::Success,
            ClientMessageBody::SubscribeToTrackerEvents => {
                self.subscribed.store(true, Ordering::Relaxed);
                ServiceMessageBody::Success
            }
            ClientMessageBody::UnsubscribeFromTrackerEvents => {
                self.subscribed.store(false, Ordering::Relaxed);
                ServiceMessageBody::Success
            }
            ClientMessageBody::GetVersions => ServiceMessageBody::Versions {
                service: behavior.service_version,
                firmware: behavior.firmware_version,
            },
            ClientMessageBody::GetDominantEye => ServiceMessageBody::IntValue {
                value: behavior.dominant_eye,
            },
            ClientMessageBody::IsCalibrated => ServiceMessageBody::BoolValue {
                value: behavior.calibrated,
            },
            ClientMessageBody::StartCalibration => ack(&behavior.start_calibration),
            ClientMessageBody::ReadyForPoint => match &behavior.ready_point {
                Ok(point) => ServiceMessageBody::InitialPoint {
                    x: point.x,
                    y: point.y,
                },
                Err(message) => ServiceMessageBody::Error {
                    message: message.clone(),
                },
            },
            ClientMessageBody::AbortCalibration => ack(&behavior.abort),
            ClientMessageBody::PointDisplayed {
                x,
                y,
                display_start_ms,
            } => {
                let displayed = CalibrationPointResponse {
                    x,
                    y,
                    display_start_ms,
                };
                let _ = self.displayed_tx.lock().unwrap().send(displayed);
                return None;
            }
        };
        Some(reply)
    }
}

fn ack(result: &ActionResult) -> ServiceMessageBody {
    if result.success {
        ServiceMessageBody::Success
    } else {
        ServiceMessageBody::Error {
            message: result.error_message.clone(),
        }
    }
}

impl Drop for MockEyeTrackerService {
    fn drop(&mut self) {
        // Runtime teardown closes the listener and any live connection.
        let _ = std::fs::remove_file(&self.path);
    }
}
