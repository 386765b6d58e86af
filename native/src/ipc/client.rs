// IPC client for the eye tracker service socket, built on Tokio with a
// request/reply correlation map and a background reader task.

use super::protocol::{
    encode_frame, read_frame, ClientMessage, ClientMessageBody, ServiceMessage, ServiceMessageBody,
};
use super::IpcError;
use crate::api::types::{ActionResult, CalibrationPoint, CalibrationPointResponse};
use log::{debug, error, warn};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::UnixStream;
use tokio::sync::{mpsc, oneshot};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

type PendingMap = Arc<Mutex<HashMap<u32, oneshot::Sender<ServiceMessageBody>>>>;

/// Hooks invoked by the reader task for service-originated traffic and
/// connection loss. Tests and the SDK layer plug their own handlers in, the
/// same way the platform service-connection object takes delegates.
pub struct ConnectionDelegates {
    availability_changed: Box<dyn Fn(i32) + Send + Sync>,
    present_point: Box<dyn Fn(CalibrationPoint) -> CalibrationPointResponse + Send + Sync>,
    calibration_finished: Box<dyn Fn(ActionResult) + Send + Sync>,
    disconnected: Box<dyn Fn() + Send + Sync>,
}

impl ConnectionDelegates {
    pub fn new() -> Self {
        Self {
            availability_changed: Box::new(|availability| {
                debug!("[IPC] unhandled availability event: {}", availability)
            }),
            present_point: Box::new(|_| {
                warn!("[IPC] calibration point pushed with no handler installed");
                CalibrationPointResponse {
                    x: 0.0,
                    y: 0.0,
                    display_start_ms: 0,
                }
            }),
            calibration_finished: Box::new(|_| {
                debug!("[IPC] unhandled calibration finish event")
            }),
            disconnected: Box::new(|| {}),
        }
    }

    pub fn on_availability_changed<F>(mut self, handler: F) -> Self
    where
        F: Fn(i32) + Send + Sync + 'static,
    {
        self.availability_changed = Box::new(handler);
        self
    }

    pub fn on_present_point<F>(mut self, handler: F) -> Self
    where
        F: Fn(CalibrationPoint) -> CalibrationPointResponse + Send + Sync + 'static,
    {
        self.present_point = Box::new(handler);
        self
    }

    pub fn on_calibration_finished<F>(mut self, handler: F) -> Self
    where
        F: Fn(ActionResult) + Send + Sync + 'static,
    {
        self.calibration_finished = Box::new(handler);
        self
    }

    pub fn on_disconnected<F>(mut self, handler: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.disconnected = Box::new(handler);
        self
    }
}

impl Default for ConnectionDelegates {
    fn default() -> Self {
        Self::new()
    }
}

/// Connected client. Engine-facing calls are synchronous and bridge into the
/// owned runtime; the reader task dispatches replies, events, and calibration
/// pushes in the background.
pub struct ServiceClient {
    runtime: tokio::runtime::Runtime,
    writer_tx: Mutex<Option<mpsc::UnboundedSender<Vec<u8>>>>,
    pending: PendingMap,
    next_id: AtomicU32,
    closing: Arc<AtomicBool>,
}

impl ServiceClient {
    /// Connect to the service socket within `timeout`. An unreachable socket
    /// maps to [`IpcError::Bind`], a hanging accept to
    /// [`IpcError::ConnectTimeout`].
    pub fn connect(
        path: &Path,
        timeout: Duration,
        delegates: ConnectionDelegates,
    ) -> Result<Self, IpcError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .map_err(|e| IpcError::Runtime(e.to_string()))?;

        debug!("[IPC] connecting to {:?} (timeout: {:?})", path, timeout);
        let stream = runtime
            .block_on(async { tokio::time::timeout(timeout, UnixStream::connect(path)).await })
            .map_err(|_| IpcError::ConnectTimeout)?
            .map_err(IpcError::Bind)?;

        let (read_half, mut write_half) = stream.into_split();

        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let closing = Arc::new(AtomicBool::new(false));
        let (writer_tx, mut writer_rx) = mpsc::unbounded_channel::<Vec<u8>>();

        let writer_closing = Arc::clone(&closing);
        runtime.spawn(async move {
            while let Some(frame) = writer_rx.recv().await {
                if let Err(e) = write_half.write_all(&frame).await {
                    if !writer_closing.load(Ordering::Relaxed) {
                        error!("[IPC] write failed: {}", e);
                    }
                    break;
                }
            }
            // Dropping the write half signals EOF to the service.
        });

        let reader_pending = Arc::clone(&pending);
        let reader_closing = Arc::clone(&closing);
        let reader_writer_tx = writer_tx.clone();
        runtime.spawn(reader_loop(
            read_half,
            reader_pending,
            Arc::new(delegates),
            reader_writer_tx,
            reader_closing,
        ));

        debug!("[IPC] connected to service");
        Ok(Self {
            runtime,
            writer_tx: Mutex::new(Some(writer_tx)),
            pending,
            next_id: AtomicU32::new(1),
            closing,
        })
    }

    /// Send a request and wait for the correlated reply.
    pub fn request(&self, body: ClientMessageBody) -> Result<ServiceMessageBody, IpcError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().unwrap().insert(id, tx);

        let frame = encode_frame(&ClientMessage {
            message_id: Some(id),
            body,
        })?;

        let sent = {
            let guard = self.writer_tx.lock().unwrap();
            match guard.as_ref() {
                Some(tx) => tx.send(frame).is_ok(),
                None => false,
            }
        };
        if !sent {
            self.pending.lock().unwrap().remove(&id);
            return Err(IpcError::Disconnected);
        }

        let reply = self
            .runtime
            .block_on(async { tokio::time::timeout(REQUEST_TIMEOUT, rx).await });
        match reply {
            Ok(Ok(body)) => Ok(body),
            // Sender dropped: the reader task tore the connection down.
            Ok(Err(_)) => Err(IpcError::Disconnected),
            Err(_) => {
                self.pending.lock().unwrap().remove(&id);
                Err(IpcError::RequestTimeout)
            }
        }
    }

    /// Close the connection without firing the disconnect delegate. Used by
    /// dispose, where the managed layer initiated the teardown itself.
    pub fn begin_shutdown(&self) {
        self.closing.store(true, Ordering::Relaxed);
        let _ = self.writer_tx.lock().unwrap().take();
    }
}

async fn reader_loop(
    mut read_half: tokio::net::unix::OwnedReadHalf,
    pending: PendingMap,
    delegates: Arc<ConnectionDelegates>,
    writer_tx: mpsc::UnboundedSender<Vec<u8>>,
    closing: Arc<AtomicBool>,
) {
    loop {
        let body = match read_frame(&mut read_half).await {
            Ok(body) => body,
            Err(e) => {
                if !closing.load(Ordering::Relaxed) {
                    warn!("[IPC] connection closed: {}", e);
                }
                break;
            }
        };
        let message: ServiceMessage = match serde_json::from_slice(&body) {
            Ok(message) => message,
            Err(e) => {
                error!("[IPC] malformed frame from service: {}", e);
                break;
            }
        };

        if message.body.is_reply() {
            match message.message_id {
                Some(id) => {
                    if let Some(tx) = pending.lock().unwrap().remove(&id) {
                        let _ = tx.send(message.body);
                    } else {
                        warn!("[IPC] reply with unknown correlation id {}", id);
                    }
                }
                None => warn!("[IPC] reply without correlation id dropped"),
            }
            continue;
        }

        match message.body {
            ServiceMessageBody::TrackerAvailabilityChanged { availability } => {
                (delegates.availability_changed)(availability);
            }
            ServiceMessageBody::PresentPoint { x, y } => {
                let displayed = (delegates.present_point)(CalibrationPoint { x, y });
                let reply = ClientMessage {
                    message_id: message.message_id,
                    body: ClientMessageBody::PointDisplayed {
                        x: displayed.x,
                        y: displayed.y,
                        display_start_ms: displayed.display_start_ms,
                    },
                };
                match encode_frame(&reply) {
                    Ok(frame) => {
                        let _ = writer_tx.send(frame);
                    }
                    Err(e) => error!("[IPC] failed to encode point reply: {}", e),
                }
            }
            ServiceMessageBody::CalibrationFinished { result } => {
                (delegates.calibration_finished)(result);
            }
            other => warn!("[IPC] unexpected service message: {:?}", other),
        }
    }

    // Drop waiters first so a blocked request() unwinds before the
    // disconnect delegate takes any SDK locks.
    pending.lock().unwrap().clear();
    if !closing.load(Ordering::Relaxed) {
        (delegates.disconnected)();
    }
}
