//! Calibration procedure relay.
//!
//! During calibration the service pushes points to display and the engine
//! answers with what it actually displayed. The exchange runs through four
//! engine-owned memory regions handed over at start: a request buffer the
//! bridge writes upcoming points into, a response buffer the engine keeps
//! updated with the currently displayed point, a status cell, and a point
//! index cell bumped on every new point.

use crate::api::types::{ActionResult, CalibrationPoint, CalibrationPointResponse};
use crate::buffers::{IntCell, SharedBuffer};
use log::{debug, error};
use std::sync::Mutex;

/// Layout of the request buffer: x, y as little-endian `f32`.
pub const CALIBRATION_POINT_SIZE: usize = 8;
/// Layout of the response buffer: x, y as little-endian `f32` plus the
/// display start in milliseconds as little-endian `i64`.
pub const POINT_RESPONSE_SIZE: usize = 16;

/// Status of a calibration procedure as seen by the managed layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum CalibrationStatus {
    Ongoing = 1,
    FinishedSuccessfully = 2,
    FinishedFailed = 3,
}

impl CalibrationStatus {
    pub fn is_finished(self) -> bool {
        matches!(self, Self::FinishedSuccessfully | Self::FinishedFailed)
    }

    pub fn as_i32(self) -> i32 {
        self as i32
    }
}

/// Pack a calibration point into the engine's request-buffer layout.
///
/// Must match the managed-side struct byte for byte.
pub fn encode_calibration_point(point: &CalibrationPoint) -> [u8; CALIBRATION_POINT_SIZE] {
    let mut bytes = [0u8; CALIBRATION_POINT_SIZE];
    bytes[0..4].copy_from_slice(&point.x.to_le_bytes());
    bytes[4..8].copy_from_slice(&point.y.to_le_bytes());
    bytes
}

/// Pack a displayed-point response into the engine's response-buffer layout.
pub fn encode_point_response(response: &CalibrationPointResponse) -> [u8; POINT_RESPONSE_SIZE] {
    let mut bytes = [0u8; POINT_RESPONSE_SIZE];
    bytes[0..4].copy_from_slice(&response.x.to_le_bytes());
    bytes[4..8].copy_from_slice(&response.y.to_le_bytes());
    bytes[8..16].copy_from_slice(&response.display_start_ms.to_le_bytes());
    bytes
}

/// Unpack a displayed-point response from the engine's response buffer.
pub fn decode_point_response(bytes: &[u8; POINT_RESPONSE_SIZE]) -> CalibrationPointResponse {
    CalibrationPointResponse {
        x: f32::from_le_bytes(bytes[0..4].try_into().unwrap()),
        y: f32::from_le_bytes(bytes[4..8].try_into().unwrap()),
        display_start_ms: i64::from_le_bytes(bytes[8..16].try_into().unwrap()),
    }
}

type StatusListener = Box<dyn Fn(CalibrationStatus, CalibrationStatus) + Send + Sync>;

struct Inner {
    point_index: i32,
    status: CalibrationStatus,
    error_message: Option<String>,
    listener: Option<StatusListener>,
}

/// One calibration run. Shared between the engine thread (ready/abort) and
/// the IPC reader task (point pushes, finish); the inner lock also guards the
/// buffer accesses so point writes and response reads never interleave.
pub struct CalibrationProcedure {
    request: SharedBuffer,
    response: SharedBuffer,
    status_cell: IntCell,
    index_cell: IntCell,
    inner: Mutex<Inner>,
}

impl CalibrationProcedure {
    pub fn new(
        request_addr: usize,
        response_addr: usize,
        status_addr: usize,
        index_addr: usize,
    ) -> Self {
        let procedure = Self {
            request: SharedBuffer::new(request_addr),
            response: SharedBuffer::new(response_addr),
            status_cell: IntCell::new(status_addr),
            index_cell: IntCell::new(index_addr),
            inner: Mutex::new(Inner {
                point_index: 0,
                status: CalibrationStatus::Ongoing,
                error_message: None,
                listener: None,
            }),
        };
        procedure.status_cell.write(CalibrationStatus::Ongoing.as_i32());
        procedure
    }

    pub fn set_status_listener<F>(&self, listener: F)
    where
        F: Fn(CalibrationStatus, CalibrationStatus) + Send + Sync + 'static,
    {
        self.inner.lock().unwrap().listener = Some(Box::new(listener));
    }

    /// Write the next point into the request buffer and bump the index cell.
    pub fn set_point(&self, point: CalibrationPoint) {
        let mut inner = self.inner.lock().unwrap();
        self.write_point(&mut inner, point);
    }

    /// Handle a point push from the service: read what the engine currently
    /// displays, then publish the next point. Returns the displayed response
    /// for the service.
    pub fn show_next_point(&self, next: CalibrationPoint) -> CalibrationPointResponse {
        let mut inner = self.inner.lock().unwrap();
        let mut bytes = [0u8; POINT_RESPONSE_SIZE];
        self.response.read(&mut bytes);
        let displayed = decode_point_response(&bytes);
        debug!(
            "[CALIBRATION] displayed point x: {} y: {} tStart: {}",
            displayed.x, displayed.y, displayed.display_start_ms
        );
        self.write_point(&mut inner, next);
        displayed
    }

    /// Finish the procedure with the service's result. Finishing twice is a
    /// no-op; a finished status never changes again.
    pub fn finish(&self, result: ActionResult) {
        let mut inner = self.inner.lock().unwrap();
        if inner.status.is_finished() {
            return;
        }
        if result.success {
            self.transition(&mut inner, CalibrationStatus::FinishedSuccessfully, None);
        } else {
            self.transition(
                &mut inner,
                CalibrationStatus::FinishedFailed,
                Some(result.error_message),
            );
        }
    }

    pub fn is_finished(&self) -> bool {
        self.inner.lock().unwrap().status.is_finished()
    }

    pub fn status(&self) -> CalibrationStatus {
        self.inner.lock().unwrap().status
    }

    pub fn error_message(&self) -> Option<String> {
        self.inner.lock().unwrap().error_message.clone()
    }

    fn write_point(&self, inner: &mut Inner, point: CalibrationPoint) {
        inner.point_index += 1;
        debug!(
            "[CALIBRATION] next calibration point - x: {} y: {} index: {}",
            point.x, point.y, inner.point_index
        );
        self.request.write(&encode_calibration_point(&point));
        self.index_cell.write(inner.point_index);
    }

    fn transition(
        &self,
        inner: &mut Inner,
        new_status: CalibrationStatus,
        error_message: Option<String>,
    ) {
        if inner.status.is_finished() {
            error!("[CALIBRATION] status change attempted on a finished procedure");
            return;
        }
        let old_status = inner.status;
        inner.status = new_status;
        inner.error_message = error_message;
        self.status_cell.write(new_status.as_i32());
        if let Some(ref listener) = inner.listener {
            listener(old_status, new_status);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI32, Ordering};
    use std::sync::Arc;

    struct Cells {
        request: [u8; CALIBRATION_POINT_SIZE],
        response: [u8; POINT_RESPONSE_SIZE],
        status: i32,
        index: i32,
    }

    impl Cells {
        fn new() -> Box<Self> {
            Box::new(Self {
                request: [0; CALIBRATION_POINT_SIZE],
                response: [0; POINT_RESPONSE_SIZE],
                status: 0,
                index: 0,
            })
        }

        fn procedure(&mut self) -> CalibrationProcedure {
            CalibrationProcedure::new(
                self.request.as_mut_ptr() as usize,
                self.response.as_mut_ptr() as usize,
                &mut self.status as *mut i32 as usize,
                &mut self.index as *mut i32 as usize,
            )
        }
    }

    #[test]
    fn point_wire_layout_is_two_le_floats() {
        let bytes = encode_calibration_point(&CalibrationPoint { x: 1.0, y: -2.0 });
        assert_eq!(bytes, [0, 0, 0x80, 0x3f, 0, 0, 0, 0xc0]);
    }

    #[test]
    fn response_wire_layout_appends_le_timestamp() {
        let response = CalibrationPointResponse {
            x: 1.0,
            y: 1.0,
            display_start_ms: 0x0102_0304_0506_0708,
        };
        let bytes = encode_point_response(&response);
        assert_eq!(&bytes[0..4], &[0, 0, 0x80, 0x3f]);
        assert_eq!(&bytes[4..8], &[0, 0, 0x80, 0x3f]);
        assert_eq!(&bytes[8..16], &[0x08, 0x07, 0x06, 0x05, 0x04, 0x03, 0x02, 0x01]);
        assert_eq!(decode_point_response(&bytes), response);
    }

    #[test]
    fn new_procedure_marks_status_ongoing() {
        let mut cells = Cells::new();
        let procedure = cells.procedure();
        assert_eq!(cells.status, 1);
        assert_eq!(procedure.status(), CalibrationStatus::Ongoing);
        assert_eq!(cells.index, 0);
    }

    #[test]
    fn set_point_writes_buffer_and_bumps_index() {
        let mut cells = Cells::new();
        let procedure = cells.procedure();

        procedure.set_point(CalibrationPoint { x: 0.5, y: 0.25 });
        assert_eq!(
            cells.request,
            encode_calibration_point(&CalibrationPoint { x: 0.5, y: 0.25 })
        );
        assert_eq!(cells.index, 1);

        procedure.set_point(CalibrationPoint { x: 0.75, y: 0.75 });
        assert_eq!(cells.index, 2);
    }

    #[test]
    fn show_next_point_returns_displayed_response() {
        let mut cells = Cells::new();
        let displayed = CalibrationPointResponse {
            x: 0.5,
            y: 0.5,
            display_start_ms: 123_456_789,
        };
        cells.response = encode_point_response(&displayed);
        let procedure = cells.procedure();

        let reported = procedure.show_next_point(CalibrationPoint { x: 0.1, y: 0.9 });
        assert_eq!(reported, displayed);
        assert_eq!(
            cells.request,
            encode_calibration_point(&CalibrationPoint { x: 0.1, y: 0.9 })
        );
        assert_eq!(cells.index, 1);
    }

    #[test]
    fn finish_is_terminal_and_notifies_listener() {
        let mut cells = Cells::new();
        let procedure = cells.procedure();
        let transitions = Arc::new(AtomicI32::new(0));
        let seen = Arc::clone(&transitions);
        procedure.set_status_listener(move |old, new| {
            assert_eq!(old, CalibrationStatus::Ongoing);
            assert_eq!(new, CalibrationStatus::FinishedFailed);
            seen.fetch_add(1, Ordering::SeqCst);
        });

        procedure.finish(ActionResult::error("lost tracking"));
        assert_eq!(cells.status, 3);
        assert_eq!(procedure.error_message().as_deref(), Some("lost tracking"));
        assert_eq!(transitions.load(Ordering::SeqCst), 1);

        // A second finish must not overwrite the terminal status.
        procedure.finish(ActionResult::success());
        assert_eq!(cells.status, 3);
        assert_eq!(transitions.load(Ordering::SeqCst), 1);
    }
}
