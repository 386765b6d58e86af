//! Bit-flag SDK state mirrored into engine-owned cells.

use crate::buffers::IntCell;
use crate::engine_notifier;
use bitflags::bitflags;
use log::info;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

bitflags! {
    /// Connection state of the bridge. The empty set means "not connected".
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct StateFlags: u32 {
        const CONNECTED = 1;
        const CALIBRATING = 2;
        const ATTACHED_TO_GAZE_STREAM = 4;
        const SUBSCRIBED_TO_EVENTS = 8;
    }
}

/// SDK state shared between the engine thread and the IPC reader task.
///
/// Every mutation is written into all registered engine cells so the managed
/// layer observes the raw flag value without a call across the ABI.
pub struct SdkState {
    value: AtomicU32,
    mirrors: Mutex<Vec<IntCell>>,
}

impl SdkState {
    pub const fn new() -> Self {
        Self {
            value: AtomicU32::new(0),
            mirrors: Mutex::new(Vec::new()),
        }
    }

    pub fn value(&self) -> u32 {
        self.value.load(Ordering::Relaxed)
    }

    /// True when every flag in `flags` is set. An empty `flags` set matches
    /// only the fully-disconnected state.
    pub fn is_in(&self, flags: StateFlags) -> bool {
        let value = self.value();
        if flags.is_empty() {
            return value == 0;
        }
        value & flags.bits() == flags.bits()
    }

    pub fn is_disconnected(&self) -> bool {
        self.value() == 0
    }

    /// Replace the whole flag set.
    pub fn set(&self, flags: StateFlags) {
        self.value.store(flags.bits(), Ordering::Relaxed);
        self.publish();
    }

    pub fn add(&self, flags: StateFlags) {
        self.value.fetch_or(flags.bits(), Ordering::Relaxed);
        self.publish();
    }

    pub fn remove(&self, flags: StateFlags) {
        self.value.fetch_and(!flags.bits(), Ordering::Relaxed);
        self.publish();
    }

    /// Register an engine cell that mirrors the state value. The cell
    /// receives the current value immediately.
    pub fn register_mirror(&self, cell: IntCell) {
        let mut mirrors = self.mirrors.lock().unwrap();
        cell.write(self.value() as i32);
        mirrors.push(cell);
    }

    pub fn unregister_mirror(&self, addr: usize) {
        let mut mirrors = self.mirrors.lock().unwrap();
        mirrors.retain(|cell| cell.addr() != addr);
    }

    pub fn mirror_count(&self) -> usize {
        self.mirrors.lock().unwrap().len()
    }

    fn publish(&self) {
        let value = self.value() as i32;
        info!("[STATE] current state: {}", value);
        for cell in self.mirrors.lock().unwrap().iter() {
            cell.write(value);
        }
        engine_notifier::send_state_changed(value);
    }
}

impl Default for SdkState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_query_matches_only_disconnected() {
        let state = SdkState::new();
        assert!(state.is_in(StateFlags::empty()));
        assert!(state.is_disconnected());

        state.set(StateFlags::CONNECTED);
        assert!(!state.is_in(StateFlags::empty()));
        assert!(!state.is_disconnected());
    }

    #[test]
    fn superset_query_requires_all_flags() {
        let state = SdkState::new();
        state.set(StateFlags::CONNECTED | StateFlags::CALIBRATING);

        assert!(state.is_in(StateFlags::CONNECTED));
        assert!(state.is_in(StateFlags::CONNECTED | StateFlags::CALIBRATING));
        assert!(!state.is_in(StateFlags::SUBSCRIBED_TO_EVENTS));
        assert!(!state.is_in(StateFlags::CONNECTED | StateFlags::SUBSCRIBED_TO_EVENTS));
    }

    #[test]
    fn mirrors_receive_value_on_register_and_change() {
        let mut cell: i32 = -1;
        let state = SdkState::new();
        state.set(StateFlags::CONNECTED);

        state.register_mirror(IntCell::new(&mut cell as *mut i32 as usize));
        assert_eq!(cell, 1);

        state.add(StateFlags::ATTACHED_TO_GAZE_STREAM);
        assert_eq!(cell, 5);

        state.remove(StateFlags::ATTACHED_TO_GAZE_STREAM);
        assert_eq!(cell, 1);

        state.unregister_mirror(&mut cell as *mut i32 as usize);
        assert_eq!(state.mirror_count(), 0);
        state.set(StateFlags::empty());
        assert_eq!(cell, 1);
    }
}
