// Engine notification helpers: forward state and availability changes to the
// managed layer through registered callbacks.

use log::debug;
use once_cell::sync::Lazy;
use std::sync::Mutex;

/// Callback signature the managed layer registers across the C ABI.
pub type EngineCallback = extern "C" fn(i32);

static AVAILABILITY_CALLBACK: Mutex<Option<EngineCallback>> = Mutex::new(None);
static STATE_CALLBACK: Mutex<Option<EngineCallback>> = Mutex::new(None);

// In-process hooks used by embedding code and tests.
static AVAILABILITY_HOOK: Lazy<Mutex<Option<Box<dyn Fn(i32) + Send + Sync>>>> =
    Lazy::new(|| Mutex::new(None));
static STATE_HOOK: Lazy<Mutex<Option<Box<dyn Fn(i32) + Send + Sync>>>> =
    Lazy::new(|| Mutex::new(None));

pub fn set_availability_callback(callback: Option<EngineCallback>) {
    *AVAILABILITY_CALLBACK.lock().unwrap() = callback;
}

pub fn set_state_callback(callback: Option<EngineCallback>) {
    *STATE_CALLBACK.lock().unwrap() = callback;
}

/// Register an in-process hook for availability changes.
pub fn register_availability_hook<F>(hook: F)
where
    F: Fn(i32) + Send + Sync + 'static,
{
    *AVAILABILITY_HOOK.lock().unwrap() = Some(Box::new(hook));
}

/// Register an in-process hook for state changes.
pub fn register_state_hook<F>(hook: F)
where
    F: Fn(i32) + Send + Sync + 'static,
{
    *STATE_HOOK.lock().unwrap() = Some(Box::new(hook));
}

pub fn send_availability_changed(availability: i32) {
    debug!("[NOTIFIER] tracker availability changed: {}", availability);
    if let Some(callback) = *AVAILABILITY_CALLBACK.lock().unwrap() {
        callback(availability);
    }
    if let Some(ref hook) = *AVAILABILITY_HOOK.lock().unwrap() {
        hook(availability);
    }
}

pub fn send_state_changed(value: i32) {
    if let Some(callback) = *STATE_CALLBACK.lock().unwrap() {
        callback(value);
    }
    if let Some(ref hook) = *STATE_HOOK.lock().unwrap() {
        hook(value);
    }
}
