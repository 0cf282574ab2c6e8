//! Process-wide monitor
//!
//! Free functions over a single [`MonitorController`] created on first use.
//! The controller is backed by [`SystemSource`](super::polling::SystemSource)
//! unless [`install`] supplied a different source first.

use super::channel::{EventCallback, UserData};
use super::controller::MonitorController;
use super::source::InstrumentationSource;
use crate::config::MonitorConfiguration;
use crate::models::{EventRecord, MonitorError};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

/// Returned by [`wait_for_events`] when no session was ever started
pub const NOT_INITIALIZED: i32 = -1;

static MONITOR: OnceLock<MonitorController> = OnceLock::new();

/// Create the process-wide monitor with an explicit source and configuration.
/// Returns false if it already exists.
pub fn install(source: Arc<dyn InstrumentationSource>, config: MonitorConfiguration) -> bool {
    let mut created = false;
    MONITOR.get_or_init(|| {
        created = true;
        MonitorController::new(source, config)
    });
    created
}

/// The process-wide monitor
pub fn monitor() -> &'static MonitorController {
    MONITOR.get_or_init(|| MonitorController::with_system_source(MonitorConfiguration::default()))
}

pub fn initialize() -> bool {
    monitor().initialize()
}

pub fn start() -> Result<(), MonitorError> {
    monitor().start()
}

pub fn start_with_callback(
    callback: Option<EventCallback>,
    user_data: Option<UserData>,
) -> Result<(), MonitorError> {
    monitor().start_with_callback(callback, user_data)
}

pub fn stop() -> bool {
    monitor().stop()
}

pub fn get_next_event() -> Option<EventRecord> {
    monitor().get_next_event()
}

pub fn get_all_events(max: usize) -> Vec<EventRecord> {
    monitor().get_all_events(max)
}

/// Queue length after waking, 0 on timeout, [`NOT_INITIALIZED`] if there is
/// no wake signal
pub fn wait_for_events(timeout_ms: u32) -> i32 {
    match monitor().wait_for_events(Duration::from_millis(u64::from(timeout_ms))) {
        Ok(count) => i32::try_from(count).unwrap_or(i32::MAX),
        Err(_) => NOT_INITIALIZED,
    }
}

pub fn is_monitoring() -> bool {
    monitor().is_running()
}

pub fn get_pending_event_count() -> usize {
    monitor().pending_count()
}

pub fn cleanup() {
    monitor().cleanup()
}

pub fn get_last_error() -> String {
    monitor().last_error()
}
