//! Shared fixtures for integration tests

#![allow(dead_code)]

use procwatch::config::MonitorConfiguration;
use procwatch::monitor::{ManualSource, MonitorController};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Upper bound for anything that should happen "soon"
pub const SETTLE: Duration = Duration::from_secs(5);

/// Short poll interval and grace period so lifecycle tests stay fast
pub fn fast_config() -> MonitorConfiguration {
    let mut config = MonitorConfiguration::default();
    config.monitor.poll_interval_ms = 5;
    config.monitor.stop_grace_ms = 20;
    config.monitor.join_timeout_ms = 300;
    config
}

/// Controller over a manual source; the source handle drives notifications
pub fn manual_controller() -> (ManualSource, MonitorController) {
    let source = ManualSource::new();
    let controller = MonitorController::new(Arc::new(source.clone()), fast_config());
    (source, controller)
}

/// Start a pull session and wait until both registrations exist
pub fn start_pull(source: &ManualSource, controller: &MonitorController) {
    controller.start().expect("start failed");
    assert!(
        source.wait_for_registrations(2, SETTLE),
        "subscription was not established"
    );
}

pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}
