//! Process table polling source
//!
//! Implements [`InstrumentationSource`] on top of `sysinfo`. Each connection
//! owns one poller thread that snapshots the process table every polling
//! interval, diffs it against the previous snapshot with [`ProcessTracker`],
//! and hands creation and deletion instances to the matching registrations.

use super::process_tracker::ProcessTracker;
use super::source::{
    InstrumentationSource, NotificationKind, NotificationQuery, NotificationSink, RawInstance,
    RegistrationId, SourceConnection, SourceError,
};
use crate::constants::{DEFAULT_POLLING_INTERVAL, POLLER_THREAD_NAME};
use crate::models::{ObservedProcess, ProcessSnapshot};
use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant, SystemTime};
use sysinfo::{ProcessesToUpdate, System};

/// Instrumentation source backed by periodic process table snapshots
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemSource;

impl SystemSource {
    pub fn new() -> Self {
        Self
    }
}

impl InstrumentationSource for SystemSource {
    fn name(&self) -> &str {
        "sysinfo"
    }

    fn connect(&self) -> Result<Box<dyn SourceConnection>, SourceError> {
        Ok(Box::new(SystemConnection {
            shared: Arc::new(PollerShared::default()),
            poller: None,
            next_id: 0,
        }))
    }
}

struct Registration {
    id: RegistrationId,
    kind: NotificationKind,
    sink: Arc<dyn NotificationSink>,
}

struct PollerShared {
    registrations: Mutex<Vec<Registration>>,
    interval: Mutex<Duration>,
    stop: Mutex<bool>,
    wake: Condvar,
}

impl Default for PollerShared {
    fn default() -> Self {
        Self {
            registrations: Mutex::new(Vec::new()),
            interval: Mutex::new(Duration::from_secs_f64(DEFAULT_POLLING_INTERVAL)),
            stop: Mutex::new(false),
            wake: Condvar::new(),
        }
    }
}

impl PollerShared {
    fn sinks_for(&self, kind: NotificationKind) -> Vec<Arc<dyn NotificationSink>> {
        self.registrations
            .lock()
            .iter()
            .filter(|registration| registration.kind == kind)
            .map(|registration| Arc::clone(&registration.sink))
            .collect()
    }

    /// Sleep up to `timeout`. Returns true if a stop was requested.
    fn wait_for_stop(&self, timeout: Duration) -> bool {
        let mut stop = self.stop.lock();
        if !*stop {
            self.wake.wait_for(&mut stop, timeout);
        }
        *stop
    }

    fn request_stop(&self) {
        *self.stop.lock() = true;
        self.wake.notify_all();
    }
}

struct SystemConnection {
    shared: Arc<PollerShared>,
    poller: Option<JoinHandle<()>>,
    next_id: u64,
}

impl SystemConnection {
    fn ensure_poller(&mut self) -> Result<(), SourceError> {
        if self.poller.is_some() {
            return Ok(());
        }

        let shared = Arc::clone(&self.shared);
        let handle = std::thread::Builder::new()
            .name(POLLER_THREAD_NAME.to_string())
            .spawn(move || run_poller(shared))
            .map_err(|e| SourceError::new(format!("Failed to start process poller: {}", e)))?;
        self.poller = Some(handle);
        Ok(())
    }
}

impl SourceConnection for SystemConnection {
    fn subscribe(
        &mut self,
        query: &NotificationQuery,
        sink: Arc<dyn NotificationSink>,
    ) -> Result<RegistrationId, SourceError> {
        let id = RegistrationId(self.next_id);
        self.next_id += 1;

        {
            // Fastest requested interval wins
            let mut interval = self.shared.interval.lock();
            if self.shared.registrations.lock().is_empty() || query.within < *interval {
                *interval = query.within;
            }
        }

        self.shared.registrations.lock().push(Registration {
            id,
            kind: query.kind,
            sink,
        });
        log::debug!("Process poller registered: {}", query);

        self.ensure_poller()?;
        Ok(id)
    }

    fn cancel(&mut self, registration: RegistrationId) -> Result<(), SourceError> {
        let mut registrations = self.shared.registrations.lock();
        let before = registrations.len();
        registrations.retain(|r| r.id != registration);
        if registrations.len() == before {
            return Err(SourceError::new(format!("Unknown registration {:?}", registration)));
        }
        Ok(())
    }

    fn close(&mut self) {
        self.shared.request_stop();
        if let Some(handle) = self.poller.take() {
            if handle.join().is_err() {
                log::error!("Process poller thread panicked");
            }
        }
    }
}

impl Drop for SystemConnection {
    fn drop(&mut self) {
        self.close();
    }
}

fn run_poller(shared: Arc<PollerShared>) {
    let mut tracker = ProcessTracker::new();
    let mut system = System::new();

    log::debug!("Process poller started");

    loop {
        let cycle_start = Instant::now();

        // Refresh only the process list and drop exited entries
        system.refresh_processes(ProcessesToUpdate::All, true);
        let snapshot = create_process_snapshot(&system);
        let changes = tracker.detect_changes(snapshot);

        if !changes.is_empty() {
            dispatch(&shared, NotificationKind::Creation, &changes.started);
            dispatch(&shared, NotificationKind::Deletion, &changes.exited);
        }

        let interval = *shared.interval.lock();
        let remaining = interval.saturating_sub(cycle_start.elapsed());
        if shared.wait_for_stop(remaining) {
            break;
        }
    }

    log::debug!("Process poller stopped");
}

fn dispatch(shared: &PollerShared, kind: NotificationKind, processes: &[ObservedProcess]) {
    if processes.is_empty() {
        return;
    }

    let sinks = shared.sinks_for(kind);
    if sinks.is_empty() {
        return;
    }

    let instances: Vec<RawInstance> = processes
        .iter()
        .map(|process| RawInstance::with_class(kind.event_class(), process.name.as_str(), process.pid))
        .collect();

    for sink in sinks {
        sink.indicate(&instances);
    }
}

fn create_process_snapshot(system: &System) -> ProcessSnapshot {
    let timestamp = SystemTime::now();
    let scan_start = Instant::now();

    let mut processes = HashMap::new();

    for (pid, process) in system.processes() {
        let pid = pid.as_u32();
        let start_time = process.start_time();

        processes.insert(
            (pid, start_time),
            ObservedProcess {
                pid,
                start_time,
                name: process.name().to_string_lossy().to_string(),
                discovery_timestamp: timestamp,
            },
        );
    }

    ProcessSnapshot {
        processes,
        timestamp,
        scan_duration: scan_start.elapsed(),
    }
}
