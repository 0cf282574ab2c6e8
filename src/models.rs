//! Data models module
//!
//! Defines core data structures:
//! - EventRecord: One normalized process lifecycle event
//! - ProcessName: Fixed-capacity, copyable UTF-8 process name
//! - MonitorState / DeliveryMode: Observable controller state
//! - ProcessSnapshot: Point-in-time process table used by the system source
//! - MonitorError: Failure kinds reported by the monitor

use crate::constants::PROCESS_NAME_CAPACITY;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, SystemTime};

#[cfg(test)]
mod tests;

/// Kind of lifecycle transition carried by an [`EventRecord`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Start,
    Stop,
}

impl EventType {
    /// Classify a raw event class. Only the creation class maps to `Start`.
    pub fn from_event_class(event_class: &str) -> Self {
        if event_class == crate::constants::CREATION_EVENT_CLASS {
            EventType::Start
        } else {
            EventType::Stop
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Start => "start",
            EventType::Stop => "stop",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Process name stored inline so that event records stay `Copy`.
///
/// Names longer than [`PROCESS_NAME_CAPACITY`] bytes are cut at the last
/// character boundary that fits. Construction never fails.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProcessName {
    bytes: [u8; PROCESS_NAME_CAPACITY],
    len: u16,
}

impl ProcessName {
    pub fn new(name: &str) -> Self {
        let mut end = name.len().min(PROCESS_NAME_CAPACITY);
        while !name.is_char_boundary(end) {
            end -= 1;
        }

        let mut bytes = [0u8; PROCESS_NAME_CAPACITY];
        bytes[..end].copy_from_slice(&name.as_bytes()[..end]);

        Self {
            bytes,
            len: end as u16,
        }
    }

    pub fn as_str(&self) -> &str {
        // Only whole characters are ever copied in, so the prefix is valid UTF-8
        std::str::from_utf8(&self.bytes[..self.len as usize]).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.len as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Default for ProcessName {
    fn default() -> Self {
        Self::new("")
    }
}

impl From<&str> for ProcessName {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl PartialEq<str> for ProcessName {
    fn eq(&self, other: &str) -> bool {
        self.as_str() == other
    }
}

impl PartialEq<&str> for ProcessName {
    fn eq(&self, other: &&str) -> bool {
        self.as_str() == *other
    }
}

impl fmt::Debug for ProcessName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self.as_str(), f)
    }
}

impl fmt::Display for ProcessName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for ProcessName {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ProcessName {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        Ok(ProcessName::new(&name))
    }
}

/// One process lifecycle event, immutable once built
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    event_type: EventType,
    process_name: ProcessName,
    process_id: u32,
    /// Milliseconds since the Unix epoch at observation time
    timestamp_ms: i64,
}

impl EventRecord {
    pub fn new(event_type: EventType, process_name: &str, process_id: u32, timestamp_ms: i64) -> Self {
        Self {
            event_type,
            process_name: ProcessName::new(process_name),
            process_id,
            timestamp_ms,
        }
    }

    /// Build a record stamped with the current wall-clock time
    pub fn observed_now(event_type: EventType, process_name: &str, process_id: u32) -> Self {
        Self::new(event_type, process_name, process_id, chrono::Utc::now().timestamp_millis())
    }

    pub fn event_type(&self) -> EventType {
        self.event_type
    }

    pub fn process_name(&self) -> &str {
        self.process_name.as_str()
    }

    pub fn process_id(&self) -> u32 {
        self.process_id
    }

    pub fn timestamp_ms(&self) -> i64 {
        self.timestamp_ms
    }

    /// Map shape handed to front-end event streams
    pub fn to_bridge_map(&self) -> serde_json::Map<String, serde_json::Value> {
        let mut map = serde_json::Map::new();
        map.insert("eventType".to_string(), self.event_type.as_str().into());
        map.insert("processName".to_string(), self.process_name().into());
        map.insert("processId".to_string(), i64::from(self.process_id).into());
        map.insert("timestampMs".to_string(), self.timestamp_ms.into());
        map
    }
}

/// Observable state of the monitor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MonitorState {
    /// No session, or the last session has fully wound down
    Stopped,
    /// Background thread alive and subscription active or being established
    Running,
    /// Stop requested, background thread still winding down
    StopRequested,
}

/// How events reach the consumer during a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryMode {
    /// Buffered queue drained by the consumer
    Pull,
    /// Callback invoked on the notification thread
    Push,
}

/// A process observed by the system source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservedProcess {
    /// Process ID (PID)
    pub pid: u32,
    /// Process start time as Unix timestamp (seconds since epoch).
    /// Combined with PID, this uniquely identifies a process even across PID reuse.
    pub start_time: u64,
    /// Process name (executable name)
    pub name: String,
    /// Timestamp when this process was first discovered
    pub discovery_timestamp: SystemTime,
}

/// Snapshot of process state at a given moment
#[derive(Debug, Clone)]
pub struct ProcessSnapshot {
    /// HashMap of (PID, start_time) -> ObservedProcess for O(1) lookups.
    /// Using (PID, start_time) as key ensures PID reuse is detected as a new process.
    pub processes: HashMap<(u32, u64), ObservedProcess>,
    /// Timestamp of this snapshot
    pub timestamp: SystemTime,
    /// Duration taken to create this snapshot
    pub scan_duration: Duration,
}

impl ProcessSnapshot {
    /// Returns processes that are in this snapshot but not in the previous one.
    pub fn new_processes(&self, previous: &ProcessSnapshot) -> Vec<ObservedProcess> {
        self.processes
            .iter()
            .filter(|(key, _)| !previous.processes.contains_key(key))
            .map(|(_, process)| process.clone())
            .collect()
    }

    /// Returns processes that were in the previous snapshot but are gone now.
    pub fn exited_processes(&self, previous: &ProcessSnapshot) -> Vec<ObservedProcess> {
        previous
            .processes
            .iter()
            .filter(|(key, _)| !self.processes.contains_key(key))
            .map(|(_, process)| process.clone())
            .collect()
    }
}

/// Failure kinds reported by the monitor
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MonitorError {
    #[error("Could not connect to instrumentation source: {0}")]
    ConnectionFailure(String),

    /// Non-fatal; monitoring continues after it is recorded
    #[error("Failed to negotiate security: {0}")]
    SecurityNegotiationFailure(String),

    #[error("Notification query ({class}) failed: {reason}")]
    RegistrationFailure { class: String, reason: String },

    #[error("Process monitor is already running")]
    AlreadyRunning,

    #[error("Process monitor is not initialized")]
    NotInitialized,

    #[error("Failed to start monitoring thread: {0}")]
    ThreadSpawnFailure(String),

    #[error("Callback function cannot be null")]
    NullCallback,

    /// Note: bounds must match POLLING_INTERVAL_MIN/MAX in constants.rs
    #[error("Invalid polling interval: {0}. Must be between 0.1 and 300.0 seconds")]
    InvalidInterval(f64),
}
