//! Unit tests for data models module
//!
//! Validates the event record invariants: bounded names, copy semantics,
//! classification and the serialized shapes used by output and bridge code.

use super::*;
use crate::constants::{CREATION_EVENT_CLASS, DELETION_EVENT_CLASS};

#[test]
fn test_event_record_creation() {
    let record = EventRecord::new(EventType::Start, "notepad.exe", 4321, 1_700_000_000_000);

    assert_eq!(record.event_type(), EventType::Start);
    assert_eq!(record.process_name(), "notepad.exe");
    assert_eq!(record.process_id(), 4321);
    assert_eq!(record.timestamp_ms(), 1_700_000_000_000);
}

#[test]
fn test_event_record_is_copy() {
    let record = EventRecord::new(EventType::Stop, "svchost.exe", 812, 42);
    let copy = record;

    // Both bindings stay usable after the copy
    assert_eq!(record, copy);
    assert_eq!(copy.process_name(), "svchost.exe");
}

#[test]
fn test_observed_now_uses_wall_clock() {
    let before = chrono::Utc::now().timestamp_millis();
    let record = EventRecord::observed_now(EventType::Start, "cmd.exe", 1);
    let after = chrono::Utc::now().timestamp_millis();

    assert!(record.timestamp_ms() >= before);
    assert!(record.timestamp_ms() <= after);
}

#[test]
fn test_long_process_name_is_truncated() {
    let long_name = "a".repeat(2000);
    let name = ProcessName::new(&long_name);

    assert_eq!(name.len(), PROCESS_NAME_CAPACITY);
    assert!(long_name.starts_with(name.as_str()));
}

#[test]
fn test_truncation_respects_char_boundaries() {
    // 3-byte characters never divide the capacity evenly
    let long_name = "\u{20AC}".repeat(400);
    let name = ProcessName::new(&long_name);

    assert!(name.len() <= PROCESS_NAME_CAPACITY);
    assert_eq!(name.len() % 3, 0);
    assert!(name.as_str().chars().all(|c| c == '\u{20AC}'));
}

#[test]
fn test_name_at_exact_capacity_is_kept() {
    let exact = "b".repeat(PROCESS_NAME_CAPACITY);
    let name = ProcessName::new(&exact);
    assert_eq!(name.as_str(), exact);
}

#[test]
fn test_empty_process_name() {
    let name = ProcessName::default();
    assert!(name.is_empty());
    assert_eq!(name.as_str(), "");
}

#[test]
fn test_event_type_classification() {
    assert_eq!(EventType::from_event_class(CREATION_EVENT_CLASS), EventType::Start);
    assert_eq!(EventType::from_event_class(DELETION_EVENT_CLASS), EventType::Stop);
    // Anything that is not the creation class counts as a stop
    assert_eq!(EventType::from_event_class("__InstanceModificationEvent"), EventType::Stop);
}

#[test]
fn test_event_record_json_serialization() {
    let record = EventRecord::new(EventType::Start, "notepad.exe", 4321, 1000);
    let json = serde_json::to_value(record).unwrap();

    assert_eq!(json["event_type"], "start");
    assert_eq!(json["process_name"], "notepad.exe");
    assert_eq!(json["process_id"], 4321);
    assert_eq!(json["timestamp_ms"], 1000);
}

#[test]
fn test_event_record_deserialization_truncates_name() {
    let json = serde_json::json!({
        "event_type": "stop",
        "process_name": "x".repeat(600),
        "process_id": 7,
        "timestamp_ms": 5,
    });

    let record: EventRecord = serde_json::from_value(json).unwrap();
    assert_eq!(record.event_type(), EventType::Stop);
    assert_eq!(record.process_name().len(), PROCESS_NAME_CAPACITY);
}

#[test]
fn test_bridge_map_keys() {
    let record = EventRecord::new(EventType::Stop, "notepad.exe", 4321, 99);
    let map = record.to_bridge_map();

    assert_eq!(map["eventType"], "stop");
    assert_eq!(map["processName"], "notepad.exe");
    assert_eq!(map["processId"], 4321);
    assert_eq!(map["timestampMs"], 99);
}

#[test]
fn test_snapshot_diff_reports_new_and_exited() {
    let now = SystemTime::now();
    let process = |pid: u32, name: &str| ObservedProcess {
        pid,
        start_time: 100,
        name: name.to_string(),
        discovery_timestamp: now,
    };
    let snapshot = |processes: Vec<ObservedProcess>| ProcessSnapshot {
        processes: processes.into_iter().map(|p| ((p.pid, p.start_time), p)).collect(),
        timestamp: now,
        scan_duration: Duration::from_millis(1),
    };

    let previous = snapshot(vec![process(1, "init"), process(2, "sshd")]);
    let current = snapshot(vec![process(1, "init"), process(3, "bash")]);

    let new = current.new_processes(&previous);
    let exited = current.exited_processes(&previous);

    assert_eq!(new.len(), 1);
    assert_eq!(new[0].name, "bash");
    assert_eq!(exited.len(), 1);
    assert_eq!(exited[0].name, "sshd");
}

#[test]
fn test_monitor_error_messages() {
    assert_eq!(
        MonitorError::AlreadyRunning.to_string(),
        "Process monitor is already running"
    );
    assert_eq!(
        MonitorError::NullCallback.to_string(),
        "Callback function cannot be null"
    );
    let err = MonitorError::RegistrationFailure {
        class: "__InstanceDeletionEvent".to_string(),
        reason: "access denied".to_string(),
    };
    assert!(err.to_string().contains("__InstanceDeletionEvent"));
    assert!(err.to_string().contains("access denied"));
}
