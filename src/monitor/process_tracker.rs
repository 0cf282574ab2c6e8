use crate::models::{ObservedProcess, ProcessSnapshot};

/// Processes that appeared or disappeared between two polling cycles
#[derive(Debug, Default)]
pub struct ProcessChanges {
    pub started: Vec<ObservedProcess>,
    pub exited: Vec<ObservedProcess>,
}

impl ProcessChanges {
    pub fn is_empty(&self) -> bool {
        self.started.is_empty() && self.exited.is_empty()
    }
}

/// Manages process state tracking between polling cycles
pub struct ProcessTracker {
    current_snapshot: Option<ProcessSnapshot>,
}

impl ProcessTracker {
    pub fn new() -> Self {
        Self {
            current_snapshot: None,
        }
    }

    /// Compare `new_snapshot` with the previous one and keep it for the next cycle
    pub fn detect_changes(&mut self, new_snapshot: ProcessSnapshot) -> ProcessChanges {
        let changes = match &self.current_snapshot {
            // First snapshot is the baseline; processes already running are not "started"
            None => ProcessChanges::default(),
            Some(previous) => ProcessChanges {
                started: new_snapshot.new_processes(previous),
                exited: new_snapshot.exited_processes(previous),
            },
        };

        self.current_snapshot = Some(new_snapshot);
        changes
    }

    pub fn has_baseline(&self) -> bool {
        self.current_snapshot.is_some()
    }
}

impl Default for ProcessTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::time::{Duration, SystemTime};

    fn create_test_process(pid: u32, start_time: u64, name: &str) -> ObservedProcess {
        ObservedProcess {
            pid,
            start_time,
            name: name.to_string(),
            discovery_timestamp: SystemTime::now(),
        }
    }

    fn create_snapshot(processes: Vec<ObservedProcess>) -> ProcessSnapshot {
        let mut map = HashMap::new();
        for p in processes {
            map.insert((p.pid, p.start_time), p);
        }
        ProcessSnapshot {
            processes: map,
            timestamp: SystemTime::now(),
            scan_duration: Duration::from_millis(10),
        }
    }

    #[test]
    fn test_new_tracker_has_no_snapshot() {
        let tracker = ProcessTracker::new();
        assert!(!tracker.has_baseline());
    }

    #[test]
    fn test_first_snapshot_is_baseline() {
        let mut tracker = ProcessTracker::new();

        let snapshot = create_snapshot(vec![
            create_test_process(100, 1000, "explorer.exe"),
            create_test_process(101, 1001, "svchost.exe"),
        ]);

        let changes = tracker.detect_changes(snapshot);
        assert!(changes.is_empty(), "First snapshot should not report any changes");
        assert!(tracker.has_baseline());
    }

    #[test]
    fn test_new_process_detected_in_second_snapshot() {
        let mut tracker = ProcessTracker::new();
        tracker.detect_changes(create_snapshot(vec![create_test_process(100, 1000, "explorer.exe")]));

        let changes = tracker.detect_changes(create_snapshot(vec![
            create_test_process(100, 1000, "explorer.exe"),
            create_test_process(102, 1002, "notepad.exe"),
        ]));

        assert_eq!(changes.started.len(), 1, "Should detect exactly one new process");
        assert_eq!(changes.started[0].pid, 102);
        assert_eq!(changes.started[0].name, "notepad.exe");
        assert!(changes.exited.is_empty());
    }

    #[test]
    fn test_terminated_process_reported_as_exited() {
        let mut tracker = ProcessTracker::new();
        tracker.detect_changes(create_snapshot(vec![
            create_test_process(100, 1000, "notepad.exe"),
            create_test_process(101, 1001, "explorer.exe"),
        ]));

        let changes = tracker.detect_changes(create_snapshot(vec![create_test_process(
            101, 1001, "explorer.exe",
        )]));

        assert!(changes.started.is_empty(), "No new processes when one terminates");
        assert_eq!(changes.exited.len(), 1);
        assert_eq!(changes.exited[0].pid, 100);
        assert_eq!(changes.exited[0].name, "notepad.exe");
    }

    #[test]
    fn test_pid_reuse_is_stop_then_start() {
        let mut tracker = ProcessTracker::new();
        tracker.detect_changes(create_snapshot(vec![create_test_process(100, 1000, "notepad.exe")]));

        // Same PID, different start time: a different process
        let changes = tracker.detect_changes(create_snapshot(vec![create_test_process(
            100, 2000, "calc.exe",
        )]));

        assert_eq!(changes.started.len(), 1);
        assert_eq!(changes.started[0].name, "calc.exe");
        assert_eq!(changes.exited.len(), 1);
        assert_eq!(changes.exited[0].name, "notepad.exe");
    }

    #[test]
    fn test_multiple_changes_in_one_cycle() {
        let mut tracker = ProcessTracker::new();
        tracker.detect_changes(create_snapshot(vec![]));

        let changes = tracker.detect_changes(create_snapshot(vec![
            create_test_process(100, 1, "a.exe"),
            create_test_process(101, 1, "b.exe"),
            create_test_process(102, 1, "c.exe"),
        ]));
        assert_eq!(changes.started.len(), 3);

        let changes = tracker.detect_changes(create_snapshot(vec![]));
        assert_eq!(changes.exited.len(), 3);
    }

    #[test]
    fn test_unchanged_snapshot_reports_nothing() {
        let mut tracker = ProcessTracker::new();
        let processes = vec![create_test_process(100, 1000, "explorer.exe")];
        tracker.detect_changes(create_snapshot(processes.clone()));

        assert!(tracker.detect_changes(create_snapshot(processes)).is_empty());
    }
}
