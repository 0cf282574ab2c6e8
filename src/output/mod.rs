//! Output formatting module
//!
//! Handles:
//! - Human-readable event lines with ISO 8601 timestamps
//! - JSON output, one object per line
//! - Session summary

use crate::models::{EventRecord, EventType};
use anyhow::Result;
use time::format_description::well_known::Iso8601;
use time::OffsetDateTime;

/// Counters printed when a watch session ends
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SessionSummary {
    pub started: u64,
    pub stopped: u64,
    pub dropped: u64,
    pub interrupted: bool,
}

impl SessionSummary {
    pub fn record(&mut self, record: &EventRecord) {
        match record.event_type() {
            EventType::Start => self.started += 1,
            EventType::Stop => self.stopped += 1,
        }
    }

    pub fn total(&self) -> u64 {
        self.started + self.stopped
    }
}

/// `timestamp_ms` rendered as ISO 8601 UTC
pub fn format_timestamp(timestamp_ms: i64) -> Result<String> {
    let nanos = i128::from(timestamp_ms) * 1_000_000;
    let timestamp = OffsetDateTime::from_unix_timestamp_nanos(nanos)?;
    Ok(timestamp.format(&Iso8601::DEFAULT)?)
}

pub fn format_human(record: &EventRecord) -> Result<String> {
    let verb = match record.event_type() {
        EventType::Start => "Process started",
        EventType::Stop => "Process stopped",
    };

    let name = if record.process_name().is_empty() {
        "<unknown>"
    } else {
        record.process_name()
    };

    Ok(format!(
        "[{}] {}: {} (PID: {})",
        format_timestamp(record.timestamp_ms())?,
        verb,
        name,
        record.process_id()
    ))
}

pub fn format_json(record: &EventRecord) -> Result<String> {
    let json_output = serde_json::json!({
        "timestamp": format_timestamp(record.timestamp_ms())?,
        "event_type": record.event_type(),
        "process": {
            "pid": record.process_id(),
            "name": record.process_name(),
        },
        "timestamp_ms": record.timestamp_ms(),
    });

    Ok(json_output.to_string())
}

pub fn print_event(record: &EventRecord, json: bool) -> Result<()> {
    let line = if json {
        format_json(record)?
    } else {
        format_human(record)?
    };
    println!("{}", line);
    Ok(())
}

pub fn print_summary(summary: &SessionSummary) {
    eprintln!();
    eprintln!("Session Summary:");
    eprintln!("  Started: {} processes", summary.started);
    eprintln!("  Stopped: {} processes", summary.stopped);
    if summary.dropped > 0 {
        eprintln!("  Dropped (queue full): {} events", summary.dropped);
    }
    if summary.interrupted {
        eprintln!("  Status: Interrupted by user");
    }
}
