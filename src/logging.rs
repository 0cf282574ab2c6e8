//! Logging setup and structured session events
//!
//! Library code logs through the `log` facade. On macOS records go to the
//! Unified Logging System under [`APP_SUBSYSTEM`]; elsewhere they are
//! formatted to stderr by `tracing-subscriber`.

use crate::constants::APP_SUBSYSTEM;
use crate::models::{DeliveryMode, EventRecord};
use anyhow::Result;
use log::{error, info};
use serde_json::json;
use uuid::Uuid;

/// Environment variable holding the log filter on non-macOS platforms
pub const LOG_FILTER_ENV: &str = "PROCWATCH_LOG";

/// Install the platform log backend. Calling it twice is an error from the
/// second call on; callers treat that as non-fatal.
pub fn init_logger(verbose: bool) -> Result<()> {
    let level = if verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };

    #[cfg(target_os = "macos")]
    {
        let logger = oslog::OsLogger::new(APP_SUBSYSTEM);
        log::set_boxed_logger(Box::new(logger))
            .map_err(|e| anyhow::anyhow!("Failed to set logger: {}", e))?;
        log::set_max_level(level);
        Ok(())
    }

    #[cfg(not(target_os = "macos"))]
    {
        use tracing_subscriber::EnvFilter;

        let filter = EnvFilter::try_from_env(LOG_FILTER_ENV)
            .unwrap_or_else(|_| EnvFilter::new(level.to_string().to_lowercase()));

        // Also routes `log` records into tracing
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(false)
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to set logger for {}: {}", APP_SUBSYSTEM, e))
    }
}

/// Log levels for structured events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Error,
    Info,
}

/// Writes monitor session events as `message | {json}` records
#[derive(Debug, Clone)]
pub struct EventLogger {
    level: LogLevel,
    /// Per-event records are noisy; off unless asked for
    log_process_events: bool,
}

impl Default for EventLogger {
    fn default() -> Self {
        Self::new(LogLevel::Info)
    }
}

impl EventLogger {
    pub fn new(level: LogLevel) -> Self {
        Self {
            level,
            log_process_events: false,
        }
    }

    pub fn with_process_events(mut self, enabled: bool) -> Self {
        self.log_process_events = enabled;
        self
    }

    pub fn log_session_start(&self, session: Uuid, mode: DeliveryMode, source: &str) -> Result<()> {
        let message = json!({
            "event": "session_start",
            "session": session.to_string(),
            "mode": mode,
            "source": source,
            "timestamp": chrono::Utc::now().to_rfc3339(),
        });

        self.log_structured(LogLevel::Info, "Monitoring session started", &message)
    }

    pub fn log_session_stop(&self, session: Uuid, delivered: u64, reason: &str) -> Result<()> {
        let message = json!({
            "event": "session_stop",
            "session": session.to_string(),
            "delivered": delivered,
            "reason": reason,
            "timestamp": chrono::Utc::now().to_rfc3339(),
        });

        self.log_structured(LogLevel::Info, "Monitoring session stopped", &message)
    }

    pub fn log_process_event(&self, record: &EventRecord) -> Result<()> {
        if !self.log_process_events {
            return Ok(());
        }

        let message = json!({
            "event": "process_event",
            "type": record.event_type(),
            "pid": record.process_id(),
            "process_name": record.process_name(),
            "observed_ms": record.timestamp_ms(),
            "timestamp": chrono::Utc::now().to_rfc3339(),
        });

        self.log_structured(
            LogLevel::Info,
            &format!("Process {}: {}", record.event_type(), record.process_name()),
            &message,
        )
    }

    pub fn log_error(&self, error_message: &str, context: Option<&str>) -> Result<()> {
        let message = json!({
            "event": "error",
            "message": error_message,
            "context": context,
            "timestamp": chrono::Utc::now().to_rfc3339(),
        });

        self.log_structured(LogLevel::Error, error_message, &message)
    }

    fn log_structured(&self, level: LogLevel, message: &str, data: &serde_json::Value) -> Result<()> {
        if !self.should_log(level) {
            return Ok(());
        }

        let full_message = format!("{} | {}", message, data);
        match level {
            LogLevel::Error => error!("{}", full_message),
            LogLevel::Info => info!("{}", full_message),
        }

        Ok(())
    }

    fn should_log(&self, level: LogLevel) -> bool {
        matches!(
            (self.level, level),
            (LogLevel::Error, LogLevel::Error) | (LogLevel::Info, LogLevel::Error | LogLevel::Info)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EventType;

    #[test]
    fn test_level_filtering() {
        let errors_only = EventLogger::new(LogLevel::Error);
        assert!(errors_only.should_log(LogLevel::Error));
        assert!(!errors_only.should_log(LogLevel::Info));

        let info = EventLogger::default();
        assert!(info.should_log(LogLevel::Error));
        assert!(info.should_log(LogLevel::Info));
    }

    #[test]
    fn test_structured_events_succeed_without_backend() {
        let logger = EventLogger::default().with_process_events(true);
        let session = Uuid::new_v4();
        let record = EventRecord::new(EventType::Start, "notepad.exe", 4321, 0);

        assert!(logger.log_session_start(session, DeliveryMode::Pull, "manual").is_ok());
        assert!(logger.log_process_event(&record).is_ok());
        assert!(logger.log_error("Could not connect", Some("initialize")).is_ok());
        assert!(logger.log_session_stop(session, 2, "cleanup").is_ok());
    }
}
