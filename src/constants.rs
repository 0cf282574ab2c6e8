//! Global constants for procwatch
//!
//! Centralized location for application-wide constants

use std::time::Duration;

/// Application subsystem identifier, used for unified logging on macOS
pub const APP_SUBSYSTEM: &str = "com.microsoft.sysinternals.procwatch";

/// Name given to the background notification thread
pub const MONITOR_THREAD_NAME: &str = "procwatch-monitor";

/// Name given to the system source poller thread
pub const POLLER_THREAD_NAME: &str = "procwatch-poller";

/// Event class delivered when an instance of the monitored class appears
pub const CREATION_EVENT_CLASS: &str = "__InstanceCreationEvent";

/// Event class delivered when an instance of the monitored class goes away
pub const DELETION_EVENT_CLASS: &str = "__InstanceDeletionEvent";

/// Object class watched for creation and deletion
pub const DEFAULT_TARGET_CLASS: &str = "Win32_Process";

/// Maximum number of buffered events in pull mode
pub const DEFAULT_QUEUE_CAPACITY: usize = 1000;

/// Size of the process name envelope, including the terminator slot
pub const PROCESS_NAME_ENVELOPE: usize = 512;

/// Usable bytes of a process name
pub const PROCESS_NAME_CAPACITY: usize = PROCESS_NAME_ENVELOPE - 1;

/// How often the background thread checks its stop flag
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Time given to the background thread to notice a stop request during cleanup
pub const DEFAULT_STOP_GRACE: Duration = Duration::from_millis(100);

/// Upper bound on how long cleanup waits for the background thread
pub const DEFAULT_JOIN_TIMEOUT: Duration = Duration::from_millis(1000);

/// Polling interval bounds for the system source, in seconds
pub const POLLING_INTERVAL_MIN: f64 = 0.1;
pub const POLLING_INTERVAL_MAX: f64 = 300.0;

/// Default polling interval for the system source, in seconds
pub const DEFAULT_POLLING_INTERVAL: f64 = 1.0;

/// Configuration file name under the user configuration directory
pub const CONFIG_FILE_NAME: &str = "config.toml";
