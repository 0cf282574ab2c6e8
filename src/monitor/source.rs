//! Instrumentation source abstraction
//!
//! The OS notification service is treated as a black box that can:
//! - bring up a process-wide runtime (reference counted by [`SourceRuntime`])
//! - open a connection and negotiate security on it
//! - register a sink for creation or deletion instances of an object class
//! - cancel a registration and close the connection
//!
//! Raw notifications are handed to a [`NotificationSink`], possibly from the
//! source's own threads.

use crate::constants::{CREATION_EVENT_CLASS, DELETION_EVENT_CLASS};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Error reported by an instrumentation source
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct SourceError {
    message: String,
}

impl SourceError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Error carrying a platform status code
    pub fn with_code(message: impl Into<String>, code: u32) -> Self {
        Self {
            message: format!("{}. Error code = 0x{:08X}", message.into(), code),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Text as delivered by the source, in whatever encoding it uses
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawText {
    Utf8(String),
    Utf16(Vec<u16>),
    Bytes(Vec<u8>),
}

impl RawText {
    /// Best-effort UTF-8 conversion. Malformed input becomes U+FFFD, never an error.
    pub fn to_utf8_lossy(&self) -> String {
        match self {
            RawText::Utf8(text) => text.clone(),
            RawText::Utf16(units) => String::from_utf16_lossy(units),
            RawText::Bytes(bytes) => String::from_utf8_lossy(bytes).into_owned(),
        }
    }
}

impl From<&str> for RawText {
    fn from(text: &str) -> Self {
        RawText::Utf8(text.to_string())
    }
}

impl From<String> for RawText {
    fn from(text: String) -> Self {
        RawText::Utf8(text)
    }
}

/// The object an event is about (the `TargetInstance` of the notification)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetInstance {
    pub name: Option<RawText>,
    pub process_id: u32,
}

/// One raw notification as delivered by the source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawInstance {
    /// Class of the notification itself, e.g. `__InstanceCreationEvent`
    pub event_class: String,
    pub target: Option<TargetInstance>,
}

impl RawInstance {
    pub fn creation(name: impl Into<RawText>, process_id: u32) -> Self {
        Self::with_class(CREATION_EVENT_CLASS, name, process_id)
    }

    pub fn deletion(name: impl Into<RawText>, process_id: u32) -> Self {
        Self::with_class(DELETION_EVENT_CLASS, name, process_id)
    }

    pub fn with_class(event_class: &str, name: impl Into<RawText>, process_id: u32) -> Self {
        Self {
            event_class: event_class.to_string(),
            target: Some(TargetInstance {
                name: Some(name.into()),
                process_id,
            }),
        }
    }
}

/// Notification class a query subscribes to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotificationKind {
    Creation,
    Deletion,
}

impl NotificationKind {
    pub fn event_class(&self) -> &'static str {
        match self {
            NotificationKind::Creation => CREATION_EVENT_CLASS,
            NotificationKind::Deletion => DELETION_EVENT_CLASS,
        }
    }
}

/// "Instances of `kind` whose target is a `target_class`, checked every `within`"
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationQuery {
    pub kind: NotificationKind,
    pub target_class: String,
    pub within: Duration,
}

impl NotificationQuery {
    pub fn new(kind: NotificationKind, target_class: impl Into<String>, within: Duration) -> Self {
        Self {
            kind,
            target_class: target_class.into(),
            within,
        }
    }

    pub fn event_class(&self) -> &'static str {
        self.kind.event_class()
    }
}

impl fmt::Display for NotificationQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SELECT * FROM {} WITHIN {} WHERE TargetInstance ISA '{}'",
            self.event_class(),
            self.within.as_secs_f64(),
            self.target_class
        )
    }
}

/// Handle to one outstanding registration on a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegistrationId(pub u64);

/// Receives raw notifications. Called from source threads, possibly concurrently.
pub trait NotificationSink: Send + Sync {
    fn indicate(&self, instances: &[RawInstance]);
}

/// An open connection to the instrumentation source
pub trait SourceConnection: Send {
    /// Apply the security settings required for notification delivery
    fn negotiate_security(&mut self) -> Result<(), SourceError> {
        Ok(())
    }

    fn subscribe(
        &mut self,
        query: &NotificationQuery,
        sink: Arc<dyn NotificationSink>,
    ) -> Result<RegistrationId, SourceError>;

    /// Cancel one registration. The source may still deliver in-flight notifications.
    fn cancel(&mut self, registration: RegistrationId) -> Result<(), SourceError>;

    /// Release the connection. Called once, after all cancellations.
    fn close(&mut self) {}
}

/// Factory for connections plus the process-wide runtime they depend on
pub trait InstrumentationSource: Send + Sync {
    fn name(&self) -> &str;

    /// Bring up the process-wide runtime. Only called by [`SourceRuntime`].
    fn initialize_runtime(&self) -> Result<(), SourceError> {
        Ok(())
    }

    /// Tear down the process-wide runtime. Only called by [`SourceRuntime`].
    fn shutdown_runtime(&self) {}

    fn connect(&self) -> Result<Box<dyn SourceConnection>, SourceError>;
}

/// Reference-counted runtime initialization for one source.
///
/// The first lease initializes the runtime, dropping the last lease shuts it
/// down. Leases may be released from any thread.
pub struct SourceRuntime {
    source: Arc<dyn InstrumentationSource>,
    refs: Mutex<usize>,
}

impl SourceRuntime {
    pub fn new(source: Arc<dyn InstrumentationSource>) -> Arc<Self> {
        Arc::new(Self {
            source,
            refs: Mutex::new(0),
        })
    }

    pub fn source(&self) -> &Arc<dyn InstrumentationSource> {
        &self.source
    }

    pub fn acquire(self: &Arc<Self>) -> Result<RuntimeLease, SourceError> {
        let mut refs = self.refs.lock();
        if *refs == 0 {
            self.source.initialize_runtime()?;
            log::debug!("{} runtime initialized", self.source.name());
        }
        *refs += 1;
        Ok(RuntimeLease {
            runtime: Arc::clone(self),
        })
    }

    /// Number of outstanding leases
    pub fn lease_count(&self) -> usize {
        *self.refs.lock()
    }

    fn release(&self) {
        let mut refs = self.refs.lock();
        *refs = refs.saturating_sub(1);
        if *refs == 0 {
            self.source.shutdown_runtime();
            log::debug!("{} runtime shut down", self.source.name());
        }
    }
}

/// Keeps the source runtime alive while held
pub struct RuntimeLease {
    runtime: Arc<SourceRuntime>,
}

impl Drop for RuntimeLease {
    fn drop(&mut self) {
        self.runtime.release();
    }
}
