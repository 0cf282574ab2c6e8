//! In-process instrumentation source
//!
//! Delivers whatever is emitted into it to the registered sinks, on the
//! emitting thread. Failure points and a slow cancellation can be injected,
//! and every call made by the monitor is recorded so teardown order and
//! counts can be checked.

use super::source::{
    InstrumentationSource, NotificationKind, NotificationQuery, NotificationSink, RawInstance,
    RegistrationId, SourceConnection, SourceError,
};
use crate::constants::CREATION_EVENT_CLASS;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Step of the acquisition chain that can be made to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailurePoint {
    RuntimeInit,
    Connect,
    Security,
    CreationQuery,
    DeletionQuery,
}

/// Calls received from the monitor, in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceCall {
    RuntimeInit,
    RuntimeShutdown,
    Connect,
    Security,
    Subscribe(NotificationKind),
    Cancel(NotificationKind),
    Close,
}

struct Registration {
    id: RegistrationId,
    kind: NotificationKind,
    sink: Arc<dyn NotificationSink>,
}

#[derive(Default)]
struct ManualInner {
    registrations: Mutex<Vec<Registration>>,
    failures: Mutex<HashMap<FailurePoint, SourceError>>,
    cancel_delay: Mutex<Duration>,
    calls: Mutex<Vec<SourceCall>>,
    next_id: AtomicU64,
}

impl ManualInner {
    fn record(&self, call: SourceCall) {
        self.calls.lock().push(call);
    }

    fn check(&self, point: FailurePoint) -> Result<(), SourceError> {
        match self.failures.lock().get(&point) {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}

/// Cloneable handle; all clones share registrations and call history
#[derive(Clone, Default)]
pub struct ManualSource {
    inner: Arc<ManualInner>,
}

impl ManualSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `point` fail with `message` from now on
    pub fn fail_at(&self, point: FailurePoint, message: impl Into<String>) -> &Self {
        self.inner
            .failures
            .lock()
            .insert(point, SourceError::new(message));
        self
    }

    pub fn clear_failures(&self) {
        self.inner.failures.lock().clear();
    }

    /// Make every cancellation block for `delay`
    pub fn set_cancel_delay(&self, delay: Duration) {
        *self.inner.cancel_delay.lock() = delay;
    }

    /// Deliver one instance to every registration whose class matches it.
    /// Instances of any other class go to the deletion registrations.
    pub fn emit(&self, instance: RawInstance) -> usize {
        let kind = if instance.event_class == CREATION_EVENT_CLASS {
            NotificationKind::Creation
        } else {
            NotificationKind::Deletion
        };
        self.emit_to(kind, &[instance])
    }

    /// Deliver a batch to every registration of `kind`. Returns how many sinks were reached.
    pub fn emit_to(&self, kind: NotificationKind, instances: &[RawInstance]) -> usize {
        let sinks: Vec<Arc<dyn NotificationSink>> = self
            .inner
            .registrations
            .lock()
            .iter()
            .filter(|registration| registration.kind == kind)
            .map(|registration| Arc::clone(&registration.sink))
            .collect();

        for sink in &sinks {
            sink.indicate(instances);
        }
        sinks.len()
    }

    pub fn registration_count(&self) -> usize {
        self.inner.registrations.lock().len()
    }

    /// Poll until at least `count` registrations exist or `timeout` elapses
    pub fn wait_for_registrations(&self, count: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if self.registration_count() >= count {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        self.registration_count() >= count
    }

    pub fn calls(&self) -> Vec<SourceCall> {
        self.inner.calls.lock().clone()
    }

    pub fn call_count(&self, call: &SourceCall) -> usize {
        self.inner.calls.lock().iter().filter(|c| *c == call).count()
    }
}

impl InstrumentationSource for ManualSource {
    fn name(&self) -> &str {
        "manual"
    }

    fn initialize_runtime(&self) -> Result<(), SourceError> {
        self.inner.check(FailurePoint::RuntimeInit)?;
        self.inner.record(SourceCall::RuntimeInit);
        Ok(())
    }

    fn shutdown_runtime(&self) {
        self.inner.record(SourceCall::RuntimeShutdown);
    }

    fn connect(&self) -> Result<Box<dyn SourceConnection>, SourceError> {
        self.inner.check(FailurePoint::Connect)?;
        self.inner.record(SourceCall::Connect);
        Ok(Box::new(ManualConnection {
            inner: Arc::clone(&self.inner),
            owned: Vec::new(),
        }))
    }
}

struct ManualConnection {
    inner: Arc<ManualInner>,
    owned: Vec<(RegistrationId, NotificationKind)>,
}

impl SourceConnection for ManualConnection {
    fn negotiate_security(&mut self) -> Result<(), SourceError> {
        self.inner.record(SourceCall::Security);
        self.inner.check(FailurePoint::Security)
    }

    fn subscribe(
        &mut self,
        query: &NotificationQuery,
        sink: Arc<dyn NotificationSink>,
    ) -> Result<RegistrationId, SourceError> {
        let point = match query.kind {
            NotificationKind::Creation => FailurePoint::CreationQuery,
            NotificationKind::Deletion => FailurePoint::DeletionQuery,
        };
        self.inner.check(point)?;
        self.inner.record(SourceCall::Subscribe(query.kind));

        let id = RegistrationId(self.inner.next_id.fetch_add(1, Ordering::SeqCst));
        self.inner.registrations.lock().push(Registration {
            id,
            kind: query.kind,
            sink,
        });
        self.owned.push((id, query.kind));
        Ok(id)
    }

    fn cancel(&mut self, registration: RegistrationId) -> Result<(), SourceError> {
        let delay = *self.inner.cancel_delay.lock();
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }

        let position = self.owned.iter().position(|(id, _)| *id == registration);
        let (_, kind) = match position {
            Some(index) => self.owned.remove(index),
            None => return Err(SourceError::new(format!("Unknown registration {:?}", registration))),
        };

        self.inner
            .registrations
            .lock()
            .retain(|r| r.id != registration);
        self.inner.record(SourceCall::Cancel(kind));
        Ok(())
    }

    fn close(&mut self) {
        self.inner.record(SourceCall::Close);
    }
}
