//! Notification subscription
//!
//! Registers a stub sink for creation and deletion instances of the target
//! class and turns raw notifications into [`EventRecord`]s. Resources are
//! acquired step by step and each one is tracked separately, so cleanup is
//! safe from any partially initialized state.

use super::channel::DeliveryChannel;
use super::source::{
    NotificationKind, NotificationQuery, NotificationSink, RawInstance, RawText, RegistrationId,
    RuntimeLease, SourceConnection, SourceRuntime,
};
use super::state::LastError;
use crate::config::SourceSettings;
use crate::models::{EventRecord, EventType, MonitorError};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Normalize one raw notification. Instances without a target are skipped.
pub fn normalize(instance: &RawInstance) -> Option<EventRecord> {
    let target = instance.target.as_ref()?;
    let name = target
        .name
        .as_ref()
        .map(RawText::to_utf8_lossy)
        .unwrap_or_default();

    Some(EventRecord::observed_now(
        EventType::from_event_class(&instance.event_class),
        &name,
        target.process_id,
    ))
}

/// The sink identity registered with the source
pub struct SubscriptionStub {
    channel: Arc<DeliveryChannel>,
    revoked: AtomicBool,
    delivered: AtomicU64,
}

impl SubscriptionStub {
    fn new(channel: Arc<DeliveryChannel>) -> Self {
        Self {
            channel,
            revoked: AtomicBool::new(false),
            delivered: AtomicU64::new(0),
        }
    }

    /// Drop every indication that arrives from now on
    pub fn revoke(&self) {
        self.revoked.store(true, Ordering::SeqCst);
    }

    pub fn is_revoked(&self) -> bool {
        self.revoked.load(Ordering::SeqCst)
    }

    pub fn delivered_count(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }
}

impl NotificationSink for SubscriptionStub {
    fn indicate(&self, instances: &[RawInstance]) {
        for instance in instances {
            // Cancellation may race with in-flight deliveries
            if self.is_revoked() {
                log::trace!("Dropping notification delivered after cleanup");
                return;
            }

            match normalize(instance) {
                Some(record) => {
                    self.channel.deliver(record);
                    self.delivered.fetch_add(1, Ordering::Relaxed);
                }
                None => log::debug!(
                    "Skipping {} notification without a target instance",
                    instance.event_class
                ),
            }
        }
    }
}

/// Owns a connection, two registrations and the stub for one session
pub struct NotificationSubscription {
    runtime: Arc<SourceRuntime>,
    channel: Arc<DeliveryChannel>,
    last_error: Arc<LastError>,
    target_class: String,
    within: Duration,

    // Acquired resources, in acquisition order
    lease: Option<RuntimeLease>,
    connection: Option<Box<dyn SourceConnection>>,
    stub: Option<Arc<SubscriptionStub>>,
    registrations: Vec<(NotificationKind, RegistrationId)>,
}

impl NotificationSubscription {
    pub fn new(
        runtime: Arc<SourceRuntime>,
        channel: Arc<DeliveryChannel>,
        last_error: Arc<LastError>,
        settings: &SourceSettings,
    ) -> Self {
        Self {
            runtime,
            channel,
            last_error,
            target_class: settings.target_class.clone(),
            within: settings.polling_duration(),
            lease: None,
            connection: None,
            stub: None,
            registrations: Vec::new(),
        }
    }

    /// Connect and register for creation and deletion notifications.
    ///
    /// On failure everything acquired so far is released in reverse order
    /// before the error is returned.
    pub fn initialize(&mut self) -> Result<(), MonitorError> {
        let result = self.acquire();
        if result.is_err() {
            self.cleanup();
        }
        result
    }

    fn acquire(&mut self) -> Result<(), MonitorError> {
        let source_name = self.runtime.source().name().to_string();

        let lease = self.runtime.acquire().map_err(|e| {
            MonitorError::ConnectionFailure(format!("Failed to initialize {} runtime: {}", source_name, e))
        })?;
        self.lease = Some(lease);

        let connection = self
            .runtime
            .source()
            .connect()
            .map_err(|e| MonitorError::ConnectionFailure(e.to_string()))?;
        let connection = self.connection.insert(connection);

        if let Err(e) = connection.negotiate_security() {
            let err = MonitorError::SecurityNegotiationFailure(e.to_string());
            log::warn!("{}; continuing with default security", err);
            self.last_error.set(err.to_string());
        }

        let stub = Arc::new(SubscriptionStub::new(Arc::clone(&self.channel)));
        self.stub = Some(Arc::clone(&stub));

        for kind in [NotificationKind::Creation, NotificationKind::Deletion] {
            let query = NotificationQuery::new(kind, self.target_class.clone(), self.within);
            let sink: Arc<dyn NotificationSink> = stub.clone();
            let registration = connection.subscribe(&query, sink).map_err(|e| {
                MonitorError::RegistrationFailure {
                    class: query.event_class().to_string(),
                    reason: e.to_string(),
                }
            })?;
            log::debug!("Registered {} ({:?})", query, registration);
            self.registrations.push((kind, registration));
        }

        log::info!(
            "Subscribed to {} lifecycle notifications from {}",
            self.target_class,
            source_name
        );
        Ok(())
    }

    /// Both registrations are in place
    pub fn is_active(&self) -> bool {
        self.connection.is_some() && self.registrations.len() == 2
    }

    pub fn delivered_count(&self) -> u64 {
        self.stub.as_ref().map_or(0, |stub| stub.delivered_count())
    }

    /// Cancel registrations, close the connection, release the runtime lease.
    /// A second call finds nothing left to release.
    pub fn cleanup(&mut self) {
        if let Some(stub) = self.stub.as_ref() {
            stub.revoke();
        }

        if let Some(mut connection) = self.connection.take() {
            while let Some((kind, registration)) = self.registrations.pop() {
                if let Err(e) = connection.cancel(registration) {
                    log::warn!("Failed to cancel {} registration: {}", kind.event_class(), e);
                }
            }
            connection.close();
        }
        self.registrations.clear();

        if let Some(stub) = self.stub.take() {
            log::debug!(
                "Released notification stub after {} event(s)",
                stub.delivered_count()
            );
        }

        self.lease.take();
    }
}

impl Drop for NotificationSubscription {
    fn drop(&mut self) {
        self.cleanup();
    }
}
