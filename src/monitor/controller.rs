//! Monitor lifecycle controller
//!
//! Owns start/stop/cleanup semantics and the lifetime of the background
//! notification thread. One controller is one independent monitor; the
//! process-wide instance lives in [`super::global`].
//!
//! Stop is a request: it flips flags and returns. The background thread
//! notices within one poll interval and releases its own subscription.
//! Cleanup is the only blocking path and bounds its wait with a join timeout,
//! detaching a thread that does not finish in time.

use super::channel::{panic_message, DeliveryChannel, EventCallback, UserData, WaitOutcome};
use super::polling::SystemSource;
use super::source::{InstrumentationSource, SourceRuntime};
use super::state::{LastError, Session};
use super::subscription::NotificationSubscription;
use crate::config::{MonitorConfiguration, SourceSettings};
use crate::constants::MONITOR_THREAD_NAME;
use crate::logging::EventLogger;
use crate::models::{DeliveryMode, EventRecord, MonitorError, MonitorState};
use parking_lot::Mutex;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Subscription owned by a session, parked where cleanup can reach it
type SubscriptionSlot = Mutex<Option<(Uuid, NotificationSubscription)>>;

pub struct MonitorController {
    runtime: Arc<SourceRuntime>,
    config: MonitorConfiguration,
    channel: Arc<DeliveryChannel>,
    last_error: Arc<LastError>,
    running: Arc<AtomicBool>,
    session: Mutex<Option<Arc<Session>>>,
    slot: Arc<SubscriptionSlot>,
    worker: Mutex<Option<JoinHandle<()>>>,
    /// Set by the first cleanup of a session; reset by start
    teardown_claimed: AtomicBool,
    /// Serializes start and cleanup against each other
    lifecycle: Mutex<()>,
    logger: EventLogger,
}

impl MonitorController {
    pub fn new(source: Arc<dyn InstrumentationSource>, config: MonitorConfiguration) -> Self {
        Self::with_runtime(SourceRuntime::new(source), config)
    }

    /// Share one source runtime between several controllers
    pub fn with_runtime(runtime: Arc<SourceRuntime>, config: MonitorConfiguration) -> Self {
        let channel = Arc::new(DeliveryChannel::new(config.monitor.queue_capacity));
        Self {
            runtime,
            config,
            channel,
            last_error: Arc::new(LastError::new()),
            running: Arc::new(AtomicBool::new(false)),
            session: Mutex::new(None),
            slot: Arc::new(Mutex::new(None)),
            worker: Mutex::new(None),
            teardown_claimed: AtomicBool::new(false),
            lifecycle: Mutex::new(()),
            logger: EventLogger::default(),
        }
    }

    /// Controller backed by the process table poller
    pub fn with_system_source(config: MonitorConfiguration) -> Self {
        Self::new(Arc::new(SystemSource::new()), config)
    }

    pub fn config(&self) -> &MonitorConfiguration {
        &self.config
    }

    pub fn runtime(&self) -> &Arc<SourceRuntime> {
        &self.runtime
    }

    /// Clear last-error state. Always succeeds.
    pub fn initialize(&self) -> bool {
        self.last_error.clear();
        true
    }

    /// Start a pull-mode session
    pub fn start(&self) -> Result<(), MonitorError> {
        self.start_session(DeliveryMode::Pull, None)
    }

    /// Start a push-mode session delivering each event to `callback`
    pub fn start_with_callback(
        &self,
        callback: Option<EventCallback>,
        user_data: Option<UserData>,
    ) -> Result<(), MonitorError> {
        match callback {
            Some(callback) => self.start_session(DeliveryMode::Push, Some((callback, user_data))),
            None => Err(self.fail(MonitorError::NullCallback)),
        }
    }

    fn start_session(
        &self,
        mode: DeliveryMode,
        registration: Option<(EventCallback, Option<UserData>)>,
    ) -> Result<(), MonitorError> {
        let _lifecycle = self.lifecycle.lock();

        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(self.fail(MonitorError::AlreadyRunning));
        }

        // Never two notification threads at once
        let previous = self.worker.lock().take();
        if let Some(handle) = previous {
            if handle.join().is_err() {
                log::error!("Previous monitoring thread panicked");
            }
        }

        let stale = self.slot.lock().take();
        if let Some((id, mut subscription)) = stale {
            log::debug!("Reclaiming subscription left by session {}", id);
            subscription.cleanup();
        }

        self.channel.reset(mode);
        self.channel.ensure_signal();
        match registration {
            Some((callback, user_data)) => self.channel.set_callback(callback, user_data),
            None => self.channel.clear_callback(),
        }

        let session = Arc::new(Session::new());
        *self.session.lock() = Some(Arc::clone(&session));
        self.teardown_claimed.store(false, Ordering::SeqCst);

        let worker = SessionWorker {
            session: Arc::clone(&session),
            runtime: Arc::clone(&self.runtime),
            channel: Arc::clone(&self.channel),
            last_error: Arc::clone(&self.last_error),
            running: Arc::clone(&self.running),
            slot: Arc::clone(&self.slot),
            settings: self.config.source.clone(),
            poll_interval: self.config.monitor.poll_interval(),
            logger: self.logger.clone(),
        };

        let spawned = std::thread::Builder::new()
            .name(MONITOR_THREAD_NAME.to_string())
            .spawn(move || worker.run());

        match spawned {
            Ok(handle) => {
                *self.worker.lock() = Some(handle);
                let _ = self
                    .logger
                    .log_session_start(session.id(), mode, self.runtime.source().name());
                Ok(())
            }
            Err(e) => {
                session.end();
                self.running.store(false, Ordering::SeqCst);
                self.channel.clear_callback();
                Err(self.fail(MonitorError::ThreadSpawnFailure(e.to_string())))
            }
        }
    }

    /// Request the current session to end. Does not wait for the background
    /// thread and does not touch the subscription.
    pub fn stop(&self) -> bool {
        self.running.store(false, Ordering::SeqCst);
        if let Some(session) = self.session.lock().as_ref() {
            if session.end() {
                log::debug!("Stop requested for session {}", session.id());
            }
        }
        self.channel.clear_callback();
        true
    }

    /// Tear down everything the last session left behind.
    ///
    /// Only the first caller per session does the work; concurrent and later
    /// callers return once it is done. Holds the lifecycle lock throughout, so
    /// a `start()` issued meanwhile waits and then begins a fresh session.
    /// Blocks for at most the stop grace plus the join timeout, plus whatever
    /// the source needs to cancel a leftover subscription.
    pub fn cleanup(&self) {
        let _lifecycle = self.lifecycle.lock();
        if self.teardown_claimed.swap(true, Ordering::SeqCst) {
            return;
        }

        isolate("stop", || {
            self.stop();
        });

        isolate("grace", || std::thread::sleep(self.config.monitor.stop_grace()));

        isolate("join", || self.join_worker(self.config.monitor.join_timeout()));

        isolate("subscription", || {
            let leftover = self.slot.lock().take();
            if let Some((id, mut subscription)) = leftover {
                log::debug!("Cleaning up subscription of session {}", id);
                subscription.cleanup();
            }
        });

        isolate("queue", || self.channel.clear());
        isolate("signal", || self.channel.release_signal());
        isolate("last_error", || self.last_error.clear());
    }

    fn join_worker(&self, timeout: Duration) {
        let handle = match self.worker.lock().take() {
            Some(handle) => handle,
            None => return,
        };

        let deadline = Instant::now() + timeout;
        while !handle.is_finished() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }

        if handle.is_finished() {
            if handle.join().is_err() {
                log::error!("Monitoring thread panicked");
            }
        } else {
            // Leak the thread rather than wait on the source forever
            log::warn!(
                "Monitoring thread did not exit within {:?}; detaching it",
                timeout
            );
            drop(handle);
        }
    }

    pub fn get_next_event(&self) -> Option<EventRecord> {
        self.channel.dequeue_one()
    }

    pub fn get_all_events(&self, max: usize) -> Vec<EventRecord> {
        self.channel.drain_up_to(max)
    }

    /// Block until events arrive or `timeout` elapses. Returns the queue length
    /// after waking, 0 on timeout, `NotInitialized` if no session ever started
    /// or cleanup has released the wake signal.
    pub fn wait_for_events(&self, timeout: Duration) -> Result<usize, MonitorError> {
        match self.channel.wait(timeout) {
            WaitOutcome::Signaled(count) => Ok(count),
            WaitOutcome::TimedOut => Ok(0),
            WaitOutcome::NotInitialized => Err(MonitorError::NotInitialized),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn pending_count(&self) -> usize {
        self.channel.len()
    }

    /// Records discarded by the queue overflow policy
    pub fn dropped_count(&self) -> u64 {
        self.channel.dropped_count()
    }

    /// Most recent failure, empty if none
    pub fn last_error(&self) -> String {
        self.last_error.get()
    }

    pub fn state(&self) -> MonitorState {
        if self.is_running() {
            return MonitorState::Running;
        }

        match self.worker.lock().as_ref() {
            Some(handle) if !handle.is_finished() => MonitorState::StopRequested,
            _ => MonitorState::Stopped,
        }
    }

    pub fn mode(&self) -> DeliveryMode {
        self.channel.mode()
    }

    /// Id of the most recently started session
    pub fn session_id(&self) -> Option<Uuid> {
        self.session.lock().as_ref().map(|session| session.id())
    }

    fn fail(&self, err: MonitorError) -> MonitorError {
        self.last_error.set(err.to_string());
        err
    }
}

impl Drop for MonitorController {
    fn drop(&mut self) {
        self.cleanup();
    }
}

/// Run one teardown step; a panic is logged and the next step still runs
fn isolate(step: &str, f: impl FnOnce()) {
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(f)) {
        log::error!("Cleanup step '{}' failed: {}", step, panic_message(payload.as_ref()));
    }
}

/// Everything the background thread needs, moved into it
struct SessionWorker {
    session: Arc<Session>,
    runtime: Arc<SourceRuntime>,
    channel: Arc<DeliveryChannel>,
    last_error: Arc<LastError>,
    running: Arc<AtomicBool>,
    slot: Arc<SubscriptionSlot>,
    settings: SourceSettings,
    poll_interval: Duration,
    logger: EventLogger,
}

impl SessionWorker {
    fn run(self) {
        let session_id = self.session.id();

        let mut subscription = NotificationSubscription::new(
            Arc::clone(&self.runtime),
            Arc::clone(&self.channel),
            Arc::clone(&self.last_error),
            &self.settings,
        );

        if let Err(e) = subscription.initialize() {
            self.last_error.set(e.to_string());
            let _ = self.logger.log_error(&e.to_string(), Some("subscription setup"));
            // Only roll back the flag if nobody ended this session first
            if self.session.end() {
                self.running.store(false, Ordering::SeqCst);
            }
            return;
        }

        // Park the subscription so cleanup can reach it if this thread stalls
        let stale = {
            let mut slot = self.slot.lock();
            if self.session.is_active() {
                slot.replace((session_id, subscription))
            } else {
                Some((session_id, subscription))
            }
        };
        if let Some((_, mut stale)) = stale {
            stale.cleanup();
        }

        while self.session.is_active() {
            std::thread::sleep(self.poll_interval);
        }

        // Clean exit: take back our own subscription unless cleanup already did
        let own = {
            let mut slot = self.slot.lock();
            match slot.as_ref() {
                Some((id, _)) if *id == session_id => slot.take(),
                _ => None,
            }
        };

        let delivered = match own {
            Some((_, mut subscription)) => {
                let delivered = subscription.delivered_count();
                subscription.cleanup();
                delivered
            }
            None => 0,
        };

        let _ = self
            .logger
            .log_session_stop(session_id, delivered, "stop requested");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EventType;
    use crate::monitor::manual::{FailurePoint, ManualSource, SourceCall};
    use crate::monitor::source::RawInstance;
    use std::sync::atomic::AtomicUsize;

    fn fast_config() -> MonitorConfiguration {
        let mut config = MonitorConfiguration::default();
        config.monitor.poll_interval_ms = 5;
        config.monitor.stop_grace_ms = 10;
        config.monitor.join_timeout_ms = 500;
        config
    }

    fn controller() -> (ManualSource, MonitorController) {
        let source = ManualSource::new();
        let controller = MonitorController::new(Arc::new(source.clone()), fast_config());
        (source, controller)
    }

    fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        condition()
    }

    #[test]
    fn test_initial_state() {
        let (_source, controller) = controller();
        assert!(controller.initialize());
        assert!(!controller.is_running());
        assert_eq!(controller.state(), MonitorState::Stopped);
        assert_eq!(controller.pending_count(), 0);
        assert_eq!(controller.last_error(), "");
        assert!(controller.get_next_event().is_none());
        assert_eq!(
            controller.wait_for_events(Duration::from_millis(10)),
            Err(MonitorError::NotInitialized)
        );
    }

    #[test]
    fn test_pull_session_delivers_in_order() {
        let (source, controller) = controller();
        controller.start().unwrap();
        assert!(source.wait_for_registrations(2, Duration::from_secs(5)));

        source.emit(RawInstance::creation("notepad.exe", 4321));
        source.emit(RawInstance::deletion("notepad.exe", 4321));

        assert_eq!(controller.wait_for_events(Duration::from_secs(1)), Ok(2));
        let events = controller.get_all_events(10);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type(), EventType::Start);
        assert_eq!(events[1].event_type(), EventType::Stop);

        controller.stop();
        controller.cleanup();
        assert!(!controller.is_running());
        assert_eq!(controller.pending_count(), 0);
    }

    #[test]
    fn test_second_start_is_rejected() {
        let (source, controller) = controller();
        controller.start().unwrap();
        let first_session = controller.session_id();

        assert_eq!(controller.start(), Err(MonitorError::AlreadyRunning));
        assert_eq!(controller.last_error(), "Process monitor is already running");
        assert!(controller.is_running());
        assert_eq!(controller.session_id(), first_session);
        assert!(source.wait_for_registrations(2, Duration::from_secs(5)));

        controller.cleanup();
    }

    #[test]
    fn test_stop_is_non_blocking_and_thread_releases_subscription() {
        let (source, controller) = controller();
        controller.start().unwrap();
        assert!(source.wait_for_registrations(2, Duration::from_secs(5)));

        assert!(controller.stop());
        assert!(!controller.is_running());

        assert!(wait_until(Duration::from_secs(5), || source.registration_count() == 0));
        assert!(wait_until(Duration::from_secs(5), || controller.state() == MonitorState::Stopped));
        assert_eq!(source.call_count(&SourceCall::Close), 1);

        controller.cleanup();
        assert_eq!(source.call_count(&SourceCall::Close), 1);
    }

    #[test]
    fn test_setup_failure_rolls_back_to_stopped() {
        let (source, controller) = controller();
        source.fail_at(FailurePoint::CreationQuery, "access denied");

        controller.start().unwrap();
        assert!(wait_until(Duration::from_secs(5), || !controller.is_running()));
        assert!(controller.last_error().contains("access denied"));
        assert_eq!(source.registration_count(), 0);
        assert_eq!(controller.runtime().lease_count(), 0);

        // Next start works once the source recovers
        source.clear_failures();
        controller.start().unwrap();
        assert!(source.wait_for_registrations(2, Duration::from_secs(5)));
        controller.cleanup();
    }

    #[test]
    fn test_push_mode_skips_queue() {
        let (source, controller) = controller();
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        let callback: EventCallback = Arc::new(move |_record: &EventRecord, _data: Option<&UserData>| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        controller.start_with_callback(Some(callback), None).unwrap();
        assert_eq!(controller.mode(), DeliveryMode::Push);
        assert!(source.wait_for_registrations(2, Duration::from_secs(5)));

        source.emit(RawInstance::creation("calc.exe", 7));
        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert_eq!(controller.pending_count(), 0);

        // Stop clears the callback immediately
        controller.stop();
        assert!(!controller.channel.has_callback());
        source.emit(RawInstance::creation("calc.exe", 8));
        assert_eq!(seen.load(Ordering::SeqCst), 1);

        controller.cleanup();
    }

    #[test]
    fn test_missing_callback_rejected() {
        let (_source, controller) = controller();
        assert_eq!(
            controller.start_with_callback(None, None),
            Err(MonitorError::NullCallback)
        );
        assert!(!controller.is_running());
        assert_eq!(controller.last_error(), "Callback function cannot be null");
    }

    #[test]
    fn test_cleanup_without_session_is_harmless() {
        let (source, controller) = controller();
        controller.cleanup();
        controller.cleanup();
        assert!(source.calls().is_empty());
        assert_eq!(controller.state(), MonitorState::Stopped);
    }

    #[test]
    fn test_restart_after_cleanup() {
        let (source, controller) = controller();
        for _ in 0..3 {
            controller.start().unwrap();
            assert!(source.wait_for_registrations(2, Duration::from_secs(5)));
            source.emit(RawInstance::creation("loop.exe", 1));
            assert_eq!(controller.pending_count(), 1);
            controller.cleanup();
            assert_eq!(controller.pending_count(), 0);
            assert_eq!(source.registration_count(), 0);
        }
        assert_eq!(source.call_count(&SourceCall::Close), 3);
        assert_eq!(controller.runtime().lease_count(), 0);
    }
}
