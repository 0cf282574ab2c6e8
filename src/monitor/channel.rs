//! Delivery channel between the notification thread and the consumer
//!
//! Pull mode buffers records in a bounded FIFO (drop-oldest on overflow) and
//! raises an auto-resetting wake signal on every enqueue. Push mode hands
//! each record to the registered callback on the delivering thread; callback
//! errors and panics stop here.

use crate::constants::DEFAULT_QUEUE_CAPACITY;
use crate::models::{DeliveryMode, EventRecord};
use parking_lot::{Condvar, Mutex};
use std::any::Any;
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Opaque consumer data handed back to the callback on every delivery
pub type UserData = Arc<dyn Any + Send + Sync>;

/// Push-mode consumer. Runs on the notification thread; an `Err` is logged and dropped.
pub type EventCallback =
    Arc<dyn Fn(&EventRecord, Option<&UserData>) -> anyhow::Result<()> + Send + Sync>;

/// Result of waiting on the channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// Signal fired; carries the queue length observed right after waking
    Signaled(usize),
    TimedOut,
    /// No wake signal exists (no session was ever started, or cleanup released it)
    NotInitialized,
}

/// Auto-resetting binary signal. One `wait` consumes one raise, however many
/// raises happened before it.
#[derive(Debug, Default)]
pub struct WakeSignal {
    raised: Mutex<bool>,
    cond: Condvar,
}

impl WakeSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        let mut raised = self.raised.lock();
        *raised = true;
        self.cond.notify_one();
    }

    /// Returns true if the signal was consumed, false on timeout
    pub fn wait(&self, timeout: Duration) -> bool {
        let mut raised = self.raised.lock();
        match Instant::now().checked_add(timeout) {
            Some(deadline) => {
                while !*raised {
                    if self.cond.wait_until(&mut raised, deadline).timed_out() {
                        break;
                    }
                }
            }
            None => {
                while !*raised {
                    self.cond.wait(&mut raised);
                }
            }
        }
        std::mem::replace(&mut *raised, false)
    }
}

#[derive(Clone)]
struct CallbackRegistration {
    callback: EventCallback,
    user_data: Option<UserData>,
}

/// What happened to a record handed to [`DeliveryChannel::deliver`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Queued,
    Invoked,
    /// Callback returned an error or panicked
    CallbackFailed,
    /// Push mode without a registered callback (stop already cleared it)
    Discarded,
}

pub struct DeliveryChannel {
    capacity: usize,
    queue: Mutex<VecDeque<EventRecord>>,
    signal: Mutex<Option<Arc<WakeSignal>>>,
    callback: Mutex<Option<CallbackRegistration>>,
    mode: Mutex<DeliveryMode>,
    dropped: AtomicU64,
}

impl DeliveryChannel {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            queue: Mutex::new(VecDeque::with_capacity(capacity.clamp(1, DEFAULT_QUEUE_CAPACITY))),
            signal: Mutex::new(None),
            callback: Mutex::new(None),
            mode: Mutex::new(DeliveryMode::Pull),
            dropped: AtomicU64::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn mode(&self) -> DeliveryMode {
        *self.mode.lock()
    }

    /// Prepare for a new session: drop stale records and fix the delivery mode
    pub fn reset(&self, mode: DeliveryMode) {
        self.queue.lock().clear();
        *self.mode.lock() = mode;
    }

    /// Create the wake signal if it does not exist yet; reused across sessions
    pub fn ensure_signal(&self) -> Arc<WakeSignal> {
        let mut signal = self.signal.lock();
        Arc::clone(signal.get_or_insert_with(|| Arc::new(WakeSignal::new())))
    }

    pub fn has_signal(&self) -> bool {
        self.signal.lock().is_some()
    }

    pub fn release_signal(&self) {
        self.signal.lock().take();
    }

    pub fn set_callback(&self, callback: EventCallback, user_data: Option<UserData>) {
        *self.callback.lock() = Some(CallbackRegistration {
            callback,
            user_data,
        });
    }

    pub fn clear_callback(&self) {
        self.callback.lock().take();
    }

    pub fn has_callback(&self) -> bool {
        self.callback.lock().is_some()
    }

    /// Route a record according to the session's delivery mode
    pub fn deliver(&self, record: EventRecord) -> Delivery {
        match self.mode() {
            DeliveryMode::Pull => {
                self.enqueue(record);
                Delivery::Queued
            }
            DeliveryMode::Push => self.invoke_callback(&record),
        }
    }

    /// Append to the queue, trim the oldest entries beyond capacity, raise the signal
    pub fn enqueue(&self, record: EventRecord) {
        let mut queue = self.queue.lock();
        queue.push_back(record);

        let mut trimmed = 0u64;
        while queue.len() > self.capacity {
            queue.pop_front();
            trimmed += 1;
        }
        if trimmed > 0 {
            self.dropped.fetch_add(trimmed, Ordering::Relaxed);
            log::trace!("Event queue full, dropped {} oldest record(s)", trimmed);
        }

        if let Some(signal) = self.signal.lock().as_ref() {
            signal.raise();
        }
    }

    pub fn dequeue_one(&self) -> Option<EventRecord> {
        self.queue.lock().pop_front()
    }

    /// Pop up to `max` records in FIFO order
    pub fn drain_up_to(&self, max: usize) -> Vec<EventRecord> {
        let mut queue = self.queue.lock();
        let count = max.min(queue.len());
        queue.drain(..count).collect()
    }

    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }

    pub fn clear(&self) {
        self.queue.lock().clear();
    }

    /// Records discarded by the overflow policy since creation
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Block until the wake signal fires or `timeout` elapses.
    ///
    /// A signal does not guarantee records are still queued; another consumer
    /// may have drained them, so `Signaled(0)` is possible.
    pub fn wait(&self, timeout: Duration) -> WaitOutcome {
        let signal = match self.signal.lock().as_ref() {
            Some(signal) => Arc::clone(signal),
            None => return WaitOutcome::NotInitialized,
        };

        if signal.wait(timeout) {
            WaitOutcome::Signaled(self.len())
        } else {
            WaitOutcome::TimedOut
        }
    }

    fn invoke_callback(&self, record: &EventRecord) -> Delivery {
        // Never call out to the consumer with the lock held: it may call stop()
        let registration = match self.callback.lock().clone() {
            Some(registration) => registration,
            None => return Delivery::Discarded,
        };

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            (registration.callback)(record, registration.user_data.as_ref())
        }));

        match outcome {
            Ok(Ok(())) => Delivery::Invoked,
            Ok(Err(e)) => {
                log::warn!(
                    "Event callback failed for {} {} (PID: {}): {}",
                    record.event_type(),
                    record.process_name(),
                    record.process_id(),
                    e
                );
                Delivery::CallbackFailed
            }
            Err(payload) => {
                log::error!(
                    "Event callback panicked for {} {} (PID: {}): {}",
                    record.event_type(),
                    record.process_name(),
                    record.process_id(),
                    panic_message(payload.as_ref())
                );
                Delivery::CallbackFailed
            }
        }
    }
}

impl Default for DeliveryChannel {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
