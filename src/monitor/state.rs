//! Small pieces of shared state used by the controller and its workers

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use uuid::Uuid;

/// Single slot holding the most recent failure description
#[derive(Debug, Default)]
pub struct LastError {
    message: Mutex<String>,
}

impl LastError {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite the slot
    pub fn set(&self, message: impl Into<String>) {
        *self.message.lock() = message.into();
    }

    pub fn clear(&self) {
        self.message.lock().clear();
    }

    /// Current text, empty if none
    pub fn get(&self) -> String {
        self.message.lock().clone()
    }
}

/// One monitoring session. Its flag is what the background thread polls, so a
/// thread from an earlier session never sees a later session's state.
#[derive(Debug)]
pub struct Session {
    id: Uuid,
    active: AtomicBool,
}

impl Session {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            active: AtomicBool::new(true),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Clear the flag. Returns true if this call was the one that ended the session.
    pub fn end(&self) -> bool {
        self.active.swap(false, Ordering::SeqCst)
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}
