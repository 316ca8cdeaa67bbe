use std::sync::{Mutex, PoisonError};
use tokio::sync::Notify;

/// Single-slot handoff between one producer and one consumer.
///
/// Posting replaces whatever the consumer has not taken yet, so a slow
/// consumer only ever sees the newest value and memory stays bounded.
pub struct Mailbox<T> {
    slot: Mutex<Option<T>>,
    notify: Notify,
}

impl<T> Mailbox<T> {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(None),
            notify: Notify::new(),
        }
    }

    /// Stores `value` and wakes the consumer. Returns the value it displaced.
    pub fn post(&self, value: T) -> Option<T> {
        let displaced = self
            .slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(value);
        self.notify.notify_one();
        displaced
    }

    pub fn take(&self) -> Option<T> {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    pub fn is_empty(&self) -> bool {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }

    /// Waits until a value is available and takes it.
    pub async fn recv(&self) -> T {
        loop {
            if let Some(value) = self.take() {
                return value;
            }
            // notify_one leaves a permit behind when nobody is waiting yet.
            self.notify.notified().await;
        }
    }
}

impl<T> Default for Mailbox<T> {
    fn default() -> Self {
        Self::new()
    }
}
