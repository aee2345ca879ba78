//! One-slot, latest-value-wins mailbox for progress reporting.
//!
//! The producer never blocks: [`Mailbox::publish`] replaces whatever value is
//! waiting. A consumer takes the most recent value and may skip older ones.

use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Duration;

struct Slot<T> {
    value: Option<T>,
    closed: bool,
    published: u64,
}

/// Cloneable handle to a shared one-slot mailbox.
pub struct Mailbox<T> {
    inner: Arc<(Mutex<Slot<T>>, Condvar)>,
}

impl<T> Clone for Mailbox<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Default for Mailbox<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Result of waiting on a mailbox.
#[derive(Debug, PartialEq, Eq)]
pub enum Received<T> {
    Value(T),
    Timeout,
    /// The producer closed the mailbox and nothing is left.
    Closed,
}

impl<T> Mailbox<T> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new((
                Mutex::new(Slot {
                    value: None,
                    closed: false,
                    published: 0,
                }),
                Condvar::new(),
            )),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Slot<T>> {
        // A panicking consumer must not stop the producer.
        self.inner.0.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Replace the pending value. Returns `false` once the mailbox is closed.
    pub fn publish(&self, value: T) -> bool {
        let mut slot = self.lock();
        if slot.closed {
            return false;
        }
        slot.value = Some(value);
        slot.published += 1;
        drop(slot);
        self.inner.1.notify_all();
        true
    }

    /// Take the pending value without waiting.
    pub fn take(&self) -> Option<T> {
        self.lock().value.take()
    }

    /// Wait up to `timeout` for a value.
    pub fn recv_timeout(&self, timeout: Duration) -> Received<T> {
        let slot = self.lock();
        let (mut slot, _) = self
            .inner
            .1
            .wait_timeout_while(slot, timeout, |s| s.value.is_none() && !s.closed)
            .unwrap_or_else(|e| e.into_inner());
        match slot.value.take() {
            Some(value) => Received::Value(value),
            None if slot.closed => Received::Closed,
            None => Received::Timeout,
        }
    }

    /// Stop accepting values and wake waiting consumers. Idempotent.
    pub fn close(&self) {
        self.lock().closed = true;
        self.inner.1.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Total values ever published.
    pub fn published(&self) -> u64 {
        self.lock().published
    }
}
