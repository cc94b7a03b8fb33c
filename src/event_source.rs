// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-process one-to-many pub/sub with pause/unpause/clear.
//!
//! Delivery is synchronous and in subscription order. A panicking subscriber
//! must not prevent delivery to subsequent subscribers — the panic is caught
//! and logged rather than aborting the delivery loop.
//!
//! `EventSource` is reference-counted internally (cheap to [`Clone`]) so a
//! [`Subscription`] can outlive the borrow that created it and be held across
//! an `.await` point or moved into a spawned task, the way callers hold on to
//! a `tokio::sync::broadcast::Receiver`.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// A subscription handle. Dropping it, or calling [`Subscription::unsubscribe`]
/// explicitly, removes the callback.
#[must_use = "dropping this immediately unsubscribes"]
pub struct Subscription<T> {
    inner: Arc<Mutex<Inner<T>>>,
    id: u64,
}

impl<T> Subscription<T> {
    pub fn unsubscribe(self) {
        // Drop does the work; this just makes the intent explicit at call sites.
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.subscribers.retain(|s| s.id != self.id);
        }
    }
}

struct Subscriber<T> {
    id: u64,
    callback: Box<dyn FnMut(&T) + Send>,
}

struct Inner<T> {
    subscribers: Vec<Subscriber<T>>,
    paused: bool,
    pending: Vec<T>,
}

/// A one-to-many in-process observable.
///
/// `T` must be `Clone` so a single `notify` can both run synchronously against
/// current subscribers and be queued verbatim while paused.
pub struct EventSource<T> {
    inner: Arc<Mutex<Inner<T>>>,
    next_id: Arc<AtomicU64>,
}

impl<T> Clone for EventSource<T> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner), next_id: Arc::clone(&self.next_id) }
    }
}

impl<T: Clone> EventSource<T> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                subscribers: Vec::new(),
                paused: false,
                pending: Vec::new(),
            })),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Subscribe a callback; returns a handle that unsubscribes on drop.
    pub fn subscribe<F>(&self, callback: F) -> Subscription<T>
    where
        F: FnMut(&T) + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.lock().subscribers.push(Subscriber { id, callback: Box::new(callback) });
        Subscription { inner: Arc::clone(&self.inner), id }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner<T>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Notify subscribers, or queue the value if paused.
    pub fn notify(&self, value: T) {
        let mut inner = self.lock();
        if inner.paused {
            inner.pending.push(value);
            return;
        }
        Self::deliver(&mut inner.subscribers, &value);
    }

    /// Queue future notifications instead of delivering them immediately.
    pub fn pause(&self) {
        self.lock().paused = true;
    }

    /// Resume delivery, draining anything queued while paused, in arrival order.
    pub fn unpause(&self) {
        let mut inner = self.lock();
        inner.paused = false;
        let pending = std::mem::take(&mut inner.pending);
        for value in pending {
            Self::deliver(&mut inner.subscribers, &value);
        }
    }

    /// Drop all current subscribers. Does not touch the pause/pending state.
    pub fn clear(&self) {
        self.lock().subscribers.clear();
    }

    pub fn is_paused(&self) -> bool {
        self.lock().paused
    }

    fn deliver(subscribers: &mut [Subscriber<T>], value: &T) {
        for subscriber in subscribers.iter_mut() {
            let callback = &mut subscriber.callback;
            if catch_unwind(AssertUnwindSafe(|| callback(value))).is_err() {
                tracing::warn!("event_source subscriber panicked; continuing delivery");
            }
        }
    }
}

impl<T: Clone> Default for EventSource<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[path = "event_source_tests.rs"]
mod tests;
