//! Notifier channels keyed by `(instance, order_id)` / `(instance, tip_id)`
//! that back the Long-Poll Coordinator (4.J). Every committing writer
//! wakes the channel for its key; waiters registered beforehand observe
//! the wake, waiters registering after a commit recheck state themselves
//! (register-then-check pattern lives in `merchant-node`).

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

#[derive(Clone, Default)]
pub struct NotifierRegistry {
    inner: Arc<Mutex<HashMap<(String, String), Arc<Notify>>>>,
}

impl NotifierRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, instance: &str, key: &str) -> Arc<Notify> {
        let mut guard = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        guard
            .entry((instance.to_string(), key.to_string()))
            .or_insert_with(|| Arc::new(Notify::new()))
            .clone()
    }

    /// Wakes every task currently waiting on this key. Callers that
    /// register after this call must have already rechecked state before
    /// awaiting, or they'd block until the next write (4.J's ordering
    /// guarantee places that responsibility on the poll coordinator).
    pub fn wake(&self, instance: &str, key: &str) {
        let notify = self.get(instance, key);
        notify.notify_waiters();
    }
}
