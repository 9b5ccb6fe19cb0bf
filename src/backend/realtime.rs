use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::debug;

use super::{ChangeCallback, ChangeEvent, ChangeKind, SubscriptionHandle};

struct Subscription {
    table: String,
    kinds: Vec<ChangeKind>,
    callback: ChangeCallback,
}

/// Registry of change-feed subscribers, keyed by handle.
#[derive(Default)]
pub struct ChangeHub {
    next_id: AtomicU64,
    subscriptions: Mutex<HashMap<u64, Subscription>>,
}

impl ChangeHub {
    pub fn new() -> Self {
        Self::default()
    }

    fn subscriptions(&self) -> MutexGuard<'_, HashMap<u64, Subscription>> {
        self.subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn subscribe(
        &self,
        table: &str,
        kinds: &[ChangeKind],
        callback: ChangeCallback,
    ) -> SubscriptionHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscriptions().insert(
            id,
            Subscription {
                table: table.to_string(),
                kinds: kinds.to_vec(),
                callback,
            },
        );
        debug!(table, subscription = id, "subscribed to changes");
        SubscriptionHandle(id)
    }

    pub fn unsubscribe(&self, handle: SubscriptionHandle) {
        if self.subscriptions().remove(&handle.0).is_some() {
            debug!(subscription = handle.0, "unsubscribed from changes");
        }
    }

    pub fn len(&self) -> usize {
        self.subscriptions().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Invokes every callback registered for the event's table and kind.
    /// Callbacks run after the registry lock is released.
    pub fn publish(&self, event: &ChangeEvent) -> usize {
        let callbacks: Vec<ChangeCallback> = self
            .subscriptions()
            .values()
            .filter(|s| s.table == event.table && s.kinds.contains(&event.kind))
            .map(|s| s.callback.clone())
            .collect();
        for callback in &callbacks {
            callback(event);
        }
        callbacks.len()
    }
}
