//! The channel → callback table (§3 `subscriptions`, §9 "callback table as
//! interface").

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::protocol::Event;

/// A user-supplied handler for events pushed on a subscribed channel.
///
/// Wrapped in an `Arc` so the same callback can be cheaply cloned into a
/// resubscribe snapshot (§4.6) without re-registering it with the caller.
pub type Callback = Arc<dyn Fn(Event) + Send + Sync>;

/// The live channel → callback-list mapping.
///
/// Guarded by an async `RwLock` so that [`Subscriptions::resubscribe_snapshot`]
/// observes and replaces the whole table atomically with respect to readers
/// (the Dispatcher) — see §5 "shared state and mutation discipline".
pub(crate) struct Subscriptions {
    table: RwLock<BTreeMap<String, Vec<Callback>>>,
}

impl Subscriptions {
    pub(crate) fn new() -> Self {
        Self {
            table: RwLock::new(BTreeMap::new()),
        }
    }

    /// Register `callback` for `channel`.
    ///
    /// Returns `true` the first time a channel is added — the caller must
    /// then enqueue exactly one `/meta/subscribe` (invariant 2). Subsequent
    /// calls for an already-subscribed channel only append the callback.
    pub(crate) async fn add(&self, channel: &str, callback: Callback) -> bool {
        let mut table = self.table.write().await;
        match table.get_mut(channel) {
            Some(callbacks) => {
                callbacks.push(callback);
                false
            }
            None => {
                table.insert(channel.to_owned(), vec![callback]);
                true
            }
        }
    }

    /// Remove `channel` and all its callbacks, e.g. when `unsubscribe` is
    /// called (§9 Open Question 1: removed immediately, not on response).
    pub(crate) async fn remove(&self, channel: &str) {
        self.table.write().await.remove(channel);
    }

    /// The callbacks currently registered for `channel`, if any.
    pub(crate) async fn callbacks_for(&self, channel: &str) -> Option<Vec<Callback>> {
        self.table.read().await.get(channel).cloned()
    }

    /// Atomically take a snapshot of the whole table and clear it, in
    /// preparation for `resubscribe` (§4.6) replaying each `(channel,
    /// callback)` pair through [`Subscriptions::add`] in original order.
    pub(crate) async fn snapshot_and_clear(&self) -> Vec<(String, Vec<Callback>)> {
        let mut table = self.table.write().await;
        let snapshot = std::mem::take(&mut *table).into_iter().collect();
        snapshot
    }
}

impl fmt::Debug for Subscriptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscriptions").finish_non_exhaustive()
    }
}
