// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Keyed, versioned snapshot container with change subscription.
//!
//! [`SnapshotStore`] knows nothing about trees. It holds one `Arc<V>` per key
//! plus a version counter and broadcasts every change to subscribers.
//!
//! # Invariants
//!
//! - [`SnapshotStore::patch`] is the only way to modify a stored snapshot; no
//!   caller ever holds a `&mut V` into the store outside of an updater call.
//! - A patch that leaves the snapshot pointer unchanged is not a change: the
//!   version stays put and nobody is notified.
//! - Listeners run after the store lock is released, in subscription order.
//!   They may read the store; they must not issue mutations synchronously.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard};

use formtree_model::{Form, FormId};

/// Change callback: `(key, new snapshot, new version)`.
pub type Listener<K, V> = Arc<dyn Fn(&K, &Arc<V>, u64) + Send + Sync>;

/// Handle returned by `subscribe`; pass to `unsubscribe` to detach.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// The store the mutation engine drives: one snapshot per form.
pub type FormCache = SnapshotStore<FormId, Form>;

struct Slot<V> {
    snapshot: Arc<V>,
    version: u64,
}

struct Subscription<K, V> {
    id: SubscriptionId,
    key: Option<K>,
    listener: Listener<K, V>,
}

struct Inner<K, V> {
    slots: HashMap<K, Slot<V>>,
    subscriptions: Vec<Subscription<K, V>>,
    next_subscription: u64,
}

/// Thread-safe keyed snapshot store. Clones share the same state.
pub struct SnapshotStore<K, V> {
    inner: Arc<Mutex<Inner<K, V>>>,
}

impl<K, V> Clone for SnapshotStore<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K, V> Default for SnapshotStore<K, V> {
    fn default() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                slots: HashMap::new(),
                subscriptions: Vec::new(),
                next_subscription: 0,
            })),
        }
    }
}

impl<K, V> std::fmt::Debug for SnapshotStore<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        f.debug_struct("SnapshotStore")
            .field("keys", &inner.slots.len())
            .field("subscriptions", &inner.subscriptions.len())
            .finish()
    }
}

impl<K, V> SnapshotStore<K, V>
where
    K: Clone + Eq + Hash,
{
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner<K, V>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Current snapshot for `key`.
    pub fn get(&self, key: &K) -> Option<Arc<V>> {
        self.lock().slots.get(key).map(|slot| Arc::clone(&slot.snapshot))
    }

    /// Current version for `key`. Starts at 1 on first insert.
    pub fn version(&self, key: &K) -> Option<u64> {
        self.lock().slots.get(key).map(|slot| slot.version)
    }

    /// `true` if a snapshot is stored under `key`.
    pub fn contains(&self, key: &K) -> bool {
        self.lock().slots.contains_key(key)
    }

    /// Every key currently stored (unspecified order).
    pub fn keys(&self) -> Vec<K> {
        self.lock().slots.keys().cloned().collect()
    }

    /// Store `value` under `key`, replacing any previous snapshot, and broadcast.
    pub fn insert(&self, key: K, value: impl Into<Arc<V>>) -> u64 {
        let snapshot = value.into();
        let (version, listeners) = {
            let mut inner = self.lock();
            let version = inner.slots.get(&key).map_or(1, |slot| slot.version + 1);
            inner.slots.insert(
                key.clone(),
                Slot {
                    snapshot: Arc::clone(&snapshot),
                    version,
                },
            );
            (version, inner.listeners_for(&key))
        };
        notify(&listeners, &key, &snapshot, version);
        version
    }

    /// Evict `key`. Subscribers are not notified; their subscriptions stay.
    pub fn remove(&self, key: &K) -> Option<Arc<V>> {
        self.lock().slots.remove(key).map(|slot| slot.snapshot)
    }

    /// Run `updater` over the current snapshot of `key`.
    ///
    /// The updater receives a shared handle; to change the tree it must go
    /// through `Arc::make_mut` (or swap the handle). If the handle no longer
    /// points at the same allocation afterwards, the store keeps the new value,
    /// bumps the version, and notifies subscribers before returning.
    ///
    /// Returns `None` when `key` is absent (the updater is not run). The store
    /// lock is held while the updater runs, so it must not call back into the
    /// store.
    pub fn patch<R>(&self, key: &K, updater: impl FnOnce(&mut Arc<V>) -> R) -> Option<R> {
        let (result, change) = {
            let mut inner = self.lock();
            let slot = inner.slots.get_mut(key)?;
            let mut handle = Arc::clone(&slot.snapshot);
            let result = updater(&mut handle);
            if Arc::ptr_eq(&handle, &slot.snapshot) {
                (result, None)
            } else {
                slot.version += 1;
                slot.snapshot = Arc::clone(&handle);
                let version = slot.version;
                (result, Some((handle, version, inner.listeners_for(key))))
            }
        };
        if let Some((snapshot, version, listeners)) = change {
            notify(&listeners, key, &snapshot, version);
        }
        Some(result)
    }

    /// Listen for changes to one key.
    pub fn subscribe(
        &self,
        key: K,
        listener: impl Fn(&K, &Arc<V>, u64) + Send + Sync + 'static,
    ) -> SubscriptionId {
        self.add_subscription(Some(key), Arc::new(listener))
    }

    /// Listen for changes to every key.
    pub fn subscribe_all(
        &self,
        listener: impl Fn(&K, &Arc<V>, u64) + Send + Sync + 'static,
    ) -> SubscriptionId {
        self.add_subscription(None, Arc::new(listener))
    }

    /// Detach a listener. Returns `false` if it was already gone.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut inner = self.lock();
        let before = inner.subscriptions.len();
        inner.subscriptions.retain(|s| s.id != id);
        inner.subscriptions.len() != before
    }

    fn add_subscription(&self, key: Option<K>, listener: Listener<K, V>) -> SubscriptionId {
        let mut inner = self.lock();
        inner.next_subscription += 1;
        let id = SubscriptionId(inner.next_subscription);
        inner.subscriptions.push(Subscription { id, key, listener });
        id
    }
}

impl<K: Eq, V> Inner<K, V> {
    fn listeners_for(&self, key: &K) -> Vec<Listener<K, V>> {
        self.subscriptions
            .iter()
            .filter(|s| s.key.as_ref().is_none_or(|k| k == key))
            .map(|s| Arc::clone(&s.listener))
            .collect()
    }
}

fn notify<K, V>(listeners: &[Listener<K, V>], key: &K, snapshot: &Arc<V>, version: u64) {
    for listener in listeners {
        listener(key, snapshot, version);
    }
}
