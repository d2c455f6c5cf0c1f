//! In-memory backing collection with change notifications.
//!
//! Ordered, duplicate-free-by-id list of `FeedItem`s. Every mutation pushes a
//! full snapshot to all subscribers; a new subscriber receives the current
//! snapshot immediately. Disconnected subscribers are pruned on the next send.

use crossbeam_channel::{Receiver, Sender, unbounded};
use indexmap::IndexMap;
use log::{debug, trace};
use std::sync::{Mutex, MutexGuard};

use crate::entities::FeedItem;

/// Snapshot delivered to subscribers
pub type ItemSnapshot = Vec<FeedItem>;

#[derive(Default)]
struct Inner {
    items: IndexMap<String, FeedItem>,
    subscribers: Vec<Sender<ItemSnapshot>>,
}

impl Inner {
    fn snapshot(&self) -> ItemSnapshot {
        self.items.values().cloned().collect()
    }

    fn notify(&mut self) {
        let snapshot = self.snapshot();
        self.subscribers.retain(|tx| tx.send(snapshot.clone()).is_ok());
        trace!("ItemStore: notified {} subscribers ({} items)", self.subscribers.len(), snapshot.len());
    }
}

#[derive(Default)]
pub struct ItemStore {
    inner: Mutex<Inner>,
}

impl ItemStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store seeded with `items`; later duplicates of an id replace earlier ones.
    pub fn with_items(items: impl IntoIterator<Item = FeedItem>) -> Self {
        let store = Self::new();
        {
            let mut inner = store.lock();
            for item in items {
                inner.items.insert(item.id.clone(), item);
            }
        }
        store
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Receive the current snapshot now and a new one after every change.
    pub fn subscribe(&self) -> Receiver<ItemSnapshot> {
        let (tx, rx) = unbounded();
        let mut inner = self.lock();
        let _ = tx.send(inner.snapshot());
        inner.subscribers.push(tx);
        debug!("ItemStore: subscriber added ({} total)", inner.subscribers.len());
        rx
    }

    /// Insert or replace by id. Replacing keeps the original position.
    ///
    /// Returns true when the id was new.
    pub fn upsert(&self, item: FeedItem) -> bool {
        let mut inner = self.lock();
        let is_new = inner.items.insert(item.id.clone(), item).is_none();
        inner.notify();
        is_new
    }

    /// Upsert many items with a single notification.
    pub fn upsert_all(&self, items: impl IntoIterator<Item = FeedItem>) -> usize {
        let mut inner = self.lock();
        let mut added = 0;
        for item in items {
            if inner.items.insert(item.id.clone(), item).is_none() {
                added += 1;
            }
        }
        inner.notify();
        added
    }

    pub fn remove(&self, id: &str) -> Option<FeedItem> {
        let mut inner = self.lock();
        let removed = inner.items.shift_remove(id);
        if removed.is_some() {
            inner.notify();
        }
        removed
    }

    pub fn clear(&self) {
        let mut inner = self.lock();
        if !inner.items.is_empty() {
            inner.items.clear();
            inner.notify();
        }
    }

    pub fn get(&self, id: &str) -> Option<FeedItem> {
        self.lock().items.get(id).cloned()
    }

    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.lock().items.get_index_of(id)
    }

    pub fn snapshot(&self) -> ItemSnapshot {
        self.lock().snapshot()
    }

    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().items.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: &str) -> FeedItem {
        FeedItem::new(id, format!("/media/{}.mp4", id))
    }

    #[test]
    fn test_subscribe_gets_current_snapshot() {
        let store = ItemStore::with_items([item("a"), item("b")]);
        let rx = store.subscribe();
        let first = rx.try_recv().unwrap();
        assert_eq!(first.iter().map(|i| i.id.as_str()).collect::<Vec<_>>(), vec!["a", "b"]);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_changes_are_pushed() {
        let store = ItemStore::new();
        let rx = store.subscribe();
        assert!(rx.try_recv().unwrap().is_empty());

        assert!(store.upsert(item("a")));
        assert_eq!(rx.try_recv().unwrap().len(), 1);

        assert_eq!(store.upsert_all([item("b"), item("c"), item("a")]), 2);
        assert_eq!(rx.try_recv().unwrap().len(), 3);
        assert!(rx.try_recv().is_err());

        assert!(store.remove("b").is_some());
        let ids: Vec<String> = rx.try_recv().unwrap().into_iter().map(|i| i.id).collect();
        assert_eq!(ids, vec!["a", "c"]);

        // removing a missing id doesn't notify
        assert!(store.remove("zzz").is_none());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_upsert_keeps_position_and_replaces() {
        let store = ItemStore::with_items([item("a"), item("b")]);
        let replaced = FeedItem::new("a", "/media/new.mp4");
        assert!(!store.upsert(replaced.clone()));
        assert_eq!(store.index_of("a"), Some(0));
        assert_eq!(store.get("a"), Some(replaced));
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_dropped_subscriber_is_pruned() {
        let store = ItemStore::new();
        let rx = store.subscribe();
        drop(rx);
        store.upsert(item("a"));
        assert_eq!(store.lock().subscribers.len(), 0);
    }

    #[test]
    fn test_clear() {
        let store = ItemStore::with_items([item("a")]);
        let rx = store.subscribe();
        rx.try_recv().unwrap();
        store.clear();
        assert!(rx.try_recv().unwrap().is_empty());
        assert!(store.is_empty());
    }
}
