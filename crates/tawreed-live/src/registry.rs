// SPDX-FileCopyrightText: 2026 Tawreed Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-collection listener registry.
//!
//! Each live collection owns one registry; nothing is shared between
//! collections and everything registered is dropped with the collection.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::lock;
use crate::reconciler::{ChangeTag, CollectionChange};

pub type Listener = Arc<dyn Fn(&CollectionChange) + Send + Sync>;

/// Returned by [`ListenerRegistry::on`]; pass to [`ListenerRegistry::off`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

struct Entry {
    id: ListenerId,
    tag: Option<ChangeTag>,
    listener: Listener,
}

#[derive(Default)]
pub struct ListenerRegistry {
    next_id: AtomicU64,
    entries: Mutex<Vec<Entry>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `listener` for changes with `tag`, or for every change
    /// when `tag` is `None`.
    pub fn on<F>(&self, tag: Option<ChangeTag>, listener: F) -> ListenerId
    where
        F: Fn(&CollectionChange) + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        lock(&self.entries).push(Entry {
            id,
            tag,
            listener: Arc::new(listener),
        });
        id
    }

    /// Unregisters a listener. Returns false if it was not registered.
    pub fn off(&self, id: ListenerId) -> bool {
        let mut entries = lock(&self.entries);
        let before = entries.len();
        entries.retain(|e| e.id != id);
        entries.len() != before
    }

    /// Calls matching listeners in registration order.
    ///
    /// Listeners run outside the registry lock, so they may register or
    /// unregister listeners themselves.
    pub fn dispatch(&self, changes: &[CollectionChange]) {
        if changes.is_empty() {
            return;
        }
        let entries: Vec<(Option<ChangeTag>, Listener)> = lock(&self.entries)
            .iter()
            .map(|e| (e.tag, Arc::clone(&e.listener)))
            .collect();
        for change in changes {
            let tag = ChangeTag::from(change);
            for (wanted, listener) in &entries {
                if wanted.is_none_or(|w| w == tag) {
                    listener(change);
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        lock(&self.entries).clear();
    }
}

impl fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerRegistry")
            .field("listeners", &self.len())
            .finish()
    }
}
