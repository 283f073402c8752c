//! Process-local tier: decoded entities and negative results by memkey.

use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use strata_core::sync::{rw_read, rw_write};

/// A local-tier entry.
#[derive(Clone)]
pub enum LocalEntry {
    /// A decoded entity. Readers receive clones, never the stored value.
    Present(Arc<dyn Any + Send + Sync>),
    /// The key is known not to exist in the primary store.
    Absent,
}

impl LocalEntry {
    pub fn present<T: Clone + Send + Sync + 'static>(value: T) -> Self {
        LocalEntry::Present(Arc::new(value))
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, LocalEntry::Absent)
    }
}

impl std::fmt::Debug for LocalEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LocalEntry::Present(_) => f.write_str("Present(..)"),
            LocalEntry::Absent => f.write_str("Absent"),
        }
    }
}

/// What a local lookup found.
#[derive(Debug, Clone, PartialEq)]
pub enum LocalLookup<T> {
    Hit(T),
    Absent,
    Miss,
}

/// Memkey-indexed map guarded by a single lock.
#[derive(Debug, Default)]
pub struct LocalTier {
    entries: RwLock<HashMap<String, LocalEntry>>,
}

impl LocalTier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up `memkey` as a `T`. An entry holding a different type counts
    /// as a miss.
    pub fn lookup<T: Clone + 'static>(&self, memkey: &str) -> LocalLookup<T> {
        let entries = rw_read(&self.entries, "local_tier", "lookup");
        match entries.get(memkey) {
            None => LocalLookup::Miss,
            Some(LocalEntry::Absent) => LocalLookup::Absent,
            Some(LocalEntry::Present(value)) => match value.downcast_ref::<T>() {
                Some(value) => LocalLookup::Hit(value.clone()),
                None => LocalLookup::Miss,
            },
        }
    }

    pub fn get(&self, memkey: &str) -> Option<LocalEntry> {
        rw_read(&self.entries, "local_tier", "get").get(memkey).cloned()
    }

    pub fn contains(&self, memkey: &str) -> bool {
        rw_read(&self.entries, "local_tier", "contains").contains_key(memkey)
    }

    pub fn insert(&self, memkey: String, entry: LocalEntry) {
        rw_write(&self.entries, "local_tier", "insert").insert(memkey, entry);
    }

    /// Insert many entries under one lock acquisition.
    pub fn insert_many(&self, entries: impl IntoIterator<Item = (String, LocalEntry)>) {
        rw_write(&self.entries, "local_tier", "insert_many").extend(entries);
    }

    pub fn remove_many<'a>(&self, memkeys: impl IntoIterator<Item = &'a String>) {
        let mut entries = rw_write(&self.entries, "local_tier", "remove_many");
        for memkey in memkeys {
            entries.remove(memkey);
        }
    }

    /// Apply removals then insertions under one lock acquisition.
    pub fn merge(
        &self,
        removed: impl IntoIterator<Item = String>,
        inserted: impl IntoIterator<Item = (String, LocalEntry)>,
    ) {
        let mut entries = rw_write(&self.entries, "local_tier", "merge");
        for memkey in removed {
            entries.remove(&memkey);
        }
        entries.extend(inserted);
    }

    pub fn clear(&self) {
        rw_write(&self.entries, "local_tier", "clear").clear();
    }

    pub fn len(&self) -> usize {
        rw_read(&self.entries, "local_tier", "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
