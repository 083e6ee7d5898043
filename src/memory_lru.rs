//! Size-bounded in-memory LRU sitting in front of the persistent store.

use crate::types::CacheEntry;
use indexmap::IndexMap;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};

struct Inner {
    entries: IndexMap<PathBuf, CacheEntry>,
    current_size_bytes: usize,
    max_size_bytes: usize,
}

/// An `IndexMap`-backed LRU keyed by file path, bounded by approximate byte size
/// rather than entry count.
///
/// Insertion order in the map tracks recency: the front is least-recently-used,
/// the back is most-recently-used. A `get` hit moves its entry to the back.
pub struct InMemoryLru {
    inner: Mutex<Inner>,
}

impl InMemoryLru {
    pub fn new(max_size_bytes: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: IndexMap::new(),
                current_size_bytes: 0,
                max_size_bytes,
            }),
        }
    }

    /// Insert or replace an entry, evicting least-recently-used entries as needed.
    ///
    /// An entry larger than the entire budget is silently rejected rather than
    /// causing pathological eviction of everything else.
    pub fn put(&self, entry: CacheEntry) {
        let size = entry.approximate_size();
        let mut inner = self.inner.lock();

        if size > inner.max_size_bytes {
            return;
        }

        if let Some(old) = inner.entries.shift_remove(&entry.file_path) {
            inner.current_size_bytes -= old.approximate_size();
        }

        while inner.current_size_bytes + size > inner.max_size_bytes {
            let Some((_, evicted)) = inner.entries.shift_remove_index(0) else {
                break;
            };
            inner.current_size_bytes -= evicted.approximate_size();
        }

        inner.current_size_bytes += size;
        inner.entries.insert(entry.file_path.clone(), entry);
    }

    /// Fetch an entry, moving it to the most-recently-used position on hit.
    pub fn get(&self, path: &Path) -> Option<CacheEntry> {
        let mut inner = self.inner.lock();
        let (index, _, entry) = inner.entries.get_full(path)?;
        let entry = entry.clone();
        inner.entries.move_index(index, inner.entries.len() - 1);
        Some(entry)
    }

    pub fn remove(&self, path: &Path) -> bool {
        let mut inner = self.inner.lock();
        match inner.entries.shift_remove(path) {
            Some(removed) => {
                inner.current_size_bytes -= removed.approximate_size();
                true
            }
            None => false,
        }
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.current_size_bytes = 0;
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn current_size_bytes(&self) -> usize {
        self.inner.lock().current_size_bytes
    }
}
