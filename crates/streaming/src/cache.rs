use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;

/// Hint bit: the cached texture holds a fully resolved tile.
pub const HINT_RESOLVED: u32 = 0x1;

/// Caller-defined payload kept alongside a cached texture.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum CacheOpaque {
    #[default]
    None,
    /// Source tile version the texture was produced from.
    Version(i64),
    /// Serialized side data (e.g. refined projection points).
    Blob(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry<T> {
    pub texture: Option<T>,
    pub hints: u32,
    pub opaque: CacheOpaque,
    /// Accounted size against the cache budget.
    pub bytes: usize,
}

impl<T> CacheEntry<T> {
    pub fn texture(texture: T, bytes: usize, hints: u32, opaque: CacheOpaque) -> Self {
        Self {
            texture: Some(texture),
            hints,
            opaque,
            bytes,
        }
    }

    pub fn blob(data: Vec<u8>) -> Self {
        let bytes = data.len();
        Self {
            texture: None,
            hints: 0,
            opaque: CacheOpaque::Blob(data),
            bytes,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.hints & HINT_RESOLVED != 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    #[error("entry too large for budget: requested={requested} max={max}")]
    BudgetExceeded { requested: usize, max: usize },
}

#[derive(Debug)]
struct Slot<T> {
    entry: CacheEntry<T>,
    last_used_tick: u64,
}

/// Keyed texture cache with a byte budget.
///
/// Notes:
/// - Entries are keyed in a `BTreeMap` for stable traversal order.
/// - Eviction is LRU by `last_used_tick`, with a tie-break by key ordering.
/// - The cache never frees GPU objects itself: `put` and `clear` return the
///   displaced entries and the caller (on the render thread) frees them.
#[derive(Debug)]
pub struct TextureCache<T> {
    max_bytes: usize,
    used_bytes: usize,
    tick: u64,
    entries: BTreeMap<String, Slot<T>>,
}

/// Process-scoped cache handle shared by every layer that opts in.
pub type SharedTextureCache<T> = Arc<Mutex<TextureCache<T>>>;

impl<T> TextureCache<T> {
    pub fn new(max_bytes: usize) -> Self {
        Self {
            max_bytes,
            used_bytes: 0,
            tick: 0,
            entries: BTreeMap::new(),
        }
    }

    pub fn shared(max_bytes: usize) -> SharedTextureCache<T> {
        Arc::new(Mutex::new(Self::new(max_bytes)))
    }

    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    pub fn used_bytes(&self) -> usize {
        self.used_bytes
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Looks up and touches an entry.
    pub fn get(&mut self, key: &str) -> Option<&CacheEntry<T>> {
        self.tick += 1;
        let tick = self.tick;
        let slot = self.entries.get_mut(key)?;
        slot.last_used_tick = tick;
        Some(&slot.entry)
    }

    /// Takes an entry out of the cache (ownership passes to the caller).
    pub fn remove(&mut self, key: &str) -> Option<CacheEntry<T>> {
        let slot = self.entries.remove(key)?;
        self.used_bytes = self.used_bytes.saturating_sub(slot.entry.bytes);
        Some(slot.entry)
    }

    /// Inserts an entry, returning whatever it displaced: a previous entry
    /// under the same key and any entries evicted to stay within budget.
    pub fn put(
        &mut self,
        key: impl Into<String>,
        entry: CacheEntry<T>,
    ) -> Result<Vec<(String, CacheEntry<T>)>, CacheError> {
        if entry.bytes > self.max_bytes {
            return Err(CacheError::BudgetExceeded {
                requested: entry.bytes,
                max: self.max_bytes,
            });
        }
        let key = key.into();
        let mut displaced = Vec::new();
        if let Some(previous) = self.remove(&key) {
            displaced.push((key.clone(), previous));
        }

        self.tick += 1;
        self.used_bytes += entry.bytes;
        self.entries.insert(
            key.clone(),
            Slot {
                entry,
                last_used_tick: self.tick,
            },
        );

        while self.used_bytes > self.max_bytes {
            let victim = self
                .entries
                .iter()
                .filter(|(k, _)| **k != key)
                .min_by(|(ka, a), (kb, b)| {
                    a.last_used_tick
                        .cmp(&b.last_used_tick)
                        .then_with(|| ka.cmp(kb))
                })
                .map(|(k, _)| k.clone());
            let Some(victim) = victim else {
                break;
            };
            if let Some(evicted) = self.remove(&victim) {
                displaced.push((victim, evicted));
            }
        }
        Ok(displaced)
    }

    /// Empties the cache, handing every entry back to the caller.
    pub fn clear(&mut self) -> Vec<(String, CacheEntry<T>)> {
        self.used_bytes = 0;
        std::mem::take(&mut self.entries)
            .into_iter()
            .map(|(k, slot)| (k, slot.entry))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::{CacheEntry, CacheError, CacheOpaque, HINT_RESOLVED, TextureCache};

    fn tex(id: u32, bytes: usize) -> CacheEntry<u32> {
        CacheEntry::texture(id, bytes, HINT_RESOLVED, CacheOpaque::Version(1))
    }

    #[test]
    fn lru_eviction_is_deterministic() {
        let mut cache = TextureCache::new(10);
        assert!(cache.put("a", tex(1, 6)).unwrap().is_empty());
        let evicted = cache.put("b", tex(2, 6)).unwrap();

        // Total 12 > 10, so one entry must go; 'a' is older.
        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0].0, "a");
        assert_eq!(evicted[0].1.texture, Some(1));
        assert!(cache.contains("b"));
        assert_eq!(cache.used_bytes(), 6);
    }

    #[test]
    fn get_refreshes_recency() {
        let mut cache = TextureCache::new(10);
        cache.put("a", tex(1, 4)).unwrap();
        cache.put("b", tex(2, 4)).unwrap();
        assert!(cache.get("a").is_some());
        let evicted = cache.put("c", tex(3, 4)).unwrap();
        assert_eq!(evicted[0].0, "b");
    }

    #[test]
    fn replacing_a_key_returns_the_old_entry() {
        let mut cache = TextureCache::new(100);
        cache.put("k", tex(1, 10)).unwrap();
        let displaced = cache.put("k", tex(2, 20)).unwrap();
        assert_eq!(displaced.len(), 1);
        assert_eq!(displaced[0].1.texture, Some(1));
        assert_eq!(cache.used_bytes(), 20);
    }

    #[test]
    fn remove_transfers_ownership() {
        let mut cache = TextureCache::new(100);
        cache.put("blob", CacheEntry::<u32>::blob(vec![1, 2, 3])).unwrap();
        let entry = cache.remove("blob").unwrap();
        assert_eq!(entry.opaque, CacheOpaque::Blob(vec![1, 2, 3]));
        assert!(!entry.is_resolved());
        assert!(cache.is_empty());
        assert_eq!(cache.used_bytes(), 0);
    }

    #[test]
    fn oversized_entries_are_rejected() {
        let mut cache = TextureCache::new(8);
        let err = cache.put("big", tex(1, 9)).unwrap_err();
        assert_eq!(err, CacheError::BudgetExceeded { requested: 9, max: 8 });
    }
}
