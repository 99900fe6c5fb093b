use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// A GPU-side (or stand-in) texture whose resources can be released explicitly.
pub trait TextureResource {
    fn dispose(&self);
}

struct CacheEntry<T> {
    texture: Arc<T>,
    last_used: u64,
}

/// Bounded key to texture store with least-recently-used eviction.
///
/// Every texture put here is owned by the cache; the cache is the only place
/// that calls [`TextureResource::dispose`]. Recency uses a logical clock so
/// ordering is exact even when several accesses land within one instant.
///
/// Pinned entries are bound to a live material and are never evicted. When
/// every entry is pinned the cache grows past its capacity instead of
/// destroying a texture that is still drawn.
pub struct TextureCache<T: TextureResource> {
    entries: HashMap<String, CacheEntry<T>>,
    pinned: HashSet<String>,
    capacity: usize,
    clock: u64,
    evictions: u64,
}

impl<T: TextureResource> TextureCache<T> {
    pub fn new(capacity: usize) -> Self {
        Self { entries: HashMap::new(), pinned: HashSet::new(), capacity: capacity.max(1), clock: 0, evictions: 0 }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
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

    pub fn evictions(&self) -> u64 {
        self.evictions
    }

    /// Protects `key` from eviction until it is unpinned or released.
    pub fn pin(&mut self, key: &str) -> bool {
        self.entries.contains_key(key) && self.pinned.insert(key.to_string())
    }

    pub fn unpin(&mut self, key: &str) -> bool {
        self.pinned.remove(key)
    }

    pub fn is_pinned(&self, key: &str) -> bool {
        self.pinned.contains(key)
    }

    /// Returns the texture for `key` and marks it most recently used.
    pub fn get(&mut self, key: &str) -> Option<Arc<T>> {
        let tick = self.tick();
        self.entries.get_mut(key).map(|entry| {
            entry.last_used = tick;
            entry.texture.clone()
        })
    }

    /// Stores `texture` under `key`, evicting least-recently-used entries first
    /// when the cache is full. Replacing an existing key disposes the old texture
    /// unless it is the same object.
    pub fn put(&mut self, key: impl Into<String>, texture: Arc<T>) -> Arc<T> {
        let key = key.into();
        let tick = self.tick();
        if let Some(entry) = self.entries.get_mut(&key) {
            if !Arc::ptr_eq(&entry.texture, &texture) {
                entry.texture.dispose();
                entry.texture = texture.clone();
            }
            entry.last_used = tick;
            return texture;
        }
        while self.entries.len() >= self.capacity {
            if self.evict_lru().is_none() {
                log::warn!(
                    "texture cache holds {} bound textures, over its capacity of {}",
                    self.entries.len() + 1,
                    self.capacity
                );
                break;
            }
        }
        self.entries.insert(key, CacheEntry { texture: texture.clone(), last_used: tick });
        texture
    }

    /// Disposes and removes the least-recently-used unpinned entry, returning its key.
    pub fn evict_lru(&mut self) -> Option<String> {
        let key = self
            .entries
            .iter()
            .filter(|(key, _)| !self.pinned.contains(key.as_str()))
            .min_by_key(|(_, entry)| entry.last_used)
            .map(|(key, _)| key.clone())?;
        if let Some(entry) = self.entries.remove(&key) {
            entry.texture.dispose();
        }
        self.evictions += 1;
        log::debug!("texture cache evicted '{key}'");
        Some(key)
    }

    /// Disposes and removes one entry. Returns false when the key is unknown.
    pub fn release(&mut self, key: &str) -> bool {
        self.pinned.remove(key);
        match self.entries.remove(key) {
            Some(entry) => {
                entry.texture.dispose();
                true
            }
            None => false,
        }
    }

    /// Disposes every entry.
    pub fn clear(&mut self) {
        self.pinned.clear();
        for (_, entry) in self.entries.drain() {
            entry.texture.dispose();
        }
    }

    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }
}

impl<T: TextureResource> Drop for TextureCache<T> {
    fn drop(&mut self) {
        self.clear();
    }
}
