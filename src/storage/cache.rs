use lru::LruCache;
use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

/// 容量固定、永不过期的 LRU 记忆缓存
pub struct MemoCache<K: Hash + Eq, V: Clone> {
    store: Mutex<LruCache<K, V>>,
}

impl<K: Hash + Eq, V: Clone> MemoCache<K, V> {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            store: Mutex::new(LruCache::new(capacity)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LruCache<K, V>> {
        // 缓存内容不会处于半更新状态，锁中毒时继续使用
        self.store.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// 命中时同时刷新该项的最近使用顺序
    pub fn get(&self, key: &K) -> Option<V> {
        let value = self.lock().get(key).cloned();
        debug!("缓存{}", if value.is_some() { "命中" } else { "未命中" });
        value
    }

    pub fn insert(&self, key: K, value: V) {
        let mut store = self.lock();
        if let Some((_, _evicted)) = store.push(key, value) {
            debug!("缓存移出旧项（已满或键重复）");
        }
        debug!("缓存占用 {}/{}", store.len(), store.cap());
    }
}

#[cfg(test)]
impl<K: Hash + Eq, V: Clone> MemoCache<K, V> {
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.lock().cap().get()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }
}
