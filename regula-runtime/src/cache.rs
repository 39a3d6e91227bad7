//! Memoization of built guides keyed by (pattern, vocabulary).

use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

use tracing::{debug, info};

use regula_core::{CacheConfig, Config, Result};

use crate::guide::Guide;
use crate::vocab::{VocabIndex, Vocabulary};

/// Hashed by pattern and vocabulary fingerprint; compared by pattern and the
/// full vocabulary, so fingerprint collisions never share a guide.
#[derive(Debug, Clone)]
struct CacheKey {
    pattern: String,
    vocabulary: Arc<Vocabulary>,
}

impl CacheKey {
    fn new(pattern: &str, vocab: &VocabIndex) -> Self {
        Self {
            pattern: pattern.to_owned(),
            vocabulary: Arc::clone(vocab.vocabulary()),
        }
    }
}

impl PartialEq for CacheKey {
    fn eq(&self, other: &Self) -> bool {
        self.pattern == other.pattern
            && (Arc::ptr_eq(&self.vocabulary, &other.vocabulary)
                || self.vocabulary == other.vocabulary)
    }
}

impl Eq for CacheKey {}

impl Hash for CacheKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.pattern.hash(state);
        self.vocabulary.fingerprint().hash(state);
    }
}

#[derive(Debug, Default)]
struct Slot {
    guide: OnceLock<Arc<Guide>>,
    /// Held for the duration of a build.
    building: Mutex<()>,
    last_access: AtomicU64,
}

/// Process-wide store of built guides.
///
/// Concurrent first requests for the same key wait for a single build
/// instead of each compiling the pattern. Failed builds are not cached.
#[derive(Debug, Default)]
pub struct GuideCache {
    slots: Mutex<HashMap<CacheKey, Arc<Slot>>>,
    capacity: Option<usize>,
    clock: AtomicU64,
    builds: AtomicUsize,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // A panicking build leaves nothing half-written behind the lock.
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl GuideCache {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            capacity: config.capacity,
            ..Default::default()
        }
    }

    /// A cache that keeps every guide until `clear`.
    pub fn unbounded() -> Self {
        Self::default()
    }

    /// Return the guide for `(pattern, vocab)`, building it on first use.
    pub fn get_or_build(
        &self,
        pattern: &str,
        vocab: &VocabIndex,
        config: &Config,
    ) -> Result<Arc<Guide>> {
        let key = CacheKey::new(pattern, vocab);
        let slot = {
            let mut slots = lock(&self.slots);
            Arc::clone(slots.entry(key.clone()).or_default())
        };
        slot.last_access.store(self.tick(), Ordering::Relaxed);

        if let Some(guide) = slot.guide.get() {
            debug!("Guide cache hit");
            return Ok(Arc::clone(guide));
        }

        let building = lock(&slot.building);
        // Another caller may have finished while we waited.
        if let Some(guide) = slot.guide.get() {
            debug!("Guide cache hit after waiting for build");
            return Ok(Arc::clone(guide));
        }

        let guide = match Guide::new(pattern, vocab, config) {
            Ok(guide) => Arc::new(guide),
            Err(err) => {
                drop(building);
                self.discard(&key, &slot);
                return Err(err);
            }
        };
        self.builds.fetch_add(1, Ordering::Relaxed);
        let guide = Arc::clone(slot.guide.get_or_init(|| guide));
        drop(building);

        slot.last_access.store(self.tick(), Ordering::Relaxed);
        self.evict();
        Ok(guide)
    }

    /// The cached guide for `(pattern, vocab)`, if one has been built.
    pub fn get(&self, pattern: &str, vocab: &VocabIndex) -> Option<Arc<Guide>> {
        let key = CacheKey::new(pattern, vocab);
        let slot = lock(&self.slots).get(&key).cloned()?;
        let guide = slot.guide.get().cloned()?;
        slot.last_access.store(self.tick(), Ordering::Relaxed);
        Some(guide)
    }

    /// Number of built guides held.
    pub fn len(&self) -> usize {
        lock(&self.slots)
            .values()
            .filter(|slot| slot.guide.get().is_some())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        lock(&self.slots).clear();
    }

    /// Number of guides built since the cache was created.
    pub fn build_count(&self) -> usize {
        self.builds.load(Ordering::Relaxed)
    }

    /// Remove `slot` from the map if it is still the entry for `key` and
    /// never received a guide.
    fn discard(&self, key: &CacheKey, slot: &Arc<Slot>) {
        let mut slots = lock(&self.slots);
        let unbuilt = slots
            .get(key)
            .is_some_and(|current| Arc::ptr_eq(current, slot) && current.guide.get().is_none());
        if unbuilt {
            slots.remove(key);
        }
    }

    #[cfg(test)]
    fn slot_count(&self) -> usize {
        lock(&self.slots).len()
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed)
    }

    /// Drop least recently used built guides until within capacity.
    fn evict(&self) {
        let Some(capacity) = self.capacity else {
            return;
        };
        let mut slots = lock(&self.slots);
        loop {
            let built: Vec<(&CacheKey, u64)> = slots
                .iter()
                .filter(|(_, slot)| slot.guide.get().is_some())
                .map(|(key, slot)| (key, slot.last_access.load(Ordering::Relaxed)))
                .collect();
            if built.len() <= capacity {
                return;
            }
            let Some(oldest) = built
                .into_iter()
                .min_by_key(|&(_, access)| access)
                .map(|(key, _)| key.clone())
            else {
                return;
            };
            info!("Evicting cached guide for pattern of {} bytes", oldest.pattern.len());
            slots.remove(&oldest);
        }
    }
}
