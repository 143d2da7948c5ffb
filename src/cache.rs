//! A thread-safe in-memory store for fetched features. [`FeatureCache`] provides concurrent
//! access for readers (resolving callers) and writers (cache-bypass fetches, the background
//! refresh task and the streaming event loop).
//!
//! Entries have no TTL: staleness is bounded by the refresh/push cadence, and a feature lives
//! until it is overwritten, explicitly removed or replaced by a snapshot.
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::features::Feature;

/// Concurrent feature id -> [`Feature`] store.
///
/// Features themselves are immutable and only ever replaced completely, so readers never observe
/// a partially-applied record. [`FeatureCache::replace_all`] swaps the whole content under one
/// write lock, which makes snapshot replacement atomic from a reader's point of view.
#[derive(Default)]
pub struct FeatureCache {
    features: RwLock<HashMap<String, Arc<Feature>>>,
}

impl FeatureCache {
    pub fn new() -> FeatureCache {
        FeatureCache::default()
    }

    pub fn get(&self, id: &str) -> Option<Arc<Feature>> {
        // Lock errors are only possible if a writer panicked while holding the lock, which
        // should never happen.
        let features = self
            .features
            .read()
            .expect("thread holding cache lock should not panic");
        features.get(id).cloned()
    }

    pub fn put(&self, feature: Feature) {
        let mut features = self
            .features
            .write()
            .expect("thread holding cache lock should not panic");
        features.insert(feature.id.clone(), Arc::new(feature));
    }

    /// Insert or overwrite several entries, leaving unrelated entries in place.
    pub fn extend(&self, entries: impl IntoIterator<Item = Feature>) {
        let mut features = self
            .features
            .write()
            .expect("thread holding cache lock should not panic");
        for feature in entries {
            features.insert(feature.id.clone(), Arc::new(feature));
        }
    }

    /// Replace the entire content with a snapshot. Readers observe either the old state or the
    /// new one, never a mix across keys.
    pub fn replace_all(&self, entries: impl IntoIterator<Item = Feature>) {
        let replacement: HashMap<String, Arc<Feature>> = entries
            .into_iter()
            .map(|feature| (feature.id.clone(), Arc::new(feature)))
            .collect();
        let mut features = self
            .features
            .write()
            .expect("thread holding cache lock should not panic");
        *features = replacement;
    }

    pub fn remove(&self, id: &str) {
        let mut features = self
            .features
            .write()
            .expect("thread holding cache lock should not panic");
        features.remove(id);
    }

    pub fn invalidate_all(&self) {
        let mut features = self
            .features
            .write()
            .expect("thread holding cache lock should not panic");
        features.clear();
    }

    /// Ids currently cached.
    pub fn ids(&self) -> Vec<String> {
        let features = self
            .features
            .read()
            .expect("thread holding cache lock should not panic");
        features.keys().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        let features = self
            .features
            .read()
            .expect("thread holding cache lock should not panic");
        features.is_empty()
    }
}
