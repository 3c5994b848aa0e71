//! In-process embedding cache keyed by content hash.
//!
//! Populated on the first successful embedding of a given normalized
//! text and consulted before any provider call, so repeated ingestion
//! of identical content never spends quota. Failed or partial results
//! are never stored.

use std::collections::HashMap;
use std::sync::RwLock;

/// Thread-safe `content_hash → vector` map.
#[derive(Default)]
pub struct EmbeddingCache {
    entries: RwLock<HashMap<String, Vec<f32>>>,
}

impl EmbeddingCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, content_hash: &str) -> Option<Vec<f32>> {
        self.entries.read().unwrap().get(content_hash).cloned()
    }

    pub fn insert(&self, content_hash: String, vector: Vec<f32>) {
        self.entries.write().unwrap().insert(content_hash, vector);
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().unwrap().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_miss_then_hit() {
        let cache = EmbeddingCache::new();
        assert!(cache.get("h1").is_none());
        cache.insert("h1".to_string(), vec![1.0, 2.0]);
        assert_eq!(cache.get("h1"), Some(vec![1.0, 2.0]));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_insert_overwrites() {
        let cache = EmbeddingCache::new();
        cache.insert("h1".to_string(), vec![1.0]);
        cache.insert("h1".to_string(), vec![2.0]);
        assert_eq!(cache.get("h1"), Some(vec![2.0]));
        assert_eq!(cache.len(), 1);
    }
}
