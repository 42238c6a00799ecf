//! In-process cache backend, shared between runs through an `Arc`.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use super::{CacheError, CacheKey, CelestialCache};
use crate::models::CelestialSample;

// ---

#[derive(Debug, Clone, Default)]
pub struct MemoryCelestialCache {
    entries: Arc<RwLock<HashMap<CacheKey, CelestialSample>>>,
}

impl MemoryCelestialCache {
    // ---
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

impl CelestialCache for MemoryCelestialCache {
    // ---
    async fn get(&self, key: &CacheKey) -> Result<Option<CelestialSample>, CacheError> {
        Ok(self.entries.read().await.get(key).copied())
    }

    async fn put(&self, key: &CacheKey, sample: &CelestialSample) -> Result<(), CacheError> {
        self.entries.write().await.insert(key.clone(), *sample);
        Ok(())
    }
}
