//! In-memory [`DestinationIndex`] implementation for tests

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::Result;
use crate::models::IndexEntry;

use super::DestinationIndex;

/// In-memory destination index.
///
/// Tracks write call counts so tests can assert how many destination round
/// trips a sync run actually issued.
pub struct MemoryIndex {
    points: RwLock<HashMap<Uuid, IndexEntry>>,
    upsert_calls: RwLock<usize>,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self {
            points: RwLock::new(HashMap::new()),
            upsert_calls: RwLock::new(0),
        }
    }

    pub fn len(&self) -> usize {
        self.points.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, key: &Uuid) -> bool {
        self.points.read().unwrap().contains_key(key)
    }

    pub fn get(&self, key: &Uuid) -> Option<IndexEntry> {
        self.points.read().unwrap().get(key).cloned()
    }

    /// Number of upsert batches received so far
    pub fn upsert_calls(&self) -> usize {
        *self.upsert_calls.read().unwrap()
    }
}

impl Default for MemoryIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DestinationIndex for MemoryIndex {
    async fn upsert(&self, entries: Vec<IndexEntry>) -> Result<()> {
        *self.upsert_calls.write().unwrap() += 1;
        let mut points = self.points.write().unwrap();
        for entry in entries {
            points.insert(entry.key, entry);
        }
        Ok(())
    }

    async fn delete(&self, keys: &[Uuid]) -> Result<()> {
        let mut points = self.points.write().unwrap();
        for key in keys {
            points.remove(key);
        }
        Ok(())
    }
}
