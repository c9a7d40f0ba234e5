//! In-memory [`RecordStore`] implementation for tests
//!
//! Uses a `HashMap` behind `std::sync::RwLock`; lets callers exercise the
//! synchronizer against an isolated ledger without touching disk.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::Result;
use crate::models::RecordEntry;

use super::{MonotonicClock, RecordStore};

/// In-memory record store for tests and embedded use
pub struct MemoryRecordStore {
    entries: RwLock<HashMap<(String, Uuid), RecordEntry>>,
    clock: MonotonicClock,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            clock: MonotonicClock::new(),
        }
    }

    /// Number of entries currently held for a group
    pub fn count(&self, group_id: &str) -> usize {
        self.entries
            .read()
            .unwrap()
            .keys()
            .filter(|(group, _)| group == group_id)
            .count()
    }
}

impl Default for MemoryRecordStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn current_time(&self) -> Result<DateTime<Utc>> {
        Ok(self.clock.now())
    }

    async fn get(&self, group_id: &str, keys: &[Uuid]) -> Result<HashMap<Uuid, RecordEntry>> {
        let entries = self.entries.read().unwrap();
        Ok(keys
            .iter()
            .filter_map(|key| {
                entries
                    .get(&(group_id.to_string(), *key))
                    .map(|entry| (*key, entry.clone()))
            })
            .collect())
    }

    async fn upsert(&self, entries: &[RecordEntry]) -> Result<()> {
        let mut stored = self.entries.write().unwrap();
        for entry in entries {
            let mut entry = entry.clone();
            entry.updated_at = self.clock.now();
            stored.insert((entry.group_id.clone(), entry.key), entry);
        }
        Ok(())
    }

    async fn list_keys(
        &self,
        group_id: &str,
        source_ids: Option<&[String]>,
        before: DateTime<Utc>,
    ) -> Result<Vec<Uuid>> {
        let entries = self.entries.read().unwrap();
        Ok(entries
            .values()
            .filter(|entry| entry.group_id == group_id && entry.updated_at < before)
            .filter(|entry| match source_ids {
                Some(sources) => sources.contains(&entry.source_id),
                None => true,
            })
            .map(|entry| entry.key)
            .collect())
    }

    async fn delete(&self, group_id: &str, keys: &[Uuid]) -> Result<()> {
        let mut entries = self.entries.write().unwrap();
        for key in keys {
            entries.remove(&(group_id.to_string(), *key));
        }
        Ok(())
    }
}
