//! Core data model: chunks, record entries, policies, and run statistics

use crate::error::Error;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::str::FromStr;
use uuid::Uuid;

/// A unit of content to be indexed.
///
/// Produced by an upstream chunker (out of scope here). `chunk_index` is the
/// chunk's stable ordinal within its source document; the synchronizer folds
/// it into the key so that editing one chunk never disturbs the keys of its
/// siblings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentChunk {
    /// Stable identifier of the originating document (e.g. a URL)
    pub source_id: String,
    /// Stable ordinal of this chunk within its source
    pub chunk_index: u32,
    /// Chunk text
    pub content: String,
    /// Ordered metadata attached to the chunk
    pub metadata: BTreeMap<String, Value>,
}

impl DocumentChunk {
    pub fn new(source_id: impl Into<String>, chunk_index: u32, content: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            chunk_index,
            content: content.into(),
            metadata: BTreeMap::new(),
        }
    }

    /// Backfill metadata fields the destination store is expected to resolve.
    ///
    /// Vector stores can fail at query time when a retrieved payload is
    /// missing an expected attribute, so `source` and `title` are always
    /// present after normalization, defaulting to empty strings.
    pub fn normalize_metadata(&mut self) {
        for field in ["source", "title"] {
            self.metadata
                .entry(field.to_string())
                .or_insert_with(|| Value::String(String::new()));
        }
    }
}

/// Bookkeeping row for one indexed key.
///
/// `updated_at` is assigned by the record store, never by the caller. At most
/// one entry exists per key within a group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordEntry {
    pub key: Uuid,
    pub group_id: String,
    pub source_id: String,
    pub content_hash: String,
    pub updated_at: DateTime<Utc>,
}

/// What the destination index accepts per upserted unit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexEntry {
    pub key: Uuid,
    pub content: String,
    pub metadata: BTreeMap<String, Value>,
}

/// Cleanup behavior for a sync run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncPolicy {
    /// Pure upsert, no deletions
    None,
    /// Delete stale keys only for sources present in the current batch.
    /// Safe for partial or streaming submission.
    Incremental,
    /// Delete every key in the group not refreshed by the current run.
    /// Requires the caller to submit the entire corpus in one logical run;
    /// a partial batch under this policy deletes valid documents. That is a
    /// documented caller contract, not runtime-checked.
    Full,
}

impl std::fmt::Display for SyncPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncPolicy::None => write!(f, "none"),
            SyncPolicy::Incremental => write!(f, "incremental"),
            SyncPolicy::Full => write!(f, "full"),
        }
    }
}

impl FromStr for SyncPolicy {
    type Err = Error;

    fn from_str(s: &str) -> crate::error::Result<Self> {
        match s.to_lowercase().as_str() {
            "none" => Ok(SyncPolicy::None),
            "incremental" => Ok(SyncPolicy::Incremental),
            "full" => Ok(SyncPolicy::Full),
            _ => Err(Error::Config(format!("Unknown sync policy: {}", s))),
        }
    }
}

/// Statistics from one sync run. Observational only, never persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStats {
    pub num_added: usize,
    pub num_updated: usize,
    pub num_skipped: usize,
    pub num_deleted: usize,
}
