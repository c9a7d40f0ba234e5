//! The synchronizer core: reconcile a batch of chunks against the
//! destination index and the record ledger
//!
//! One sequential pass per invocation: classification observes a consistent
//! snapshot of the ledger before any write for the same batch is issued.
//! Concurrent runs over disjoint groups are independent; runs over the same
//! group must be serialized by the caller.
//!
//! Writes to the destination and the ledger are not transactional across the
//! two stores. They are ordered destination-first, ledger-second, so a crash
//! between the two leaves the ledger conservatively behind: a re-run with the
//! same content recomputes identical keys and hashes, the repeated destination
//! upsert replaces a point with itself, and the ledger catches up.

use crate::config::SyncConfig;
use crate::dest::DestinationIndex;
use crate::error::Result;
use crate::hash::key_and_hash;
use crate::models::{DocumentChunk, IndexEntry, RecordEntry, SyncPolicy, SyncStats};
use crate::record::RecordStore;
use chrono::{DateTime, Utc};
use futures::future::try_join_all;
use std::collections::{BTreeSet, HashMap, HashSet};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Callback consulted before an empty batch under [`SyncPolicy::Full`] wipes
/// a whole group. Receives the group id; returning false skips the wipe.
pub type WipeConfirmHook = Box<dyn Fn(&str) -> bool + Send + Sync>;

/// A chunk with its reconciliation identity computed
struct PreparedChunk {
    chunk: DocumentChunk,
    key: Uuid,
    hash: String,
}

impl PreparedChunk {
    fn index_entry(&self) -> IndexEntry {
        IndexEntry {
            key: self.key,
            content: self.chunk.content.clone(),
            metadata: self.chunk.metadata.clone(),
        }
    }

    fn record_entry(&self, group_id: &str, placeholder_ts: DateTime<Utc>) -> RecordEntry {
        RecordEntry {
            key: self.key,
            group_id: group_id.to_string(),
            source_id: self.chunk.source_id.clone(),
            content_hash: self.hash.clone(),
            // The record store assigns the real timestamp on write.
            updated_at: placeholder_ts,
        }
    }
}

/// Orchestrates reconciliation between a chunk batch, the record store, and
/// the destination index.
///
/// Holds its store handles explicitly so independent groups and tests can
/// run against isolated instances (no process-global clients).
pub struct Synchronizer<R, D> {
    records: R,
    destination: D,
    config: SyncConfig,
    wipe_confirm: Option<WipeConfirmHook>,
}

impl<R: RecordStore, D: DestinationIndex> Synchronizer<R, D> {
    pub fn new(records: R, destination: D, config: SyncConfig) -> Self {
        Self {
            records,
            destination,
            config,
            wipe_confirm: None,
        }
    }

    /// Install a confirmation hook for the empty-batch `full` wipe
    pub fn on_full_wipe(mut self, hook: WipeConfirmHook) -> Self {
        self.wipe_confirm = Some(hook);
        self
    }

    pub fn records(&self) -> &R {
        &self.records
    }

    pub fn destination(&self) -> &D {
        &self.destination
    }

    /// Reconcile one batch against the destination index.
    ///
    /// `force_update` re-upserts content whose hash is unchanged, repairing a
    /// destination that drifted from the ledger after a partial prior failure.
    ///
    /// `SyncPolicy::Full` assumes the batch covers the entire corpus: an empty
    /// batch deletes every key in the group, and a partial batch deletes
    /// whatever it does not cover. That precondition is the caller's contract.
    pub async fn sync(
        &self,
        batch: Vec<DocumentChunk>,
        group_id: &str,
        policy: SyncPolicy,
        force_update: bool,
    ) -> Result<SyncStats> {
        info!(
            group_id,
            policy = %policy,
            force_update,
            batch_len = batch.len(),
            "Starting sync run"
        );

        let prepared = self.prepare(batch);

        if prepared.is_empty() && policy == SyncPolicy::Full {
            if let Some(hook) = &self.wipe_confirm {
                if !hook(group_id) {
                    warn!(group_id, "Full cleanup of empty batch declined by hook, skipping");
                    return Ok(SyncStats::default());
                }
            }
        }

        // Watermark from the store's own clock, taken before any write:
        // entries touched by this run end up strictly after it, everything
        // else in the group is stale.
        let start_time = self.records.current_time().await?;

        let keys: Vec<Uuid> = prepared.iter().map(|p| p.key).collect();
        let fetches = keys
            .chunks(self.config.batch_size)
            .map(|batch| self.records.get(group_id, batch));
        let existing: HashMap<Uuid, RecordEntry> = try_join_all(fetches)
            .await?
            .into_iter()
            .flatten()
            .collect();

        let mut stats = SyncStats::default();
        let mut to_write: Vec<PreparedChunk> = Vec::new();
        let mut to_touch: Vec<PreparedChunk> = Vec::new();

        for p in prepared {
            match existing.get(&p.key) {
                None => {
                    stats.num_added += 1;
                    to_write.push(p);
                }
                Some(entry) if entry.content_hash == p.hash && !force_update => {
                    stats.num_skipped += 1;
                    to_touch.push(p);
                }
                Some(_) => {
                    stats.num_updated += 1;
                    to_write.push(p);
                }
            }
        }

        debug!(
            added = stats.num_added,
            updated = stats.num_updated,
            skipped = stats.num_skipped,
            "Classified batch"
        );

        // Destination first, ledger second, per slice.
        for slice in to_write.chunks(self.config.batch_size) {
            let entries: Vec<IndexEntry> = slice.iter().map(|p| p.index_entry()).collect();
            self.destination.upsert(entries).await?;

            let records: Vec<RecordEntry> = slice
                .iter()
                .map(|p| p.record_entry(group_id, start_time))
                .collect();
            self.records.upsert(&records).await?;
        }

        // Unchanged content is only touched: timestamp refresh, no
        // destination write.
        for slice in to_touch.chunks(self.config.batch_size) {
            let records: Vec<RecordEntry> = slice
                .iter()
                .map(|p| p.record_entry(group_id, start_time))
                .collect();
            self.records.upsert(&records).await?;
        }

        let touched_sources: BTreeSet<String> = to_write
            .iter()
            .chain(to_touch.iter())
            .map(|p| p.chunk.source_id.clone())
            .collect();

        match policy {
            SyncPolicy::None => {}
            SyncPolicy::Incremental => {
                // Only keys belonging to sources present in this batch are
                // deletion candidates; untouched sources are left alone, so
                // partial submission is safe.
                if !touched_sources.is_empty() {
                    let sources: Vec<String> = touched_sources.into_iter().collect();
                    let stale = self
                        .records
                        .list_keys(group_id, Some(&sources), start_time)
                        .await?;
                    stats.num_deleted += self.delete_keys(group_id, &stale).await?;
                }
            }
            SyncPolicy::Full => {
                let stale = self.records.list_keys(group_id, None, start_time).await?;
                stats.num_deleted += self.delete_keys(group_id, &stale).await?;
            }
        }

        info!(
            group_id,
            added = stats.num_added,
            updated = stats.num_updated,
            skipped = stats.num_skipped,
            deleted = stats.num_deleted,
            "Sync run complete"
        );

        Ok(stats)
    }

    /// Drop trivially short chunks, normalize metadata, compute identities,
    /// and dedup within the batch. When two chunks resolve to the same key
    /// the last occurrence in submission order wins (later content is
    /// assumed fresher); the survivors keep their relative order.
    fn prepare(&self, batch: Vec<DocumentChunk>) -> Vec<PreparedChunk> {
        let mut seen: HashSet<Uuid> = HashSet::new();
        let mut kept: Vec<PreparedChunk> = Vec::with_capacity(batch.len());

        for mut chunk in batch.into_iter().rev() {
            if chunk.content.chars().count() <= self.config.min_content_chars {
                debug!(
                    source_id = %chunk.source_id,
                    chunk_index = chunk.chunk_index,
                    "Discarding trivially short chunk"
                );
                continue;
            }

            chunk.normalize_metadata();
            let (key, hash) = key_and_hash(&chunk);

            if !seen.insert(key) {
                debug!(
                    source_id = %chunk.source_id,
                    chunk_index = chunk.chunk_index,
                    "Dropping duplicate key within batch, later occurrence wins"
                );
                continue;
            }

            kept.push(PreparedChunk { chunk, key, hash });
        }

        kept.reverse();
        kept
    }

    /// Delete keys from both stores, destination first, in batch-size slices
    async fn delete_keys(&self, group_id: &str, keys: &[Uuid]) -> Result<usize> {
        for slice in keys.chunks(self.config.batch_size) {
            self.destination.delete(slice).await?;
            self.records.delete(group_id, slice).await?;
        }

        if !keys.is_empty() {
            info!(group_id, deleted = keys.len(), "Deleted stale keys");
        }

        Ok(keys.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dest::MemoryIndex;
    use crate::hash::chunk_key;
    use crate::record::MemoryRecordStore;
    use serde_json::Value;

    const GROUP: &str = "docs";

    fn fixture() -> Synchronizer<MemoryRecordStore, MemoryIndex> {
        Synchronizer::new(
            MemoryRecordStore::new(),
            MemoryIndex::new(),
            SyncConfig::default(),
        )
    }

    fn chunk(source: &str, index: u32, content: &str) -> DocumentChunk {
        DocumentChunk::new(source, index, content)
    }

    fn two_doc_batch() -> Vec<DocumentChunk> {
        vec![
            chunk("doc1", 0, "hello from the first document"),
            chunk("doc2", 0, "world according to the second"),
        ]
    }

    #[tokio::test]
    async fn test_first_run_adds_everything() {
        let sync = fixture();

        let stats = sync
            .sync(two_doc_batch(), GROUP, SyncPolicy::None, false)
            .await
            .unwrap();

        assert_eq!(
            stats,
            SyncStats {
                num_added: 2,
                ..Default::default()
            }
        );
        assert_eq!(sync.destination().len(), 2);
        assert_eq!(sync.records().count(GROUP), 2);
    }

    #[tokio::test]
    async fn test_identical_rerun_is_idempotent() {
        let sync = fixture();

        sync.sync(two_doc_batch(), GROUP, SyncPolicy::None, false)
            .await
            .unwrap();
        let writes_after_first = sync.destination().upsert_calls();

        let stats = sync
            .sync(two_doc_batch(), GROUP, SyncPolicy::None, false)
            .await
            .unwrap();

        assert_eq!(
            stats,
            SyncStats {
                num_skipped: 2,
                ..Default::default()
            }
        );
        // Unchanged content never reaches the destination again.
        assert_eq!(sync.destination().upsert_calls(), writes_after_first);
    }

    #[tokio::test]
    async fn test_duplicate_keys_in_batch_last_occurrence_wins() {
        let sync = fixture();

        let batch = vec![
            chunk("doc1", 0, "first draft of this chunk"),
            chunk("doc1", 0, "second draft of this chunk"),
        ];
        let stats = sync.sync(batch, GROUP, SyncPolicy::None, false).await.unwrap();

        assert_eq!(stats.num_added, 1);
        let key = chunk_key("doc1", 0);
        assert_eq!(
            sync.destination().get(&key).unwrap().content,
            "second draft of this chunk"
        );
    }

    #[tokio::test]
    async fn test_change_detection_updates_hash() {
        let sync = fixture();
        let key = chunk_key("doc1", 0);

        sync.sync(
            vec![chunk("doc1", 0, "original chunk contents")],
            GROUP,
            SyncPolicy::None,
            false,
        )
        .await
        .unwrap();
        let old_hash = sync.records().get(GROUP, &[key]).await.unwrap()[&key]
            .content_hash
            .clone();

        let stats = sync
            .sync(
                vec![chunk("doc1", 0, "revised chunk contents")],
                GROUP,
                SyncPolicy::None,
                false,
            )
            .await
            .unwrap();

        assert_eq!(stats.num_updated, 1);
        assert_eq!(stats.num_added, 0);
        let new_hash = sync.records().get(GROUP, &[key]).await.unwrap()[&key]
            .content_hash
            .clone();
        assert_ne!(new_hash, old_hash);
        assert_eq!(
            sync.destination().get(&key).unwrap().content,
            "revised chunk contents"
        );
    }

    #[tokio::test]
    async fn test_force_update_rewrites_unchanged_content() {
        let sync = fixture();

        sync.sync(two_doc_batch(), GROUP, SyncPolicy::None, false)
            .await
            .unwrap();
        let writes_before = sync.destination().upsert_calls();

        let stats = sync
            .sync(two_doc_batch(), GROUP, SyncPolicy::None, true)
            .await
            .unwrap();

        assert_eq!(
            stats,
            SyncStats {
                num_updated: 2,
                ..Default::default()
            }
        );
        assert!(sync.destination().upsert_calls() > writes_before);
    }

    #[tokio::test]
    async fn test_incremental_deletes_only_missing_chunk_of_present_source() {
        let sync = fixture();

        sync.sync(
            vec![
                chunk("doc1", 0, "doc one, chunk zero text"),
                chunk("doc1", 1, "doc one, chunk one text"),
                chunk("doc2", 0, "doc two, chunk zero text"),
            ],
            GROUP,
            SyncPolicy::Incremental,
            false,
        )
        .await
        .unwrap();

        // doc1 reappears with one fewer chunk; doc2 is absent from the batch.
        let stats = sync
            .sync(
                vec![chunk("doc1", 0, "doc one, chunk zero text")],
                GROUP,
                SyncPolicy::Incremental,
                false,
            )
            .await
            .unwrap();

        assert_eq!(stats.num_skipped, 1);
        assert_eq!(stats.num_deleted, 1);
        assert!(!sync.destination().contains(&chunk_key("doc1", 1)));
        // Absent sources are untouched under incremental cleanup.
        assert!(sync.destination().contains(&chunk_key("doc2", 0)));
    }

    #[tokio::test]
    async fn test_full_cleanup_end_to_end_scenario() {
        let sync = fixture();
        let batch = two_doc_batch();

        let first = sync
            .sync(batch.clone(), GROUP, SyncPolicy::Full, false)
            .await
            .unwrap();
        assert_eq!(
            first,
            SyncStats {
                num_added: 2,
                ..Default::default()
            }
        );

        let second = sync
            .sync(batch.clone(), GROUP, SyncPolicy::Full, false)
            .await
            .unwrap();
        assert_eq!(
            second,
            SyncStats {
                num_skipped: 2,
                ..Default::default()
            }
        );

        // doc2 disappears from the (full-coverage) corpus.
        let third = sync
            .sync(vec![batch[0].clone()], GROUP, SyncPolicy::Full, false)
            .await
            .unwrap();
        assert_eq!(
            third,
            SyncStats {
                num_skipped: 1,
                num_deleted: 1,
                ..Default::default()
            }
        );

        let doc2_key = chunk_key("doc2", 0);
        assert!(!sync.destination().contains(&doc2_key));
        assert!(sync
            .records()
            .get(GROUP, &[doc2_key])
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_empty_batch_under_full_wipes_group() {
        let sync = fixture();

        sync.sync(two_doc_batch(), GROUP, SyncPolicy::Full, false)
            .await
            .unwrap();

        let stats = sync
            .sync(Vec::new(), GROUP, SyncPolicy::Full, false)
            .await
            .unwrap();

        assert_eq!(stats.num_deleted, 2);
        assert!(sync.destination().is_empty());
        assert_eq!(sync.records().count(GROUP), 0);
    }

    #[tokio::test]
    async fn test_wipe_hook_can_decline_empty_full_cleanup() {
        let sync = fixture().on_full_wipe(Box::new(|_group| false));

        sync.sync(two_doc_batch(), GROUP, SyncPolicy::Full, false)
            .await
            .unwrap();

        let stats = sync
            .sync(Vec::new(), GROUP, SyncPolicy::Full, false)
            .await
            .unwrap();

        assert_eq!(stats, SyncStats::default());
        assert_eq!(sync.destination().len(), 2);
    }

    #[tokio::test]
    async fn test_short_chunks_are_discarded() {
        let sync = fixture();

        let stats = sync
            .sync(
                vec![
                    chunk("doc1", 0, "ok"),
                    chunk("doc1", 1, "long enough to be worth indexing"),
                ],
                GROUP,
                SyncPolicy::None,
                false,
            )
            .await
            .unwrap();

        assert_eq!(stats.num_added, 1);
        assert!(!sync.destination().contains(&chunk_key("doc1", 0)));
    }

    #[tokio::test]
    async fn test_metadata_is_normalized_before_upsert() {
        let sync = fixture();
        let key = chunk_key("doc1", 0);

        sync.sync(
            vec![chunk("doc1", 0, "content without any metadata")],
            GROUP,
            SyncPolicy::None,
            false,
        )
        .await
        .unwrap();

        let entry = sync.destination().get(&key).unwrap();
        assert_eq!(entry.metadata["source"], Value::String(String::new()));
        assert_eq!(entry.metadata["title"], Value::String(String::new()));
    }

    #[tokio::test]
    async fn test_writes_are_sliced_by_batch_size() {
        let config = SyncConfig {
            batch_size: 2,
            ..Default::default()
        };
        let sync = Synchronizer::new(MemoryRecordStore::new(), MemoryIndex::new(), config);

        let batch: Vec<DocumentChunk> = (0..5)
            .map(|i| chunk("doc1", i, &format!("chunk number {} body text", i)))
            .collect();
        let stats = sync.sync(batch, GROUP, SyncPolicy::None, false).await.unwrap();

        assert_eq!(stats.num_added, 5);
        assert_eq!(sync.destination().upsert_calls(), 3);
    }

    #[tokio::test]
    async fn test_full_cleanup_against_sqlite_ledger() {
        use crate::record::SqliteRecordStore;
        use tempfile::TempDir;

        let tmp = TempDir::new().unwrap();
        let records = SqliteRecordStore::new(&tmp.path().join("records.db"))
            .await
            .unwrap();
        let sync = Synchronizer::new(records, MemoryIndex::new(), SyncConfig::default());

        sync.sync(two_doc_batch(), GROUP, SyncPolicy::Full, false)
            .await
            .unwrap();
        let stats = sync
            .sync(
                vec![two_doc_batch().remove(0)],
                GROUP,
                SyncPolicy::Full,
                false,
            )
            .await
            .unwrap();

        assert_eq!(stats.num_skipped, 1);
        assert_eq!(stats.num_deleted, 1);
        assert_eq!(sync.records().count(GROUP).await.unwrap(), 1);
        assert_eq!(sync.destination().len(), 1);
    }

    #[tokio::test]
    async fn test_disjoint_groups_do_not_interfere() {
        let sync = fixture();

        sync.sync(two_doc_batch(), "group-a", SyncPolicy::Full, false)
            .await
            .unwrap();
        sync.sync(
            vec![chunk("doc3", 0, "content for the other group")],
            "group-b",
            SyncPolicy::Full,
            false,
        )
        .await
        .unwrap();

        // Full cleanup in one group never reaches into the other.
        assert_eq!(sync.records().count("group-a"), 2);
        assert_eq!(sync.records().count("group-b"), 1);
    }
}
