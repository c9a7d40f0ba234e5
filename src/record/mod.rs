//! Record store: durable bookkeeping for indexed keys
//!
//! One row per (group, key) carrying the content hash, source identifier,
//! and a store-assigned timestamp. The synchronizer classifies against this
//! ledger and the cleanup phase scans it for stale keys. Timestamps are
//! assigned here, not by the caller, so caller clock skew cannot corrupt
//! staleness decisions.

mod memory;
mod schema;

pub use memory::MemoryRecordStore;
pub use schema::*;

use crate::error::{Error, Result};
use crate::models::RecordEntry;
use async_trait::async_trait;
use chrono::{DateTime, Duration, SecondsFormat, SubsecRound, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::FromRow;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

/// Upper bound on bind parameters per SQLite statement
const MAX_BINDS: usize = 500;

/// Contract for the durable key ledger, scoped by group
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// The store's own clock. Strictly increasing across calls and writes,
    /// so a start-of-run watermark taken here cleanly separates entries
    /// touched by the current run from stale ones.
    async fn current_time(&self) -> Result<DateTime<Utc>>;

    /// Fetch existing entries for the given keys. Missing keys are simply
    /// absent from the result, not an error.
    async fn get(&self, group_id: &str, keys: &[Uuid]) -> Result<HashMap<Uuid, RecordEntry>>;

    /// Insert or overwrite entries; last write for a key wins. The store
    /// assigns a fresh `updated_at` to every written entry (the value on the
    /// way in is ignored), which makes this double as the "touch" operation.
    /// Idempotent: replaying the same arguments after a crash is safe.
    async fn upsert(&self, entries: &[RecordEntry]) -> Result<()>;

    /// List keys in the group whose `updated_at` is older than `before`,
    /// optionally restricted to the given source identifiers.
    async fn list_keys(
        &self,
        group_id: &str,
        source_ids: Option<&[String]>,
        before: DateTime<Utc>,
    ) -> Result<Vec<Uuid>>;

    /// Delete entries by key
    async fn delete(&self, group_id: &str, keys: &[Uuid]) -> Result<()>;
}

/// Strictly increasing clock at microsecond resolution.
///
/// Successive `now()` calls never return equal instants, so a watermark
/// taken between two runs can never tie with a write from either run.
pub(crate) struct MonotonicClock {
    last: Mutex<DateTime<Utc>>,
}

impl MonotonicClock {
    pub(crate) fn new() -> Self {
        Self {
            last: Mutex::new(DateTime::<Utc>::MIN_UTC),
        }
    }

    pub(crate) fn now(&self) -> DateTime<Utc> {
        let mut last = self.last.lock().unwrap();
        // Truncated to microseconds so the value survives a round-trip
        // through the RFC 3339 column format unchanged.
        let mut now = Utc::now().trunc_subsecs(6);
        if now <= *last {
            now = *last + Duration::microseconds(1);
        }
        *last = now;
        now
    }
}

/// Fixed-width RFC 3339 rendering; lexicographic order equals chronological
pub(crate) fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Other(format!("Corrupt record timestamp '{}': {}", raw, e)))
}

#[derive(Debug, FromRow)]
struct RecordRow {
    key: String,
    group_id: String,
    source_id: String,
    content_hash: String,
    updated_at: String,
}

impl RecordRow {
    fn into_entry(self) -> Result<RecordEntry> {
        Ok(RecordEntry {
            key: Uuid::try_parse(&self.key)
                .map_err(|e| Error::Other(format!("Corrupt record key '{}': {}", self.key, e)))?,
            group_id: self.group_id,
            source_id: self.source_id,
            content_hash: self.content_hash,
            updated_at: parse_timestamp(&self.updated_at)?,
        })
    }
}

/// SQLite-backed record store
pub struct SqliteRecordStore {
    pool: SqlitePool,
    clock: MonotonicClock,
}

impl SqliteRecordStore {
    /// Open (or create) the record database at the given path
    pub async fn new(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal);

        debug!("Connecting to SQLite record database at {:?}", db_path);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let store = Self {
            pool,
            clock: MonotonicClock::new(),
        };
        store.init_schema().await?;

        Ok(store)
    }

    /// Initialize the database schema
    pub async fn init_schema(&self) -> Result<()> {
        info!("Initializing record store schema");
        sqlx::query(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }

    /// Count entries in a group (diagnostics and tests)
    pub async fn count(&self, group_id: &str) -> Result<usize> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sync_records WHERE group_id = ?")
            .bind(group_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count as usize)
    }
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    async fn current_time(&self) -> Result<DateTime<Utc>> {
        Ok(self.clock.now())
    }

    async fn get(&self, group_id: &str, keys: &[Uuid]) -> Result<HashMap<Uuid, RecordEntry>> {
        let mut found = HashMap::with_capacity(keys.len());

        for batch in keys.chunks(MAX_BINDS) {
            let placeholders = batch.iter().map(|_| "?").collect::<Vec<_>>().join(",");
            let query = format!(
                "SELECT * FROM sync_records WHERE group_id = ? AND key IN ({})",
                placeholders
            );

            let mut query_builder = sqlx::query_as::<_, RecordRow>(&query).bind(group_id);
            for key in batch {
                query_builder = query_builder.bind(key.to_string());
            }

            let rows = query_builder.fetch_all(&self.pool).await?;
            for row in rows {
                let entry = row.into_entry()?;
                found.insert(entry.key, entry);
            }
        }

        Ok(found)
    }

    async fn upsert(&self, entries: &[RecordEntry]) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }

        debug!("Upserting {} record entries", entries.len());

        let mut tx = self.pool.begin().await?;
        for entry in entries {
            let updated_at = format_timestamp(self.clock.now());
            sqlx::query(
                r#"
                INSERT INTO sync_records (key, group_id, source_id, content_hash, updated_at)
                VALUES (?, ?, ?, ?, ?)
                ON CONFLICT(group_id, key) DO UPDATE SET
                    source_id = excluded.source_id,
                    content_hash = excluded.content_hash,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(entry.key.to_string())
            .bind(&entry.group_id)
            .bind(&entry.source_id)
            .bind(&entry.content_hash)
            .bind(updated_at)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        Ok(())
    }

    async fn list_keys(
        &self,
        group_id: &str,
        source_ids: Option<&[String]>,
        before: DateTime<Utc>,
    ) -> Result<Vec<Uuid>> {
        let before = format_timestamp(before);

        let raw_keys: Vec<String> = match source_ids {
            None => {
                sqlx::query_scalar(
                    "SELECT key FROM sync_records WHERE group_id = ? AND updated_at < ?",
                )
                .bind(group_id)
                .bind(&before)
                .fetch_all(&self.pool)
                .await?
            }
            Some(sources) => {
                let mut keys = Vec::new();
                for batch in sources.chunks(MAX_BINDS) {
                    let placeholders = batch.iter().map(|_| "?").collect::<Vec<_>>().join(",");
                    let query = format!(
                        "SELECT key FROM sync_records WHERE group_id = ? AND updated_at < ? AND source_id IN ({})",
                        placeholders
                    );

                    let mut query_builder =
                        sqlx::query_scalar::<_, String>(&query).bind(group_id).bind(&before);
                    for source in batch {
                        query_builder = query_builder.bind(source);
                    }

                    keys.extend(query_builder.fetch_all(&self.pool).await?);
                }
                keys
            }
        };

        raw_keys
            .iter()
            .map(|raw| {
                Uuid::try_parse(raw)
                    .map_err(|e| Error::Other(format!("Corrupt record key '{}': {}", raw, e)))
            })
            .collect()
    }

    async fn delete(&self, group_id: &str, keys: &[Uuid]) -> Result<()> {
        if keys.is_empty() {
            return Ok(());
        }

        debug!("Deleting {} record entries", keys.len());

        for batch in keys.chunks(MAX_BINDS) {
            let placeholders = batch.iter().map(|_| "?").collect::<Vec<_>>().join(",");
            let query = format!(
                "DELETE FROM sync_records WHERE group_id = ? AND key IN ({})",
                placeholders
            );

            let mut query_builder = sqlx::query(&query).bind(group_id);
            for key in batch {
                query_builder = query_builder.bind(key.to_string());
            }
            query_builder.execute(&self.pool).await?;
        }

        Ok(())
    }
}
