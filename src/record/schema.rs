//! SQLite schema definition

/// SQL schema for the record database
pub const SCHEMA_SQL: &str = r#"
-- Sync records: one bookkeeping row per indexed key within a group
CREATE TABLE IF NOT EXISTS sync_records (
    key TEXT NOT NULL,
    group_id TEXT NOT NULL,
    source_id TEXT NOT NULL,
    content_hash TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (group_id, key)
);

-- Indexes for cleanup scans
CREATE INDEX IF NOT EXISTS idx_records_group_source ON sync_records(group_id, source_id);
CREATE INDEX IF NOT EXISTS idx_records_group_updated ON sync_records(group_id, updated_at);
"#;
