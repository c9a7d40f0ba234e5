//! vecsync - incremental synchronization between a chunked document corpus
//! and a vector index
//!
//! This crate provides:
//! - A reconciliation core that computes the minimal set of upserts and
//!   deletes for a batch of content chunks (never re-writing unchanged
//!   content, replacing changed content exactly once, removing content that
//!   disappeared from the source)
//! - A durable SQLite record store tracking what has been indexed
//! - A Qdrant destination adapter, plus in-memory fakes of both stores for
//!   isolated testing
//!
//! Fetching documents, splitting them into chunks, and computing embedding
//! vectors are external collaborators; see [`embed::Embedder`] for the
//! vector seam.

pub mod config;
pub mod dest;
pub mod embed;
pub mod error;
pub mod hash;
pub mod models;
pub mod record;
pub mod sync;

pub use config::SyncConfig;
pub use dest::{DestinationIndex, MemoryIndex, QdrantIndex};
pub use error::{Error, Result};
pub use models::{DocumentChunk, IndexEntry, RecordEntry, SyncPolicy, SyncStats};
pub use record::{MemoryRecordStore, RecordStore, SqliteRecordStore};
pub use sync::Synchronizer;
