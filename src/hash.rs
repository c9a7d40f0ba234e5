//! Deterministic content fingerprints and key derivation
//!
//! Two calls with byte-identical content yield identical hashes, and the key
//! for a chunk depends only on its source identifier and ordinal. That
//! determinism is what makes the whole reconciliation idempotent and safe to
//! re-run after a partial failure.

use crate::models::DocumentChunk;
use blake3::Hasher;
use uuid::Uuid;

/// Compute a stable hash for raw content
pub fn compute_content_hash(content: &[u8]) -> String {
    let mut hasher = Hasher::new();
    hasher.update(content);
    hasher.finalize().to_hex().to_string()
}

/// Derive the stable key for a chunk position within a source.
///
/// UUID v5 over the NUL-separated source/ordinal pair: the same source can
/// contribute many independently versioned keys, and sources whose
/// identifiers share a prefix cannot collide.
pub fn chunk_key(source_id: &str, chunk_index: u32) -> Uuid {
    let mut name = Vec::with_capacity(source_id.len() + 11);
    name.extend_from_slice(source_id.as_bytes());
    name.push(0);
    name.extend_from_slice(chunk_index.to_string().as_bytes());
    Uuid::new_v5(&Uuid::NAMESPACE_OID, &name)
}

/// Compute the (key, hash) pair the synchronizer reconciles on
pub fn key_and_hash(chunk: &DocumentChunk) -> (Uuid, String) {
    (
        chunk_key(&chunk.source_id, chunk.chunk_index),
        compute_content_hash(chunk.content.as_bytes()),
    )
}
