//! Configuration for the synchronizer
//!
//! Runtime toggles (force update, cleanup policy) are conventionally read
//! from process environment once per run, never per document.

use crate::error::Result;
use crate::models::SyncPolicy;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Synchronizer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Maximum entries per destination or record-store write batch.
    /// The destination may impose its own batch-size limits, so the
    /// synchronizer never assumes an unbounded single call.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Chunks whose content is at or below this length are discarded before
    /// reconciliation; they add no retrieval value and waste destination
    /// storage.
    #[serde(default = "default_min_content_chars")]
    pub min_content_chars: usize,
}

fn default_batch_size() -> usize {
    100
}

fn default_min_content_chars() -> usize {
    10
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            min_content_chars: default_min_content_chars(),
        }
    }
}

/// Read a boolean toggle from the environment.
///
/// Unset or unparseable values are false; matching is case-insensitive on
/// "true". Read once per run by the caller, not per document.
pub fn env_flag(name: &str) -> bool {
    let value = std::env::var(name).unwrap_or_default();
    let enabled = value.to_lowercase() == "true";
    debug!(name, value = %value, enabled, "Read environment flag");
    enabled
}

/// Read the cleanup policy from the environment, defaulting when unset
pub fn policy_from_env(name: &str, default: SyncPolicy) -> Result<SyncPolicy> {
    match std::env::var(name) {
        Ok(value) if !value.trim().is_empty() => value.trim().parse(),
        _ => Ok(default),
    }
}
