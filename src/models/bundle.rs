//! Represents a cached, pre-rendered bundle artifact.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Metadata row for a generated bundle artifact.
///
/// One row per cache key (the hash of a client fingerprint). The artifact
/// file itself lives on disk under a content-addressed name; regeneration
/// writes a new file and swaps `file_url`, never overwriting a served one.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Bundle {
    pub cache_key: String,
    pub file_url: String,
    pub content_hash: String,
    pub generated_at: DateTime<Utc>,
}
