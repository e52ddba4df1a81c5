// src/dedup.rs
//! At-most-once publication guard: exact-match content hashes plus a
//! per-source-item consumption set. Both checks run before any external
//! call so a guaranteed-rejected post never burns a generator request or a
//! quota slot.

use sha2::{Digest, Sha256};
use std::collections::HashSet;
use tracing::debug;

/// Normalize content before hashing: trim, lowercase, collapse whitespace.
pub fn normalize_content(content: &str) -> String {
    content
        .trim()
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Hex SHA-256 of the normalized content. Only needs to catch accidental
/// exact re-generation, not adversarial collisions.
pub fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize_content(content).as_bytes());
    let digest = hasher.finalize();
    let mut out = String::with_capacity(64);
    for b in digest.iter() {
        use std::fmt::Write as _;
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}

#[derive(Debug, Default)]
pub struct DuplicateGuard {
    hashes: HashSet<String>,
    source_ids: HashSet<i64>,
}

impl DuplicateGuard {
    pub fn new(hashes: HashSet<String>, source_ids: HashSet<i64>) -> Self {
        Self { hashes, source_ids }
    }

    /// True if content with the same normalized hash was ever published.
    pub fn is_duplicate(&self, content: &str) -> bool {
        let hash = content_hash(content);
        let dup = self.hashes.contains(&hash);
        if dup {
            debug!(target: "dedup", %hash, "duplicate content hash");
        }
        dup
    }

    /// True if this news item already produced a published post.
    pub fn is_source_consumed(&self, source_id: i64) -> bool {
        let consumed = self.source_ids.contains(&source_id);
        if consumed {
            debug!(target: "dedup", source_id, "source item already consumed");
        }
        consumed
    }

    /// Record a successful publish. Call only after the channel accepted the
    /// post; the caller persists the snapshot afterwards.
    pub fn mark_published(&mut self, content: &str, source_id: Option<i64>) {
        self.hashes.insert(content_hash(content));
        if let Some(id) = source_id {
            self.source_ids.insert(id);
            debug!(target: "dedup", source_id = id, "source item consumed");
        }
    }

    pub fn hashes(&self) -> &HashSet<String> {
        &self.hashes
    }

    pub fn source_ids(&self) -> &HashSet<i64> {
        &self.source_ids
    }
}
