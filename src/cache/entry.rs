// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use serde::{Deserialize, Serialize};

/// A single cached value with its access bookkeeping.
///
/// Timestamps are epoch milliseconds. `size_bytes` is the stored payload
/// size, after compression if the value was compressed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub value: Vec<u8>,
    pub ttl_secs: u64,
    pub created_at: u64,
    pub last_accessed: u64,
    pub access_count: u64,
    pub compressed: bool,
    pub size_bytes: usize,
}

impl CacheEntry {
    pub fn new(key: impl Into<String>, value: Vec<u8>, ttl_secs: u64, compressed: bool) -> Self {
        let now = crate::epoch_millis();
        let size_bytes = value.len();
        Self {
            key: key.into(),
            value,
            ttl_secs,
            created_at: now,
            last_accessed: now,
            access_count: 0,
            compressed,
            size_bytes,
        }
    }

    /// Whether the entry's TTL has lapsed as of `now_ms`.
    #[must_use]
    pub fn is_expired(&self, now_ms: u64) -> bool {
        now_ms.saturating_sub(self.created_at) >= self.ttl_secs * 1000
    }

    /// Refresh access bookkeeping on a hit.
    pub fn touch(&mut self, now_ms: u64) {
        self.last_accessed = now_ms;
        self.access_count += 1;
    }
}

/// Lightweight per-entry metadata for sweep and eviction passes.
#[derive(Debug, Clone)]
pub struct EntryMeta {
    pub key: String,
    pub created_at: u64,
    pub ttl_secs: u64,
    pub last_accessed: u64,
    pub access_count: u64,
    pub size_bytes: usize,
}

impl EntryMeta {
    #[must_use]
    pub fn is_expired(&self, now_ms: u64) -> bool {
        now_ms.saturating_sub(self.created_at) >= self.ttl_secs * 1000
    }
}

impl From<&CacheEntry> for EntryMeta {
    fn from(entry: &CacheEntry) -> Self {
        Self {
            key: entry.key.clone(),
            created_at: entry.created_at,
            ttl_secs: entry.ttl_secs,
            last_accessed: entry.last_accessed,
            access_count: entry.access_count,
            size_bytes: entry.size_bytes,
        }
    }
}
