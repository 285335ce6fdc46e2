// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Cache backing-store abstraction.
//!
//! The cache layer talks to its backing store only through [`CacheStore`],
//! so the in-process [`MemoryStore`] and any external keyed store are
//! interchangeable. The key space is flat with last-write-wins semantics
//! per key; no cross-key transactions.

use super::entry::{CacheEntry, EntryMeta};
use super::key::glob_match;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("cache backend error: {0}")]
    Backend(String),
}

#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, StoreError>;

    async fn put(&self, entry: CacheEntry) -> Result<(), StoreError>;

    /// Remove a key; returns whether it existed.
    async fn delete(&self, key: &str) -> Result<bool, StoreError>;

    /// Keys matching a glob pattern.
    async fn keys(&self, pattern: &str) -> Result<Vec<String>, StoreError>;

    /// Metadata snapshot of every entry, for sweep and eviction passes.
    async fn scan_meta(&self) -> Result<Vec<EntryMeta>, StoreError>;

    /// Total payload bytes currently held.
    async fn memory_used(&self) -> Result<usize, StoreError>;

    /// Liveness probe.
    async fn ping(&self) -> Result<(), StoreError>;
}

/// In-process backing store over a concurrent map.
pub struct MemoryStore {
    data: DashMap<String, CacheEntry>,
    bytes: AtomicUsize,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self { data: DashMap::new(), bytes: AtomicUsize::new(0) }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, StoreError> {
        Ok(self.data.get(key).map(|r| r.value().clone()))
    }

    async fn put(&self, entry: CacheEntry) -> Result<(), StoreError> {
        let added = entry.size_bytes;
        if let Some(old) = self.data.insert(entry.key.clone(), entry) {
            self.bytes.fetch_sub(old.size_bytes, Ordering::Relaxed);
        }
        self.bytes.fetch_add(added, Ordering::Relaxed);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        match self.data.remove(key) {
            Some((_, old)) => {
                self.bytes.fetch_sub(old.size_bytes, Ordering::Relaxed);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        Ok(self
            .data
            .iter()
            .filter(|e| glob_match(pattern, e.key()))
            .map(|e| e.key().clone())
            .collect())
    }

    async fn scan_meta(&self) -> Result<Vec<EntryMeta>, StoreError> {
        Ok(self.data.iter().map(|e| EntryMeta::from(e.value())).collect())
    }

    async fn memory_used(&self) -> Result<usize, StoreError> {
        Ok(self.bytes.load(Ordering::Relaxed))
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
