// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Hybrid batching for ingested updates.
//!
//! The [`HybridBatcher`] collects updates and hands them back in batches
//! once a threshold is hit: item count, total bytes, or elapsed time,
//! whichever comes first. Count beats size on a simultaneous hit.
//!
//! # Example
//!
//! ```
//! use gamehub_sync::batching::{HybridBatcher, BatchConfig, SizedItem};
//!
//! struct Update(String);
//! impl SizedItem for Update {
//!     fn size_bytes(&self) -> usize { self.0.len() }
//! }
//!
//! let mut batcher = HybridBatcher::new(BatchConfig {
//!     flush_count: 10,
//!     flush_bytes: 1024,
//!     flush_ms: 100,
//! });
//!
//! assert!(batcher.push(Update("hello".into())).is_none());
//! assert_eq!(batcher.len(), 1);
//! ```

use std::time::{Duration, Instant};
use tracing::debug;

/// Items that know their own approximate size.
pub trait SizedItem {
    #[must_use]
    fn size_bytes(&self) -> usize;
}

/// What triggered a batch flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushReason {
    /// Item count threshold reached
    Count,
    /// Byte size threshold reached
    Size,
    /// Time threshold reached
    Time,
    /// Caller-requested flush
    Manual,
    /// Final flush during shutdown
    Shutdown,
}

impl std::fmt::Display for FlushReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Count => write!(f, "count"),
            Self::Size => write!(f, "size"),
            Self::Time => write!(f, "time"),
            Self::Manual => write!(f, "manual"),
            Self::Shutdown => write!(f, "shutdown"),
        }
    }
}

/// Flush thresholds.
#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Flush after this many items
    pub flush_count: usize,
    /// Flush after this many bytes
    pub flush_bytes: usize,
    /// Flush after this many milliseconds, even if the batch is small
    pub flush_ms: u64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            flush_count: 50,
            flush_bytes: 1024 * 1024, // 1 MB
            flush_ms: 5000,
        }
    }
}

/// A batch handed back to the caller for flushing.
#[derive(Debug)]
pub struct FlushBatch<T> {
    pub items: Vec<T>,
    pub total_bytes: usize,
    pub reason: FlushReason,
}

/// Collects items and reports when a flush threshold is crossed.
///
/// The batcher never flushes on its own; `push` and `take_if_ready` report
/// readiness and the owner drives the actual flush. The time threshold is
/// measured from the first item after the previous flush.
pub struct HybridBatcher<T> {
    config: BatchConfig,
    items: Vec<T>,
    total_bytes: usize,
    opened_at: Instant,
}

impl<T: SizedItem> HybridBatcher<T> {
    pub fn new(config: BatchConfig) -> Self {
        Self {
            config,
            items: Vec::new(),
            total_bytes: 0,
            opened_at: Instant::now(),
        }
    }

    /// Add an item; returns the flush reason if a threshold was crossed.
    pub fn push(&mut self, item: T) -> Option<FlushReason> {
        if self.items.is_empty() {
            self.opened_at = Instant::now();
        }
        self.total_bytes += item.size_bytes();
        self.items.push(item);

        if self.items.len() >= self.config.flush_count {
            Some(FlushReason::Count)
        } else if self.total_bytes >= self.config.flush_bytes {
            Some(FlushReason::Size)
        } else {
            None
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    #[must_use]
    pub fn pending_bytes(&self) -> usize {
        self.total_bytes
    }

    /// Whether the oldest pending item has waited past the time threshold.
    #[must_use]
    pub fn time_threshold_reached(&self) -> bool {
        !self.items.is_empty()
            && self.opened_at.elapsed() >= Duration::from_millis(self.config.flush_ms)
    }

    /// Take the batch if any threshold (count, size, or time) is ready.
    pub fn take_if_ready(&mut self) -> Option<FlushBatch<T>> {
        let reason = if self.items.len() >= self.config.flush_count {
            FlushReason::Count
        } else if self.total_bytes >= self.config.flush_bytes {
            FlushReason::Size
        } else if self.time_threshold_reached() {
            FlushReason::Time
        } else {
            return None;
        };
        self.take(reason)
    }

    /// Take whatever is pending regardless of thresholds.
    pub fn force_flush(&mut self, reason: FlushReason) -> Option<FlushBatch<T>> {
        self.take(reason)
    }

    fn take(&mut self, reason: FlushReason) -> Option<FlushBatch<T>> {
        if self.items.is_empty() {
            return None;
        }
        let total_bytes = std::mem::take(&mut self.total_bytes);
        let items = std::mem::take(&mut self.items);
        self.opened_at = Instant::now();
        debug!(count = items.len(), bytes = total_bytes, %reason, "batch taken for flush");
        Some(FlushBatch { items, total_bytes, reason })
    }
}
