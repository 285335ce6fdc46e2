// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Hybrid batching for update ingestion.

pub mod hybrid_batcher;

pub use hybrid_batcher::{BatchConfig, FlushBatch, FlushReason, HybridBatcher, SizedItem};
