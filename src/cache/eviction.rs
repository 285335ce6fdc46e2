// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Memory-pressure eviction.
//!
//! When the backing store exceeds its memory limit, the coldest quartile
//! of entries is evicted: lowest access count first, ties broken by least
//! recently accessed.

use super::entry::EntryMeta;

/// Keys to evict under memory pressure: the coldest quarter of all
/// entries, at least one when any exist.
#[must_use]
pub fn eviction_candidates(metas: &[EntryMeta]) -> Vec<String> {
    if metas.is_empty() {
        return Vec::new();
    }

    let mut sorted: Vec<&EntryMeta> = metas.iter().collect();
    sorted.sort_by_key(|m| (m.access_count, m.last_accessed));

    let take = (metas.len() + 3) / 4;
    sorted.into_iter().take(take.max(1)).map(|m| m.key.clone()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(key: &str, access_count: u64, last_accessed: u64) -> EntryMeta {
        EntryMeta {
            key: key.into(),
            created_at: 0,
            ttl_secs: 60,
            last_accessed,
            access_count,
            size_bytes: 1,
        }
    }

    #[test]
    fn test_empty_yields_nothing() {
        assert!(eviction_candidates(&[]).is_empty());
    }

    #[test]
    fn test_single_entry_is_evicted() {
        let candidates = eviction_candidates(&[meta("only", 100, 100)]);
        assert_eq!(candidates, vec!["only"]);
    }

    #[test]
    fn test_coldest_quartile_selected() {
        let metas: Vec<EntryMeta> =
            (0..8).map(|i| meta(&format!("k{i}"), i as u64, 1000)).collect();

        let candidates = eviction_candidates(&metas);
        // 8 entries, quartile of 2, lowest access counts first.
        assert_eq!(candidates, vec!["k0", "k1"]);
    }

    #[test]
    fn test_quartile_rounds_up() {
        let metas: Vec<EntryMeta> =
            (0..5).map(|i| meta(&format!("k{i}"), i as u64, 1000)).collect();

        // ceil(5/4) = 2
        assert_eq!(eviction_candidates(&metas).len(), 2);
    }

    #[test]
    fn test_ties_broken_by_recency() {
        let metas = vec![
            meta("recent", 1, 2000),
            meta("stale", 1, 100),
            meta("hot-a", 50, 1000),
            meta("hot-b", 60, 1000),
            meta("hot-c", 70, 1000),
            meta("hot-d", 80, 1000),
            meta("hot-e", 90, 1000),
            meta("hot-f", 95, 1000),
        ];

        let candidates = eviction_candidates(&metas);
        assert_eq!(candidates, vec!["stale", "recent"]);
    }
}
