//! Aggregation of raw play events into per-identity records.
//!
//! Events are grouped by the source-side key (never collaborator-split).
//! The fold is deterministic for any permutation of the event list: timestamp
//! multisets and loved flags do not depend on input order; only the retained
//! display strings are first-seen-wins.

use rustc_hash::FxHashSet;

use crate::models::{AggregatedIdentity, AggregatedMap, PlayEvent};
use crate::normalize::{normalize, KeyBuilder};

/// Fold a flat event list into one `AggregatedIdentity` per normalized key.
///
/// Events with an empty artist or title after normalization are malformed;
/// they are skipped and counted, never aborting the batch.
pub fn aggregate(
    events: &[PlayEvent],
    album_aware: bool,
    keys: &KeyBuilder,
    malformed: &mut usize,
) -> AggregatedMap {
    let mut aggregated = AggregatedMap::default();

    for event in events {
        if normalize(&event.artist).is_empty() || normalize(&event.title).is_empty() {
            *malformed += 1;
            continue;
        }
        let key = keys.source_key(&event.artist, &event.title, event.album.as_deref(), album_aware);
        let entry = aggregated
            .entry(key)
            .or_insert_with(|| AggregatedIdentity {
                timestamps: Vec::new(),
                loved: false,
                artist: event.artist.clone(),
                title: event.title.clone(),
                album: event.album.clone().unwrap_or_default(),
            });
        entry.timestamps.push(event.timestamp);
        if event.loved {
            entry.loved = true;
        }
    }

    aggregated
}

/// The (artist, title) pairs for which the source has at least one
/// album-specific variant. The resolver uses this to decide when an
/// album-aware miss may fall back to an album-agnostic identity.
pub fn album_specific_pairs(aggregated: &AggregatedMap) -> FxHashSet<(String, String)> {
    aggregated
        .keys()
        .filter(|k| k.album.as_deref().is_some_and(|a| !a.is_empty()))
        .map(|k| (k.artist.clone(), k.title.clone()))
        .collect()
}

// ============================================================================
// TESTS
// ============================================================================
