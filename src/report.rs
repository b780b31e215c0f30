//! End-of-run reports for external serialization.
//!
//! Missing identities (source plays with no library correspondence) are
//! grouped artist -> album -> track; duplicate groups are listed flat for
//! audit. Both serialize to JSON with serde.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rustc_hash::FxHashSet;
use serde::Serialize;

use crate::models::{AggregatedIdentity, AggregatedMap, IdentityKey, TargetItem};

/// artist -> album -> tracks, ordered for stable output.
pub type MissingReport = BTreeMap<String, BTreeMap<String, Vec<MissingTrack>>>;

#[derive(Clone, Debug, Serialize)]
pub struct MissingTrack {
    pub track: String,
    pub scrobbled: u32,
    pub loved: bool,
    pub lastplayed: String,
}

/// Format a unix timestamp the way the reports and the library store expect.
pub fn format_timestamp(ts: i64) -> String {
    DateTime::<Utc>::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_default()
}

/// Build the missing and missing-loved reports from the aggregated map and
/// the set of identity keys some target item resolved to.
pub fn missing_reports(
    aggregated: &AggregatedMap,
    resolved: &FxHashSet<IdentityKey>,
) -> (MissingReport, MissingReport) {
    let mut missing: MissingReport = BTreeMap::new();
    let mut missing_loved: MissingReport = BTreeMap::new();

    for (key, identity) in aggregated {
        if resolved.contains(key) {
            continue;
        }
        let entry = MissingTrack {
            track: identity.title.clone(),
            scrobbled: identity.play_count(),
            loved: identity.loved,
            lastplayed: identity.last_played().map(format_timestamp).unwrap_or_default(),
        };
        missing
            .entry(identity.artist.clone())
            .or_default()
            .entry(identity.album.clone())
            .or_default()
            .push(entry.clone());
        if identity.loved {
            missing_loved
                .entry(identity.artist.clone())
                .or_default()
                .entry(identity.album.clone())
                .or_default()
                .push(entry);
        }
    }

    // Stable track ordering inside each album bucket.
    for albums in missing.values_mut().chain(missing_loved.values_mut()) {
        for tracks in albums.values_mut() {
            tracks.sort_by(|a, b| a.track.cmp(&b.track));
        }
    }

    (missing, missing_loved)
}

// ============================================================================
// Duplicates report
// ============================================================================

#[derive(Clone, Debug, Serialize)]
pub struct DuplicateGroupReport {
    pub source_artist: String,
    pub source_title: String,
    pub source_album: Option<String>,
    pub play_count: u32,
    pub items: Vec<DuplicateItemReport>,
}

#[derive(Clone, Debug, Serialize)]
pub struct DuplicateItemReport {
    pub id: String,
    pub artist: String,
    pub title: String,
    pub album: Option<String>,
}

impl DuplicateGroupReport {
    pub fn new(identity: &AggregatedIdentity, items: &[&TargetItem]) -> Self {
        Self {
            source_artist: identity.artist.clone(),
            source_title: identity.title.clone(),
            source_album: if identity.album.is_empty() {
                None
            } else {
                Some(identity.album.clone())
            },
            play_count: identity.play_count(),
            items: items
                .iter()
                .map(|t| DuplicateItemReport {
                    id: t.id.clone(),
                    artist: t.artist.clone(),
                    title: t.title.clone(),
                    album: t.album.clone(),
                })
                .collect(),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
