//! Match resolution state machine.
//!
//! Per target item: exact-key lookup, then memoized-acceptance lookup, then
//! fuzzy candidates gated by the skip-record superset check, then a human
//! decision. Human decisions go through the `DecisionProvider` trait so the
//! state machine runs unchanged under a scripted provider in tests and a
//! terminal provider in the binary.

use anyhow::Result;
use rustc_hash::FxHashSet;

use crate::cache::DecisionCache;
use crate::config::SyncConfig;
use crate::fuzzy::find_candidates;
use crate::models::{
    AggregatedIdentity, AggregatedMap, MatchCandidate, MatchOutcome, SyncStats, TargetItem,
};
use crate::normalize::KeyBuilder;

/// Which side's play count to keep when the library count is higher.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CountSide {
    Local,
    Source,
}

/// User's answer for a duplicate group.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DuplicateChoice {
    /// Every item in the group receives the full count.
    All,
    /// Exactly the item at this group index receives the full count.
    Single(usize),
    /// Divide the count across the group by album evidence.
    Divide,
    /// Leave the whole group untouched this run.
    Skip,
}

/// Capability for human-in-the-loop decisions. The core state machines only
/// see this trait; presentation lives elsewhere.
pub trait DecisionProvider {
    /// Pick a fuzzy candidate for a target item, or `None` for "none match".
    fn choose_match(
        &mut self,
        target: &TargetItem,
        candidates: &[MatchCandidate],
    ) -> Option<usize>;

    /// Decide how a duplicate group's count is distributed.
    fn choose_duplicate(
        &mut self,
        identity: &AggregatedIdentity,
        items: &[&TargetItem],
    ) -> DuplicateChoice;

    /// Pick a side when the library count is higher than the source count.
    fn choose_count(
        &mut self,
        artist: &str,
        title: &str,
        target_count: u32,
        source_count: u32,
    ) -> CountSide;
}

/// Resolve one target item against the aggregated source map.
///
/// `album_specific` is the precomputed set of (artist, title) pairs that have
/// album-tagged source variants; it guards the album-aware fallback so one
/// album's scrobbles never absorb plays intended for a different album of the
/// same track.
pub fn resolve_target(
    target: &TargetItem,
    aggregated: &AggregatedMap,
    album_specific: &FxHashSet<(String, String)>,
    keys: &KeyBuilder,
    cfg: &SyncConfig,
    cache: &DecisionCache,
    provider: &mut dyn DecisionProvider,
    stats: &mut SyncStats,
) -> Result<MatchOutcome> {
    // Exact hit on the target-side key (collaborator-split) wins outright;
    // no candidate list is ever built for it.
    let exact_key = keys.target_key(
        &target.artist,
        &target.title,
        target.album.as_deref(),
        cfg.album_aware,
    );
    if aggregated.contains_key(&exact_key) {
        return Ok(MatchOutcome::Exact(exact_key));
    }

    // A remembered acceptance short-circuits any prompting: at most one
    // human decision per track across runs. Acceptances are stored
    // album-agnostic, so the lookup key is built without album awareness.
    if let Some((artist, title)) = cache.get_fuzzy_match(&target.id)? {
        let remembered = keys.source_key(&artist, &title, None, false);
        if aggregated.contains_key(&remembered) {
            return Ok(MatchOutcome::CacheHit(remembered));
        }
        // Stale decision: the remembered identity is gone from the current
        // inputs. Treated as a cache miss and re-derived below.
    }

    // Album-aware miss: only fall back to album-agnostic identities when the
    // source genuinely has no album-specific variants for this artist/title.
    if cfg.album_aware {
        let agnostic = keys.target_key(&target.artist, &target.title, None, false);
        let empty_album = keys.target_key(&target.artist, &target.title, Some(""), true);
        let nav_album_empty = target
            .album
            .as_deref()
            .map_or(true, |a| a.trim().is_empty());

        if nav_album_empty && aggregated.contains_key(&empty_album) {
            return Ok(MatchOutcome::Exact(empty_album));
        }

        let has_album_specific =
            album_specific.contains(&(agnostic.artist.clone(), agnostic.title.clone()));
        if !has_album_specific {
            if aggregated.contains_key(&empty_album) {
                return Ok(MatchOutcome::Exact(empty_album));
            }
            if aggregated.contains_key(&agnostic) {
                return Ok(MatchOutcome::Exact(agnostic));
            }
        }
        // Album-tagged variants exist for a different album; do not force a
        // match and do not fuzzy-search across albums.
        return Ok(MatchOutcome::NoMatch);
    }

    if !cfg.fuzzy_enabled {
        return Ok(MatchOutcome::NoMatch);
    }

    stats.fuzzy_scans += 1;
    let candidates = find_candidates(
        &target.artist,
        &target.title,
        aggregated,
        cfg.fuzzy_threshold,
        cfg.artist_floor,
    );
    if candidates.is_empty() {
        return Ok(MatchOutcome::NoMatch);
    }

    // Previously skipped: only re-prompt when the current candidate set
    // contains identities that were not shown at skip time.
    if let Some(rejected) = cache.get_skip_record(&target.id)? {
        let current: FxHashSet<(String, String)> = candidates
            .iter()
            .map(|c| (c.artist.clone(), c.title.clone()))
            .collect();
        if current.difference(&rejected).next().is_none() {
            return Ok(MatchOutcome::Skipped);
        }
    }

    match provider.choose_match(target, &candidates) {
        Some(idx) => {
            let chosen = &candidates[idx];
            cache.save_fuzzy_match(&target.id, &chosen.artist, &chosen.title)?;
            Ok(MatchOutcome::Accepted(chosen.key.clone()))
        }
        None => {
            // Remember the full identity set that was shown, so the future
            // superset check has an accurate baseline.
            let shown: Vec<(String, String)> = candidates
                .iter()
                .map(|c| (c.artist.clone(), c.title.clone()))
                .collect();
            cache.save_skip_record(&target.id, &shown)?;
            Ok(MatchOutcome::Skipped)
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
