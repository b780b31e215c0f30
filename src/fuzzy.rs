//! Fuzzy candidate search over the aggregated identity map.
//!
//! Pure in-memory scan: for one target item, every aggregated identity is
//! scored on artist and title similarity and the survivors are returned
//! ranked. Nothing here touches the network, the cache or the terminal.

use rayon::prelude::*;

use crate::models::{AggregatedMap, MatchCandidate};
use crate::normalize::fold_for_match;

/// Upper bound on the returned candidate list. Keeps the transient result
/// small regardless of library size; anything past the top few is noise for
/// a human picking a match.
pub const MAX_CANDIDATES: usize = 10;

/// Levenshtein ratio on a 0-100 scale.
pub fn similarity(a: &str, b: &str) -> f64 {
    strsim::normalized_levenshtein(a, b) * 100.0
}

/// Score every aggregated identity against one target (artist, title) and
/// return the candidates clearing both gates, sorted by combined score
/// descending with a deterministic key tiebreak.
///
/// Title is weighted higher than artist (0.7/0.3): a title mismatch is more
/// disqualifying than minor artist drift. The artist floor still gates
/// inclusion so a near-identical title under a different artist never
/// surfaces.
pub fn find_candidates(
    target_artist: &str,
    target_title: &str,
    aggregated: &AggregatedMap,
    threshold: f64,
    artist_floor: f64,
) -> Vec<MatchCandidate> {
    let artist_folded = fold_for_match(target_artist);
    let title_folded = fold_for_match(target_title);

    let mut matches: Vec<MatchCandidate> = aggregated
        .par_iter()
        .filter_map(|(key, identity)| {
            let artist_score = similarity(&artist_folded, &fold_for_match(&identity.artist));
            let title_score = similarity(&title_folded, &fold_for_match(&identity.title));
            let combined_score = title_score * 0.7 + artist_score * 0.3;

            if combined_score >= threshold && artist_score >= artist_floor {
                Some(MatchCandidate {
                    key: key.clone(),
                    artist: identity.artist.clone(),
                    title: identity.title.clone(),
                    play_count: identity.play_count(),
                    loved: identity.loved,
                    artist_score,
                    title_score,
                    combined_score,
                })
            } else {
                None
            }
        })
        .collect();

    matches.sort_by(|a, b| {
        b.combined_score
            .partial_cmp(&a.combined_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.key.cmp(&b.key))
    });
    matches.truncate(MAX_CANDIDATES);
    matches
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::aggregate;
    use crate::config::SyncConfig;
    use crate::models::PlayEvent;
    use crate::normalize::KeyBuilder;

    fn aggregated(entries: &[(&str, &str)]) -> AggregatedMap {
        let events: Vec<PlayEvent> = entries
            .iter()
            .map(|(artist, title)| PlayEvent {
                artist: artist.to_string(),
                title: title.to_string(),
                album: None,
                timestamp: 1,
                loved: false,
            })
            .collect();
        let mut malformed = 0;
        aggregate(&events, false, &KeyBuilder::new(&SyncConfig::default()), &mut malformed)
    }

    #[test]
    fn test_similarity_scale() {
        assert_eq!(similarity("abc", "abc"), 100.0);
        assert_eq!(similarity("abc", "xyz"), 0.0);
    }

    #[test]
    fn test_exact_strings_score_top() {
        let map = aggregated(&[("Artist", "Song"), ("Artist", "Other Song")]);
        let candidates = find_candidates("Artist", "Song", &map, 85.0, 70.0);
        assert!(!candidates.is_empty());
        assert_eq!(candidates[0].title, "Song");
        assert_eq!(candidates[0].combined_score, 100.0);
    }

    #[test]
    fn test_tolerates_diacritics_and_ampersand() {
        let map = aggregated(&[("Simon & Garfunkel", "América")]);
        let candidates = find_candidates("Simon and Garfunkel", "America", &map, 85.0, 70.0);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].combined_score, 100.0);
    }

    #[test]
    fn test_artist_floor_gates_inclusion() {
        // Identical title under a wholly different artist must not surface
        // even though the combined score would clear a low threshold.
        let map = aggregated(&[("Completely Different", "Song Title Here")]);
        let candidates = find_candidates("Artist", "Song Title Here", &map, 70.0, 70.0);
        assert!(candidates.is_empty());
    }

    #[test]
    fn test_threshold_gates_inclusion() {
        let map = aggregated(&[("Artist", "Entirely Unrelated Name")]);
        let candidates = find_candidates("Artist", "Song", &map, 85.0, 70.0);
        assert!(candidates.is_empty());
    }

    #[test]
    fn test_sorted_descending_and_capped() {
        let mut entries = Vec::new();
        let titles: Vec<String> = (0..20).map(|i| format!("Song Number {:02}", i)).collect();
        for t in &titles {
            entries.push(("Artist", t.as_str()));
        }
        let map = aggregated(&entries);
        let candidates = find_candidates("Artist", "Song Number 00", &map, 60.0, 70.0);
        assert!(candidates.len() <= MAX_CANDIDATES);
        for pair in candidates.windows(2) {
            assert!(pair[0].combined_score >= pair[1].combined_score);
        }
        assert_eq!(candidates[0].title, "Song Number 00");
    }
}
