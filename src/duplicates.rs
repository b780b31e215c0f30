//! Duplicate-group handling.
//!
//! When one resolved source identity maps to more than one library track
//! (the same song on two album versions), the authoritative count has to be
//! distributed across the group. Interactive selections are memoized per
//! source identity and replayed while every remembered target id is still
//! present in the group.

use std::str::FromStr;

use anyhow::{bail, Result};
use rustc_hash::{FxHashMap, FxHashSet};

use crate::cache::DecisionCache;
use crate::models::{AggregatedIdentity, IdentityKey, TargetItem};
use crate::resolver::{DecisionProvider, DuplicateChoice};

/// How a duplicate group's play count is distributed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DuplicatePolicy {
    /// Every copy receives the full source count.
    All,
    /// The first item by input order receives the full count; the rest stay
    /// unchanged.
    First,
    /// Leave the whole group untouched this run.
    Skip,
    /// Prompt the user: one copy, all copies, or album-aware division.
    Ask,
    /// Divide by album evidence, falling back to an even split.
    Divide,
}

impl FromStr for DuplicatePolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "all" => Ok(DuplicatePolicy::All),
            "first" | "single" => Ok(DuplicatePolicy::First),
            "skip" => Ok(DuplicatePolicy::Skip),
            "ask" => Ok(DuplicatePolicy::Ask),
            "divide" => Ok(DuplicatePolicy::Divide),
            other => bail!(
                "unknown duplicate policy '{}' (expected all, first, skip, ask or divide)",
                other
            ),
        }
    }
}

/// Assigned play count per target id. Items absent from the map are left
/// unchanged this run.
pub type Assignments = FxHashMap<String, u32>;

/// Split `total` across `n` items: floor division with the remainder handed
/// to the first `remainder` items in input order. Deterministic, and the sum
/// is exactly `total` for any n >= 1.
pub fn divide_count(total: u32, n: usize) -> Vec<u32> {
    if n == 0 {
        return Vec::new();
    }
    let base = total / n as u32;
    let remainder = (total % n as u32) as usize;
    (0..n)
        .map(|i| if i < remainder { base + 1 } else { base })
        .collect()
}

/// Distribute one source identity's count across its duplicate group.
///
/// `items` is the group in stable input order. Interactive single/all
/// selections are persisted as a `DuplicateSelection`; album-aware division
/// is recomputed from album evidence each run instead of being persisted.
pub fn resolve_duplicates(
    key: &IdentityKey,
    identity: &AggregatedIdentity,
    items: &[&TargetItem],
    policy: DuplicatePolicy,
    cache: &DecisionCache,
    provider: &mut dyn DecisionProvider,
    replayed: &mut bool,
) -> Result<Assignments> {
    let total = identity.play_count();
    *replayed = false;

    // A remembered selection replays without prompting, but only while every
    // remembered id still exists in the current group; otherwise the
    // selection is stale and the user decides again.
    if policy == DuplicatePolicy::Ask {
        if let Some(selected) = cache.get_duplicate_selection(key)? {
            let present: FxHashSet<&str> = items.iter().map(|t| t.id.as_str()).collect();
            if !selected.is_empty() && selected.iter().all(|id| present.contains(id.as_str())) {
                *replayed = true;
                return Ok(selected.into_iter().map(|id| (id, total)).collect());
            }
        }
    }

    match policy {
        DuplicatePolicy::All => Ok(items.iter().map(|t| (t.id.clone(), total)).collect()),
        DuplicatePolicy::First => {
            let mut assignments = Assignments::default();
            for (i, item) in items.iter().enumerate() {
                assignments.insert(item.id.clone(), if i == 0 { total } else { 0 });
            }
            Ok(assignments)
        }
        DuplicatePolicy::Skip => Ok(Assignments::default()),
        DuplicatePolicy::Divide => Ok(divide_by_album(identity, items, total)),
        DuplicatePolicy::Ask => match provider.choose_duplicate(identity, items) {
            DuplicateChoice::All => {
                let ids: Vec<String> = items.iter().map(|t| t.id.clone()).collect();
                cache.save_duplicate_selection(key, &ids)?;
                Ok(items.iter().map(|t| (t.id.clone(), total)).collect())
            }
            DuplicateChoice::Single(idx) => {
                let mut assignments = Assignments::default();
                for (i, item) in items.iter().enumerate() {
                    assignments.insert(item.id.clone(), if i == idx { total } else { 0 });
                }
                cache.save_duplicate_selection(key, std::slice::from_ref(&items[idx].id))?;
                Ok(assignments)
            }
            DuplicateChoice::Divide => Ok(divide_by_album(identity, items, total)),
            DuplicateChoice::Skip => Ok(Assignments::default()),
        },
    }
}

/// Album-evidence division: when the source events' album string exactly
/// matches one item's album (case-insensitive), that version takes the whole
/// count and its siblings take zero. Without that evidence the count is split
/// as evenly as possible.
fn divide_by_album(
    identity: &AggregatedIdentity,
    items: &[&TargetItem],
    total: u32,
) -> Assignments {
    let source_album = identity.album.trim();
    if !source_album.is_empty() {
        let matched = items.iter().position(|t| {
            t.album
                .as_deref()
                .is_some_and(|a| a.trim().eq_ignore_ascii_case(source_album))
        });
        if let Some(idx) = matched {
            return items
                .iter()
                .enumerate()
                .map(|(i, t)| (t.id.clone(), if i == idx { total } else { 0 }))
                .collect();
        }
    }

    let shares = divide_count(total, items.len());
    items
        .iter()
        .zip(shares)
        .map(|(t, share)| (t.id.clone(), share))
        .collect()
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompt::ScriptedProvider;

    fn identity(count: u32, album: &str) -> AggregatedIdentity {
        AggregatedIdentity {
            timestamps: (0..count as i64).collect(),
            loved: false,
            artist: "Artist".to_string(),
            title: "Song".to_string(),
            album: album.to_string(),
        }
    }

    fn item(id: &str, album: &str) -> TargetItem {
        TargetItem {
            id: id.to_string(),
            artist: "Artist".to_string(),
            title: "Song".to_string(),
            album: if album.is_empty() { None } else { Some(album.to_string()) },
            play_count: 0,
            loved: false,
        }
    }

    fn key() -> IdentityKey {
        IdentityKey::new("artist".to_string(), "song".to_string(), None)
    }

    fn run(
        identity: &AggregatedIdentity,
        items: &[&TargetItem],
        policy: DuplicatePolicy,
        cache: &DecisionCache,
        provider: &mut ScriptedProvider,
    ) -> (Assignments, bool) {
        let mut replayed = false;
        let assignments =
            resolve_duplicates(&key(), identity, items, policy, cache, provider, &mut replayed)
                .unwrap();
        (assignments, replayed)
    }

    #[test]
    fn test_policy_parsing() {
        assert_eq!("all".parse::<DuplicatePolicy>().unwrap(), DuplicatePolicy::All);
        assert_eq!("single".parse::<DuplicatePolicy>().unwrap(), DuplicatePolicy::First);
        assert!("bogus".parse::<DuplicatePolicy>().is_err());
    }

    #[test]
    fn test_divide_count_conserves_sum() {
        for total in [0u32, 1, 7, 10, 99] {
            for n in 1..=6usize {
                let shares = divide_count(total, n);
                assert_eq!(shares.len(), n);
                assert_eq!(shares.iter().sum::<u32>(), total, "total={} n={}", total, n);
                // Remainder goes to the first items: shares never increase.
                for pair in shares.windows(2) {
                    assert!(pair[0] >= pair[1]);
                }
            }
        }
    }

    #[test]
    fn test_divide_pinned_distribution() {
        // 7 plays over [Deluxe, Standard] with no album evidence: remainder
        // to the first item by input order.
        let cache = DecisionCache::open_in_memory().unwrap();
        let mut provider = ScriptedProvider::default();
        let a = item("1", "Deluxe");
        let b = item("2", "Standard");
        let (assignments, _) =
            run(&identity(7, ""), &[&a, &b], DuplicatePolicy::Divide, &cache, &mut provider);
        assert_eq!(assignments["1"], 4);
        assert_eq!(assignments["2"], 3);
    }

    #[test]
    fn test_divide_album_evidence_takes_all() {
        let cache = DecisionCache::open_in_memory().unwrap();
        let mut provider = ScriptedProvider::default();
        let a = item("1", "Deluxe");
        let b = item("2", "Standard");
        let (assignments, _) = run(
            &identity(7, "standard"),
            &[&a, &b],
            DuplicatePolicy::Divide,
            &cache,
            &mut provider,
        );
        assert_eq!(assignments["1"], 0);
        assert_eq!(assignments["2"], 7);
    }

    #[test]
    fn test_all_and_first_policies() {
        let cache = DecisionCache::open_in_memory().unwrap();
        let mut provider = ScriptedProvider::default();
        let a = item("1", "");
        let b = item("2", "");

        let (all, _) = run(&identity(5, ""), &[&a, &b], DuplicatePolicy::All, &cache, &mut provider);
        assert_eq!(all["1"], 5);
        assert_eq!(all["2"], 5);

        let (first, _) =
            run(&identity(5, ""), &[&a, &b], DuplicatePolicy::First, &cache, &mut provider);
        assert_eq!(first["1"], 5);
        assert_eq!(first["2"], 0);
    }

    #[test]
    fn test_skip_leaves_group_untouched() {
        let cache = DecisionCache::open_in_memory().unwrap();
        let mut provider = ScriptedProvider::default();
        let a = item("1", "");
        let b = item("2", "");
        let (assignments, _) =
            run(&identity(5, ""), &[&a, &b], DuplicatePolicy::Skip, &cache, &mut provider);
        assert!(assignments.is_empty());
    }

    #[test]
    fn test_ask_selection_persists_and_replays() {
        let cache = DecisionCache::open_in_memory().unwrap();
        let a = item("1", "");
        let b = item("2", "");

        let mut choosing =
            ScriptedProvider::default().with_duplicate_choices(vec![DuplicateChoice::Single(1)]);
        let (first, replayed) =
            run(&identity(4, ""), &[&a, &b], DuplicatePolicy::Ask, &cache, &mut choosing);
        assert!(!replayed);
        assert_eq!(first["1"], 0);
        assert_eq!(first["2"], 4);
        assert_eq!(choosing.duplicate_prompts(), 1);

        // Second run replays the remembered selection without prompting.
        let mut silent = ScriptedProvider::default();
        let (second, replayed) =
            run(&identity(4, ""), &[&a, &b], DuplicatePolicy::Ask, &cache, &mut silent);
        assert!(replayed);
        assert_eq!(second.get("1"), None);
        assert_eq!(second["2"], 4);
        assert_eq!(silent.duplicate_prompts(), 0);
    }

    #[test]
    fn test_stale_selection_reprompts() {
        let cache = DecisionCache::open_in_memory().unwrap();
        let a = item("1", "");
        let b = item("2", "");
        let c = item("3", "");

        let mut choosing =
            ScriptedProvider::default().with_duplicate_choices(vec![DuplicateChoice::Single(1)]);
        run(&identity(4, ""), &[&a, &b], DuplicatePolicy::Ask, &cache, &mut choosing);

        // The remembered item "2" disappeared from the group: re-prompt.
        let mut reprompt =
            ScriptedProvider::default().with_duplicate_choices(vec![DuplicateChoice::All]);
        let (assignments, replayed) =
            run(&identity(4, ""), &[&a, &c], DuplicatePolicy::Ask, &cache, &mut reprompt);
        assert!(!replayed);
        assert_eq!(reprompt.duplicate_prompts(), 1);
        assert_eq!(assignments["1"], 4);
        assert_eq!(assignments["3"], 4);
    }
}
