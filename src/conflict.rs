//! Play-count and loved-flag conflict resolution.
//!
//! One rule is not configurable: when the source count is higher, it is
//! always adopted (history cannot shrink without explicit reason), except
//! under the increment policy where both sides are combined. The configured
//! policy only decides the opposite case, where the library has more plays
//! than the tracked history.

use std::str::FromStr;

use anyhow::bail;

use crate::models::ResolutionKind;
use crate::resolver::{CountSide, DecisionProvider};

/// What to do when the target (library) count is higher than the source.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConflictPolicy {
    /// Prompt the user with both numbers.
    Ask,
    /// Keep the library count unchanged.
    Local,
    /// Forcibly lower the library count to the source count.
    Remote,
    /// Keep whichever count is higher.
    Higher,
    /// Always add the source count on top of the library count.
    Increment,
}

impl FromStr for ConflictPolicy {
    type Err = anyhow::Error;

    /// Parsed at configuration time, before any batch work starts.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ask" => Ok(ConflictPolicy::Ask),
            "local" | "library" => Ok(ConflictPolicy::Local),
            "remote" | "history" => Ok(ConflictPolicy::Remote),
            "higher" => Ok(ConflictPolicy::Higher),
            "increment" => Ok(ConflictPolicy::Increment),
            other => bail!(
                "unknown conflict policy '{}' (expected ask, local, remote, higher or increment)",
                other
            ),
        }
    }
}

/// Result of resolving one correspondence's play count.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Resolution {
    pub new_count: u32,
    pub was_conflict: bool,
    pub changed: bool,
    pub kind: ResolutionKind,
}

/// Decide the authoritative play count for one correspondence.
///
/// `artist`/`title` are display strings for the interactive prompt only.
pub fn resolve_counts(
    target_count: u32,
    source_count: u32,
    policy: ConflictPolicy,
    artist: &str,
    title: &str,
    provider: &mut dyn DecisionProvider,
) -> Resolution {
    if policy == ConflictPolicy::Increment {
        let new_count = target_count + source_count;
        return if source_count == 0 {
            Resolution {
                new_count,
                was_conflict: false,
                changed: false,
                kind: ResolutionKind::Unchanged,
            }
        } else {
            Resolution {
                new_count,
                // Both inputs are truthful and get combined; flagged for
                // audit only when they actually differ.
                was_conflict: target_count != source_count,
                changed: true,
                kind: ResolutionKind::Incremented,
            }
        };
    }

    if source_count > target_count {
        return Resolution {
            new_count: source_count,
            was_conflict: false,
            changed: true,
            kind: ResolutionKind::RaisedToSource,
        };
    }

    if target_count > source_count {
        let (new_count, kind) = match policy {
            ConflictPolicy::Local | ConflictPolicy::Higher => {
                (target_count, ResolutionKind::KeptLocal)
            }
            ConflictPolicy::Remote => (source_count, ResolutionKind::LoweredToSource),
            ConflictPolicy::Ask => {
                let chosen =
                    match provider.choose_count(artist, title, target_count, source_count) {
                        CountSide::Local => target_count,
                        CountSide::Source => source_count,
                    };
                (chosen, ResolutionKind::UserChoice)
            }
            ConflictPolicy::Increment => unreachable!("handled above"),
        };
        return Resolution {
            new_count,
            was_conflict: true,
            changed: new_count != target_count,
            kind,
        };
    }

    Resolution {
        new_count: target_count,
        was_conflict: false,
        changed: false,
        kind: ResolutionKind::Unchanged,
    }
}

/// Loved reconciliation is independent of the count policy and
/// one-directional: once loved on either side, always loved. Never un-loves.
pub fn merge_loved(target_loved: bool, source_loved: bool) -> bool {
    target_loved || source_loved
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompt::ScriptedProvider;

    fn resolve(target: u32, source: u32, policy: ConflictPolicy) -> Resolution {
        let mut provider = ScriptedProvider::default();
        resolve_counts(target, source, policy, "Artist", "Song", &mut provider)
    }

    #[test]
    fn test_policy_parsing() {
        assert_eq!("higher".parse::<ConflictPolicy>().unwrap(), ConflictPolicy::Higher);
        assert_eq!("library".parse::<ConflictPolicy>().unwrap(), ConflictPolicy::Local);
        assert!("lastfm".parse::<ConflictPolicy>().is_err());
        assert!("bogus".parse::<ConflictPolicy>().is_err());
    }

    #[test]
    fn test_source_higher_always_adopted() {
        // One-directional guarantee: every policy except increment adopts
        // the higher source count.
        for policy in [
            ConflictPolicy::Ask,
            ConflictPolicy::Local,
            ConflictPolicy::Remote,
            ConflictPolicy::Higher,
        ] {
            let r = resolve(1, 5, policy);
            assert_eq!(r.new_count, 5);
            assert!(r.changed);
            assert!(!r.was_conflict);
            assert_eq!(r.kind, ResolutionKind::RaisedToSource);
        }
    }

    #[test]
    fn test_target_higher_per_policy() {
        let kept = resolve(7, 3, ConflictPolicy::Higher);
        assert_eq!(kept.new_count, 7);
        assert!(kept.was_conflict);
        assert!(!kept.changed);
        assert_eq!(kept.kind, ResolutionKind::KeptLocal);

        let lowered = resolve(7, 3, ConflictPolicy::Remote);
        assert_eq!(lowered.new_count, 3);
        assert!(lowered.was_conflict);
        assert!(lowered.changed);
        assert_eq!(lowered.kind, ResolutionKind::LoweredToSource);
    }

    #[test]
    fn test_ask_consults_provider() {
        let mut provider = ScriptedProvider::default().with_count_choices(vec![CountSide::Source]);
        let r = resolve_counts(7, 3, ConflictPolicy::Ask, "A", "S", &mut provider);
        assert_eq!(r.new_count, 3);
        assert_eq!(r.kind, ResolutionKind::UserChoice);
        assert!(r.changed);
    }

    #[test]
    fn test_increment_combines() {
        let r = resolve(2, 3, ConflictPolicy::Increment);
        assert_eq!(r.new_count, 5);
        assert!(r.changed);
        assert!(r.was_conflict);
        assert_eq!(r.kind, ResolutionKind::Incremented);

        let equal = resolve(4, 4, ConflictPolicy::Increment);
        assert_eq!(equal.new_count, 8);
        assert!(equal.changed);
        assert!(!equal.was_conflict);

        let idle = resolve(4, 0, ConflictPolicy::Increment);
        assert_eq!(idle.new_count, 4);
        assert!(!idle.changed);
    }

    #[test]
    fn test_equal_counts_unchanged() {
        let r = resolve(3, 3, ConflictPolicy::Remote);
        assert_eq!(r.new_count, 3);
        assert!(!r.changed);
        assert!(!r.was_conflict);
        assert_eq!(r.kind, ResolutionKind::Unchanged);
    }

    #[test]
    fn test_loved_monotonic() {
        assert!(merge_loved(false, true));
        assert!(merge_loved(true, false));
        assert!(merge_loved(true, true));
        assert!(!merge_loved(false, false));
    }
}
