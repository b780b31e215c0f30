//! Run configuration.
//!
//! Everything the matching and conflict layers need is carried in an explicit
//! `SyncConfig` handed to the constructors; there is no ambient global state.
//! Policy strings are validated here, before any batch work starts.

use crate::conflict::ConflictPolicy;
use crate::duplicates::DuplicatePolicy;

/// Default combined-score threshold for fuzzy candidates (0-100).
pub const DEFAULT_FUZZY_THRESHOLD: f64 = 85.0;

/// Secondary floor on the artist score alone. Prevents a very close title
/// match against a wholly different artist from surfacing.
pub const DEFAULT_ARTIST_FLOOR: f64 = 70.0;

#[derive(Clone, Debug)]
pub struct SyncConfig {
    /// Include the album in identity keys, enabling distinct counts per
    /// album version of the same track.
    pub album_aware: bool,
    /// Strip trailing collaborators ("feat. X") from target-side artist
    /// strings when building keys. Source-side keys never split.
    pub split_collaborators: bool,
    /// Exact artist names that bypass collaborator splitting entirely
    /// (e.g. "Simon & Garfunkel").
    pub artist_whitelist: Vec<String>,
    /// Whether unmatched targets go through fuzzy matching at all.
    pub fuzzy_enabled: bool,
    pub fuzzy_threshold: f64,
    pub artist_floor: f64,
    pub conflict_policy: ConflictPolicy,
    pub duplicate_policy: DuplicatePolicy,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            album_aware: false,
            split_collaborators: true,
            artist_whitelist: Vec::new(),
            fuzzy_enabled: true,
            fuzzy_threshold: DEFAULT_FUZZY_THRESHOLD,
            artist_floor: DEFAULT_ARTIST_FLOOR,
            conflict_policy: ConflictPolicy::Higher,
            duplicate_policy: DuplicatePolicy::All,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let cfg = SyncConfig::default();
        assert!(cfg.split_collaborators);
        assert!(!cfg.album_aware);
        assert_eq!(cfg.fuzzy_threshold, DEFAULT_FUZZY_THRESHOLD);
        assert_eq!(cfg.conflict_policy, ConflictPolicy::Higher);
    }
}
