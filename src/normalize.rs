//! Identity normalization for exact and fuzzy matching.
//!
//! Two distinct canonicalizers live here on purpose:
//!
//! - Key building (`KeyBuilder`): case/whitespace folding plus optional
//!   collaborator splitting, used for exact lookups in the aggregated map.
//!   The two sides are asymmetric: source-side keys keep the artist string
//!   exactly as scrobbled, target-side keys strip trailing collaborators.
//! - Fuzzy folding (`fold_for_match`): NFKD decomposition, diacritic
//!   stripping, transliteration and `&`→`and`, used only for similarity
//!   scoring where more variation must be tolerated.

use any_ascii::any_ascii;
use once_cell::sync::Lazy;
use regex::Regex;
use unicode_normalization::UnicodeNormalization;

use crate::config::SyncConfig;
use crate::models::IdentityKey;

// ============================================================================
// REGEX PATTERNS
// ============================================================================

/// Collaborator boundary pattern for target-side artist strings.
/// Word-boundary aware: `&`, `/` and `-` only split when surrounded by
/// whitespace, so hyphenated and ampersand band names survive unless the
/// credit really reads like "A & B". Connector words require whitespace on
/// both sides for the same reason.
static COLLABORATOR_SEPARATOR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\s+(?:feat\.?|ft\.?|featuring|with|vs\.?|mit|met)\s+|\s+[&/-]\s+|\s*[,;]\s+")
        .unwrap()
});

/// Regex to collapse runs of whitespace into a single space.
static MULTI_SPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

/// Case-fold, trim and collapse whitespace. The shared first step for every
/// key component.
pub fn normalize(s: &str) -> String {
    MULTI_SPACE.replace_all(s.trim(), " ").to_lowercase()
}

/// Check if a character is a Unicode combining mark (diacritical mark).
fn is_combining_mark(c: char) -> bool {
    matches!(c as u32, 0x0300..=0x036F | 0x1AB0..=0x1AFF | 0x1DC0..=0x1DFF | 0xFE20..=0xFE2F)
}

/// Fold text for fuzzy comparison: NFKD decomposition with combining marks
/// removed, transliteration of any remaining non-ASCII, lowercasing,
/// `&`→`and`, and whitespace collapse.
/// e.g. "Pròphecy & Omen" → "prophecy and omen"
pub fn fold_for_match(s: &str) -> String {
    let stripped: String = s.nfkd().filter(|c| !is_combining_mark(*c)).collect();
    let folded = any_ascii(&stripped).to_lowercase().replace(" & ", " and ");
    MULTI_SPACE.replace_all(folded.trim(), " ").to_string()
}

// ============================================================================
// KEY BUILDER
// ============================================================================

/// Builds normalized identity keys for both sides of the reconciliation.
///
/// Constructed from the run configuration; carries the collaborator-splitting
/// flag and the exact-name allow-list instead of reading globals.
#[derive(Clone, Debug)]
pub struct KeyBuilder {
    split_collaborators: bool,
    whitelist: Vec<String>,
}

impl KeyBuilder {
    pub fn new(cfg: &SyncConfig) -> Self {
        Self {
            split_collaborators: cfg.split_collaborators,
            whitelist: cfg.artist_whitelist.clone(),
        }
    }

    /// Strip trailing collaborators from an artist credit, keeping only the
    /// first act. Allow-listed names are matched exactly (case-insensitive)
    /// and returned whole; exact match is preferred over any prefix check to
    /// avoid false positives on longer credits.
    pub fn first_artist(&self, artist: &str) -> String {
        let artist_clean = artist.trim();
        if artist_clean.is_empty() {
            return String::new();
        }
        for whitelisted in &self.whitelist {
            if artist_clean.eq_ignore_ascii_case(whitelisted) {
                return whitelisted.clone();
            }
        }
        if !self.split_collaborators {
            return artist_clean.to_string();
        }
        match COLLABORATOR_SEPARATOR.find(artist_clean) {
            Some(m) => artist_clean[..m.start()].trim().to_string(),
            None => artist_clean.to_string(),
        }
    }

    /// Key for a target-side (library) item. Applies collaborator splitting:
    /// library metadata often lists the full collaboration credit while the
    /// history was scrobbled under the primary act.
    pub fn target_key(
        &self,
        artist: &str,
        title: &str,
        album: Option<&str>,
        album_aware: bool,
    ) -> IdentityKey {
        IdentityKey::new(
            normalize(&self.first_artist(artist)),
            normalize(title),
            album_component(album, album_aware),
        )
    }

    /// Key for a source-side (history) identity. Never splits collaborators:
    /// scrobbled history reflects exactly what was recorded.
    pub fn source_key(
        &self,
        artist: &str,
        title: &str,
        album: Option<&str>,
        album_aware: bool,
    ) -> IdentityKey {
        IdentityKey::new(
            normalize(artist),
            normalize(title),
            album_component(album, album_aware),
        )
    }
}

/// Album key component: always `Some` in album-aware mode (empty string when
/// the record has no album), always `None` otherwise.
fn album_component(album: Option<&str>, album_aware: bool) -> Option<String> {
    if album_aware {
        Some(normalize(album.unwrap_or("")))
    } else {
        None
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn builder(split: bool, whitelist: &[&str]) -> KeyBuilder {
        let cfg = SyncConfig {
            split_collaborators: split,
            artist_whitelist: whitelist.iter().map(|s| s.to_string()).collect(),
            ..SyncConfig::default()
        };
        KeyBuilder::new(&cfg)
    }

    #[test]
    fn test_normalize_basic() {
        assert_eq!(normalize("  The  Beatles "), "the beatles");
        assert_eq!(normalize("Song\tName"), "song name");
        assert_eq!(normalize(""), "");
    }

    #[test]
    fn test_first_artist_separators() {
        let kb = builder(true, &[]);
        assert_eq!(kb.first_artist("Artist feat. Other"), "Artist");
        assert_eq!(kb.first_artist("Artist ft Other"), "Artist");
        assert_eq!(kb.first_artist("Artist featuring Other"), "Artist");
        assert_eq!(kb.first_artist("A & B"), "A");
        assert_eq!(kb.first_artist("A / B"), "A");
        assert_eq!(kb.first_artist("A - B"), "A");
        assert_eq!(kb.first_artist("A, B"), "A");
        assert_eq!(kb.first_artist("A vs. B"), "A");
        assert_eq!(kb.first_artist("A with B"), "A");
    }

    #[test]
    fn test_first_artist_word_boundaries() {
        let kb = builder(true, &[]);
        // In-name punctuation without surrounding spaces does not split.
        assert_eq!(kb.first_artist("AC/DC"), "AC/DC");
        assert_eq!(kb.first_artist("Jay-Z"), "Jay-Z");
        // "ft" inside a word does not split.
        assert_eq!(kb.first_artist("Daft Punk"), "Daft Punk");
        assert_eq!(kb.first_artist("Within Temptation"), "Within Temptation");
    }

    #[test]
    fn test_first_artist_whitelist() {
        let kb = builder(true, &["Simon & Garfunkel"]);
        assert_eq!(kb.first_artist("Simon & Garfunkel"), "Simon & Garfunkel");
        assert_eq!(kb.first_artist("simon & garfunkel"), "Simon & Garfunkel");
        // Whitelist is exact match only; a longer credit still splits.
        assert_eq!(kb.first_artist("Simon & Garfunkel & Other"), "Simon");
    }

    #[test]
    fn test_first_artist_split_disabled() {
        let kb = builder(false, &[]);
        assert_eq!(kb.first_artist("Artist feat. Other"), "Artist feat. Other");
    }

    #[test]
    fn test_key_asymmetry() {
        // Same input string, different sides: the target key strips the
        // collaborators, the source key keeps the full credit.
        let kb = builder(true, &[]);
        let target = kb.target_key("A feat. B", "Song", None, false);
        let source = kb.source_key("A feat. B", "Song", None, false);
        assert_eq!(target.artist, "a");
        assert_eq!(source.artist, "a feat. b");
        assert_eq!(target.title, source.title);
    }

    #[test]
    fn test_album_key_fixed_arity() {
        let kb = builder(true, &[]);
        let with_album = kb.source_key("A", "S", Some("Album X"), true);
        let without_album = kb.source_key("A", "S", None, true);
        assert_eq!(with_album.album, Some("album x".to_string()));
        // Missing album still yields Some, keeping the key shape uniform.
        assert_eq!(without_album.album, Some(String::new()));
        let agnostic = kb.source_key("A", "S", Some("Album X"), false);
        assert_eq!(agnostic.album, None);
    }

    #[test]
    fn test_fold_for_match() {
        assert_eq!(fold_for_match("Björk"), "bjork");
        assert_eq!(fold_for_match("Pròphecy"), "prophecy");
        assert_eq!(fold_for_match("Rock & Roll"), "rock and roll");
        assert_eq!(fold_for_match("  Two   Spaces "), "two spaces");
    }
}
