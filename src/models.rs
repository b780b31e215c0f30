//! Core data models for play-history reconciliation.
//!
//! This module contains the struct definitions and type aliases shared
//! across the aggregation, matching and conflict-resolution pipeline.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

// ============================================================================
// Type Aliases
// ============================================================================

/// Map from normalized identity key to the aggregated play history for it.
pub type AggregatedMap = FxHashMap<IdentityKey, AggregatedIdentity>;

// ============================================================================
// Identity Key
// ============================================================================

/// Normalized (artist, title[, album]) identity compared by value.
///
/// In album-aware mode `album` is always `Some` (possibly an empty string
/// when the event carried no album), so the key shape stays uniform across
/// the whole map. In album-agnostic mode it is always `None`. This avoids
/// mixed 2-tuple/3-tuple keys when album awareness is toggled between runs.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IdentityKey {
    pub artist: String,
    pub title: String,
    pub album: Option<String>,
}

impl IdentityKey {
    pub fn new(artist: String, title: String, album: Option<String>) -> Self {
        Self { artist, title, album }
    }
}

// ============================================================================
// History Source Models
// ============================================================================

/// One timestamped play from the remote history, immutable once fetched.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PlayEvent {
    pub artist: String,
    pub title: String,
    #[serde(default)]
    pub album: Option<String>,
    pub timestamp: i64,
    #[serde(default)]
    pub loved: bool,
}

/// Per-identity fold of all contributing play events.
///
/// Display strings are first-seen-wins originals (never normalized); the
/// loved flag is a monotonic OR over contributing events.
#[derive(Clone, Debug)]
pub struct AggregatedIdentity {
    pub timestamps: Vec<i64>,
    pub loved: bool,
    pub artist: String,
    pub title: String,
    pub album: String,
}

impl AggregatedIdentity {
    pub fn play_count(&self) -> u32 {
        self.timestamps.len() as u32
    }

    pub fn last_played(&self) -> Option<i64> {
        self.timestamps.iter().copied().max()
    }
}

// ============================================================================
// Library Target Models
// ============================================================================

/// One library track to reconcile. Read-only input; the engine only proposes
/// new (play_count, loved) values for it.
#[derive(Clone, Debug)]
pub struct TargetItem {
    pub id: String,
    pub artist: String,
    pub title: String,
    pub album: Option<String>,
    pub play_count: u32,
    pub loved: bool,
}

// ============================================================================
// Matching Models
// ============================================================================

/// One fuzzy-match proposal for a single target item. Transient; only the
/// accepted candidate's identity is persisted.
#[derive(Clone, Debug)]
pub struct MatchCandidate {
    pub key: IdentityKey,
    /// Original source display strings, shown to the user and stored verbatim
    /// in skip records.
    pub artist: String,
    pub title: String,
    pub play_count: u32,
    pub loved: bool,
    pub artist_score: f64,
    pub title_score: f64,
    pub combined_score: f64,
}

/// Terminal state of match resolution for one target item.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MatchOutcome {
    /// Normalized target key was present verbatim in the aggregated map.
    Exact(IdentityKey),
    /// A remembered fuzzy acceptance still resolved to a live identity.
    CacheHit(IdentityKey),
    /// The user accepted a fuzzy candidate this run.
    Accepted(IdentityKey),
    /// The user rejected all candidates, now or on a prior run.
    Skipped,
    /// No exact hit and no candidate cleared the threshold gates.
    NoMatch,
}

impl MatchOutcome {
    pub fn resolved_key(&self) -> Option<&IdentityKey> {
        match self {
            MatchOutcome::Exact(k) | MatchOutcome::CacheHit(k) | MatchOutcome::Accepted(k) => {
                Some(k)
            }
            MatchOutcome::Skipped | MatchOutcome::NoMatch => None,
        }
    }
}

// ============================================================================
// Conflict Models
// ============================================================================

/// How one correspondence's play count was decided, for audit output.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum ResolutionKind {
    /// Counts already agreed; at most the loved flag changed.
    Unchanged,
    /// Source count was higher and was adopted.
    RaisedToSource,
    /// Target count was higher and the policy kept it.
    KeptLocal,
    /// Target count was higher and the policy lowered it to the source.
    LoweredToSource,
    /// Counts were combined under the increment policy.
    Incremented,
    /// The user picked a side interactively.
    UserChoice,
}

/// Terminal output of one correspondence's reconciliation, handed to the
/// write-back path.
#[derive(Clone, Debug)]
pub struct ConflictOutcome {
    pub target_id: String,
    pub artist: String,
    pub title: String,
    pub old_count: u32,
    pub new_count: u32,
    pub old_loved: bool,
    pub new_loved: bool,
    pub kind: ResolutionKind,
    /// Most recent source play timestamp, used to advance the play date.
    pub last_played: Option<i64>,
}

impl ConflictOutcome {
    /// Whether the write-back path has anything to do for this item.
    pub fn needs_update(&self) -> bool {
        self.new_count != self.old_count || (self.new_loved && !self.old_loved)
    }
}

// ============================================================================
// Run Statistics
// ============================================================================

/// Per-state counters for one reconciliation run. Every target item's fate
/// lands in exactly one of the outcome buckets.
#[derive(Default, Debug, Clone, Serialize)]
pub struct SyncStats {
    // Inputs
    pub events_total: usize,
    pub events_malformed: usize,
    pub targets_total: usize,
    pub targets_malformed: usize,
    pub identities: usize,

    // Match resolution outcomes
    pub exact_matches: usize,
    pub cache_hits: usize,
    pub fuzzy_scans: usize,
    pub fuzzy_accepted: usize,
    pub skipped: usize,
    pub no_match: usize,

    // Duplicate handling
    pub duplicate_groups: usize,
    pub duplicate_replays: usize,

    // Conflict resolution
    pub conflicts: usize,
    pub playcount_updates: usize,
    pub loved_updates: usize,
    pub unchanged: usize,

    // Source identities with no target correspondence at all
    pub missing_identities: usize,

    // Timing
    pub elapsed_seconds: f64,
}

impl SyncStats {
    /// Log stats to stderr in JSON format.
    pub fn log_phase(&self, phase: &str) {
        if let Ok(json) = serde_json::to_string_pretty(self) {
            eprintln!("[STATS:{}]\n{}", phase, json);
        }
    }

    /// Write stats to a JSON file.
    pub fn write_to_file(&self, path: &std::path::Path) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn record_outcome(&mut self, outcome: &MatchOutcome) {
        match outcome {
            MatchOutcome::Exact(_) => self.exact_matches += 1,
            MatchOutcome::CacheHit(_) => self.cache_hits += 1,
            MatchOutcome::Accepted(_) => self.fuzzy_accepted += 1,
            MatchOutcome::Skipped => self.skipped += 1,
            MatchOutcome::NoMatch => self.no_match += 1,
        }
    }
}
