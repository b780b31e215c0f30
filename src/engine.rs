//! Reconciliation pipeline.
//!
//! Aggregates the source history, resolves every library target to at most
//! one source identity, distributes counts across duplicate groups, and runs
//! conflict resolution per correspondence. Produces write-back outcomes plus
//! the missing and duplicates reports; it never touches the library itself.

use std::time::Instant;

use anyhow::Result;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::aggregate::{aggregate, album_specific_pairs};
use crate::cache::DecisionCache;
use crate::config::SyncConfig;
use crate::conflict::{merge_loved, resolve_counts, Resolution};
use crate::duplicates::resolve_duplicates;
use crate::models::{
    ConflictOutcome, IdentityKey, PlayEvent, ResolutionKind, SyncStats, TargetItem,
};
use crate::normalize::{normalize, KeyBuilder};
use crate::progress::{create_progress_bar, log_progress};
use crate::report::{missing_reports, DuplicateGroupReport, MissingReport};
use crate::resolver::{resolve_target, DecisionProvider};

/// Everything one reconciliation run produced. `outcomes` is what the
/// write-back path applies; the rest is reporting.
pub struct ReconcileOutput {
    pub outcomes: Vec<ConflictOutcome>,
    pub missing: MissingReport,
    pub missing_loved: MissingReport,
    pub duplicates: Vec<DuplicateGroupReport>,
    pub stats: SyncStats,
}

/// Run the full pipeline over in-memory inputs.
///
/// Deterministic given the same inputs, cache state and provider script:
/// targets are processed in input order and duplicate groups in first-seen
/// order, so assignments and prompts replay identically across runs.
pub fn reconcile(
    events: &[PlayEvent],
    targets: &[TargetItem],
    cfg: &SyncConfig,
    cache: &DecisionCache,
    provider: &mut dyn DecisionProvider,
) -> Result<ReconcileOutput> {
    let start = Instant::now();
    let mut stats = SyncStats {
        events_total: events.len(),
        targets_total: targets.len(),
        ..SyncStats::default()
    };

    let keys = KeyBuilder::new(cfg);
    let aggregated = aggregate(events, cfg.album_aware, &keys, &mut stats.events_malformed);
    stats.identities = aggregated.len();
    let album_specific = album_specific_pairs(&aggregated);

    // Phase 1: match resolution, one outcome per target.
    let pb = create_progress_bar(targets.len() as u64, "Matching library tracks");
    let mut resolved: Vec<(IdentityKey, &TargetItem)> = Vec::new();
    for (i, target) in targets.iter().enumerate() {
        if normalize(&target.artist).is_empty() || normalize(&target.title).is_empty() {
            stats.targets_malformed += 1;
            pb.inc(1);
            continue;
        }
        let outcome = resolve_target(
            target,
            &aggregated,
            &album_specific,
            &keys,
            cfg,
            cache,
            provider,
            &mut stats,
        )?;
        stats.record_outcome(&outcome);
        if let Some(key) = outcome.resolved_key() {
            resolved.push((key.clone(), target));
        }
        pb.inc(1);
        log_progress("match", (i + 1) as u64, targets.len() as u64, 500);
    }
    pb.finish_and_clear();

    // Phase 2: group by resolved identity, preserving first-seen order so
    // duplicate handling is deterministic.
    let mut group_order: Vec<IdentityKey> = Vec::new();
    let mut groups: FxHashMap<IdentityKey, Vec<&TargetItem>> = FxHashMap::default();
    for (key, target) in &resolved {
        groups
            .entry(key.clone())
            .or_insert_with(|| {
                group_order.push(key.clone());
                Vec::new()
            })
            .push(target);
    }

    // Phase 3: per-group count distribution, then per-item conflict
    // resolution. Duplicates are settled before the conflict policy sees the
    // counts, so the policy always compares against the assigned share.
    let mut outcomes = Vec::new();
    let mut duplicates = Vec::new();
    for key in &group_order {
        let items = &groups[key];
        let identity = &aggregated[key];
        let total = identity.play_count();

        let assignments = if items.len() > 1 {
            stats.duplicate_groups += 1;
            duplicates.push(DuplicateGroupReport::new(identity, items));
            let mut replayed = false;
            let assignments = resolve_duplicates(
                key,
                identity,
                items,
                cfg.duplicate_policy,
                cache,
                provider,
                &mut replayed,
            )?;
            if replayed {
                stats.duplicate_replays += 1;
            }
            assignments
        } else {
            items.iter().map(|t| (t.id.clone(), total)).collect()
        };

        for item in items {
            let assigned = match assignments.get(&item.id) {
                Some(&count) => count,
                None => continue,
            };

            // A zero share carries no count evidence for this copy, so the
            // count stays put instead of being fed to the policy. Loved
            // reconciliation is independent of counts and still merges.
            let resolution = if assigned == 0 && items.len() > 1 {
                Resolution {
                    new_count: item.play_count,
                    was_conflict: false,
                    changed: false,
                    kind: ResolutionKind::Unchanged,
                }
            } else {
                resolve_counts(
                    item.play_count,
                    assigned,
                    cfg.conflict_policy,
                    &identity.artist,
                    &identity.title,
                    provider,
                )
            };
            let new_loved = merge_loved(item.loved, identity.loved);

            if resolution.was_conflict {
                stats.conflicts += 1;
            }
            if resolution.changed {
                stats.playcount_updates += 1;
            }
            if new_loved && !item.loved {
                stats.loved_updates += 1;
            }
            if !resolution.changed && !(new_loved && !item.loved) {
                stats.unchanged += 1;
            }

            outcomes.push(ConflictOutcome {
                target_id: item.id.clone(),
                artist: item.artist.clone(),
                title: item.title.clone(),
                old_count: item.play_count,
                new_count: resolution.new_count,
                old_loved: item.loved,
                new_loved,
                kind: resolution.kind,
                last_played: identity.last_played(),
            });
        }
    }

    // Phase 4: source identities nothing resolved to.
    let resolved_keys: FxHashSet<IdentityKey> =
        resolved.iter().map(|(key, _)| key.clone()).collect();
    let (missing, missing_loved) = missing_reports(&aggregated, &resolved_keys);
    stats.missing_identities = aggregated.len() - resolved_keys.len();
    stats.elapsed_seconds = start.elapsed().as_secs_f64();

    Ok(ReconcileOutput {
        outcomes,
        missing,
        missing_loved,
        duplicates,
        stats,
    })
}

// ============================================================================
// TESTS
// ============================================================================
