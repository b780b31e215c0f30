use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{bail, Context, Result};
use clap::Parser;
use serde::{Deserialize, Serialize};

use scrobsync::cache::DecisionCache;
use scrobsync::config::{SyncConfig, DEFAULT_ARTIST_FLOOR, DEFAULT_FUZZY_THRESHOLD};
use scrobsync::conflict::ConflictPolicy;
use scrobsync::duplicates::DuplicatePolicy;
use scrobsync::engine::reconcile;
use scrobsync::models::PlayEvent;
use scrobsync::progress::{create_progress_bar, create_spinner, format_duration, set_log_only};
use scrobsync::prompt::TerminalPrompt;
use scrobsync::store::LibraryStore;

#[derive(Parser)]
#[command(name = "scrobsync")]
#[command(about = "Reconcile a scrobbled play history into a local media library")]
struct Args {
    /// Path to the library SQLite database
    library: PathBuf,

    /// Path to the sync cache database (created on first run)
    #[arg(long, default_value = "scrobsync-cache.db")]
    cache: PathBuf,

    /// Import play events from a JSON file into the cache before syncing
    #[arg(long)]
    import: Option<PathBuf>,

    /// Merge a JSON list of loved tracks into the cached plays. Most history
    /// exports carry no loved flags; this applies a separately exported list.
    #[arg(long)]
    import_loved: Option<PathBuf>,

    /// Library user to sync (defaults to the first user)
    #[arg(long)]
    user: Option<String>,

    /// Match per (artist, title, album) instead of per (artist, title)
    #[arg(long)]
    album_aware: bool,

    /// Do not strip collaborator credits from library artist names
    #[arg(long)]
    no_split: bool,

    /// Artist names to exempt from collaborator splitting (comma-separated)
    #[arg(long)]
    whitelist: Option<String>,

    /// Disable interactive fuzzy matching
    #[arg(long)]
    no_fuzzy: bool,

    /// Minimum combined similarity for fuzzy candidates (0-100)
    #[arg(long, default_value_t = DEFAULT_FUZZY_THRESHOLD)]
    threshold: f64,

    /// Minimum artist similarity for fuzzy candidates (0-100)
    #[arg(long, default_value_t = DEFAULT_ARTIST_FLOOR)]
    artist_floor: f64,

    /// Policy when the library count is higher: ask, local, remote, higher, increment
    #[arg(long, default_value = "higher")]
    conflict: String,

    /// Policy for duplicate library copies: all, first, skip, ask, divide
    #[arg(long, default_value = "all")]
    duplicates: String,

    /// Resolve everything but write nothing to the library
    #[arg(long)]
    dry_run: bool,

    /// Apply updates without the confirmation prompt
    #[arg(long)]
    yes: bool,

    /// Write the missing-tracks report to this JSON file
    #[arg(long)]
    missing_out: Option<PathBuf>,

    /// Write the missing loved-tracks report to this JSON file
    #[arg(long)]
    loved_out: Option<PathBuf>,

    /// Write the duplicate-groups report to this JSON file
    #[arg(long)]
    duplicates_out: Option<PathBuf>,

    /// Write run statistics to this JSON file
    #[arg(long)]
    stats_out: Option<PathBuf>,

    /// Suppress progress bars, log progress lines to stderr instead
    #[arg(long)]
    log_only: bool,
}

fn read_events_file(path: &Path) -> Result<Vec<PlayEvent>> {
    let data = fs::read_to_string(path)
        .with_context(|| format!("failed to read events file {}", path.display()))?;
    serde_json::from_str(&data)
        .with_context(|| format!("failed to parse events file {}", path.display()))
}

#[derive(Deserialize)]
struct LovedTrack {
    artist: String,
    title: String,
}

fn read_loved_file(path: &Path) -> Result<Vec<LovedTrack>> {
    let data = fs::read_to_string(path)
        .with_context(|| format!("failed to read loved-tracks file {}", path.display()))?;
    serde_json::from_str(&data)
        .with_context(|| format!("failed to parse loved-tracks file {}", path.display()))
}

fn write_json<T: Serialize>(value: &T, path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    fs::write(path, json)
        .with_context(|| format!("failed to write report {}", path.display()))?;
    Ok(())
}

fn confirm(question: &str) -> bool {
    print!("{} [y/N]: ", question);
    let _ = io::stdout().flush();
    let mut line = String::new();
    if io::stdin().read_line(&mut line).is_err() {
        return false;
    }
    matches!(line.trim().to_lowercase().as_str(), "y" | "yes")
}

fn main() -> Result<()> {
    let args = Args::parse();
    set_log_only(args.log_only);

    // Policies are parsed before any batch work starts, so a typo fails the
    // run immediately instead of after the matching phase.
    let conflict_policy: ConflictPolicy = args.conflict.parse()?;
    let duplicate_policy: DuplicatePolicy = args.duplicates.parse()?;

    let cfg = SyncConfig {
        album_aware: args.album_aware,
        split_collaborators: !args.no_split,
        artist_whitelist: args
            .whitelist
            .as_deref()
            .map(|s| s.split(',').map(|a| a.trim().to_string()).collect())
            .unwrap_or_default(),
        fuzzy_enabled: !args.no_fuzzy,
        fuzzy_threshold: args.threshold,
        artist_floor: args.artist_floor,
        conflict_policy,
        duplicate_policy,
    };

    let start = Instant::now();

    let mut cache = DecisionCache::open(&args.cache)?;
    if let Some(import) = &args.import {
        let events = read_events_file(import)?;
        let added = cache.add_events(&events)?;
        println!("Imported {} new play events ({} in file)", added, events.len());
    }
    if let Some(loved) = &args.import_loved {
        let tracks = read_loved_file(loved)?;
        for track in &tracks {
            cache.mark_loved(&track.artist, &track.title)?;
        }
        println!("Merged {} loved tracks into the cached plays", tracks.len());
    }

    let (plays, acceptances, skips, selections) = cache.stats()?;
    println!(
        "Cache: {} plays, {} remembered matches, {} skips, {} duplicate selections",
        plays, acceptances, skips, selections
    );

    let events = cache.load_events()?;
    if events.is_empty() {
        bail!(
            "cache {} holds no play history; import one with --import",
            args.cache.display()
        );
    }

    let store_open = LibraryStore::open(&args.library)?;
    let user_id = match &args.user {
        Some(name) => store_open.user_id_for(name)?,
        None => store_open.first_user_id()?,
    };
    let spinner = create_spinner("Loading library tracks");
    let targets = store_open.load_targets(&user_id)?;
    spinner.finish_and_clear();
    println!(
        "Loaded {} play events and {} library tracks",
        events.len(),
        targets.len()
    );

    let mut prompt = TerminalPrompt::new();
    let output = reconcile(&events, &targets, &cfg, &cache, &mut prompt)?;
    let stats = &output.stats;

    if args.log_only {
        stats.log_phase("reconcile");
    }

    println!("\n{:=<60}", "");
    println!("Reconciliation complete");
    println!(
        "  Identities: {} ({} malformed events dropped)",
        stats.identities, stats.events_malformed
    );
    println!(
        "  Matched: {} exact, {} remembered, {} fuzzy-accepted",
        stats.exact_matches, stats.cache_hits, stats.fuzzy_accepted
    );
    println!(
        "  Unmatched: {} no-match, {} skipped, {} malformed",
        stats.no_match, stats.skipped, stats.targets_malformed
    );
    println!(
        "  Duplicates: {} groups ({} replayed selections)",
        stats.duplicate_groups, stats.duplicate_replays
    );
    println!(
        "  Updates: {} playcounts, {} loved flags, {} unchanged, {} conflicts",
        stats.playcount_updates, stats.loved_updates, stats.unchanged, stats.conflicts
    );
    println!("  Missing from library: {} identities", stats.missing_identities);
    println!("{:=<60}", "");

    if let Some(path) = &args.missing_out {
        write_json(&output.missing, path)?;
        println!("Missing report written to {}", path.display());
    }
    if let Some(path) = &args.loved_out {
        write_json(&output.missing_loved, path)?;
        println!("Missing-loved report written to {}", path.display());
    }
    if let Some(path) = &args.duplicates_out {
        write_json(&output.duplicates, path)?;
        println!("Duplicates report written to {}", path.display());
    }
    if let Some(path) = &args.stats_out {
        stats.write_to_file(path)?;
        println!("Stats written to {}", path.display());
    }

    let pending: Vec<_> = output.outcomes.iter().filter(|o| o.needs_update()).collect();
    if pending.is_empty() {
        println!("Library is already in sync, nothing to write.");
        return Ok(());
    }

    if args.dry_run {
        println!("Dry run: {} updates were not applied.", pending.len());
        return Ok(());
    }

    if !args.yes && !confirm(&format!("Apply {} updates to the library?", pending.len())) {
        println!("Aborted, no changes written.");
        return Ok(());
    }

    let mut store = store_open;
    let pb = create_progress_bar(pending.len() as u64, "Writing annotations");
    for outcome in &pending {
        store.apply_outcome(outcome, &user_id)?;
        pb.inc(1);
    }
    pb.finish_with_message(format!("Wrote {} annotations", pending.len()));

    let spinner = create_spinner("Updating artist and album play counts");
    store.update_aggregates(&user_id)?;
    spinner.finish_and_clear();

    println!("\n{:=<60}", "");
    println!("Sync complete!");
    println!("  Updated tracks: {}", pending.len());
    println!("  Elapsed: {}", format_duration(start.elapsed()));
    println!("{:=<60}", "");

    Ok(())
}
