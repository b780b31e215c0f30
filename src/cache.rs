//! Durable cache: fetched play events plus memoized human decisions.
//!
//! One SQLite database holds the `plays` table (the already-fetched history,
//! so runs are incremental without refetching) and the three decision-record
//! kinds: fuzzy acceptances, skip records with the candidate set seen at skip
//! time, and duplicate-group selections. Skip-record candidate sets are
//! stored verbatim as JSON so historical rejections stay stable even if the
//! fuzzy scoring weights change later.

use std::path::Path;

use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use rustc_hash::FxHashSet;

use crate::models::{IdentityKey, PlayEvent};

pub struct DecisionCache {
    conn: Connection,
}

impl DecisionCache {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open cache database {}", path.display()))?;
        let cache = Self { conn };
        cache.init_schema()?;
        Ok(cache)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("failed to open in-memory cache")?;
        let cache = Self { conn };
        cache.init_schema()?;
        Ok(cache)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "PRAGMA journal_mode = WAL;
                PRAGMA synchronous = NORMAL;

                CREATE TABLE IF NOT EXISTS plays (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    artist TEXT NOT NULL,
                    album TEXT,
                    title TEXT NOT NULL,
                    timestamp INTEGER NOT NULL,
                    loved INTEGER DEFAULT 0,
                    UNIQUE(artist, title, timestamp)
                );
                CREATE INDEX IF NOT EXISTS idx_plays_timestamp ON plays(timestamp DESC);

                CREATE TABLE IF NOT EXISTS fuzzy_matches (
                    target_id TEXT PRIMARY KEY,
                    source_artist TEXT NOT NULL,
                    source_title TEXT NOT NULL,
                    created_at INTEGER DEFAULT (strftime('%s','now'))
                );

                CREATE TABLE IF NOT EXISTS skip_records (
                    target_id TEXT PRIMARY KEY,
                    rejected_json TEXT NOT NULL,
                    updated_at INTEGER DEFAULT (strftime('%s','now'))
                );

                CREATE TABLE IF NOT EXISTS duplicate_selections (
                    source_key TEXT PRIMARY KEY,
                    target_ids_json TEXT NOT NULL,
                    updated_at INTEGER DEFAULT (strftime('%s','now'))
                );",
            )
            .context("failed to initialize cache schema")?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Play events
    // ------------------------------------------------------------------

    /// Most recent cached play timestamp, for incremental fetches. Zero when
    /// the cache is empty.
    pub fn latest_timestamp(&self) -> Result<i64> {
        let ts: Option<i64> = self
            .conn
            .query_row("SELECT MAX(timestamp) FROM plays", [], |row| row.get(0))?;
        Ok(ts.unwrap_or(0))
    }

    /// Insert events, silently skipping exact duplicates. Returns the number
    /// of newly stored events.
    pub fn add_events(&mut self, events: &[PlayEvent]) -> Result<usize> {
        let tx = self.conn.transaction()?;
        let mut added = 0;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT OR IGNORE INTO plays (artist, album, title, timestamp, loved)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for event in events {
                added += stmt.execute(params![
                    event.artist,
                    event.album,
                    event.title,
                    event.timestamp,
                    event.loved as i64,
                ])?;
            }
        }
        tx.commit()?;
        Ok(added)
    }

    pub fn load_events(&self) -> Result<Vec<PlayEvent>> {
        let mut stmt = self.conn.prepare(
            "SELECT artist, album, title, timestamp, loved FROM plays ORDER BY timestamp",
        )?;
        let events = stmt
            .query_map([], |row| {
                Ok(PlayEvent {
                    artist: row.get(0)?,
                    album: row.get::<_, Option<String>>(1)?.filter(|a| !a.is_empty()),
                    title: row.get(2)?,
                    timestamp: row.get(3)?,
                    loved: row.get::<_, i64>(4)? != 0,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(events)
    }

    /// Mark every play of the given identity as loved. Loved status only
    /// ever turns on here.
    pub fn mark_loved(&self, artist: &str, title: &str) -> Result<()> {
        self.conn.execute(
            "UPDATE plays SET loved = 1 WHERE artist = ?1 AND title = ?2",
            params![artist, title],
        )?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Fuzzy acceptances
    // ------------------------------------------------------------------

    pub fn get_fuzzy_match(&self, target_id: &str) -> Result<Option<(String, String)>> {
        let row = self
            .conn
            .query_row(
                "SELECT source_artist, source_title FROM fuzzy_matches WHERE target_id = ?1",
                params![target_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        Ok(row)
    }

    pub fn save_fuzzy_match(&self, target_id: &str, artist: &str, title: &str) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO fuzzy_matches (target_id, source_artist, source_title)
             VALUES (?1, ?2, ?3)",
            params![target_id, artist, title],
        )?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Skip records
    // ------------------------------------------------------------------

    /// The candidate identities that were shown and rejected for this target,
    /// or `None` when it was never skipped.
    pub fn get_skip_record(&self, target_id: &str) -> Result<Option<FxHashSet<(String, String)>>> {
        let json: Option<String> = self
            .conn
            .query_row(
                "SELECT rejected_json FROM skip_records WHERE target_id = ?1",
                params![target_id],
                |row| row.get(0),
            )
            .optional()?;
        match json {
            Some(json) => {
                let pairs: Vec<(String, String)> = serde_json::from_str(&json)
                    .context("corrupt skip record in decision cache")?;
                Ok(Some(pairs.into_iter().collect()))
            }
            None => Ok(None),
        }
    }

    pub fn save_skip_record(&self, target_id: &str, shown: &[(String, String)]) -> Result<()> {
        let json = serde_json::to_string(shown)?;
        self.conn.execute(
            "INSERT OR REPLACE INTO skip_records (target_id, rejected_json) VALUES (?1, ?2)",
            params![target_id, json],
        )?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Duplicate selections
    // ------------------------------------------------------------------

    pub fn get_duplicate_selection(&self, key: &IdentityKey) -> Result<Option<Vec<String>>> {
        let json: Option<String> = self
            .conn
            .query_row(
                "SELECT target_ids_json FROM duplicate_selections WHERE source_key = ?1",
                params![serde_json::to_string(key)?],
                |row| row.get(0),
            )
            .optional()?;
        match json {
            Some(json) => Ok(Some(
                serde_json::from_str(&json).context("corrupt duplicate selection in cache")?,
            )),
            None => Ok(None),
        }
    }

    pub fn save_duplicate_selection(&self, key: &IdentityKey, target_ids: &[String]) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO duplicate_selections (source_key, target_ids_json)
             VALUES (?1, ?2)",
            params![
                serde_json::to_string(key)?,
                serde_json::to_string(target_ids)?
            ],
        )?;
        Ok(())
    }

    /// Counts for the startup summary: (plays, acceptances, skips, selections).
    pub fn stats(&self) -> Result<(i64, i64, i64, i64)> {
        let count = |sql: &str| -> Result<i64> {
            Ok(self.conn.query_row(sql, [], |row| row.get(0))?)
        };
        Ok((
            count("SELECT COUNT(*) FROM plays")?,
            count("SELECT COUNT(*) FROM fuzzy_matches")?,
            count("SELECT COUNT(*) FROM skip_records")?,
            count("SELECT COUNT(*) FROM duplicate_selections")?,
        ))
    }
}

// ============================================================================
// TESTS
// ============================================================================
