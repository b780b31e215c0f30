//! Library database access.
//!
//! Reads target items from a Navidrome-style SQLite schema (`media_file`,
//! `annotation`, `user`) and writes resolved play counts and loved flags
//! back through per-user annotation rows. The database is opened with an
//! exclusive-lock probe first so a concurrently running server is detected
//! before any write.

use std::path::Path;

use anyhow::{bail, Context, Result};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};

use crate::models::{ConflictOutcome, TargetItem};
use crate::report::format_timestamp;

pub struct LibraryStore {
    conn: Connection,
}

impl LibraryStore {
    /// Open the library database and verify nothing else holds it. A failed
    /// exclusive transaction means the media server is still running, which
    /// would race our annotation writes.
    pub fn open(path: &Path) -> Result<Self> {
        if !path.exists() {
            bail!("library database not found at {}", path.display());
        }
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open library database {}", path.display()))?;
        conn.busy_timeout(std::time::Duration::from_millis(500))?;
        if conn.execute_batch("BEGIN EXCLUSIVE; COMMIT;").is_err() {
            bail!(
                "library database {} is locked; stop the media server before syncing",
                path.display()
            );
        }
        Ok(Self { conn })
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(
            "CREATE TABLE user (id TEXT PRIMARY KEY, user_name TEXT NOT NULL);
             CREATE TABLE media_file (
                 id TEXT PRIMARY KEY,
                 artist TEXT NOT NULL,
                 title TEXT NOT NULL,
                 album TEXT,
                 artist_id TEXT,
                 album_id TEXT
             );
             CREATE TABLE annotation (
                 user_id TEXT NOT NULL,
                 item_id TEXT NOT NULL,
                 item_type TEXT NOT NULL,
                 play_count INTEGER DEFAULT 0,
                 play_date TEXT,
                 rating INTEGER DEFAULT 0,
                 starred INTEGER DEFAULT 0,
                 starred_at TEXT,
                 PRIMARY KEY (user_id, item_id, item_type)
             );",
        )?;
        Ok(Self { conn })
    }

    #[cfg(test)]
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// The id of the first user row. Single-user libraries are the common
    /// case; multi-user selection happens via `user_id` on the CLI.
    pub fn first_user_id(&self) -> Result<String> {
        let id: Option<String> = self
            .conn
            .query_row("SELECT id FROM user ORDER BY rowid LIMIT 1", [], |row| {
                row.get(0)
            })
            .optional()?;
        match id {
            Some(id) => Ok(id),
            None => bail!("library database has no users"),
        }
    }

    /// Resolve a user name to its id.
    pub fn user_id_for(&self, user_name: &str) -> Result<String> {
        let id: Option<String> = self
            .conn
            .query_row(
                "SELECT id FROM user WHERE user_name = ?1",
                params![user_name],
                |row| row.get(0),
            )
            .optional()?;
        match id {
            Some(id) => Ok(id),
            None => bail!("no library user named '{}'", user_name),
        }
    }

    /// All library tracks with the given user's current annotation state.
    /// Tracks without an annotation row read as zero plays, not loved.
    pub fn load_targets(&self, user_id: &str) -> Result<Vec<TargetItem>> {
        let mut stmt = self.conn.prepare(
            "SELECT mf.id, mf.artist, mf.title, mf.album,
                    COALESCE(a.play_count, 0), COALESCE(a.starred, 0)
             FROM media_file mf
             LEFT JOIN annotation a
               ON a.item_id = mf.id AND a.item_type = 'media_file' AND a.user_id = ?1
             ORDER BY mf.id",
        )?;
        let targets = stmt
            .query_map(params![user_id], |row| {
                Ok(TargetItem {
                    id: row.get(0)?,
                    artist: row.get(1)?,
                    title: row.get(2)?,
                    album: row.get::<_, Option<String>>(3)?.filter(|a| !a.is_empty()),
                    play_count: row.get::<_, i64>(4)?.max(0) as u32,
                    loved: row.get::<_, i64>(5)? != 0,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(targets)
    }

    /// Write one resolved outcome back as an annotation upsert.
    ///
    /// The play date only ever advances, and the starred flag only ever turns
    /// on; local state is never degraded by a sync.
    pub fn apply_outcome(&mut self, outcome: &ConflictOutcome, user_id: &str) -> Result<()> {
        let play_date = outcome.last_played.map(format_timestamp);
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        let existing: Option<(Option<String>, i64)> = tx
            .query_row(
                "SELECT play_date, starred FROM annotation
                 WHERE user_id = ?1 AND item_id = ?2 AND item_type = 'media_file'",
                params![user_id, outcome.target_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        match existing {
            Some((current_date, starred)) => {
                // ISO timestamps compare correctly as strings.
                let new_date = match (&play_date, &current_date) {
                    (Some(new), Some(cur)) if new > cur => Some(new.clone()),
                    (Some(new), None) => Some(new.clone()),
                    _ => current_date,
                };
                let keep_starred = starred != 0 || outcome.new_loved;
                tx.execute(
                    "UPDATE annotation
                     SET play_count = ?1, play_date = ?2, starred = ?3,
                         starred_at = CASE
                             WHEN ?3 = 1 AND starred = 0 THEN datetime('now')
                             ELSE starred_at
                         END
                     WHERE user_id = ?4 AND item_id = ?5 AND item_type = 'media_file'",
                    params![
                        outcome.new_count,
                        new_date,
                        keep_starred as i64,
                        user_id,
                        outcome.target_id
                    ],
                )?;
            }
            None => {
                tx.execute(
                    "INSERT INTO annotation
                         (user_id, item_id, item_type, play_count, play_date, rating,
                          starred, starred_at)
                     VALUES (?1, ?2, 'media_file', ?3, ?4, 0, ?5,
                             CASE WHEN ?5 = 1 THEN datetime('now') ELSE NULL END)",
                    params![
                        user_id,
                        outcome.target_id,
                        outcome.new_count,
                        play_date,
                        outcome.new_loved as i64
                    ],
                )?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Recompute artist and album play counts from the per-track annotations,
    /// so browse views stay consistent after a batch of track updates.
    ///
    /// Existing artist/album annotation rows are updated in place (their
    /// starred state is untouched); rows are inserted only for artists and
    /// albums that have tracked plays but no annotation yet.
    pub fn update_aggregates(&mut self, user_id: &str) -> Result<()> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        for (item_type, id_col) in [("artist", "artist_id"), ("album", "album_id")] {
            tx.execute(
                &format!(
                    "UPDATE annotation SET
                         play_count = COALESCE((
                             SELECT SUM(t.play_count) FROM annotation t
                             JOIN media_file mf ON mf.id = t.item_id
                             WHERE t.user_id = ?1 AND t.item_type = 'media_file'
                               AND mf.{id_col} = annotation.item_id
                         ), 0),
                         play_date = (
                             SELECT MAX(t.play_date) FROM annotation t
                             JOIN media_file mf ON mf.id = t.item_id
                             WHERE t.user_id = ?1 AND t.item_type = 'media_file'
                               AND mf.{id_col} = annotation.item_id
                         )
                     WHERE user_id = ?1 AND item_type = '{item_type}'"
                ),
                params![user_id],
            )?;
            tx.execute(
                &format!(
                    "INSERT INTO annotation
                         (user_id, item_id, item_type, play_count, play_date, rating,
                          starred, starred_at)
                     SELECT ?1, mf.{id_col}, '{item_type}', SUM(t.play_count),
                            MAX(t.play_date), 0, 0, NULL
                     FROM annotation t
                     JOIN media_file mf ON mf.id = t.item_id
                     WHERE t.user_id = ?1 AND t.item_type = 'media_file'
                       AND mf.{id_col} IS NOT NULL
                       AND mf.{id_col} NOT IN (
                           SELECT item_id FROM annotation
                           WHERE user_id = ?1 AND item_type = '{item_type}'
                       )
                     GROUP BY mf.{id_col}"
                ),
                params![user_id],
            )?;
        }
        tx.commit()?;
        Ok(())
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ResolutionKind;

    fn seed(store: &LibraryStore) {
        store
            .conn()
            .execute_batch(
                "INSERT INTO user (id, user_name) VALUES ('u1', 'alice');
                 INSERT INTO media_file (id, artist, title, album, artist_id, album_id)
                 VALUES ('t1', 'Artist', 'Song', 'Album', 'ar1', 'al1'),
                        ('t2', 'Artist', 'Other', NULL, 'ar1', 'al2');",
            )
            .unwrap();
    }

    fn outcome(id: &str, new_count: u32, new_loved: bool, last_played: Option<i64>) -> ConflictOutcome {
        ConflictOutcome {
            target_id: id.to_string(),
            artist: "Artist".to_string(),
            title: "Song".to_string(),
            old_count: 0,
            new_count,
            old_loved: false,
            new_loved,
            kind: ResolutionKind::RaisedToSource,
            last_played,
        }
    }

    fn annotation(store: &LibraryStore, id: &str) -> (u32, Option<String>, bool) {
        store
            .conn()
            .query_row(
                "SELECT play_count, play_date, starred FROM annotation
                 WHERE user_id = 'u1' AND item_id = ?1",
                params![id],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)? as u32,
                        row.get(1)?,
                        row.get::<_, i64>(2)? != 0,
                    ))
                },
            )
            .unwrap()
    }

    #[test]
    fn test_first_user_and_load_targets() {
        let store = LibraryStore::open_in_memory().unwrap();
        seed(&store);
        assert_eq!(store.first_user_id().unwrap(), "u1");
        assert_eq!(store.user_id_for("alice").unwrap(), "u1");
        assert!(store.user_id_for("bob").is_err());

        let targets = store.load_targets("u1").unwrap();
        assert_eq!(targets.len(), 2);
        assert_eq!(targets[0].id, "t1");
        assert_eq!(targets[0].play_count, 0);
        assert_eq!(targets[1].album, None);
    }

    #[test]
    fn test_apply_outcome_inserts_annotation() {
        let mut store = LibraryStore::open_in_memory().unwrap();
        seed(&store);
        store
            .apply_outcome(&outcome("t1", 5, true, Some(1700000000)), "u1")
            .unwrap();
        let (count, date, starred) = annotation(&store, "t1");
        assert_eq!(count, 5);
        assert_eq!(date.as_deref(), Some("2023-11-14 22:13:20"));
        assert!(starred);
    }

    #[test]
    fn test_play_date_only_advances() {
        let mut store = LibraryStore::open_in_memory().unwrap();
        seed(&store);
        store
            .apply_outcome(&outcome("t1", 5, false, Some(1700000000)), "u1")
            .unwrap();
        // Older timestamp does not move the play date backwards.
        store
            .apply_outcome(&outcome("t1", 6, false, Some(1600000000)), "u1")
            .unwrap();
        let (count, date, _) = annotation(&store, "t1");
        assert_eq!(count, 6);
        assert_eq!(date.as_deref(), Some("2023-11-14 22:13:20"));
    }

    #[test]
    fn test_update_aggregates_rolls_up_artist_and_album() {
        let mut store = LibraryStore::open_in_memory().unwrap();
        seed(&store);
        store
            .apply_outcome(&outcome("t1", 5, false, Some(1700000000)), "u1")
            .unwrap();
        store
            .apply_outcome(&outcome("t2", 3, false, Some(1600000000)), "u1")
            .unwrap();
        store.update_aggregates("u1").unwrap();

        let rollup = |store: &LibraryStore, item_type: &str, id: &str| -> (u32, Option<String>) {
            store
                .conn()
                .query_row(
                    "SELECT play_count, play_date FROM annotation
                     WHERE user_id = 'u1' AND item_type = ?1 AND item_id = ?2",
                    params![item_type, id],
                    |row| Ok((row.get::<_, i64>(0)? as u32, row.get(1)?)),
                )
                .unwrap()
        };

        // Both tracks share the artist; albums split.
        let (artist_count, artist_date) = rollup(&store, "artist", "ar1");
        assert_eq!(artist_count, 8);
        assert_eq!(artist_date.as_deref(), Some("2023-11-14 22:13:20"));
        assert_eq!(rollup(&store, "album", "al1").0, 5);
        assert_eq!(rollup(&store, "album", "al2").0, 3);

        // A second pass updates in place instead of duplicating rows.
        store
            .apply_outcome(&outcome("t2", 4, false, Some(1600000000)), "u1")
            .unwrap();
        store.update_aggregates("u1").unwrap();
        assert_eq!(rollup(&store, "artist", "ar1").0, 9);
        let rows: i64 = store
            .conn()
            .query_row(
                "SELECT COUNT(*) FROM annotation
                 WHERE user_id = 'u1' AND item_type = 'artist'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(rows, 1);
    }

    #[test]
    fn test_starred_never_clears() {
        let mut store = LibraryStore::open_in_memory().unwrap();
        seed(&store);
        store.apply_outcome(&outcome("t1", 1, true, None), "u1").unwrap();
        store.apply_outcome(&outcome("t1", 2, false, None), "u1").unwrap();
        let (count, _, starred) = annotation(&store, "t1");
        assert_eq!(count, 2);
        assert!(starred);
    }
}
