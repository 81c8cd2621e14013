//! Typed CRUD over the users / watches / patterns tables plus the due-set query.

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use whatsup_core::error::{Result, WhatsupError};
use whatsup_core::types::{AWAY_STATUSES, Pattern, PresenceCounts, User, Watch};

const WATCH_COLUMNS: &str = "w.id, w.user_id, w.url, w.active, w.status, w.last_update, w.quiet_until";
const USER_COLUMNS: &str = "id, jid, active, status, quiet_until";

/// Whatsup repository.
pub struct WatchDb {
    conn: Mutex<Connection>,
}

impl WatchDb {
    /// Open or create the database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).map_err(|e| db_err("open", e))?;
        conn.execute_batch("PRAGMA journal_mode=WAL;").ok();
        tracing::info!("🗄️ Opened watch database at {}", path.display());
        Self::with_connection(conn)
    }

    /// Fresh private database, used by tests and dry runs.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| db_err("open", e))?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        crate::migrations::run(&conn).map_err(|e| db_err("migrate", e))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| WhatsupError::Database(format!("lock poisoned: {e}")))
    }

    // ─── Users ──────────────────────────────────────────────

    pub fn find_user(&self, jid: &str) -> Result<Option<User>> {
        let conn = self.lock()?;
        conn.query_row(
            &format!("SELECT {USER_COLUMNS} FROM users WHERE jid = ?1"),
            [jid],
            user_from_row,
        )
        .optional()
        .map_err(|e| db_err("find user", e))
    }

    pub fn get_user(&self, id: i64) -> Result<Option<User>> {
        let conn = self.lock()?;
        conn.query_row(
            &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
            [id],
            user_from_row,
        )
        .optional()
        .map_err(|e| db_err("get user", e))
    }

    /// Find the user for `jid`, creating it (active, no status) if unseen.
    pub fn ensure_user(&self, jid: &str) -> Result<User> {
        {
            let conn = self.lock()?;
            conn.execute("INSERT OR IGNORE INTO users (jid) VALUES (?1)", [jid])
                .map_err(|e| db_err("create user", e))?;
        }
        self.find_user(jid)?
            .ok_or_else(|| WhatsupError::Database(format!("user {jid} vanished after insert")))
    }

    /// Record a presence status, creating the user on first sight.
    pub fn update_user_status(&self, jid: &str, status: &str) -> Result<User> {
        {
            let conn = self.lock()?;
            conn.execute(
                "INSERT INTO users (jid, status) VALUES (?1, ?2)
                 ON CONFLICT(jid) DO UPDATE SET status = excluded.status",
                params![jid, status],
            )
            .map_err(|e| db_err("update user status", e))?;
        }
        self.find_user(jid)?
            .ok_or_else(|| WhatsupError::Database(format!("user {jid} vanished after upsert")))
    }

    pub fn set_user_active(&self, user_id: i64, active: bool) -> Result<()> {
        self.update_one(
            "UPDATE users SET active = ?1 WHERE id = ?2",
            params![active, user_id],
            "user",
        )
    }

    pub fn set_user_quiet(&self, user_id: i64, until: Option<DateTime<Utc>>) -> Result<()> {
        self.update_one(
            "UPDATE users SET quiet_until = ?1 WHERE id = ?2",
            params![until.map(to_ts), user_id],
            "user",
        )
    }

    // ─── Watches ────────────────────────────────────────────

    /// Create a watch. Duplicate URLs for the same user are rejected.
    pub fn create_watch(&self, user_id: i64, url: &str) -> Result<Watch> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO watches (user_id, url) VALUES (?1, ?2)",
            params![user_id, url],
        )
        .map_err(|e| db_err("create watch", e))?;
        let id = conn.last_insert_rowid();
        conn.query_row(
            &format!("SELECT {WATCH_COLUMNS} FROM watches w WHERE w.id = ?1"),
            [id],
            watch_from_row,
        )
        .map_err(|e| db_err("load watch", e))
    }

    pub fn get_watch(&self, id: i64) -> Result<Option<Watch>> {
        let conn = self.lock()?;
        conn.query_row(
            &format!("SELECT {WATCH_COLUMNS} FROM watches w WHERE w.id = ?1"),
            [id],
            watch_from_row,
        )
        .optional()
        .map_err(|e| db_err("get watch", e))
    }

    /// The watch owned by `user_id` with exactly this URL.
    pub fn find_watch(&self, user_id: i64, url: &str) -> Result<Option<Watch>> {
        let conn = self.lock()?;
        conn.query_row(
            &format!("SELECT {WATCH_COLUMNS} FROM watches w WHERE w.user_id = ?1 AND w.url = ?2"),
            params![user_id, url],
            watch_from_row,
        )
        .optional()
        .map_err(|e| db_err("find watch", e))
    }

    /// All of a user's watches, sorted by URL.
    pub fn watches_for_user(&self, user_id: i64) -> Result<Vec<Watch>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {WATCH_COLUMNS} FROM watches w WHERE w.user_id = ?1 ORDER BY w.url"
            ))
            .map_err(|e| db_err("list watches", e))?;
        let rows = stmt
            .query_map([user_id], watch_from_row)
            .map_err(|e| db_err("list watches", e))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| db_err("list watches", e))
    }

    pub fn set_watch_active(&self, watch_id: i64, active: bool) -> Result<()> {
        self.update_one(
            "UPDATE watches SET active = ?1 WHERE id = ?2",
            params![active, watch_id],
            "watch",
        )
    }

    pub fn set_watch_quiet(&self, watch_id: i64, until: Option<DateTime<Utc>>) -> Result<()> {
        self.update_one(
            "UPDATE watches SET quiet_until = ?1 WHERE id = ?2",
            params![until.map(to_ts), watch_id],
            "watch",
        )
    }

    /// Persist the outcome of the notification decision.
    pub fn record_status(&self, watch_id: i64, status: i32) -> Result<()> {
        self.update_one(
            "UPDATE watches SET status = ?1 WHERE id = ?2",
            params![status, watch_id],
            "watch",
        )
    }

    /// Delete a watch and, first, every pattern it owns. Returns false if it did not exist.
    pub fn delete_watch(&self, watch_id: i64) -> Result<bool> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(|e| db_err("delete watch", e))?;
        tx.execute("DELETE FROM patterns WHERE watch_id = ?1", [watch_id])
            .map_err(|e| db_err("delete patterns", e))?;
        let removed = tx
            .execute("DELETE FROM watches WHERE id = ?1", [watch_id])
            .map_err(|e| db_err("delete watch", e))?;
        tx.commit().map_err(|e| db_err("delete watch", e))?;
        Ok(removed > 0)
    }

    /// Select up to `limit` due watches and stamp their `last_update` with `now`
    /// in the same transaction, so a watch whose probe is in flight is never
    /// selected twice.
    ///
    /// Due means: owner active, owner presence known and not away, watch active,
    /// and never checked or last checked before `now - staleness`.
    pub fn claim_due_watches(
        &self,
        now: DateTime<Utc>,
        staleness: chrono::Duration,
        limit: usize,
    ) -> Result<Vec<Watch>> {
        let cutoff = to_ts(now - staleness);
        let stamp = to_ts(now);
        let away = AWAY_STATUSES
            .iter()
            .map(|s| format!("'{s}'"))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "SELECT {WATCH_COLUMNS} FROM watches w JOIN users u ON u.id = w.user_id
             WHERE u.active = 1
               AND u.status IS NOT NULL
               AND u.status NOT IN ({away})
               AND w.active = 1
               AND (w.last_update IS NULL OR w.last_update < ?1)
             ORDER BY w.last_update IS NOT NULL, w.last_update, w.id
             LIMIT ?2"
        );

        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(|e| db_err("claim due", e))?;
        let mut due = {
            let mut stmt = tx.prepare(&sql).map_err(|e| db_err("claim due", e))?;
            let rows = stmt
                .query_map(params![cutoff, limit as i64], watch_from_row)
                .map_err(|e| db_err("claim due", e))?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
                .map_err(|e| db_err("claim due", e))?
        };
        for watch in due.iter_mut() {
            tx.execute(
                "UPDATE watches SET last_update = ?1 WHERE id = ?2",
                params![stamp, watch.id],
            )
            .map_err(|e| db_err("stamp watch", e))?;
            watch.last_update = from_ts(Some(stamp.clone()));
        }
        tx.commit().map_err(|e| db_err("claim due", e))?;
        Ok(due)
    }

    // ─── Patterns ───────────────────────────────────────────

    pub fn add_pattern(&self, watch_id: i64, regex: &str, positive: bool) -> Result<Pattern> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO patterns (watch_id, regex, positive) VALUES (?1, ?2, ?3)",
            params![watch_id, regex, positive],
        )
        .map_err(|e| db_err("add pattern", e))?;
        Ok(Pattern {
            id: conn.last_insert_rowid(),
            watch_id,
            regex: regex.to_string(),
            positive,
        })
    }

    /// Patterns of a watch in creation order.
    pub fn patterns_for_watch(&self, watch_id: i64) -> Result<Vec<Pattern>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare("SELECT id, watch_id, regex, positive FROM patterns WHERE watch_id = ?1 ORDER BY id")
            .map_err(|e| db_err("list patterns", e))?;
        let rows = stmt
            .query_map([watch_id], |row| {
                Ok(Pattern {
                    id: row.get(0)?,
                    watch_id: row.get(1)?,
                    regex: row.get(2)?,
                    positive: row.get(3)?,
                })
            })
            .map_err(|e| db_err("list patterns", e))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| db_err("list patterns", e))
    }

    /// Remove every pattern on a watch. Returns how many were removed.
    pub fn clear_patterns(&self, watch_id: i64) -> Result<usize> {
        let conn = self.lock()?;
        conn.execute("DELETE FROM patterns WHERE watch_id = ?1", [watch_id])
            .map_err(|e| db_err("clear patterns", e))
    }

    pub fn pattern_count(&self, watch_id: i64) -> Result<u64> {
        self.count("SELECT COUNT(*) FROM patterns WHERE watch_id = ?1", [watch_id])
    }

    // ─── Aggregates ─────────────────────────────────────────

    /// Active watches, known users, and distinct users owning a watch.
    pub fn presence_counts(&self) -> Result<PresenceCounts> {
        Ok(PresenceCounts {
            active_watches: self.count("SELECT COUNT(*) FROM watches WHERE active = 1", [])?,
            users: self.count("SELECT COUNT(*) FROM users", [])?,
            watchers: self.count("SELECT COUNT(DISTINCT user_id) FROM watches", [])?,
        })
    }

    pub fn user_count(&self) -> Result<u64> {
        self.count("SELECT COUNT(*) FROM users", [])
    }

    fn count<P: rusqlite::Params>(&self, sql: &str, params: P) -> Result<u64> {
        let conn = self.lock()?;
        conn.query_row(sql, params, |r| r.get::<_, i64>(0))
            .map(|n| n.max(0) as u64)
            .map_err(|e| db_err("count", e))
    }

    fn update_one<P: rusqlite::Params>(&self, sql: &str, params: P, what: &str) -> Result<()> {
        let conn = self.lock()?;
        let changed = conn
            .execute(sql, params)
            .map_err(|e| db_err(&format!("update {what}"), e))?;
        if changed == 0 {
            return Err(WhatsupError::Database(format!("no such {what}")));
        }
        Ok(())
    }
}

fn db_err(context: &str, e: rusqlite::Error) -> WhatsupError {
    WhatsupError::Database(format!("{context}: {e}"))
}

/// Fixed-width UTC timestamps so text comparison in SQL orders correctly.
fn to_ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn from_ts(s: Option<String>) -> Option<DateTime<Utc>> {
    s.and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map(|d| d.with_timezone(&Utc))
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        jid: row.get(1)?,
        active: row.get(2)?,
        status: row.get(3)?,
        quiet_until: from_ts(row.get(4)?),
    })
}

fn watch_from_row(row: &Row<'_>) -> rusqlite::Result<Watch> {
    Ok(Watch {
        id: row.get(0)?,
        user_id: row.get(1)?,
        url: row.get(2)?,
        active: row.get(3)?,
        status: row.get(4)?,
        last_update: from_ts(row.get(5)?),
        quiet_until: from_ts(row.get(6)?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn db_with_user(status: &str) -> (WatchDb, User) {
        let db = WatchDb::open_in_memory().unwrap();
        let user = db.update_user_status("dustin@spy.net", status).unwrap();
        (db, user)
    }

    #[test]
    fn test_open_file_backed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("whatsup.db");
        let db = WatchDb::open(&path).unwrap();
        db.ensure_user("a@b").unwrap();
        drop(db);

        let reopened = WatchDb::open(&path).unwrap();
        assert_eq!(reopened.user_count().unwrap(), 1);
    }

    #[test]
    fn test_ensure_user_is_idempotent() {
        let db = WatchDb::open_in_memory().unwrap();
        let a = db.ensure_user("a@b").unwrap();
        let b = db.ensure_user("a@b").unwrap();
        assert_eq!(a.id, b.id);
        assert!(a.active);
        assert_eq!(a.status, None);
    }

    #[test]
    fn test_presence_updates_status() {
        let (db, user) = db_with_user("available");
        assert_eq!(user.status.as_deref(), Some("available"));
        let user = db.update_user_status("dustin@spy.net", "dnd").unwrap();
        assert_eq!(user.status.as_deref(), Some("dnd"));
        assert_eq!(db.user_count().unwrap(), 1);
    }

    #[test]
    fn test_duplicate_watch_rejected() {
        let (db, user) = db_with_user("available");
        db.create_watch(user.id, "http://x/").unwrap();
        let err = db.create_watch(user.id, "http://x/").unwrap_err();
        assert!(matches!(err, WhatsupError::Database(_)));
    }

    #[test]
    fn test_watches_sorted_by_url() {
        let (db, user) = db_with_user("available");
        db.create_watch(user.id, "http://b/").unwrap();
        db.create_watch(user.id, "http://a/").unwrap();
        let urls: Vec<_> = db
            .watches_for_user(user.id)
            .unwrap()
            .into_iter()
            .map(|w| w.url)
            .collect();
        assert_eq!(urls, vec!["http://a/", "http://b/"]);
    }

    #[test]
    fn test_delete_watch_cascades_patterns() {
        let (db, user) = db_with_user("available");
        let watch = db.create_watch(user.id, "http://x/").unwrap();
        db.add_pattern(watch.id, "OK", true).unwrap();
        db.add_pattern(watch.id, "DOWN", false).unwrap();

        assert!(db.delete_watch(watch.id).unwrap());
        assert!(db.patterns_for_watch(watch.id).unwrap().is_empty());
        assert!(db.watches_for_user(user.id).unwrap().is_empty());
        assert!(!db.delete_watch(watch.id).unwrap());
    }

    #[test]
    fn test_patterns_in_creation_order() {
        let (db, user) = db_with_user("available");
        let watch = db.create_watch(user.id, "http://x/").unwrap();
        db.add_pattern(watch.id, "zzz", true).unwrap();
        db.add_pattern(watch.id, "aaa", false).unwrap();
        let regexes: Vec<_> = db
            .patterns_for_watch(watch.id)
            .unwrap()
            .into_iter()
            .map(|p| p.regex)
            .collect();
        assert_eq!(regexes, vec!["zzz", "aaa"]);
        assert_eq!(db.clear_patterns(watch.id).unwrap(), 2);
        assert_eq!(db.pattern_count(watch.id).unwrap(), 0);
    }

    #[test]
    fn test_claim_stamps_and_excludes_in_flight() {
        let (db, user) = db_with_user("available");
        let watch = db.create_watch(user.id, "http://x/").unwrap();
        let now = Utc::now();
        let staleness = chrono::Duration::minutes(10);

        let claimed = db.claim_due_watches(now, staleness, 50).unwrap();
        assert_eq!(claimed.len(), 1);
        let stored = db.get_watch(watch.id).unwrap().unwrap();
        assert_eq!(stored.last_update, claimed[0].last_update);
        assert!(stored.last_update.is_some());

        // Still in flight one minute later.
        let again = db
            .claim_due_watches(now + chrono::Duration::minutes(1), staleness, 50)
            .unwrap();
        assert!(again.is_empty());

        // Stale again after the threshold.
        let later = db
            .claim_due_watches(now + chrono::Duration::minutes(11), staleness, 50)
            .unwrap();
        assert_eq!(later.len(), 1);
    }

    #[test]
    fn test_claim_respects_owner_and_watch_flags() {
        let db = WatchDb::open_in_memory().unwrap();
        let staleness = chrono::Duration::minutes(10);
        let now = Utc::now();

        let away = db.update_user_status("away@x", "dnd").unwrap();
        db.create_watch(away.id, "http://away/").unwrap();

        let unknown = db.ensure_user("unknown@x").unwrap();
        db.create_watch(unknown.id, "http://unknown/").unwrap();

        let off = db.update_user_status("off@x", "available").unwrap();
        db.create_watch(off.id, "http://off/").unwrap();
        db.set_user_active(off.id, false).unwrap();

        let here = db.update_user_status("here@x", "available").unwrap();
        let disabled = db.create_watch(here.id, "http://disabled/").unwrap();
        db.set_watch_active(disabled.id, false).unwrap();
        db.create_watch(here.id, "http://due/").unwrap();

        let claimed = db.claim_due_watches(now, staleness, 50).unwrap();
        let urls: Vec<_> = claimed.iter().map(|w| w.url.as_str()).collect();
        assert_eq!(urls, vec!["http://due/"]);
    }

    #[test]
    fn test_claim_is_capped() {
        let (db, user) = db_with_user("available");
        for i in 0..60 {
            db.create_watch(user.id, &format!("http://x/{i}")).unwrap();
        }
        let claimed = db
            .claim_due_watches(Utc::now(), chrono::Duration::minutes(10), 50)
            .unwrap();
        assert_eq!(claimed.len(), 50);
    }

    #[test]
    fn test_presence_counts() {
        let db = WatchDb::open_in_memory().unwrap();
        let a = db.ensure_user("a@x").unwrap();
        let b = db.ensure_user("b@x").unwrap();
        db.ensure_user("c@x").unwrap();
        db.create_watch(a.id, "http://1/").unwrap();
        let w = db.create_watch(a.id, "http://2/").unwrap();
        db.create_watch(b.id, "http://3/").unwrap();
        db.set_watch_active(w.id, false).unwrap();

        let counts = db.presence_counts().unwrap();
        assert_eq!(
            counts,
            PresenceCounts {
                active_watches: 2,
                users: 3,
                watchers: 2
            }
        );
    }

    #[test]
    fn test_quiet_round_trip() {
        let (db, user) = db_with_user("available");
        let until = Utc::now() + chrono::Duration::hours(2);
        db.set_user_quiet(user.id, Some(until)).unwrap();
        let stored = db.get_user(user.id).unwrap().unwrap();
        assert!(stored.is_quiet(Utc::now()));
    }

    #[test]
    fn test_update_missing_watch_errors() {
        let db = WatchDb::open_in_memory().unwrap();
        assert!(db.record_status(42, 200).is_err());
    }
}
