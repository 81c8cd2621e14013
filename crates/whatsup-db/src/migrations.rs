//! Schema creation.

use rusqlite::Connection;

pub fn run(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "
        PRAGMA foreign_keys = ON;

        CREATE TABLE IF NOT EXISTS users (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            jid TEXT NOT NULL UNIQUE,
            active INTEGER NOT NULL DEFAULT 1,
            status TEXT,
            quiet_until TEXT
        );

        CREATE TABLE IF NOT EXISTS watches (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id INTEGER NOT NULL REFERENCES users(id),
            url TEXT NOT NULL,
            active INTEGER NOT NULL DEFAULT 1,
            status INTEGER,
            last_update TEXT,
            quiet_until TEXT,
            UNIQUE (user_id, url)
        );

        CREATE TABLE IF NOT EXISTS patterns (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            watch_id INTEGER NOT NULL REFERENCES watches(id),
            regex TEXT NOT NULL,
            positive INTEGER NOT NULL DEFAULT 1
        );

        CREATE INDEX IF NOT EXISTS idx_watches_user ON watches(user_id);
        CREATE INDEX IF NOT EXISTS idx_watches_last_update ON watches(last_update);
        CREATE INDEX IF NOT EXISTS idx_patterns_watch ON patterns(watch_id);
        ",
    )
}
