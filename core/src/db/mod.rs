mod catalog;
mod collection;
mod reviews;
mod users;

use std::path::Path;

use chrono::{SecondsFormat, Utc};
use rusqlite::Connection;

use crate::error::Result;

pub struct Database {
    conn: Connection,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        let db = Database { conn };
        db.configure()?;
        db.migrate()?;
        tracing::debug!(path = %path.display(), "database opened");
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Database { conn };
        db.configure()?;
        db.migrate()?;
        Ok(db)
    }

    fn configure(&self) -> Result<()> {
        self.conn.execute_batch(
            "PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )?;
        Ok(())
    }

    fn migrate(&self) -> Result<()> {
        let version: i64 = self
            .conn
            .pragma_query_value(None, "user_version", |row| row.get(0))?;

        if version < 1 {
            self.conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS brand (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    name TEXT NOT NULL UNIQUE COLLATE NOCASE,
                    description TEXT,
                    created_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS gender (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    name TEXT NOT NULL UNIQUE COLLATE NOCASE
                );

                CREATE TABLE IF NOT EXISTS olfactory_family (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    name TEXT NOT NULL UNIQUE COLLATE NOCASE
                );

                CREATE TABLE IF NOT EXISTS olfactory_note (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    name TEXT NOT NULL UNIQUE COLLATE NOCASE
                );

                CREATE TABLE IF NOT EXISTS perfume (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    name TEXT NOT NULL,
                    brand_id INTEGER NOT NULL REFERENCES brand(id) ON DELETE CASCADE,
                    release_year INTEGER,
                    gender_id INTEGER REFERENCES gender(id) ON DELETE SET NULL,
                    olfactory_family_id INTEGER REFERENCES olfactory_family(id) ON DELETE SET NULL,
                    image_url TEXT,
                    description TEXT,
                    created_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS perfume_note (
                    perfume_id INTEGER NOT NULL REFERENCES perfume(id) ON DELETE CASCADE,
                    note_id INTEGER NOT NULL REFERENCES olfactory_note(id) ON DELETE CASCADE,
                    kind TEXT NOT NULL CHECK (kind IN ('top', 'heart', 'base')),
                    PRIMARY KEY (perfume_id, note_id, kind)
                );

                CREATE TABLE IF NOT EXISTS users (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    username TEXT NOT NULL UNIQUE COLLATE NOCASE,
                    email TEXT NOT NULL UNIQUE COLLATE NOCASE,
                    password_hash TEXT NOT NULL,
                    role TEXT NOT NULL DEFAULT 'user' CHECK (role IN ('user', 'admin')),
                    created_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS sessions (
                    token_hash TEXT PRIMARY KEY,
                    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                    expires_at TEXT NOT NULL,
                    created_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS review (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    perfume_id INTEGER NOT NULL REFERENCES perfume(id) ON DELETE CASCADE,
                    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                    rating INTEGER NOT NULL CHECK (rating BETWEEN 1 AND 5),
                    comment TEXT NOT NULL,
                    created_at TEXT NOT NULL,
                    updated_at TEXT
                );

                CREATE TABLE IF NOT EXISTS user_collection (
                    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                    perfume_id INTEGER NOT NULL REFERENCES perfume(id) ON DELETE CASCADE,
                    status TEXT NOT NULL CHECK (status IN ('owned', 'tested', 'wishlist')),
                    added_at TEXT NOT NULL,
                    PRIMARY KEY (user_id, perfume_id)
                );

                CREATE INDEX IF NOT EXISTS idx_perfume_brand ON perfume(brand_id);
                CREATE INDEX IF NOT EXISTS idx_perfume_name ON perfume(name);
                CREATE INDEX IF NOT EXISTS idx_review_perfume ON review(perfume_id);
                CREATE INDEX IF NOT EXISTS idx_collection_user_status ON user_collection(user_id, status);
                CREATE INDEX IF NOT EXISTS idx_sessions_user ON sessions(user_id);

                INSERT OR IGNORE INTO gender (name) VALUES ('Femme'), ('Homme'), ('Mixte');

                PRAGMA user_version = 1;",
            )?;
            tracing::info!("database schema initialised (version 1)");
        }

        Ok(())
    }

    /// Run `f` inside a transaction; any error rolls everything back.
    pub fn in_transaction<T>(&self, f: impl FnOnce(&Self) -> Result<T>) -> Result<T> {
        let tx = self.conn.unchecked_transaction()?;
        let value = f(self)?;
        tx.commit()?;
        Ok(value)
    }
}

/// Fixed-width UTC timestamp, so lexical order matches chronological order.
pub(crate) fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Nanos, true)
}

pub(crate) fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                || e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
    )
}

/// Escape `%`, `_` and `\` for use in a `LIKE ... ESCAPE '\'` pattern.
pub(crate) fn like_pattern(query: &str) -> String {
    let escaped = query
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{escaped}%")
}
