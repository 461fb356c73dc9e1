//! Persistent set of revoked token ids.
//!
//! Tables:
//! - `revoked_tokens`: jti, revoked_at, expires_at
//!
//! Inserts are idempotent set insertions. Entries whose token has passed
//! its natural expiry carry no information and may be purged.

use anyhow::{Context, Result};
use parking_lot::{Mutex, RwLock};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::Path;

/// Storage for revoked token ids.
///
/// Implementations must make a committed `revoke` visible to every later
/// `is_revoked` on the same store.
pub trait RevocationStore: Send + Sync {
    /// Record `jti` as revoked at `now`. Returns `false` if it already was,
    /// in which case the first revocation time is kept.
    fn revoke(&self, jti: &str, expires_at: i64, now: i64) -> Result<bool>;

    /// When `jti` was revoked, if it was.
    fn revoked_at(&self, jti: &str) -> Result<Option<i64>>;

    fn is_revoked(&self, jti: &str) -> Result<bool> {
        Ok(self.revoked_at(jti)?.is_some())
    }

    /// Drop entries for tokens that expire at or before `now`.
    fn purge_expired(&self, now: i64) -> Result<u64>;

    /// Number of entries currently held.
    fn count(&self) -> Result<u64>;
}

// ── SQLite store ────────────────────────────────────────────────

pub struct SqliteRevocationStore {
    conn: Mutex<Connection>,
}

impl SqliteRevocationStore {
    /// Open (or create) the revocation table in the database at `db_path`.
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create database dir: {}", parent.display()))?;
        }
        let conn = Connection::open(db_path)
            .with_context(|| format!("Failed to open revocation DB: {}", db_path.display()))?;
        Self::init(conn)
    }

    /// Non-persistent store, mainly for tests.
    pub fn in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        // WAL mode for concurrent reads + crash safety
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA busy_timeout = 5000;

             CREATE TABLE IF NOT EXISTS revoked_tokens (
                jti TEXT PRIMARY KEY,
                revoked_at INTEGER NOT NULL,
                expires_at INTEGER NOT NULL
             );
             CREATE INDEX IF NOT EXISTS idx_revoked_expires ON revoked_tokens(expires_at);",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl RevocationStore for SqliteRevocationStore {
    fn revoke(&self, jti: &str, expires_at: i64, now: i64) -> Result<bool> {
        let conn = self.conn.lock();
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO revoked_tokens (jti, revoked_at, expires_at)
             VALUES (?1, ?2, ?3)",
            params![jti, now, expires_at],
        )?;
        Ok(inserted > 0)
    }

    fn revoked_at(&self, jti: &str) -> Result<Option<i64>> {
        let conn = self.conn.lock();
        let at = conn
            .query_row(
                "SELECT revoked_at FROM revoked_tokens WHERE jti = ?1",
                params![jti],
                |row| row.get(0),
            )
            .optional()?;
        Ok(at)
    }

    fn purge_expired(&self, now: i64) -> Result<u64> {
        let conn = self.conn.lock();
        let deleted = conn.execute(
            "DELETE FROM revoked_tokens WHERE expires_at <= ?1",
            params![now],
        )?;
        Ok(deleted as u64)
    }

    fn count(&self) -> Result<u64> {
        let conn = self.conn.lock();
        let count: i64 =
            conn.query_row("SELECT COUNT(*) FROM revoked_tokens", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}

// ── In-memory store ─────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
struct MemoryEntry {
    revoked_at: i64,
    expires_at: i64,
}

/// Process-local revocation list. Lost on restart.
#[derive(Debug, Default)]
pub struct MemoryRevocationStore {
    entries: RwLock<HashMap<String, MemoryEntry>>,
}

impl MemoryRevocationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RevocationStore for MemoryRevocationStore {
    fn revoke(&self, jti: &str, expires_at: i64, now: i64) -> Result<bool> {
        let mut entries = self.entries.write();
        if entries.contains_key(jti) {
            return Ok(false);
        }
        entries.insert(
            jti.to_owned(),
            MemoryEntry {
                revoked_at: now,
                expires_at,
            },
        );
        Ok(true)
    }

    fn revoked_at(&self, jti: &str) -> Result<Option<i64>> {
        Ok(self.entries.read().get(jti).map(|e| e.revoked_at))
    }

    fn purge_expired(&self, now: i64) -> Result<u64> {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, e| e.expires_at > now);
        Ok((before - entries.len()) as u64)
    }

    fn count(&self) -> Result<u64> {
        Ok(self.entries.read().len() as u64)
    }
}

// ── Tests ───────────────────────────────────────────────────────────
