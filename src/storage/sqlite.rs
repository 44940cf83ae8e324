use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Result};
use serde::{Deserialize, Serialize};

use crate::models::attack::{AttackAttempt, BlockType};

const TIMESTAMP_FMT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OriginBlockRow {
    pub id: i64,
    pub origin: String,
    pub reason: String,
    pub block_type: String,
    pub attack_kind: Option<String>,
    pub violation_count: u64,
    pub created_at: String,
    pub updated_at: String,
    pub expires_at: Option<String>,
    pub is_active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttackAttemptRow {
    pub id: i64,
    pub origin: String,
    pub attack_kind: String,
    pub endpoint: String,
    pub user_id: Option<String>,
    pub user_agent: Option<String>,
    pub timestamp: String,
    pub resulted_in_block: bool,
}

/// Durable store for the attack ledger and the origin block list.
/// Blocks are deactivated, never deleted; both tables are the audit trail.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn new(path: &str) -> Result<Self> {
        let conn = Connection::open(path)?;

        conn.execute_batch("PRAGMA journal_mode=WAL;")?;

        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS attack_attempts (
                id                INTEGER PRIMARY KEY AUTOINCREMENT,
                origin            TEXT NOT NULL,
                attack_kind       TEXT NOT NULL,
                endpoint          TEXT NOT NULL,
                user_id           TEXT,
                user_agent        TEXT,
                timestamp         TEXT NOT NULL,
                resulted_in_block INTEGER NOT NULL DEFAULT 0
            );
            CREATE INDEX IF NOT EXISTS idx_attempts_timestamp
                ON attack_attempts (timestamp);
            CREATE INDEX IF NOT EXISTS idx_attempts_origin
                ON attack_attempts (origin);

            CREATE TABLE IF NOT EXISTS origin_blocks (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                origin          TEXT NOT NULL,
                reason          TEXT NOT NULL,
                block_type      TEXT NOT NULL DEFAULT 'automatic',
                attack_kind     TEXT,
                violation_count INTEGER NOT NULL DEFAULT 0,
                created_at      TEXT DEFAULT (datetime('now')),
                updated_at      TEXT DEFAULT (datetime('now')),
                expires_at      TEXT,
                is_active       INTEGER NOT NULL DEFAULT 1
            );
            CREATE INDEX IF NOT EXISTS idx_blocks_origin_active
                ON origin_blocks (origin, is_active);
            ",
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    // -----------------------------------------------------------------------
    // Attack ledger
    // -----------------------------------------------------------------------

    pub fn insert_attempt(&self, attempt: &AttackAttempt) -> Result<i64> {
        let conn = self.conn.lock().expect("sqlite mutex poisoned");
        conn.execute(
            "INSERT INTO attack_attempts
             (origin, attack_kind, endpoint, user_id, user_agent, timestamp, resulted_in_block)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                attempt.origin.to_string(),
                attempt.kind.to_string(),
                attempt.endpoint,
                attempt.user_id,
                attempt.user_agent,
                attempt.timestamp.format(TIMESTAMP_FMT).to_string(),
                attempt.resulted_in_block as i32,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn get_recent_attempts(&self, limit: usize) -> Result<Vec<AttackAttemptRow>> {
        let conn = self.conn.lock().expect("sqlite mutex poisoned");
        let mut stmt = conn.prepare(
            "SELECT id, origin, attack_kind, endpoint, user_id, user_agent,
                    timestamp, resulted_in_block
             FROM attack_attempts ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok(AttackAttemptRow {
                id: row.get(0)?,
                origin: row.get(1)?,
                attack_kind: row.get(2)?,
                endpoint: row.get(3)?,
                user_id: row.get(4)?,
                user_agent: row.get(5)?,
                timestamp: row.get(6)?,
                resulted_in_block: row.get::<_, i32>(7)? != 0,
            })
        })?;
        rows.collect()
    }

    // -----------------------------------------------------------------------
    // Origin blocks
    // -----------------------------------------------------------------------

    /// Create-or-update the active block for `origin` of the given type.
    /// Repeated escalations refresh the existing row's snapshot and expiry
    /// instead of inserting duplicates; manual and automatic blocks never
    /// touch each other's rows.
    pub fn upsert_active_block(
        &self,
        origin: &str,
        block_type: BlockType,
        reason: &str,
        attack_kind: Option<&str>,
        violation_count: u64,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let conn = self.conn.lock().expect("sqlite mutex poisoned");
        let expires_str = expires_at.map(|dt| dt.format(TIMESTAMP_FMT).to_string());

        let updated = conn.execute(
            "UPDATE origin_blocks
             SET reason = ?1, attack_kind = ?2, violation_count = ?3,
                 expires_at = ?4, updated_at = datetime('now')
             WHERE origin = ?5 AND block_type = ?6 AND is_active = 1",
            params![
                reason,
                attack_kind,
                violation_count as i64,
                expires_str,
                origin,
                block_type.to_string(),
            ],
        )?;

        if updated == 0 {
            conn.execute(
                "INSERT INTO origin_blocks
                 (origin, reason, block_type, attack_kind, violation_count, expires_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    origin,
                    reason,
                    block_type.to_string(),
                    attack_kind,
                    violation_count as i64,
                    expires_str,
                ],
            )?;
        }
        Ok(())
    }

    /// All origins with an active, non-expired block. The cache snapshot is
    /// built from this set.
    pub fn list_active_blocks(&self) -> Result<Vec<String>> {
        let conn = self.conn.lock().expect("sqlite mutex poisoned");
        let mut stmt = conn.prepare(
            "SELECT DISTINCT origin FROM origin_blocks
             WHERE is_active = 1
               AND (expires_at IS NULL OR expires_at > datetime('now'))",
        )?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        rows.collect()
    }

    /// Deactivate every active block for `origin` (manual unblock).
    /// Returns true if any row changed. Rows stay behind as audit trail.
    pub fn deactivate_block(&self, origin: &str) -> Result<bool> {
        let conn = self.conn.lock().expect("sqlite mutex poisoned");
        let changed = conn.execute(
            "UPDATE origin_blocks
             SET is_active = 0, updated_at = datetime('now')
             WHERE origin = ?1 AND is_active = 1",
            params![origin],
        )?;
        Ok(changed > 0)
    }

    pub fn get_blocks(&self, active_only: bool) -> Result<Vec<OriginBlockRow>> {
        let conn = self.conn.lock().expect("sqlite mutex poisoned");
        let sql = if active_only {
            "SELECT id, origin, reason, block_type, attack_kind, violation_count,
                    created_at, updated_at, expires_at, is_active
             FROM origin_blocks WHERE is_active = 1 ORDER BY updated_at DESC"
        } else {
            "SELECT id, origin, reason, block_type, attack_kind, violation_count,
                    created_at, updated_at, expires_at, is_active
             FROM origin_blocks ORDER BY updated_at DESC"
        };
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map([], |row| {
            Ok(OriginBlockRow {
                id: row.get(0)?,
                origin: row.get(1)?,
                reason: row.get(2)?,
                block_type: row.get(3)?,
                attack_kind: row.get(4)?,
                violation_count: row.get::<_, i64>(5)? as u64,
                created_at: row.get(6)?,
                updated_at: row.get(7)?,
                expires_at: row.get(8)?,
                is_active: row.get::<_, i32>(9)? != 0,
            })
        })?;
        rows.collect()
    }

    pub fn get_active_block(&self, origin: &str) -> Result<Option<OriginBlockRow>> {
        let conn = self.conn.lock().expect("sqlite mutex poisoned");
        let mut stmt = conn.prepare(
            "SELECT id, origin, reason, block_type, attack_kind, violation_count,
                    created_at, updated_at, expires_at, is_active
             FROM origin_blocks
             WHERE origin = ?1 AND is_active = 1
             ORDER BY updated_at DESC LIMIT 1",
        )?;
        stmt.query_row(params![origin], |row| {
            Ok(OriginBlockRow {
                id: row.get(0)?,
                origin: row.get(1)?,
                reason: row.get(2)?,
                block_type: row.get(3)?,
                attack_kind: row.get(4)?,
                violation_count: row.get::<_, i64>(5)? as u64,
                created_at: row.get(6)?,
                updated_at: row.get(7)?,
                expires_at: row.get(8)?,
                is_active: row.get::<_, i32>(9)? != 0,
            })
        })
        .optional()
    }

    // -----------------------------------------------------------------------
    // Dashboard aggregates (reporting only, not on the admission hot path)
    // -----------------------------------------------------------------------

    pub fn attempts_since(&self, from: DateTime<Utc>) -> Result<u64> {
        let conn = self.conn.lock().expect("sqlite mutex poisoned");
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM attack_attempts WHERE timestamp >= ?1",
            params![from.format(TIMESTAMP_FMT).to_string()],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    pub fn attempts_by_kind(&self, from: DateTime<Utc>) -> Result<Vec<(String, u64)>> {
        let conn = self.conn.lock().expect("sqlite mutex poisoned");
        let mut stmt = conn.prepare(
            "SELECT attack_kind, COUNT(*) FROM attack_attempts
             WHERE timestamp >= ?1
             GROUP BY attack_kind ORDER BY COUNT(*) DESC",
        )?;
        let rows = stmt.query_map(params![from.format(TIMESTAMP_FMT).to_string()], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u64))
        })?;
        rows.collect()
    }

    pub fn attempts_by_day(&self, days: u32) -> Result<Vec<(String, u64)>> {
        let conn = self.conn.lock().expect("sqlite mutex poisoned");
        let mut stmt = conn.prepare(
            "SELECT date(timestamp), COUNT(*) FROM attack_attempts
             WHERE timestamp >= datetime('now', ?1)
             GROUP BY date(timestamp) ORDER BY date(timestamp) ASC",
        )?;
        let modifier = format!("-{} days", days);
        let rows = stmt.query_map(params![modifier], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u64))
        })?;
        rows.collect()
    }

    pub fn top_origins(&self, from: DateTime<Utc>, limit: usize) -> Result<Vec<(String, u64)>> {
        let conn = self.conn.lock().expect("sqlite mutex poisoned");
        let mut stmt = conn.prepare(
            "SELECT origin, COUNT(*) FROM attack_attempts
             WHERE timestamp >= ?1
             GROUP BY origin ORDER BY COUNT(*) DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(
            params![from.format(TIMESTAMP_FMT).to_string(), limit as i64],
            |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u64)),
        )?;
        rows.collect()
    }
}
