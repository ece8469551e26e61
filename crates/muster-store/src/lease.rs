//! The leader lease row.
//!
//! The `leader` table holds at most one row (`id = 1`, enforced by a CHECK
//! constraint), acting as a mutex persisted in the database. These helpers
//! run against a borrowed connection so they compose inside a
//! [`Storage::transaction`](crate::Storage::transaction).

use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Sentinel primary key of the singleton lease row.
pub const LEASE_ROW_ID: i64 = 1;

/// Current ownership of the active role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseRecord {
    /// Instance holding the lease.
    pub owner: String,
    /// Epoch seconds of the last acquire or renew by `owner`.
    pub updated_at: i64,
}

impl LeaseRecord {
    /// A lease is stale once `lease` has fully elapsed since the last renewal.
    pub fn is_stale(&self, now: i64, lease: Duration) -> bool {
        let lease = i64::try_from(lease.as_secs()).unwrap_or(i64::MAX);
        now.saturating_sub(self.updated_at) >= lease
    }

    /// Seconds since the last renewal, clamped at zero.
    pub fn age(&self, now: i64) -> i64 {
        now.saturating_sub(self.updated_at).max(0)
    }
}

/// Read the lease row, if any.
pub fn load(conn: &Connection) -> rusqlite::Result<Option<LeaseRecord>> {
    conn.query_row(
        "SELECT owner, updated_at FROM leader WHERE id = ?1",
        params![LEASE_ROW_ID],
        |row| {
            Ok(LeaseRecord {
                owner: row.get(0)?,
                updated_at: row.get(1)?,
            })
        },
    )
    .optional()
}

/// Create the lease row for `owner`. Fails if a row already exists.
pub fn insert(conn: &Connection, owner: &str, now: i64) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO leader(id, owner, updated_at) VALUES(?1, ?2, ?3)",
        params![LEASE_ROW_ID, owner, now],
    )?;
    Ok(())
}

/// Refresh the timestamp if `owner` still holds the lease. Returns rows affected.
///
/// The timestamp never moves backwards for a fixed owner, even if the wall
/// clock does.
pub fn touch(conn: &Connection, owner: &str, now: i64) -> rusqlite::Result<usize> {
    conn.execute(
        "UPDATE leader SET updated_at = MAX(updated_at, ?1) WHERE id = ?2 AND owner = ?3",
        params![now, LEASE_ROW_ID, owner],
    )
}

/// Overwrite the owner unconditionally. Callers must have checked staleness
/// inside the same transaction.
pub fn take_over(conn: &Connection, owner: &str, now: i64) -> rusqlite::Result<usize> {
    conn.execute(
        "UPDATE leader SET owner = ?1, updated_at = ?2 WHERE id = ?3",
        params![owner, now, LEASE_ROW_ID],
    )
}

/// Delete the lease row if `owner` holds it. Returns rows affected.
pub fn delete_owned(conn: &Connection, owner: &str) -> rusqlite::Result<usize> {
    conn.execute(
        "DELETE FROM leader WHERE id = ?1 AND owner = ?2",
        params![LEASE_ROW_ID, owner],
    )
}
