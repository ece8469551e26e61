//! Member roster backed by the shared storage engine.

use crate::engine::{Storage, DEFAULT_OP_TIMEOUT};
use crate::error::{Error, Result};
use rusqlite::types::Value;
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// A guild member and their last reported state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub member_id: String,
    pub display_name: String,
    pub war_orders: i64,
    pub lumber: i64,
    pub availability: String,
    /// Last-known role snapshot, empty when unknown.
    pub role_id: String,
}

/// Roster operations. Every call is one statement or one transaction under
/// the storage gate.
#[derive(Debug, Clone)]
pub struct RosterStore {
    storage: Arc<Storage>,
    timeout: Duration,
}

impl RosterStore {
    pub fn new(storage: Arc<Storage>) -> Self {
        Self {
            storage,
            timeout: DEFAULT_OP_TIMEOUT,
        }
    }

    /// Override the per-call deadline.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Insert a member or update their display name.
    pub async fn upsert_member(&self, member_id: &str, display_name: &str) -> Result<()> {
        self.storage
            .execute(
                UPSERT_MEMBER,
                vec![text(member_id), text(display_name)],
                self.timeout,
            )
            .await?;
        Ok(())
    }

    /// Insert or rename a member atomically. Returns `true` when the member is new.
    pub async fn register_member(&self, member_id: &str, display_name: &str) -> Result<bool> {
        let (id, name) = (member_id.to_string(), display_name.to_string());
        self.storage
            .transaction(self.timeout, move |tx| {
                let existed = tx
                    .query_row(
                        "SELECT 1 FROM members WHERE member_id = ?1",
                        params![id],
                        |_| Ok(()),
                    )
                    .optional()?
                    .is_some();
                tx.execute(UPSERT_MEMBER, params![id, name])?;
                Ok(!existed)
            })
            .await
    }

    /// Insert a member only if absent. Returns whether a row was created.
    pub async fn insert_member_if_missing(&self, member_id: &str, display_name: &str) -> Result<bool> {
        let affected = self
            .storage
            .execute(
                "INSERT OR IGNORE INTO members(member_id, display_name) VALUES(?1, ?2)",
                vec![text(member_id), text(display_name)],
                self.timeout,
            )
            .await?;
        Ok(affected > 0)
    }

    pub async fn member_exists(&self, member_id: &str) -> Result<bool> {
        let id = member_id.to_string();
        self.storage
            .read(self.timeout, move |conn| {
                let found = conn
                    .query_row(
                        "SELECT member_id FROM members WHERE member_id = ?1",
                        params![id],
                        |row| row.get::<_, String>(0),
                    )
                    .optional()?;
                Ok(found.is_some())
            })
            .await
    }

    pub async fn get_member(&self, member_id: &str) -> Result<Option<Member>> {
        let id = member_id.to_string();
        self.storage
            .read(self.timeout, move |conn| {
                Ok(conn
                    .query_row(
                        &format!("{} WHERE member_id = ?1", SELECT_MEMBER),
                        params![id],
                        member_from_row,
                    )
                    .optional()?)
            })
            .await
    }

    pub async fn set_war_orders(&self, member_id: &str, amount: i64) -> Result<()> {
        self.update_field("war_orders", member_id, Value::Integer(amount))
            .await
    }

    pub async fn set_lumber(&self, member_id: &str, amount: i64) -> Result<()> {
        self.update_field("lumber", member_id, Value::Integer(amount))
            .await
    }

    pub async fn set_availability(&self, member_id: &str, label: &str) -> Result<()> {
        self.update_field("availability", member_id, text(label))
            .await
    }

    /// Record the member's current role snapshot.
    pub async fn set_role(&self, member_id: &str, role_id: &str) -> Result<()> {
        self.update_field("role_id", member_id, text(role_id))
            .await
    }

    /// Remove a member. Returns whether a row was deleted.
    pub async fn delete_member(&self, member_id: &str) -> Result<bool> {
        let affected = self
            .storage
            .execute(
                "DELETE FROM members WHERE member_id = ?1",
                vec![text(member_id)],
                self.timeout,
            )
            .await?;
        Ok(affected > 0)
    }

    /// All members ordered by display name, case-insensitively.
    pub async fn list_members(&self) -> Result<Vec<Member>> {
        self.storage
            .query(
                format!("{} ORDER BY display_name COLLATE NOCASE", SELECT_MEMBER),
                vec![],
                self.timeout,
                member_from_row,
            )
            .await
    }

    async fn update_field(&self, column: &'static str, member_id: &str, value: Value) -> Result<()> {
        let affected = self
            .storage
            .execute(
                format!("UPDATE members SET {} = ?1 WHERE member_id = ?2", column),
                vec![value, text(member_id)],
                self.timeout,
            )
            .await?;
        if affected == 0 {
            return Err(Error::NotRegistered(member_id.to_string()));
        }
        Ok(())
    }
}

const UPSERT_MEMBER: &str = "INSERT INTO members(member_id, display_name) VALUES(?1, ?2)
     ON CONFLICT(member_id) DO UPDATE SET display_name = excluded.display_name";

const SELECT_MEMBER: &str =
    "SELECT member_id, display_name, war_orders, lumber, availability, role_id FROM members";

fn member_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Member> {
    Ok(Member {
        member_id: row.get(0)?,
        display_name: row.get(1)?,
        war_orders: row.get(2)?,
        lumber: row.get(3)?,
        availability: row.get(4)?,
        role_id: row.get(5)?,
    })
}

fn text(s: &str) -> Value {
    Value::Text(s.to_string())
}
