//! Table definitions and in-place migrations.

use rusqlite::Connection;

/// Default availability label for members who never picked a slot.
pub const AVAILABILITY_NOT_SET: &str = "Not Set";

const CREATE_TABLES: &str = "
CREATE TABLE IF NOT EXISTS members (
    member_id    TEXT PRIMARY KEY,
    display_name TEXT NOT NULL,
    war_orders   INTEGER DEFAULT 0,
    lumber       INTEGER DEFAULT 0,
    availability TEXT DEFAULT 'Not Set',
    role_id      TEXT DEFAULT ''
);
CREATE TABLE IF NOT EXISTS leader (
    id         INTEGER PRIMARY KEY CHECK (id = 1),
    owner      TEXT NOT NULL,
    updated_at INTEGER NOT NULL
);
";

/// Create missing tables and bring older databases up to date.
pub fn apply(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(CREATE_TABLES)?;
    ensure_role_column(conn)
}

/// Databases created before role snapshots existed lack `members.role_id`.
fn ensure_role_column(conn: &Connection) -> rusqlite::Result<()> {
    if has_column(conn, "members", "role_id")? {
        return Ok(());
    }
    tracing::info!("Migrating members table: adding role_id column");
    conn.execute("ALTER TABLE members ADD COLUMN role_id TEXT DEFAULT ''", [])?;
    Ok(())
}

fn has_column(conn: &Connection, table: &str, column: &str) -> rusqlite::Result<bool> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", table))?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<rusqlite::Result<Vec<String>>>()?;
    Ok(names.iter().any(|name| name == column))
}
