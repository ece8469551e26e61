//! Serialized storage engine over a single SQLite connection.
//!
//! SQLite serializes writers internally and reports contention as opaque
//! `SQLITE_BUSY` errors. The engine keeps exactly one physical connection and
//! puts an in-process read/write gate in front of it, so contention shows up
//! as a bounded wait on the gate instead:
//!
//! - **Writes** ([`Storage::execute`], [`Storage::write`]) take the gate in
//!   exclusive mode.
//! - **Reads** ([`Storage::query`], [`Storage::read`]) take it in shared mode.
//!   The connection itself still runs them one at a time; the shared gate only
//!   keeps a read from landing inside a writer's open transaction.
//! - **Transactions** ([`Storage::transaction`]) hold the exclusive gate for
//!   the whole unit and roll back on any error before releasing it.
//!
//! Every call takes a deadline. When it elapses the caller gets
//! [`Error::Timeout`], the running statement is interrupted, and the gate is
//! released as soon as the blocking worker returns.

use crate::error::{Error, Result};
use crate::schema;
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, InterruptHandle, Row, Transaction, TransactionBehavior};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

/// Default deadline applied to storage calls.
pub const DEFAULT_OP_TIMEOUT: Duration = Duration::from_secs(3);

/// How long SQLite itself waits on a locked database file before failing.
const ENGINE_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Storage handle owning the single connection. Share it as `Arc<Storage>`.
pub struct Storage {
    conn: Arc<Mutex<Option<Connection>>>,
    gate: Arc<RwLock<()>>,
    interrupt: Arc<InterruptHandle>,
    /// Token of the operation whose body currently owns the connection.
    running: Arc<Mutex<Option<u64>>>,
    next_op: AtomicU64,
    path: Option<PathBuf>,
}

impl Storage {
    /// Open or create a database file and apply the schema.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir)?;
            }
        }

        let conn = Connection::open(path)?;
        conn.busy_timeout(ENGINE_BUSY_TIMEOUT)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        // WAL is best-effort; some filesystems refuse it.
        if let Err(e) = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get::<_, String>(0)) {
            tracing::warn!("Could not enable WAL journal mode: {}", e);
        }

        let storage = Self::from_connection(conn, Some(path.to_path_buf()))?;
        tracing::debug!("Opened storage at {:?}", path);
        Ok(storage)
    }

    /// Open a private in-memory database (tests, tooling).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn, None)
    }

    fn from_connection(conn: Connection, path: Option<PathBuf>) -> Result<Self> {
        schema::apply(&conn)?;
        let interrupt = Arc::new(conn.get_interrupt_handle());
        Ok(Self {
            conn: Arc::new(Mutex::new(Some(conn))),
            gate: Arc::new(RwLock::new(())),
            interrupt,
            running: Arc::new(Mutex::new(None)),
            next_op: AtomicU64::new(0),
            path,
        })
    }

    /// Path of the backing file, `None` for in-memory stores.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Run one mutating statement under the exclusive gate. Returns rows affected.
    pub async fn execute(
        &self,
        sql: impl Into<String>,
        params: Vec<Value>,
        timeout: Duration,
    ) -> Result<usize> {
        let sql = sql.into();
        self.write(timeout, move |conn| {
            Ok(conn.execute(&sql, params_from_iter(params))?)
        })
        .await
    }

    /// Run a read under the shared gate, mapping every returned row.
    pub async fn query<T, M>(
        &self,
        sql: impl Into<String>,
        params: Vec<Value>,
        timeout: Duration,
        mut map: M,
    ) -> Result<Vec<T>>
    where
        T: Send + 'static,
        M: FnMut(&Row<'_>) -> rusqlite::Result<T> + Send + 'static,
    {
        let sql = sql.into();
        self.read(timeout, move |conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params_from_iter(params), |row| map(row))?
                .collect::<rusqlite::Result<Vec<T>>>()?;
            Ok(rows)
        })
        .await
    }

    /// Run `body` against the connection under the shared gate.
    pub async fn read<T, F>(&self, timeout: Duration, body: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
    {
        let deadline = Instant::now() + timeout;
        let guard = tokio::time::timeout_at(deadline, Arc::clone(&self.gate).read_owned())
            .await
            .map_err(|_| Error::Timeout(timeout))?;
        self.run_blocking(guard, deadline, timeout, move |conn| body(conn))
            .await
    }

    /// Run `body` against the connection under the exclusive gate.
    pub async fn write<T, F>(&self, timeout: Duration, body: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
    {
        let deadline = Instant::now() + timeout;
        let guard = tokio::time::timeout_at(deadline, Arc::clone(&self.gate).write_owned())
            .await
            .map_err(|_| Error::Timeout(timeout))?;
        self.run_blocking(guard, deadline, timeout, move |conn| body(conn))
            .await
    }

    /// Run `body` as one atomic unit under the exclusive gate.
    ///
    /// The transaction starts with `BEGIN IMMEDIATE`. If `body` returns an
    /// error the unit is rolled back before the gate is released; otherwise it
    /// is committed.
    pub async fn transaction<T, F>(&self, timeout: Duration, body: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Transaction<'_>) -> Result<T> + Send + 'static,
    {
        let deadline = Instant::now() + timeout;
        let guard = tokio::time::timeout_at(deadline, Arc::clone(&self.gate).write_owned())
            .await
            .map_err(|_| Error::Timeout(timeout))?;
        self.run_blocking(guard, deadline, timeout, move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            match body(&tx) {
                Ok(value) => {
                    tx.commit()?;
                    Ok(value)
                }
                Err(e) => {
                    if let Err(rollback) = tx.rollback() {
                        tracing::warn!("Rollback failed after {}: {}", e, rollback);
                    }
                    Err(e)
                }
            }
        })
        .await
    }

    /// Close the connection once in-flight work has drained.
    pub async fn close(&self) -> Result<()> {
        let _guard = self.gate.write().await;
        let conn = self.conn.lock().map_err(|_| Error::Poisoned)?.take();
        match conn {
            Some(conn) => conn.close().map_err(|(_, e)| Error::Storage(e)),
            None => Ok(()),
        }
    }

    /// Hand the connection to a blocking worker while `guard` pins the gate.
    async fn run_blocking<G, T, F>(
        &self,
        guard: G,
        deadline: Instant,
        timeout: Duration,
        body: F,
    ) -> Result<T>
    where
        G: Send + 'static,
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        let running = Arc::clone(&self.running);
        let op = self.next_op.fetch_add(1, Ordering::Relaxed);
        let task = tokio::task::spawn_blocking(move || {
            // The gate stays held until the worker finishes, even if the
            // caller has already given up on it.
            let _guard = guard;
            let mut slot = conn.lock().map_err(|_| Error::Poisoned)?;
            let conn = slot.as_mut().ok_or(Error::Closed)?;
            *running.lock().map_err(|_| Error::Poisoned)? = Some(op);
            let result = body(conn);
            // Cleared before the connection is released to the next worker.
            *running.lock().map_err(|_| Error::Poisoned)? = None;
            result
        });

        match tokio::time::timeout_at(deadline, task).await {
            Ok(joined) => joined.map_err(|e| Error::Task(e.to_string()))?,
            Err(_) => {
                if self.interrupt_if_running(op)? {
                    tracing::warn!("Storage operation exceeded {:?}, interrupted", timeout);
                }
                Err(Error::Timeout(timeout))
            }
        }
    }

    /// Interrupt the engine if operation `op` is the one executing.
    ///
    /// The check and the interrupt happen under the lock the worker takes to
    /// publish and clear its token, so a finished operation can never
    /// interrupt the one that runs after it.
    fn interrupt_if_running(&self, op: u64) -> Result<bool> {
        let current = self.running.lock().map_err(|_| Error::Poisoned)?;
        if *current == Some(op) {
            self.interrupt.interrupt();
            return Ok(true);
        }
        Ok(false)
    }
}

impl std::fmt::Debug for Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Storage").field("path", &self.path).finish()
    }
}
