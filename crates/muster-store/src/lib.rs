//! Muster Store - serialized persistence for the guild roster and leader lease
//!
//! All state lives in one SQLite file reached through one physical
//! connection. Access is funnelled through [`Storage`], which puts an
//! in-process read/write gate and a deadline in front of every call.
//!
//! # Architecture
//!
//! - **Engine**: single connection, shared/exclusive gate, timed calls, transactions
//! - **Schema**: table creation and column migrations for older databases
//! - **Lease**: the singleton `leader` row used for active/standby election
//! - **Roster**: member records (names, resource counters, availability, role)
//!
//! # Example
//!
//! ```no_run
//! use muster_store::{RosterStore, Storage};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let storage = Arc::new(Storage::open("guild_data.db")?);
//!     let roster = RosterStore::new(Arc::clone(&storage));
//!     roster.upsert_member("1234", "Aria").await?;
//!     roster.set_lumber("1234", 1500).await?;
//!     storage.close().await?;
//!     Ok(())
//! }
//! ```

pub mod engine;
pub mod error;
pub mod lease;
pub mod roster;
pub mod schema;

pub use engine::{Storage, DEFAULT_OP_TIMEOUT};
pub use error::{Error, Result};
pub use lease::LeaseRecord;
pub use roster::{Member, RosterStore};
pub use schema::AVAILABILITY_NOT_SET;

// Re-exported so callers can build statement parameters and transaction bodies.
pub use rusqlite::types::Value;
pub use rusqlite::{Connection, Transaction};
