//! Muster Node - active/standby guild roster service
//!
//! Runs the guild roster behind a single-active-writer election:
//!
//! - **Bootstrap**: open storage, block until the lease is held, start renewal
//! - **Admin socket**: roster commands over newline-delimited JSON
//! - **Shutdown**: SIGINT/SIGTERM or lease loss, then best-effort release
//!
//! Any number of nodes may share one database file; only the lease holder
//! accepts roster writes.

pub mod admin_socket;
pub mod config;
pub mod error;
pub mod format;
pub mod node;
pub mod shutdown;

pub use admin_socket::{AdminCommand, AdminResponse, AdminSocket, CommandHandler, AVAILABILITY_SLOTS};
pub use config::NodeConfig;
pub use error::{Error, Result};
pub use node::{MusterNode, NodeExit};
pub use shutdown::Shutdown;
