//! Muster Election - one active instance at a time
//!
//! Several copies of the service may run at once (for example during a
//! rolling deploy), but only one may process the roster. This crate elects
//! that instance with a time-bounded lease stored in the shared database:
//!
//! - **Coordinator**: [`LeaderElection`] implements acquire / renew / release
//!   against the singleton lease row, atomically via storage transactions
//! - **Renewal**: [`RenewalHandle`] keeps the lease fresh in the background
//!   and reports when it is lost
//! - **Clock**: pluggable epoch-seconds source so tests can age leases
//!
//! # Example
//!
//! ```no_run
//! use muster_election::{ElectionConfig, LeaderElection, RenewalHandle};
//! use muster_store::Storage;
//! use std::sync::Arc;
//! use tokio::sync::watch;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let storage = Arc::new(Storage::open("guild_data.db")?);
//!     let election = Arc::new(LeaderElection::new(storage, ElectionConfig::default())?);
//!
//!     let (_shutdown_tx, mut shutdown) = watch::channel(false);
//!     if election.acquire(&mut shutdown).await? {
//!         let renewal = RenewalHandle::spawn(Arc::clone(&election));
//!         // ... active-only work ...
//!         renewal.stop().await;
//!         election.release().await?;
//!     }
//!     Ok(())
//! }
//! ```

pub mod clock;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod renewal;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{default_instance_id, ElectionConfig, LeaseLossPolicy, MIN_LEASE};
pub use coordinator::{ElectionState, LeaderElection};
pub use error::{Error, Result};
pub use renewal::{RenewalExit, RenewalHandle};
