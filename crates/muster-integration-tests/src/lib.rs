//! Shared harness for multi-instance scenarios.
//!
//! Every instance gets its own [`Storage`] handle (its own connection) on one
//! temp database file, the way separate processes would share it. All
//! instances read the same [`ManualClock`] so tests decide when a lease ages.

use muster_election::{ElectionConfig, LeaderElection, ManualClock};
use muster_store::Storage;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Lease used by the scenarios unless a test overrides it.
pub const LEASE: Duration = Duration::from_secs(10);

/// A temp database shared by several simulated instances.
pub struct Cluster {
    dir: TempDir,
    clock: Arc<ManualClock>,
}

impl Cluster {
    pub fn new() -> std::io::Result<Self> {
        Ok(Self {
            dir: tempfile::tempdir()?,
            clock: Arc::new(ManualClock::new(1_700_000_000)),
        })
    }

    pub fn db_path(&self) -> PathBuf {
        self.dir.path().join("guild_data.db")
    }

    pub fn clock(&self) -> &ManualClock {
        &self.clock
    }

    /// Open a fresh connection to the shared database.
    pub fn storage(&self) -> muster_store::Result<Arc<Storage>> {
        Ok(Arc::new(Storage::open(self.db_path())?))
    }

    /// An instance with the default scenario settings.
    pub fn instance(&self, id: &str) -> muster_election::Result<Arc<LeaderElection>> {
        self.instance_with(
            ElectionConfig::for_instance(id)
                .with_lease_duration(LEASE)
                .with_retry_backoff(Duration::from_millis(20)),
        )
    }

    pub fn instance_with(&self, config: ElectionConfig) -> muster_election::Result<Arc<LeaderElection>> {
        let election = LeaderElection::new(self.storage()?, config)?.with_clock(self.clock.clone());
        Ok(Arc::new(election))
    }
}
