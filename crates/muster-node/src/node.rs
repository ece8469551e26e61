//! Muster node implementation.
//!
//! A node:
//! - Opens the shared roster database
//! - Blocks until it holds the leader lease
//! - Keeps the lease fresh in the background
//! - Serves the admin socket while active
//! - Releases the lease on shutdown or steps down when it loses it

use crate::admin_socket::AdminSocket;
use crate::config::NodeConfig;
use crate::error::Result;
use crate::shutdown::{self, Shutdown};
use muster_election::{Clock, LeaderElection, RenewalExit, RenewalHandle};
use muster_store::{RosterStore, Storage};
use std::sync::Arc;

/// Why [`MusterNode::run`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeExit {
    /// Shut down before ever becoming active.
    NeverActive,
    /// Was active, then shut down on request and released the lease.
    Shutdown,
    /// Was active, then lost the lease to another instance.
    LeaseLost,
}

/// A Muster node instance.
pub struct MusterNode {
    config: NodeConfig,
    storage: Arc<Storage>,
    election: Arc<LeaderElection>,
    shutdown: Shutdown,
}

impl MusterNode {
    /// Open storage (creating the database directory if needed) and set up the
    /// election. Does not touch the lease yet.
    pub fn new(config: NodeConfig) -> Result<Self> {
        let storage = Arc::new(Storage::open(&config.db_path)?);
        let election = Arc::new(LeaderElection::new(
            Arc::clone(&storage),
            config.election.clone(),
        )?);

        Ok(Self {
            config,
            storage,
            election,
            shutdown: Shutdown::new(),
        })
    }

    /// Replace the lease clock. Only valid before [`run`](Self::run).
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Result<Self> {
        let election = LeaderElection::new(Arc::clone(&self.storage), self.config.election.clone())?
            .with_clock(clock);
        self.election = Arc::new(election);
        Ok(self)
    }

    pub fn election(&self) -> Arc<LeaderElection> {
        Arc::clone(&self.election)
    }

    pub fn storage(&self) -> Arc<Storage> {
        Arc::clone(&self.storage)
    }

    /// Handle that stops [`run`](Self::run) when triggered.
    pub fn shutdown_handle(&self) -> Shutdown {
        self.shutdown.clone()
    }

    /// Run until a shutdown signal arrives or the lease is lost.
    pub async fn run(self) -> Result<NodeExit> {
        tracing::info!("Muster node starting");
        tracing::info!("  Instance: {}", self.election.instance_id());
        tracing::info!("  Database: {:?}", self.config.db_path);
        tracing::info!("  Admin: {:?}", self.config.admin_socket);
        tracing::info!(
            "  Lease: {:?} (renew every {:?})",
            self.config.election.lease_duration,
            self.config.election.renew_interval()
        );

        let signals = {
            let shutdown = self.shutdown.clone();
            tokio::spawn(async move {
                match shutdown::wait_for_signal().await {
                    Ok(()) => shutdown.trigger(),
                    Err(e) => tracing::error!("Failed to install signal handler: {}", e),
                }
            })
        };

        let result = self.serve().await;

        signals.abort();
        if let Err(e) = self.storage.close().await {
            tracing::warn!("Failed to close storage: {}", e);
        }
        result
    }

    async fn serve(&self) -> Result<NodeExit> {
        let mut shutdown_rx = self.shutdown.subscribe();
        if !self.election.acquire(&mut shutdown_rx).await? {
            tracing::info!("Shutdown requested before acquiring the lease");
            return Ok(NodeExit::NeverActive);
        }

        let mut renewal = RenewalHandle::spawn(Arc::clone(&self.election));

        let roster = RosterStore::new(Arc::clone(&self.storage))
            .with_timeout(self.config.election.op_timeout);
        let admin = AdminSocket::new(
            roster,
            Arc::clone(&self.election),
            self.config.admin_socket.clone(),
        );
        let admin_task = tokio::spawn(admin.run(self.shutdown.subscribe()));

        tracing::info!("Instance {} is active", self.election.instance_id());

        let lost = tokio::select! {
            _ = self.shutdown.wait() => false,
            _ = renewal.lease_lost() => true,
        };

        // Stop serving before touching the lease
        self.shutdown.trigger();
        match admin_task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::error!("Admin socket error: {}", e),
            Err(e) => tracing::error!("Admin socket task failed: {}", e),
        }

        let exit = renewal.stop().await;
        if lost || exit == RenewalExit::LeaseLost {
            tracing::warn!(
                "Instance {} lost the lease; stepping down",
                self.election.instance_id()
            );
            return Ok(NodeExit::LeaseLost);
        }

        match self.election.release().await {
            Ok(true) => tracing::info!("Lease released"),
            Ok(false) => tracing::info!("Lease was no longer ours at shutdown"),
            Err(e) => tracing::warn!("Failed to release lease: {}", e),
        }
        Ok(NodeExit::Shutdown)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use muster_election::{ElectionConfig, ElectionState, LeaseLossPolicy, ManualClock, MIN_LEASE};
    use muster_store::lease;
    use std::path::Path;
    use std::time::Duration;
    use tempfile::tempdir;

    fn config(dir: &Path, instance: &str) -> NodeConfig {
        let db_path = dir.join("guild.db");
        NodeConfig {
            admin_socket: dir.join(format!("{}.sock", instance)),
            db_path,
            election: ElectionConfig::for_instance(instance)
                .with_lease_duration(Duration::from_secs(10))
                .with_retry_backoff(Duration::from_millis(20))
                .with_lease_loss_policy(LeaseLossPolicy::StepDown),
        }
    }

    async fn wait_for_state(election: &LeaderElection, state: ElectionState) {
        let mut rx = election.subscribe();
        tokio::time::timeout(Duration::from_secs(2), rx.wait_for(|s| *s == state))
            .await
            .unwrap()
            .unwrap();
    }

    #[test]
    fn opens_database_in_missing_directory() {
        let dir = tempdir().unwrap();
        let mut cfg = config(dir.path(), "host1-100");
        cfg.db_path = dir.path().join("nested/data/guild.db");

        let node = MusterNode::new(cfg).unwrap();
        assert!(dir.path().join("nested/data/guild.db").exists());
        assert_eq!(node.election().state(), ElectionState::Unacquired);
    }

    #[tokio::test]
    async fn shutdown_releases_lease() {
        let dir = tempdir().unwrap();
        let node = MusterNode::new(config(dir.path(), "host1-100")).unwrap();
        let election = node.election();
        let shutdown = node.shutdown_handle();
        let socket = dir.path().join("host1-100.sock");

        let task = tokio::spawn(node.run());
        wait_for_state(&election, ElectionState::Active).await;

        shutdown.trigger();
        let exit = tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(exit, NodeExit::Shutdown);
        assert_eq!(election.state(), ElectionState::Released);
        assert!(!socket.exists());

        let storage = Storage::open(dir.path().join("guild.db")).unwrap();
        let record = storage
            .read(Duration::from_secs(1), |conn| Ok(lease::load(conn)?))
            .await
            .unwrap();
        assert_eq!(record, None);
    }

    #[tokio::test]
    async fn shutdown_while_waiting_for_lease() {
        let dir = tempdir().unwrap();
        let holder = MusterNode::new(config(dir.path(), "host1-100")).unwrap();
        assert!(holder
            .election()
            .try_acquire(Duration::from_secs(10), true)
            .await
            .unwrap());

        let standby = MusterNode::new(config(dir.path(), "host2-200")).unwrap();
        let shutdown = standby.shutdown_handle();
        let election = standby.election();
        let task = tokio::spawn(standby.run());

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(election.state(), ElectionState::Unacquired);
        shutdown.trigger();

        let exit = tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(exit, NodeExit::NeverActive);

        let lease = holder.election().current_lease().await.unwrap().unwrap();
        assert_eq!(lease.owner, "host1-100");
    }

    #[tokio::test]
    async fn steps_down_after_takeover() {
        let dir = tempdir().unwrap();
        let clock = Arc::new(ManualClock::new(1_000));
        let mut cfg = config(dir.path(), "host1-100");
        cfg.election = cfg.election.with_lease_duration(MIN_LEASE);
        let node = MusterNode::new(cfg)
            .unwrap()
            .with_clock(clock.clone())
            .unwrap();
        let election = node.election();
        let task = tokio::spawn(node.run());
        wait_for_state(&election, ElectionState::Active).await;

        // Another instance finds the lease stale and takes it
        let rival_storage = Arc::new(Storage::open(dir.path().join("guild.db")).unwrap());
        let rival = LeaderElection::new(
            rival_storage,
            ElectionConfig::for_instance("host2-200").with_lease_duration(MIN_LEASE),
        )
        .unwrap()
        .with_clock(clock.clone());
        clock.advance(Duration::from_secs(5));
        assert!(rival.try_acquire(MIN_LEASE, true).await.unwrap());

        let exit = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(exit, NodeExit::LeaseLost);
        assert_eq!(election.state(), ElectionState::Released);

        let lease = rival.current_lease().await.unwrap().unwrap();
        assert_eq!(lease.owner, "host2-200");
    }
}
