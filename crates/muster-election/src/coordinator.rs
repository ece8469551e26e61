//! Leader Election - single active writer via a lease row.
//!
//! This module provides the [`LeaderElection`] coordinator, which decides
//! which of possibly several running instances is allowed to act.
//!
//! # Protocol
//!
//! The lease is the singleton `leader` row (`owner`, `updated_at`). An
//! acquire attempt reads the row and, in the same `BEGIN IMMEDIATE`
//! transaction under the storage engine's exclusive gate, takes one of four
//! branches:
//!
//! 1. **Absent**: insert ourselves as owner.
//! 2. **Ours**: refresh the timestamp (idempotent re-acquire).
//! 3. **Foreign and stale**, takeover allowed: overwrite the owner.
//! 4. **Foreign and live**: change nothing, report failure.
//!
//! Because the read and the write commit together, two instances can never
//! both conclude they won a stale takeover; the transaction order is the
//! tie-break.
//!
//! # States
//!
//! `Unacquired` → `Active` on the first successful acquire, and `Active` →
//! `Released` on release or step-down. `Released` is terminal.

use crate::clock::{Clock, SystemClock};
use crate::config::{self, ElectionConfig};
use crate::error::{Error, Result};
use muster_store::lease::{self, LeaseRecord};
use muster_store::Storage;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Where this instance stands in the election.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElectionState {
    /// Never held the lease; may keep trying.
    Unacquired,
    /// Holds the lease and may perform active-only work.
    Active,
    /// Gave the lease up or lost it. Terminal.
    Released,
}

impl std::fmt::Display for ElectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unacquired => write!(f, "Unacquired"),
            Self::Active => write!(f, "Active"),
            Self::Released => write!(f, "Released"),
        }
    }
}

/// Which branch an acquire attempt took.
#[derive(Debug, Clone, PartialEq, Eq)]
enum AcquireOutcome {
    Created,
    Reacquired,
    TookOver { previous: String, age: i64 },
    Held { owner: String, age: i64 },
}

/// Lease-based leader election coordinator for one process instance.
pub struct LeaderElection {
    storage: Arc<Storage>,
    config: ElectionConfig,
    clock: Arc<dyn Clock>,
    state_tx: watch::Sender<ElectionState>,
}

impl LeaderElection {
    /// Create a coordinator over a shared storage handle.
    pub fn new(storage: Arc<Storage>, config: ElectionConfig) -> Result<Self> {
        config.validate()?;
        let (state_tx, _) = watch::channel(ElectionState::Unacquired);
        Ok(Self {
            storage,
            config,
            clock: Arc::new(SystemClock),
            state_tx,
        })
    }

    /// Replace the wall clock used to stamp and judge leases.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn instance_id(&self) -> &str {
        &self.config.instance_id
    }

    pub fn config(&self) -> &ElectionConfig {
        &self.config
    }

    pub fn state(&self) -> ElectionState {
        *self.state_tx.borrow()
    }

    pub fn is_active(&self) -> bool {
        self.state() == ElectionState::Active
    }

    /// Watch state transitions.
    pub fn subscribe(&self) -> watch::Receiver<ElectionState> {
        self.state_tx.subscribe()
    }

    /// Attempt to acquire (or re-acquire) the lease in one transaction.
    ///
    /// Returns `Ok(false)` when another instance holds a live lease, or a
    /// stale one and `takeover_if_stale` is unset.
    pub async fn try_acquire(&self, lease_duration: Duration, takeover_if_stale: bool) -> Result<bool> {
        config::check_lease(lease_duration)?;
        let state = self.state();
        if state == ElectionState::Released {
            return Err(Error::InvalidState {
                expected: "Unacquired or Active",
                actual: state.to_string(),
            });
        }

        let me = self.config.instance_id.clone();
        let now = self.clock.now();
        let outcome = self
            .storage
            .transaction(self.config.op_timeout, move |tx| {
                let outcome = match lease::load(tx)? {
                    None => {
                        lease::insert(tx, &me, now)?;
                        AcquireOutcome::Created
                    }
                    Some(LeaseRecord { owner, .. }) if owner == me => {
                        lease::touch(tx, &me, now)?;
                        AcquireOutcome::Reacquired
                    }
                    Some(record) if takeover_if_stale && record.is_stale(now, lease_duration) => {
                        lease::take_over(tx, &me, now)?;
                        AcquireOutcome::TookOver {
                            age: record.age(now),
                            previous: record.owner,
                        }
                    }
                    Some(record) => AcquireOutcome::Held {
                        age: record.age(now),
                        owner: record.owner,
                    },
                };
                Ok(outcome)
            })
            .await?;

        match outcome {
            AcquireOutcome::Held { owner, age } => {
                debug!("Lease held by {} (renewed {}s ago)", owner, age);
                Ok(false)
            }
            outcome => {
                if let AcquireOutcome::TookOver { previous, age } = &outcome {
                    warn!(
                        "Took over stale lease from {} (last renewed {}s ago)",
                        previous, age
                    );
                }
                let promoted = self.state_tx.send_if_modified(|state| {
                    if *state == ElectionState::Unacquired {
                        *state = ElectionState::Active;
                        true
                    } else {
                        false
                    }
                });
                if promoted {
                    info!("Leadership acquired by {}", self.config.instance_id);
                } else if outcome == AcquireOutcome::Reacquired {
                    debug!("Lease re-acquired by {}", self.config.instance_id);
                }
                Ok(true)
            }
        }
    }

    /// Refresh the lease timestamp if we still own it.
    ///
    /// `Ok(false)` means no row matched: another instance took the lease over
    /// (or it was released). Callers decide what that means for them.
    pub async fn renew(&self) -> Result<bool> {
        let me = self.config.instance_id.clone();
        let now = self.clock.now();
        let affected = self
            .storage
            .write(self.config.op_timeout, move |conn| Ok(lease::touch(conn, &me, now)?))
            .await?;
        Ok(affected > 0)
    }

    /// Delete the lease if we own it and move to `Released`.
    ///
    /// Safe to call unconditionally at shutdown: a no-op (returning `false`)
    /// when ownership was already lost.
    pub async fn release(&self) -> Result<bool> {
        let me = self.config.instance_id.clone();
        let affected = self
            .storage
            .write(self.config.op_timeout, move |conn| Ok(lease::delete_owned(conn, &me)?))
            .await?;
        self.state_tx.send_replace(ElectionState::Released);
        if affected > 0 {
            info!("Leadership released by {}", self.config.instance_id);
        } else {
            debug!("Release by {} found no lease to delete", self.config.instance_id);
        }
        Ok(affected > 0)
    }

    /// Block until the lease is acquired, retrying with a fixed backoff.
    ///
    /// Returns `Ok(false)` if `shutdown` flips to `true` (or its sender is
    /// dropped) first. Storage errors are logged and retried. With
    /// `max_attempts` set, exhaustion is [`Error::AcquireExhausted`].
    pub async fn acquire(&self, shutdown: &mut watch::Receiver<bool>) -> Result<bool> {
        let mut attempts = 0u32;
        loop {
            if *shutdown.borrow() {
                return Ok(false);
            }

            attempts += 1;
            match self
                .try_acquire(self.config.lease_duration, self.config.takeover_if_stale)
                .await
            {
                Ok(true) => return Ok(true),
                Ok(false) => debug!(
                    "Acquire attempt {} failed; retrying in {:?}",
                    attempts, self.config.retry_backoff
                ),
                Err(e @ (Error::InvalidState { .. } | Error::InvalidConfig(_))) => return Err(e),
                Err(e) => warn!("Leader acquire error: {}", e),
            }

            if let Some(max) = self.config.max_attempts {
                if attempts >= max {
                    return Err(Error::AcquireExhausted(attempts));
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.retry_backoff) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        return Ok(false);
                    }
                }
            }
        }
    }

    /// Read the lease row as it currently stands.
    pub async fn current_lease(&self) -> Result<Option<LeaseRecord>> {
        Ok(self
            .storage
            .read(self.config.op_timeout, |conn| Ok(lease::load(conn)?))
            .await?)
    }

    /// Current time, in epoch seconds, on the clock that stamps leases.
    pub fn now(&self) -> i64 {
        self.clock.now()
    }

    /// Drop the active role after discovering the lease belongs to someone else.
    pub(crate) fn step_down(&self) {
        self.state_tx.send_replace(ElectionState::Released);
    }
}

impl std::fmt::Debug for LeaderElection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LeaderElection")
            .field("instance_id", &self.config.instance_id)
            .field("state", &self.state())
            .finish()
    }
}
