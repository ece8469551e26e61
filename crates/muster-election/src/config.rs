//! Election configuration.

use crate::error::{Error, Result};
use muster_store::DEFAULT_OP_TIMEOUT;
use std::str::FromStr;
use std::time::Duration;

/// Shortest lease [`ElectionConfig::validate`] accepts.
///
/// Lease rows store whole seconds, so a measured age can read up to one second
/// more than the real one. A renewal lands every half lease; half the lease
/// plus that second must stay below the lease.
pub const MIN_LEASE: Duration = Duration::from_secs(3);

/// Check a lease length against the row's whole-second resolution.
pub fn check_lease(lease: Duration) -> Result<()> {
    if lease.subsec_nanos() != 0 {
        return Err(Error::InvalidConfig(format!(
            "lease duration must be whole seconds, got {:?}",
            lease
        )));
    }
    if lease < MIN_LEASE {
        return Err(Error::InvalidConfig(format!(
            "lease duration must be at least {:?}, got {:?}",
            MIN_LEASE, lease
        )));
    }
    Ok(())
}

/// What the renewal loop does when a renewal finds the lease owned by someone else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LeaseLossPolicy {
    /// Give up the active role: mark the coordinator released and stop renewing.
    #[default]
    StepDown,
    /// Log and keep renewing, trusting that the takeover was spurious.
    KeepRenewing,
}

impl FromStr for LeaseLossPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "step-down" | "step_down" | "stepdown" => Ok(Self::StepDown),
            "keep-renewing" | "keep_renewing" => Ok(Self::KeepRenewing),
            other => Err(Error::InvalidConfig(format!(
                "unknown lease loss policy {:?} (expected step-down or keep-renewing)",
                other
            ))),
        }
    }
}

impl std::fmt::Display for LeaseLossPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::StepDown => write!(f, "step-down"),
            Self::KeepRenewing => write!(f, "keep-renewing"),
        }
    }
}

/// Configuration for a [`LeaderElection`](crate::LeaderElection).
#[derive(Debug, Clone)]
pub struct ElectionConfig {
    /// Identity written into the lease row. Must be unique per running process.
    pub instance_id: String,

    /// How long a lease stays valid without renewal. Whole seconds, at least
    /// [`MIN_LEASE`].
    pub lease_duration: Duration,

    /// Fixed sleep between failed acquire attempts.
    pub retry_backoff: Duration,

    /// Deadline for each storage call.
    pub op_timeout: Duration,

    /// Whether the acquire loop may take over a stale lease from another owner.
    pub takeover_if_stale: bool,

    /// Give up acquiring after this many attempts. `None` retries forever.
    pub max_attempts: Option<u32>,

    /// Reaction to a renewal that affects no rows.
    pub on_lease_lost: LeaseLossPolicy,
}

impl Default for ElectionConfig {
    fn default() -> Self {
        Self {
            instance_id: default_instance_id(),
            lease_duration: Duration::from_secs(10),
            retry_backoff: Duration::from_secs(2),
            op_timeout: DEFAULT_OP_TIMEOUT,
            takeover_if_stale: true,
            max_attempts: None,
            on_lease_lost: LeaseLossPolicy::default(),
        }
    }
}

impl ElectionConfig {
    /// Default config for a given instance identity.
    #[must_use]
    pub fn for_instance(instance_id: impl Into<String>) -> Self {
        Self {
            instance_id: instance_id.into(),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_lease_duration(mut self, lease: Duration) -> Self {
        self.lease_duration = lease;
        self
    }

    #[must_use]
    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    #[must_use]
    pub fn with_op_timeout(mut self, timeout: Duration) -> Self {
        self.op_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_takeover_if_stale(mut self, takeover: bool) -> Self {
        self.takeover_if_stale = takeover;
        self
    }

    #[must_use]
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    #[must_use]
    pub fn with_lease_loss_policy(mut self, policy: LeaseLossPolicy) -> Self {
        self.on_lease_lost = policy;
        self
    }

    /// Renewal cadence: half the lease, so one late tick still lands before expiry.
    pub fn renew_interval(&self) -> Duration {
        self.lease_duration / 2
    }

    /// Reject configurations the protocol cannot honour.
    pub fn validate(&self) -> Result<()> {
        if self.instance_id.trim().is_empty() {
            return Err(Error::InvalidConfig("instance id must not be empty".into()));
        }
        check_lease(self.lease_duration)?;
        if self.op_timeout.is_zero() {
            return Err(Error::InvalidConfig("operation timeout must be positive".into()));
        }
        if self.max_attempts == Some(0) {
            return Err(Error::InvalidConfig("max attempts must be at least 1".into()));
        }
        Ok(())
    }
}

/// `<hostname>-<pid>`, unique per running process on a host.
pub fn default_instance_id() -> String {
    let host = std::env::var("HOSTNAME")
        .ok()
        .filter(|h| !h.trim().is_empty())
        .or_else(|| {
            std::fs::read_to_string("/etc/hostname")
                .ok()
                .map(|h| h.trim().to_string())
                .filter(|h| !h.is_empty())
        })
        .unwrap_or_else(|| "localhost".to_string());
    format!("{}-{}", host.trim(), std::process::id())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = ElectionConfig::for_instance("host1-100");
        assert_eq!(config.instance_id, "host1-100");
        assert_eq!(config.lease_duration, Duration::from_secs(10));
        assert_eq!(config.renew_interval(), Duration::from_secs(5));
        assert_eq!(config.retry_backoff, Duration::from_secs(2));
        assert!(config.takeover_if_stale);
        assert_eq!(config.max_attempts, None);
        assert_eq!(config.on_lease_lost, LeaseLossPolicy::StepDown);
        config.validate().unwrap();
    }

    #[test]
    fn default_instance_id_ends_with_pid() {
        let id = default_instance_id();
        assert!(id.ends_with(&format!("-{}", std::process::id())));
    }

    #[test]
    fn validation_rejects_bad_values() {
        assert!(ElectionConfig::for_instance("  ").validate().is_err());
        assert!(ElectionConfig::for_instance("a")
            .with_lease_duration(Duration::from_millis(500))
            .validate()
            .is_err());
        assert!(ElectionConfig::for_instance("a")
            .with_lease_duration(Duration::from_secs(2))
            .validate()
            .is_err());
        assert!(ElectionConfig::for_instance("a")
            .with_lease_duration(Duration::from_millis(3_500))
            .validate()
            .is_err());
        assert!(ElectionConfig::for_instance("a")
            .with_op_timeout(Duration::ZERO)
            .validate()
            .is_err());
        assert!(ElectionConfig::for_instance("a")
            .with_max_attempts(0)
            .validate()
            .is_err());
    }

    #[test]
    fn shortest_lease_leaves_room_for_rounding() {
        ElectionConfig::for_instance("a")
            .with_lease_duration(MIN_LEASE)
            .validate()
            .unwrap();
        // One renewal interval plus a second of truncation still reads fresh.
        let worst_age = MIN_LEASE / 2 + Duration::from_secs(1);
        assert!(worst_age < MIN_LEASE);
    }

    #[test]
    fn parse_loss_policy() {
        assert_eq!("step-down".parse::<LeaseLossPolicy>().unwrap(), LeaseLossPolicy::StepDown);
        assert_eq!(
            "Keep_Renewing".parse::<LeaseLossPolicy>().unwrap(),
            LeaseLossPolicy::KeepRenewing
        );
        assert!("panic".parse::<LeaseLossPolicy>().is_err());
        assert_eq!(LeaseLossPolicy::KeepRenewing.to_string(), "keep-renewing");
    }
}
