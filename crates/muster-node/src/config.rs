//! Node configuration from environment variables.

use crate::error::{Error, Result};
use muster_election::{default_instance_id, ElectionConfig, LeaseLossPolicy};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Configuration for a Muster node.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// SQLite database file
    pub db_path: PathBuf,

    /// Admin socket path (for the muster-admin CLI)
    pub admin_socket: PathBuf,

    /// Leader election settings
    pub election: ElectionConfig,
}

impl NodeConfig {
    /// Create config from environment variables with sensible defaults.
    ///
    /// | Variable | Default |
    /// |---|---|
    /// | `MUSTER_DB_PATH` | `guild_data.db` |
    /// | `MUSTER_ADMIN_SOCKET` | `muster-admin.sock` next to the database |
    /// | `MUSTER_INSTANCE_ID` | `<hostname>-<pid>` |
    /// | `MUSTER_LEASE_SECS` | `10` |
    /// | `MUSTER_RETRY_BACKOFF_MS` | `2000` |
    /// | `MUSTER_OP_TIMEOUT_MS` | `3000` |
    /// | `MUSTER_TAKEOVER_IF_STALE` | `true` |
    /// | `MUSTER_MAX_ACQUIRE_ATTEMPTS` | unset (retry forever) |
    /// | `MUSTER_ON_LEASE_LOST` | `step-down` |
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let db_path = PathBuf::from(var("MUSTER_DB_PATH").unwrap_or_else(|| "guild_data.db".to_string()));

        let admin_socket = var("MUSTER_ADMIN_SOCKET")
            .map(PathBuf::from)
            .unwrap_or_else(|| default_socket_path(&db_path));

        let defaults = ElectionConfig::default();
        let election = ElectionConfig {
            instance_id: var("MUSTER_INSTANCE_ID").unwrap_or_else(default_instance_id),
            lease_duration: parse_var(&var, "MUSTER_LEASE_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.lease_duration),
            retry_backoff: parse_var(&var, "MUSTER_RETRY_BACKOFF_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.retry_backoff),
            op_timeout: parse_var(&var, "MUSTER_OP_TIMEOUT_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.op_timeout),
            takeover_if_stale: parse_var(&var, "MUSTER_TAKEOVER_IF_STALE")?
                .unwrap_or(defaults.takeover_if_stale),
            max_attempts: parse_var(&var, "MUSTER_MAX_ACQUIRE_ATTEMPTS")?,
            on_lease_lost: match var("MUSTER_ON_LEASE_LOST") {
                Some(raw) => LeaseLossPolicy::from_str(&raw)
                    .map_err(|e| Error::Config(format!("MUSTER_ON_LEASE_LOST: {}", e)))?,
                None => defaults.on_lease_lost,
            },
        };
        election
            .validate()
            .map_err(|e| Error::Config(e.to_string()))?;

        Ok(Self {
            db_path,
            admin_socket,
            election,
        })
    }
}

/// `muster-admin.sock` in the database's directory.
pub fn default_socket_path(db_path: &Path) -> PathBuf {
    match db_path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.join("muster-admin.sock"),
        _ => PathBuf::from("muster-admin.sock"),
    }
}

fn parse_var<T, V>(var: &V, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    V: Fn(&str) -> Option<String>,
{
    match var(key) {
        Some(raw) => raw
            .parse()
            .map(Some)
            .map_err(|e| Error::Config(format!("invalid {}={:?}: {}", key, raw, e))),
        None => Ok(None),
    }
}
