//! Unix socket server for roster and admin commands.
//!
//! Newline-delimited JSON in both directions. Commands that change the roster
//! are refused unless this instance currently holds the leader lease.

use crate::error::Result;
use crate::format;
use muster_election::LeaderElection;
use muster_store::RosterStore;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::watch;

/// Time slots a member may report.
pub const AVAILABILITY_SLOTS: [&str; 5] = [
    "16:00-18:00 GMT",
    "18:00-20:00 GMT",
    "20:00-22:00 GMT",
    "22:00-00:00 GMT",
    "Not Available",
];

/// Command sent over the socket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum AdminCommand {
    /// Register a member or update their display name
    Register { member_id: String, display_name: String },
    /// Set a member's war order count
    SetOrders { member_id: String, amount: i64 },
    /// Set a member's lumber count
    SetLumber { member_id: String, amount: i64 },
    /// Set a member's availability slot
    SetAvailability { member_id: String, slot: String },
    /// Officer: add or rename a member
    AddMember { member_id: String, display_name: String },
    /// Officer: remove a member
    RemoveMember { member_id: String },
    /// Insert a placeholder member if missing and snapshot their role
    SyncMember {
        member_id: String,
        display_name: String,
        #[serde(default)]
        role_id: Option<String>,
    },
    /// List everyone's availability
    ListAvailability,
    /// List everyone's resources
    ListCurrent,
    /// Election status of this instance
    Status,
    /// Ping (health check)
    Ping,
}

impl AdminCommand {
    /// Whether the command writes to the roster.
    pub fn mutates_roster(&self) -> bool {
        !matches!(
            self,
            Self::ListAvailability | Self::ListCurrent | Self::Status | Self::Ping
        )
    }
}

/// Response to a command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AdminResponse {
    Ok { message: String },
    Error { error: String },
    List { title: String, items: Vec<String> },
    Status {
        instance_id: String,
        state: String,
        lease_owner: Option<String>,
        lease_age_secs: Option<i64>,
    },
    Pong,
}

impl AdminResponse {
    fn ok(message: impl Into<String>) -> Self {
        Self::Ok {
            message: message.into(),
        }
    }

    fn error(error: impl ToString) -> Self {
        Self::Error {
            error: error.to_string(),
        }
    }
}

/// Admin socket server.
pub struct AdminSocket {
    roster: RosterStore,
    election: Arc<LeaderElection>,
    socket_path: PathBuf,
}

impl AdminSocket {
    pub fn new(roster: RosterStore, election: Arc<LeaderElection>, socket_path: impl Into<PathBuf>) -> Self {
        Self {
            roster,
            election,
            socket_path: socket_path.into(),
        }
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Accept connections until `shutdown` flips to `true`.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        // Remove a stale socket left by a previous run
        let _ = std::fs::remove_file(&self.socket_path);

        let listener = UnixListener::bind(&self.socket_path)?;
        tracing::info!("Admin socket listening on {:?}", self.socket_path);

        let handler = Arc::new(CommandHandler {
            roster: self.roster,
            election: self.election,
        });

        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, _)) => {
                        let handler = Arc::clone(&handler);
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(stream, handler).await {
                                tracing::error!("Admin connection error: {}", e);
                            }
                        });
                    }
                    Err(e) => {
                        tracing::error!("Failed to accept admin connection: {}", e);
                    }
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        let _ = std::fs::remove_file(&self.socket_path);
        tracing::info!("Admin socket closed");
        Ok(())
    }
}

async fn handle_connection(stream: UnixStream, handler: Arc<CommandHandler>) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    while reader.read_line(&mut line).await? > 0 {
        let response = match serde_json::from_str::<AdminCommand>(&line) {
            Ok(cmd) => handler.execute(cmd).await,
            Err(e) => AdminResponse::error(format!("Invalid command: {}", e)),
        };

        let response_json = serde_json::to_string(&response)? + "\n";
        writer.write_all(response_json.as_bytes()).await?;
        line.clear();
    }

    Ok(())
}

/// Executes commands against the roster, gated on leadership.
pub struct CommandHandler {
    roster: RosterStore,
    election: Arc<LeaderElection>,
}

impl CommandHandler {
    pub fn new(roster: RosterStore, election: Arc<LeaderElection>) -> Self {
        Self { roster, election }
    }

    pub async fn execute(&self, cmd: AdminCommand) -> AdminResponse {
        if cmd.mutates_roster() && !self.election.is_active() {
            return AdminResponse::error(format!(
                "instance {} is not the active leader ({})",
                self.election.instance_id(),
                self.election.state()
            ));
        }

        match cmd {
            AdminCommand::Register {
                member_id,
                display_name,
            } => {
                match self.roster.register_member(&member_id, &display_name).await {
                    Ok(false) => {
                        AdminResponse::ok(format!("Display name updated to {}.", display_name))
                    }
                    Ok(true) => {
                        tracing::info!("Registered member {} as {}", member_id, display_name);
                        AdminResponse::ok(format!("Registered as {}.", display_name))
                    }
                    Err(e) => AdminResponse::error(e),
                }
            }

            AdminCommand::SetOrders { member_id, amount } => {
                if amount < 0 {
                    return AdminResponse::error("amount must not be negative");
                }
                match self.roster.set_war_orders(&member_id, amount).await {
                    Ok(()) => AdminResponse::ok(format!("War orders set to {}.", amount)),
                    Err(e) => AdminResponse::error(e),
                }
            }

            AdminCommand::SetLumber { member_id, amount } => {
                if amount < 0 {
                    return AdminResponse::error("amount must not be negative");
                }
                match self.roster.set_lumber(&member_id, amount).await {
                    Ok(()) => AdminResponse::ok(format!(
                        "Lumber set to {}.",
                        format::format_number(amount)
                    )),
                    Err(e) => AdminResponse::error(e),
                }
            }

            AdminCommand::SetAvailability { member_id, slot } => {
                if !AVAILABILITY_SLOTS.contains(&slot.as_str()) {
                    return AdminResponse::error(format!(
                        "unknown slot {:?}; choose one of: {}",
                        slot,
                        AVAILABILITY_SLOTS.join(", ")
                    ));
                }
                match self.roster.set_availability(&member_id, &slot).await {
                    Ok(()) => AdminResponse::ok(format!("Availability set to {}.", slot)),
                    Err(e) => AdminResponse::error(e),
                }
            }

            AdminCommand::AddMember {
                member_id,
                display_name,
            } => match self.roster.upsert_member(&member_id, &display_name).await {
                Ok(()) => {
                    tracing::info!("Added member {} as {}", member_id, display_name);
                    AdminResponse::ok(format!(
                        "{} added to the roster as {}.",
                        member_id, display_name
                    ))
                }
                Err(e) => AdminResponse::error(e),
            },

            AdminCommand::RemoveMember { member_id } => {
                match self.roster.delete_member(&member_id).await {
                    Ok(true) => {
                        tracing::info!("Removed member {}", member_id);
                        AdminResponse::ok(format!("{} removed from the roster.", member_id))
                    }
                    Ok(false) => AdminResponse::ok(format!("{} was not on the roster.", member_id)),
                    Err(e) => AdminResponse::error(e),
                }
            }

            AdminCommand::SyncMember {
                member_id,
                display_name,
                role_id,
            } => {
                let created = match self
                    .roster
                    .insert_member_if_missing(&member_id, &display_name)
                    .await
                {
                    Ok(created) => created,
                    Err(e) => return AdminResponse::error(e),
                };
                if let Some(role) = role_id.as_deref().filter(|r| !r.is_empty()) {
                    if let Err(e) = self.roster.set_role(&member_id, role).await {
                        return AdminResponse::error(e);
                    }
                }
                let verb = if created { "Added" } else { "Synced" };
                AdminResponse::ok(format!("{} {}.", verb, member_id))
            }

            AdminCommand::ListAvailability => match self.roster.list_members().await {
                Ok(members) => AdminResponse::List {
                    title: "Guild Availability".to_string(),
                    items: format::availability_lines(&members),
                },
                Err(e) => AdminResponse::error(e),
            },

            AdminCommand::ListCurrent => match self.roster.list_members().await {
                Ok(members) => AdminResponse::List {
                    title: "Current Guild Resources".to_string(),
                    items: format::resource_lines(&members),
                },
                Err(e) => AdminResponse::error(e),
            },

            AdminCommand::Status => {
                let lease = match self.election.current_lease().await {
                    Ok(lease) => lease,
                    Err(e) => return AdminResponse::error(e),
                };
                let now = self.election.now();
                AdminResponse::Status {
                    instance_id: self.election.instance_id().to_string(),
                    state: self.election.state().to_string(),
                    lease_age_secs: lease.as_ref().map(|l| l.age(now)),
                    lease_owner: lease.map(|l| l.owner),
                }
            }

            AdminCommand::Ping => AdminResponse::Pong,
        }
    }
}

/// Socket path a node started from the current environment would bind.
pub fn default_socket_path() -> PathBuf {
    if let Ok(path) = std::env::var("MUSTER_ADMIN_SOCKET") {
        return PathBuf::from(path);
    }
    let db_path = std::env::var("MUSTER_DB_PATH").unwrap_or_else(|_| "guild_data.db".to_string());
    crate::config::default_socket_path(Path::new(&db_path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use muster_election::ElectionConfig;
    use muster_store::Storage;
    use std::time::Duration;
    use tempfile::tempdir;

    async fn handler(active: bool) -> CommandHandler {
        let storage = Arc::new(Storage::open_in_memory().unwrap());
        let election = Arc::new(
            LeaderElection::new(Arc::clone(&storage), ElectionConfig::for_instance("host1-100"))
                .unwrap(),
        );
        if active {
            assert!(election
                .try_acquire(Duration::from_secs(10), true)
                .await
                .unwrap());
        }
        CommandHandler::new(RosterStore::new(storage), election)
    }

    fn register(id: &str, name: &str) -> AdminCommand {
        AdminCommand::Register {
            member_id: id.into(),
            display_name: name.into(),
        }
    }

    #[tokio::test]
    async fn register_reports_new_then_updated() {
        let handler = handler(true).await;
        assert_eq!(
            handler.execute(register("u1", "Aria")).await,
            AdminResponse::ok("Registered as Aria.")
        );
        assert_eq!(
            handler.execute(register("u1", "Aria2")).await,
            AdminResponse::ok("Display name updated to Aria2.")
        );
    }

    #[tokio::test]
    async fn concurrent_register_reports_one_new_member() {
        let handler = Arc::new(handler(true).await);
        let attempts: Vec<_> = (0..6)
            .map(|i| {
                let handler = Arc::clone(&handler);
                tokio::spawn(async move { handler.execute(register("u1", &format!("Aria{}", i))).await })
            })
            .collect();

        let mut registered = 0;
        for attempt in attempts {
            match attempt.await.unwrap() {
                AdminResponse::Ok { message } if message.starts_with("Registered as") => registered += 1,
                AdminResponse::Ok { message } => assert!(message.starts_with("Display name updated")),
                other => panic!("unexpected response: {:?}", other),
            }
        }
        assert_eq!(registered, 1);
    }

    #[tokio::test]
    async fn updates_require_registration() {
        let handler = handler(true).await;
        let response = handler
            .execute(AdminCommand::SetOrders {
                member_id: "ghost".into(),
                amount: 4,
            })
            .await;
        assert!(matches!(response, AdminResponse::Error { error } if error.contains("not registered")));
    }

    #[tokio::test]
    async fn rejects_bad_input() {
        let handler = handler(true).await;
        handler.execute(register("u1", "Aria")).await;

        let negative = handler
            .execute(AdminCommand::SetLumber {
                member_id: "u1".into(),
                amount: -1,
            })
            .await;
        assert!(matches!(negative, AdminResponse::Error { .. }));

        let slot = handler
            .execute(AdminCommand::SetAvailability {
                member_id: "u1".into(),
                slot: "whenever".into(),
            })
            .await;
        assert!(matches!(slot, AdminResponse::Error { .. }));
    }

    #[tokio::test]
    async fn listings_reflect_updates() {
        let handler = handler(true).await;
        handler.execute(register("u1", "Aria")).await;
        handler.execute(register("u2", "brom")).await;
        handler
            .execute(AdminCommand::SetLumber {
                member_id: "u1".into(),
                amount: 12_500,
            })
            .await;
        handler
            .execute(AdminCommand::SetOrders {
                member_id: "u2".into(),
                amount: 2,
            })
            .await;
        handler
            .execute(AdminCommand::SetAvailability {
                member_id: "u2".into(),
                slot: "20:00-22:00 GMT".into(),
            })
            .await;

        assert_eq!(
            handler.execute(AdminCommand::ListCurrent).await,
            AdminResponse::List {
                title: "Current Guild Resources".into(),
                items: vec![
                    "Aria - Orders: 0, Lumber: 12,500".into(),
                    "brom - Orders: 2, Lumber: 0".into(),
                ],
            }
        );
        assert_eq!(
            handler.execute(AdminCommand::ListAvailability).await,
            AdminResponse::List {
                title: "Guild Availability".into(),
                items: vec!["Aria - Not Set".into(), "brom - 20:00-22:00 GMT".into()],
            }
        );
    }

    #[tokio::test]
    async fn sync_member_keeps_name_and_records_role() {
        let handler = handler(true).await;
        handler.execute(register("u1", "Aria")).await;

        let response = handler
            .execute(AdminCommand::SyncMember {
                member_id: "u1".into(),
                display_name: "aria_handle".into(),
                role_id: Some("officer".into()),
            })
            .await;
        assert_eq!(response, AdminResponse::ok("Synced u1."));

        let response = handler
            .execute(AdminCommand::SyncMember {
                member_id: "u2".into(),
                display_name: "brom".into(),
                role_id: None,
            })
            .await;
        assert_eq!(response, AdminResponse::ok("Added u2."));

        let member = handler.roster.get_member("u1").await.unwrap().unwrap();
        assert_eq!(member.display_name, "Aria");
        assert_eq!(member.role_id, "officer");
    }

    #[tokio::test]
    async fn remove_member() {
        let handler = handler(true).await;
        handler.execute(register("u1", "Aria")).await;
        assert_eq!(
            handler
                .execute(AdminCommand::RemoveMember {
                    member_id: "u1".into()
                })
                .await,
            AdminResponse::ok("u1 removed from the roster.")
        );
        assert_eq!(
            handler.execute(AdminCommand::ListCurrent).await,
            AdminResponse::List {
                title: "Current Guild Resources".into(),
                items: vec![],
            }
        );
    }

    #[tokio::test]
    async fn standby_refuses_writes_but_answers_reads() {
        let handler = handler(false).await;
        let response = handler.execute(register("u1", "Aria")).await;
        assert!(matches!(response, AdminResponse::Error { error } if error.contains("not the active leader")));

        assert_eq!(handler.execute(AdminCommand::Ping).await, AdminResponse::Pong);
        assert!(matches!(
            handler.execute(AdminCommand::ListCurrent).await,
            AdminResponse::List { .. }
        ));
    }

    #[tokio::test]
    async fn status_reports_lease() {
        let handler = handler(true).await;
        match handler.execute(AdminCommand::Status).await {
            AdminResponse::Status {
                instance_id,
                state,
                lease_owner,
                lease_age_secs,
            } => {
                assert_eq!(instance_id, "host1-100");
                assert_eq!(state, "Active");
                assert_eq!(lease_owner.as_deref(), Some("host1-100"));
                assert!(lease_age_secs.unwrap() <= 1);
            }
            other => panic!("unexpected response: {:?}", other),
        }
    }

    #[test]
    fn command_wire_format() {
        let cmd: AdminCommand =
            serde_json::from_str(r#"{"cmd":"set_lumber","member_id":"u1","amount":1500}"#).unwrap();
        assert_eq!(
            cmd,
            AdminCommand::SetLumber {
                member_id: "u1".into(),
                amount: 1500
            }
        );
        let sync: AdminCommand =
            serde_json::from_str(r#"{"cmd":"sync_member","member_id":"u1","display_name":"a"}"#)
                .unwrap();
        assert!(matches!(sync, AdminCommand::SyncMember { role_id: None, .. }));
        assert_eq!(
            serde_json::to_string(&AdminResponse::Pong).unwrap(),
            r#"{"status":"pong"}"#
        );
    }

    #[tokio::test]
    async fn socket_serves_until_shutdown() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("admin.sock");

        let storage = Arc::new(Storage::open_in_memory().unwrap());
        let election = Arc::new(
            LeaderElection::new(Arc::clone(&storage), ElectionConfig::for_instance("host1-100"))
                .unwrap(),
        );
        election.try_acquire(Duration::from_secs(10), true).await.unwrap();

        let socket = AdminSocket::new(RosterStore::new(storage), election, &path);
        assert_eq!(socket.socket_path(), path.as_path());
        let (stop_tx, stop_rx) = watch::channel(false);
        let server = tokio::spawn(socket.run(stop_rx));

        let mut stream = None;
        for _ in 0..50 {
            if let Ok(s) = UnixStream::connect(&path).await {
                stream = Some(s);
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let stream = stream.expect("admin socket should accept connections");
        let (reader, mut writer) = stream.into_split();
        let mut reader = BufReader::new(reader);

        let mut line = String::new();
        writer
            .write_all(b"{\"cmd\":\"register\",\"member_id\":\"u1\",\"display_name\":\"Aria\"}\n")
            .await
            .unwrap();
        reader.read_line(&mut line).await.unwrap();
        let response: AdminResponse = serde_json::from_str(&line).unwrap();
        assert_eq!(response, AdminResponse::ok("Registered as Aria."));

        line.clear();
        writer.write_all(b"not json\n").await.unwrap();
        reader.read_line(&mut line).await.unwrap();
        let response: AdminResponse = serde_json::from_str(&line).unwrap();
        assert!(matches!(response, AdminResponse::Error { .. }));

        stop_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), server)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert!(!path.exists());
    }
}
