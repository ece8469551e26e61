//! muster-admin CLI tool
//!
//! Sends one roster or admin command to a running muster-node.
//!
//! Usage:
//!   muster-admin register <member_id> <display_name>
//!   muster-admin set-orders <member_id> <amount>
//!   muster-admin set-lumber <member_id> <amount>
//!   muster-admin set-availability <member_id> <slot>
//!   muster-admin add-member <member_id> <display_name>
//!   muster-admin remove-member <member_id>
//!   muster-admin sync-member <member_id> <display_name> [role_id]
//!   muster-admin list-availability
//!   muster-admin list-current
//!   muster-admin status
//!   muster-admin ping

use muster_node::admin_socket::default_socket_path;
use muster_node::format::render_lines;
use muster_node::{AdminCommand, AdminResponse, AVAILABILITY_SLOTS};
use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::PathBuf;

fn print_usage() {
    eprintln!("muster-admin - Manage the guild roster on a running muster-node");
    eprintln!();
    eprintln!("Usage:");
    eprintln!("  muster-admin register <member_id> <name>          Register or rename yourself");
    eprintln!("  muster-admin set-orders <member_id> <amount>      Set war orders");
    eprintln!("  muster-admin set-lumber <member_id> <amount>      Set lumber");
    eprintln!("  muster-admin set-availability <member_id> <slot>  Set availability");
    eprintln!("  muster-admin add-member <member_id> <name>        Officer: add a member");
    eprintln!("  muster-admin remove-member <member_id>            Officer: remove a member");
    eprintln!("  muster-admin sync-member <member_id> <name> [role]  Sync a member's role");
    eprintln!("  muster-admin list-availability                    Show everyone's availability");
    eprintln!("  muster-admin list-current                         Show everyone's resources");
    eprintln!("  muster-admin status                               Show leader election status");
    eprintln!("  muster-admin ping                                 Check if the node is running");
    eprintln!();
    eprintln!("Slots: {}", AVAILABILITY_SLOTS.join(", "));
    eprintln!();
    eprintln!("Environment:");
    eprintln!("  MUSTER_SOCKET  Path to admin socket (default: muster-admin.sock beside MUSTER_DB_PATH)");
}

fn get_socket_path() -> PathBuf {
    std::env::var("MUSTER_SOCKET")
        .map(PathBuf::from)
        .unwrap_or_else(|_| default_socket_path())
}

fn send_command(cmd: &AdminCommand) -> Result<AdminResponse, String> {
    let socket_path = get_socket_path();

    let mut stream = UnixStream::connect(&socket_path).map_err(|e| {
        format!(
            "Failed to connect to muster-node at {:?}: {}\n\
             Is the muster-node running?",
            socket_path, e
        )
    })?;

    // Send command
    let cmd_json = serde_json::to_string(cmd).map_err(|e| e.to_string())?;
    writeln!(stream, "{}", cmd_json).map_err(|e| e.to_string())?;

    // Read response
    let mut reader = BufReader::new(&stream);
    let mut response_line = String::new();
    reader
        .read_line(&mut response_line)
        .map_err(|e| e.to_string())?;

    serde_json::from_str(&response_line).map_err(|e| format!("Invalid response: {}", e))
}

fn arg<'a>(args: &'a [String], index: usize, command: &str, name: &str) -> Result<&'a str, String> {
    args.get(index)
        .map(String::as_str)
        .ok_or_else(|| format!("{} requires a {} argument", command, name))
}

/// Everything from `index` on, joined with spaces.
fn rest(args: &[String], index: usize, command: &str, name: &str) -> Result<String, String> {
    arg(args, index, command, name)?;
    Ok(args[index..].join(" "))
}

fn amount(args: &[String], index: usize, command: &str) -> Result<i64, String> {
    let raw = arg(args, index, command, "amount")?;
    raw.replace(',', "")
        .parse()
        .map_err(|_| format!("{} expects a whole number, got {:?}", command, raw))
}

/// Parse `argv` (including the program name) into a command.
fn parse_args(args: &[String]) -> Result<AdminCommand, String> {
    let command = args.get(1).map(String::as_str).unwrap_or_default();
    let cmd = match command {
        "register" => AdminCommand::Register {
            member_id: arg(args, 2, command, "member_id")?.to_string(),
            display_name: rest(args, 3, command, "display_name")?,
        },
        "set-orders" => AdminCommand::SetOrders {
            member_id: arg(args, 2, command, "member_id")?.to_string(),
            amount: amount(args, 3, command)?,
        },
        "set-lumber" => AdminCommand::SetLumber {
            member_id: arg(args, 2, command, "member_id")?.to_string(),
            amount: amount(args, 3, command)?,
        },
        "set-availability" => AdminCommand::SetAvailability {
            member_id: arg(args, 2, command, "member_id")?.to_string(),
            slot: rest(args, 3, command, "slot")?,
        },
        "add-member" => AdminCommand::AddMember {
            member_id: arg(args, 2, command, "member_id")?.to_string(),
            display_name: rest(args, 3, command, "display_name")?,
        },
        "remove-member" => AdminCommand::RemoveMember {
            member_id: arg(args, 2, command, "member_id")?.to_string(),
        },
        "sync-member" => AdminCommand::SyncMember {
            member_id: arg(args, 2, command, "member_id")?.to_string(),
            display_name: arg(args, 3, command, "display_name")?.to_string(),
            role_id: args.get(4).cloned(),
        },
        "list-availability" => AdminCommand::ListAvailability,
        "list-current" => AdminCommand::ListCurrent,
        "status" => AdminCommand::Status,
        "ping" => AdminCommand::Ping,
        other => return Err(format!("Unknown command: {}", other)),
    };
    Ok(cmd)
}

fn main() {
    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 {
        print_usage();
        std::process::exit(1);
    }
    if matches!(args[1].as_str(), "-h" | "--help" | "help") {
        print_usage();
        std::process::exit(0);
    }

    let cmd = match parse_args(&args) {
        Ok(cmd) => cmd,
        Err(e) => {
            eprintln!("Error: {}", e);
            print_usage();
            std::process::exit(1);
        }
    };

    match send_command(&cmd) {
        Ok(response) => match response {
            AdminResponse::Ok { message } => {
                println!("{}", message);
            }
            AdminResponse::Error { error } => {
                eprintln!("Error: {}", error);
                std::process::exit(1);
            }
            AdminResponse::List { title, items } => {
                println!("{}", title);
                println!("{}", render_lines(&items));
            }
            AdminResponse::Status {
                instance_id,
                state,
                lease_owner,
                lease_age_secs,
            } => {
                println!("instance: {}", instance_id);
                println!("state:    {}", state);
                match (lease_owner, lease_age_secs) {
                    (Some(owner), Some(age)) => println!("lease:    {} ({}s ago)", owner, age),
                    _ => println!("lease:    (none)"),
                }
            }
            AdminResponse::Pong => {
                println!("pong - muster-node is running");
            }
        },
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(args: &[&str]) -> Vec<String> {
        std::iter::once("muster-admin")
            .chain(args.iter().copied())
            .map(String::from)
            .collect()
    }

    #[test]
    fn parses_multi_word_values() {
        assert_eq!(
            parse_args(&argv(&["register", "u1", "Sir", "Aria"])).unwrap(),
            AdminCommand::Register {
                member_id: "u1".into(),
                display_name: "Sir Aria".into()
            }
        );
        assert_eq!(
            parse_args(&argv(&["set-availability", "u1", "18:00-20:00", "GMT"])).unwrap(),
            AdminCommand::SetAvailability {
                member_id: "u1".into(),
                slot: "18:00-20:00 GMT".into()
            }
        );
    }

    #[test]
    fn parses_amounts() {
        assert_eq!(
            parse_args(&argv(&["set-lumber", "u1", "12,500"])).unwrap(),
            AdminCommand::SetLumber {
                member_id: "u1".into(),
                amount: 12_500
            }
        );
        assert!(parse_args(&argv(&["set-orders", "u1", "lots"])).is_err());
        assert!(parse_args(&argv(&["set-orders", "u1"])).is_err());
    }

    #[test]
    fn optional_role_and_unknown_commands() {
        assert_eq!(
            parse_args(&argv(&["sync-member", "u1", "aria"])).unwrap(),
            AdminCommand::SyncMember {
                member_id: "u1".into(),
                display_name: "aria".into(),
                role_id: None
            }
        );
        assert_eq!(parse_args(&argv(&["status"])).unwrap(), AdminCommand::Status);
        assert!(parse_args(&argv(&["promote", "u1"])).is_err());
    }
}
