use clap::Subcommand;

use crate::error::ChatError;
use crate::storage::Storage;

/// Administrative commands over the relay's stored records.
///
/// A closed set, so dispatch is one exhaustive match.
#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// List every known user with their last login
    Users,
    /// List sessions that are currently open
    Sessions,
    /// Show login history, oldest first
    History {
        /// Only show logins of this user
        #[arg(long)]
        user: Option<String>,
    },
    /// Show per-user sent and accepted message counts
    Stats,
    /// Inspect or edit a user's contact list
    Contacts {
        #[command(subcommand)]
        action: ContactAction,
    },
}

#[derive(Debug, Clone, Subcommand)]
pub enum ContactAction {
    List { owner: String },
    Add { owner: String, contact: String },
    Remove { owner: String, contact: String },
}

impl Command {
    /// Run against `store`, returning the lines to print.
    pub fn execute(self, store: &mut dyn Storage) -> Result<Vec<String>, ChatError> {
        let lines = match self {
            Command::Users => store
                .list_users()?
                .into_iter()
                .map(|u| format!("{}\tlast login {}", u.name, u.last_login.to_rfc3339()))
                .collect(),
            Command::Sessions => store
                .list_active_sessions()?
                .into_iter()
                .map(|s| {
                    format!(
                        "{}\t{}:{}\tsince {}",
                        s.name,
                        s.ip,
                        s.port,
                        s.login_time.to_rfc3339()
                    )
                })
                .collect(),
            Command::History { user } => store
                .login_history(user.as_deref())?
                .into_iter()
                .map(|h| format!("{}\t{}\t{}:{}", h.at.to_rfc3339(), h.name, h.ip, h.port))
                .collect(),
            Command::Stats => store
                .message_stats()?
                .into_iter()
                .map(|m| format!("{}\tsent {}\taccepted {}", m.name, m.sent, m.accepted))
                .collect(),
            Command::Contacts { action } => match action {
                ContactAction::List { owner } => store.contacts(&owner)?,
                ContactAction::Add { owner, contact } => {
                    store.add_contact(&owner, &contact)?;
                    store.contacts(&owner)?
                }
                ContactAction::Remove { owner, contact } => {
                    store.remove_contact(&owner, &contact)?;
                    store.contacts(&owner)?
                }
            },
        };
        Ok(lines)
    }
}

#[cfg(test)]
mod tests {
    use std::net::{IpAddr, Ipv4Addr};

    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::storage::MemoryStore;

    fn store() -> MemoryStore {
        let mut store = MemoryStore::new();
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let ip = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1));
        store.record_login("alice", ip, 5000, at).unwrap();
        store.record_login("bob", ip, 5001, at).unwrap();
        store.record_message("alice", "bob").unwrap();
        store
    }

    #[test]
    fn users_and_sessions_render_one_line_each() {
        let mut store = store();

        let users = Command::Users.execute(&mut store).unwrap();
        assert_eq!(users.len(), 2);
        assert!(users[0].starts_with("alice\tlast login 2024-05-01T12:00:00"));

        let sessions = Command::Sessions.execute(&mut store).unwrap();
        assert_eq!(sessions[1], "bob\t10.0.0.1:5001\tsince 2024-05-01T12:00:00+00:00");
    }

    #[test]
    fn history_can_be_filtered() {
        let mut store = store();
        let lines = Command::History {
            user: Some("bob".into()),
        }
        .execute(&mut store)
        .unwrap();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains("\tbob\t"));
    }

    #[test]
    fn stats_show_counters() {
        let mut store = store();
        let lines = Command::Stats.execute(&mut store).unwrap();
        assert_eq!(lines, ["alice\tsent 1\taccepted 0", "bob\tsent 0\taccepted 1"]);
    }

    #[test]
    fn contacts_add_and_remove() {
        let mut store = store();
        let add = Command::Contacts {
            action: ContactAction::Add {
                owner: "alice".into(),
                contact: "bob".into(),
            },
        };
        assert_eq!(add.execute(&mut store).unwrap(), ["bob"]);

        let remove = Command::Contacts {
            action: ContactAction::Remove {
                owner: "alice".into(),
                contact: "bob".into(),
            },
        };
        assert!(remove.execute(&mut store).unwrap().is_empty());
    }
}
