use std::collections::{BTreeMap, BTreeSet};
use std::net::IpAddr;

use chrono::{DateTime, Utc};

use super::{ActiveSession, LoginRecord, MessageStats, Storage, UserRecord};
use crate::error::ChatError;

#[derive(Debug)]
struct KnownUser {
    last_login: DateTime<Utc>,
    sent: u64,
    accepted: u64,
    contacts: BTreeSet<String>,
}

/// In-process store. Nothing survives a restart.
///
/// Used when no database path is configured, and by tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    users: BTreeMap<String, KnownUser>,
    active: BTreeMap<String, ActiveSession>,
    history: Vec<LoginRecord>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Storage for MemoryStore {
    fn record_login(
        &mut self,
        name: &str,
        ip: IpAddr,
        port: u16,
        at: DateTime<Utc>,
    ) -> Result<(), ChatError> {
        self.users
            .entry(name.to_string())
            .and_modify(|user| user.last_login = at)
            .or_insert_with(|| KnownUser {
                last_login: at,
                sent: 0,
                accepted: 0,
                contacts: BTreeSet::new(),
            });

        self.active.insert(
            name.to_string(),
            ActiveSession {
                name: name.to_string(),
                ip: ip.to_string(),
                port,
                login_time: at,
            },
        );

        self.history.push(LoginRecord {
            name: name.to_string(),
            at,
            ip: ip.to_string(),
            port,
        });
        Ok(())
    }

    fn record_logout(&mut self, name: &str) -> Result<(), ChatError> {
        self.active.remove(name);
        Ok(())
    }

    fn record_message(&mut self, sender: &str, recipient: &str) -> Result<(), ChatError> {
        if !(self.users.contains_key(sender) && self.users.contains_key(recipient)) {
            return Ok(());
        }
        if let Some(user) = self.users.get_mut(sender) {
            user.sent += 1;
        }
        if let Some(user) = self.users.get_mut(recipient) {
            user.accepted += 1;
        }
        Ok(())
    }

    fn list_users(&self) -> Result<Vec<UserRecord>, ChatError> {
        Ok(self
            .users
            .iter()
            .map(|(name, user)| UserRecord {
                name: name.clone(),
                last_login: user.last_login,
            })
            .collect())
    }

    fn list_active_sessions(&self) -> Result<Vec<ActiveSession>, ChatError> {
        Ok(self.active.values().cloned().collect())
    }

    fn login_history(&self, name: Option<&str>) -> Result<Vec<LoginRecord>, ChatError> {
        Ok(self
            .history
            .iter()
            .filter(|record| name.is_none_or(|name| record.name == name))
            .cloned()
            .collect())
    }

    fn add_contact(&mut self, owner: &str, contact: &str) -> Result<(), ChatError> {
        if !self.users.contains_key(contact) {
            return Ok(());
        }
        if let Some(user) = self.users.get_mut(owner) {
            user.contacts.insert(contact.to_string());
        }
        Ok(())
    }

    fn remove_contact(&mut self, owner: &str, contact: &str) -> Result<(), ChatError> {
        if let Some(user) = self.users.get_mut(owner) {
            user.contacts.remove(contact);
        }
        Ok(())
    }

    fn contacts(&self, owner: &str) -> Result<Vec<String>, ChatError> {
        Ok(self
            .users
            .get(owner)
            .map(|user| user.contacts.iter().cloned().collect())
            .unwrap_or_default())
    }

    fn message_stats(&self) -> Result<Vec<MessageStats>, ChatError> {
        Ok(self
            .users
            .iter()
            .map(|(name, user)| MessageStats {
                name: name.clone(),
                last_login: user.last_login,
                sent: user.sent,
                accepted: user.accepted,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::conformance;

    #[test]
    fn memory_store_conformance() {
        conformance::run_all(|| Box::new(MemoryStore::new()));
    }
}
