//! Durable records the router keeps about users.
//!
//! Calls are synchronous and run on the relay loop, so a slow backend
//! stalls every connection for the length of the call. That is an accepted
//! limit at the target scale.

mod memory;
mod sqlite;

use std::net::IpAddr;

use chrono::{DateTime, Utc};

use crate::error::ChatError;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// A known user and when they last logged in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
    pub name: String,
    pub last_login: DateTime<Utc>,
}

/// An open session as recorded at login.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveSession {
    pub name: String,
    pub ip: String,
    pub port: u16,
    pub login_time: DateTime<Utc>,
}

/// One login event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginRecord {
    pub name: String,
    pub at: DateTime<Utc>,
    pub ip: String,
    pub port: u16,
}

/// Per-user message counters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageStats {
    pub name: String,
    pub last_login: DateTime<Utc>,
    pub sent: u64,
    pub accepted: u64,
}

/// The persistence gateway.
///
/// Operations naming an unknown user are no-ops rather than errors: the
/// relay must keep going whatever the peers send. Errors are reserved for
/// the backend itself failing.
///
/// The counters are read-modify-write. Callers on more than one thread must
/// serialise access to the store.
pub trait Storage: Send {
    /// Upsert the user, open an active session, append to login history.
    fn record_login(
        &mut self,
        name: &str,
        ip: IpAddr,
        port: u16,
        at: DateTime<Utc>,
    ) -> Result<(), ChatError>;

    /// Close every active session of `name`.
    fn record_logout(&mut self, name: &str) -> Result<(), ChatError>;

    /// Count one message sent by `sender` and accepted for `recipient`.
    /// Nothing is counted unless both are known users.
    fn record_message(&mut self, sender: &str, recipient: &str) -> Result<(), ChatError>;

    fn list_users(&self) -> Result<Vec<UserRecord>, ChatError>;

    fn list_active_sessions(&self) -> Result<Vec<ActiveSession>, ChatError>;

    /// Oldest first, optionally for one user.
    fn login_history(&self, name: Option<&str>) -> Result<Vec<LoginRecord>, ChatError>;

    fn add_contact(&mut self, owner: &str, contact: &str) -> Result<(), ChatError>;

    fn remove_contact(&mut self, owner: &str, contact: &str) -> Result<(), ChatError>;

    fn contacts(&self, owner: &str) -> Result<Vec<String>, ChatError>;

    fn message_stats(&self) -> Result<Vec<MessageStats>, ChatError>;
}
