use std::net::IpAddr;
use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use tracing::instrument;

use super::{ActiveSession, LoginRecord, MessageStats, Storage, UserRecord};
use crate::error::ChatError;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS users (
    id          INTEGER PRIMARY KEY,
    username    TEXT NOT NULL UNIQUE,
    last_login  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS active_users (
    id          INTEGER PRIMARY KEY,
    user_id     INTEGER NOT NULL UNIQUE REFERENCES users(id),
    ip          TEXT NOT NULL,
    port        INTEGER NOT NULL,
    login_time  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS user_contacts (
    id          INTEGER PRIMARY KEY,
    user_id     INTEGER NOT NULL REFERENCES users(id),
    contact_id  INTEGER NOT NULL REFERENCES users(id),
    UNIQUE (user_id, contact_id)
);

CREATE TABLE IF NOT EXISTS user_history (
    user_id     INTEGER PRIMARY KEY REFERENCES users(id),
    sent        INTEGER NOT NULL DEFAULT 0,
    accepted    INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS login_history (
    id          INTEGER PRIMARY KEY,
    user_id     INTEGER NOT NULL REFERENCES users(id),
    date_time   TEXT NOT NULL,
    ip          TEXT NOT NULL,
    port        INTEGER NOT NULL
);
";

/// SQLite-backed store.
///
/// Active sessions are cleared on open: nobody is connected to a relay
/// that has just started.
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Open (or create) the database file for a starting relay.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ChatError> {
        let path = path.as_ref();
        let store = Self::init(Self::connect(path)?, true)?;
        tracing::info!("Database initialized at {}", path.display());
        Ok(store)
    }

    /// Open the database of a relay that may still be running, leaving its
    /// active sessions in place.
    pub fn inspect(path: impl AsRef<Path>) -> Result<Self, ChatError> {
        Self::init(Self::connect(path.as_ref())?, false)
    }

    pub fn open_in_memory() -> Result<Self, ChatError> {
        Self::init(Connection::open_in_memory()?, true)
    }

    fn connect(path: &Path) -> Result<Connection, ChatError> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Ok(conn)
    }

    fn init(conn: Connection, clear_sessions: bool) -> Result<Self, ChatError> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute_batch(SCHEMA)?;
        if clear_sessions {
            let stale = conn.execute("DELETE FROM active_users", [])?;
            if stale > 0 {
                tracing::info!(stale, "cleared active sessions from a previous run");
            }
        }
        Ok(Self { conn })
    }

    fn user_id(&self, name: &str) -> Result<Option<i64>, ChatError> {
        Ok(self
            .conn
            .query_row("SELECT id FROM users WHERE username = ?1", [name], |row| {
                row.get(0)
            })
            .optional()?)
    }
}

impl Storage for SqliteStore {
    #[instrument(level = "debug", skip(self))]
    fn record_login(
        &mut self,
        name: &str,
        ip: IpAddr,
        port: u16,
        at: DateTime<Utc>,
    ) -> Result<(), ChatError> {
        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT INTO users (username, last_login) VALUES (?1, ?2)
             ON CONFLICT (username) DO UPDATE SET last_login = excluded.last_login",
            params![name, at],
        )?;
        let user_id: i64 =
            tx.query_row("SELECT id FROM users WHERE username = ?1", [name], |row| {
                row.get(0)
            })?;
        tx.execute(
            "INSERT OR IGNORE INTO user_history (user_id) VALUES (?1)",
            [user_id],
        )?;
        tx.execute(
            "INSERT OR REPLACE INTO active_users (user_id, ip, port, login_time)
             VALUES (?1, ?2, ?3, ?4)",
            params![user_id, ip.to_string(), port, at],
        )?;
        tx.execute(
            "INSERT INTO login_history (user_id, date_time, ip, port) VALUES (?1, ?2, ?3, ?4)",
            params![user_id, at, ip.to_string(), port],
        )?;
        tx.commit()?;
        Ok(())
    }

    #[instrument(level = "debug", skip(self))]
    fn record_logout(&mut self, name: &str) -> Result<(), ChatError> {
        self.conn.execute(
            "DELETE FROM active_users
             WHERE user_id IN (SELECT id FROM users WHERE username = ?1)",
            [name],
        )?;
        Ok(())
    }

    #[instrument(level = "debug", skip(self))]
    fn record_message(&mut self, sender: &str, recipient: &str) -> Result<(), ChatError> {
        let (Some(sender_id), Some(recipient_id)) =
            (self.user_id(sender)?, self.user_id(recipient)?)
        else {
            return Ok(());
        };

        let tx = self.conn.transaction()?;
        tx.execute(
            "UPDATE user_history SET sent = sent + 1 WHERE user_id = ?1",
            [sender_id],
        )?;
        tx.execute(
            "UPDATE user_history SET accepted = accepted + 1 WHERE user_id = ?1",
            [recipient_id],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn list_users(&self) -> Result<Vec<UserRecord>, ChatError> {
        let mut stmt = self
            .conn
            .prepare("SELECT username, last_login FROM users ORDER BY username")?;
        let rows = stmt.query_map([], |row| {
            Ok(UserRecord {
                name: row.get(0)?,
                last_login: row.get(1)?,
            })
        })?;
        Ok(rows.collect::<Result<_, _>>()?)
    }

    fn list_active_sessions(&self) -> Result<Vec<ActiveSession>, ChatError> {
        let mut stmt = self.conn.prepare(
            "SELECT u.username, a.ip, a.port, a.login_time
             FROM active_users a JOIN users u ON u.id = a.user_id
             ORDER BY u.username",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(ActiveSession {
                name: row.get(0)?,
                ip: row.get(1)?,
                port: row.get(2)?,
                login_time: row.get(3)?,
            })
        })?;
        Ok(rows.collect::<Result<_, _>>()?)
    }

    fn login_history(&self, name: Option<&str>) -> Result<Vec<LoginRecord>, ChatError> {
        let mut stmt = self.conn.prepare(
            "SELECT u.username, h.date_time, h.ip, h.port
             FROM login_history h JOIN users u ON u.id = h.user_id
             WHERE ?1 IS NULL OR u.username = ?1
             ORDER BY h.date_time, h.id",
        )?;
        let rows = stmt.query_map([name], |row| {
            Ok(LoginRecord {
                name: row.get(0)?,
                at: row.get(1)?,
                ip: row.get(2)?,
                port: row.get(3)?,
            })
        })?;
        Ok(rows.collect::<Result<_, _>>()?)
    }

    #[instrument(level = "debug", skip(self))]
    fn add_contact(&mut self, owner: &str, contact: &str) -> Result<(), ChatError> {
        let (Some(owner_id), Some(contact_id)) = (self.user_id(owner)?, self.user_id(contact)?)
        else {
            return Ok(());
        };
        self.conn.execute(
            "INSERT OR IGNORE INTO user_contacts (user_id, contact_id) VALUES (?1, ?2)",
            [owner_id, contact_id],
        )?;
        Ok(())
    }

    #[instrument(level = "debug", skip(self))]
    fn remove_contact(&mut self, owner: &str, contact: &str) -> Result<(), ChatError> {
        self.conn.execute(
            "DELETE FROM user_contacts
             WHERE user_id = (SELECT id FROM users WHERE username = ?1)
               AND contact_id = (SELECT id FROM users WHERE username = ?2)",
            [owner, contact],
        )?;
        Ok(())
    }

    fn contacts(&self, owner: &str) -> Result<Vec<String>, ChatError> {
        let mut stmt = self.conn.prepare(
            "SELECT c.username
             FROM user_contacts uc
             JOIN users o ON o.id = uc.user_id
             JOIN users c ON c.id = uc.contact_id
             WHERE o.username = ?1
             ORDER BY c.username",
        )?;
        let rows = stmt.query_map([owner], |row| row.get(0))?;
        Ok(rows.collect::<Result<_, _>>()?)
    }

    fn message_stats(&self) -> Result<Vec<MessageStats>, ChatError> {
        let mut stmt = self.conn.prepare(
            "SELECT u.username, u.last_login, h.sent, h.accepted
             FROM users u JOIN user_history h ON h.user_id = u.id
             ORDER BY u.username",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(MessageStats {
                name: row.get(0)?,
                last_login: row.get(1)?,
                sent: row.get(2)?,
                accepted: row.get(3)?,
            })
        })?;
        Ok(rows.collect::<Result<_, _>>()?)
    }
}
