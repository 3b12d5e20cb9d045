use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser};

use crate::command::Command;
use crate::error::ChatError;
use crate::protocol::DEFAULT_MAX_MESSAGE_LEN;

/// Relay configuration. Built through `ServerConfig::builder()`.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub addr: String,
    pub port: u16,
    pub max_clients: usize,
    pub max_message_len: usize,
    /// Upper bound on how long one tick waits for a new connection.
    pub accept_wait: Duration,
    /// Pause between ticks.
    pub tick_interval: Duration,
    /// Also close the durable session record when a client vanishes
    /// without sending `exit`.
    pub logout_on_disconnect: bool,
}

/// The builder accumulates optional values and produces a validated config.
pub struct ServerConfigBuilder {
    addr: String,
    port: u16,
    max_clients: usize,
    max_message_len: usize,
    accept_wait: Duration,
    tick_interval: Duration,
    logout_on_disconnect: bool,
}

impl ServerConfig {
    pub fn builder() -> ServerConfigBuilder {
        ServerConfigBuilder {
            addr: "127.0.0.1".to_string(),
            port: 7777,
            max_clients: 100,
            max_message_len: DEFAULT_MAX_MESSAGE_LEN,
            accept_wait: Duration::from_millis(50),
            tick_interval: Duration::from_millis(10),
            logout_on_disconnect: false,
        }
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.addr, self.port)
    }
}

impl ServerConfigBuilder {
    pub fn addr(mut self, addr: impl Into<String>) -> Self {
        self.addr = addr.into();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn max_clients(mut self, max: usize) -> Self {
        self.max_clients = max;
        self
    }

    pub fn max_message_len(mut self, len: usize) -> Self {
        self.max_message_len = len;
        self
    }

    pub fn accept_wait(mut self, wait: Duration) -> Self {
        self.accept_wait = wait;
        self
    }

    pub fn tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    pub fn logout_on_disconnect(mut self, enabled: bool) -> Self {
        self.logout_on_disconnect = enabled;
        self
    }

    pub fn build(self) -> Result<ServerConfig, ChatError> {
        if self.addr.trim().is_empty() {
            return Err(ChatError::Config("bind address is empty".into()));
        }
        if self.max_clients == 0 {
            return Err(ChatError::Config("max_clients must be at least 1".into()));
        }
        // Smallest reply is about 40 bytes; anything below cannot carry a unit.
        if self.max_message_len < 64 {
            return Err(ChatError::Config(format!(
                "max_message_len {} is too small (minimum 64)",
                self.max_message_len
            )));
        }

        Ok(ServerConfig {
            addr: self.addr,
            port: self.port,
            max_clients: self.max_clients,
            max_message_len: self.max_message_len,
            accept_wait: self.accept_wait,
            tick_interval: self.tick_interval,
            logout_on_disconnect: self.logout_on_disconnect,
        })
    }
}

/// Text-chat relay server
#[derive(Parser, Debug)]
#[command(name = "chat-relay", version, about = "Text-chat relay server")]
pub struct Cli {
    #[command(flatten)]
    pub relay: RelayArgs,

    /// Inspect the database instead of serving
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Args, Debug, Clone)]
pub struct RelayArgs {
    /// Address to listen on
    #[arg(short = 'a', long, env = "CHAT_RELAY_ADDR", default_value = "127.0.0.1")]
    pub addr: String,

    /// TCP port to listen on
    #[arg(short = 'p', long, env = "CHAT_RELAY_PORT", default_value_t = 7777)]
    pub port: u16,

    /// SQLite database file; records are kept in memory when absent
    #[arg(long, env = "CHAT_RELAY_DB")]
    pub database: Option<PathBuf>,

    /// Maximum number of simultaneous connections
    #[arg(long, default_value_t = 100)]
    pub max_clients: usize,

    /// Maximum size of one protocol unit, in bytes
    #[arg(long, default_value_t = DEFAULT_MAX_MESSAGE_LEN)]
    pub max_message_len: usize,

    /// Pause between loop ticks, in milliseconds
    #[arg(long, default_value_t = 10)]
    pub tick_ms: u64,

    /// Close the stored session when a client disconnects without `exit`
    #[arg(long)]
    pub logout_on_disconnect: bool,

    /// Emit logs as JSON lines
    #[arg(long, env = "CHAT_RELAY_JSON_LOGS")]
    pub json_logs: bool,
}

impl RelayArgs {
    pub fn server_config(&self) -> Result<ServerConfig, ChatError> {
        ServerConfig::builder()
            .addr(self.addr.clone())
            .port(self.port)
            .max_clients(self.max_clients)
            .max_message_len(self.max_message_len)
            .tick_interval(Duration::from_millis(self.tick_ms))
            .logout_on_disconnect(self.logout_on_disconnect)
            .build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_defaults_match_the_wire_defaults() {
        let config = ServerConfig::builder().build().unwrap();
        assert_eq!(config.bind_addr(), "127.0.0.1:7777");
        assert_eq!(config.max_message_len, 1024);
        assert!(!config.logout_on_disconnect);
    }

    #[test]
    fn builder_rejects_unusable_values() {
        assert!(ServerConfig::builder().max_clients(0).build().is_err());
        assert!(ServerConfig::builder().max_message_len(8).build().is_err());
        assert!(ServerConfig::builder().addr(" ").build().is_err());
    }

    #[test]
    fn cli_maps_onto_config() {
        let args = ["chat-relay", "-a", "0.0.0.0", "-p", "9000", "--tick-ms", "5"];
        let cli = Cli::try_parse_from(args).unwrap();
        assert!(cli.command.is_none());

        let config = cli.relay.server_config().unwrap();
        assert_eq!(config.bind_addr(), "0.0.0.0:9000");
        assert_eq!(config.tick_interval, Duration::from_millis(5));
    }
}
