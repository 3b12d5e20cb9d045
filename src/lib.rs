//! A text-chat relay.
//!
//! Clients register a display name with `presence`, send directed `message`
//! units through the relay and leave with `exit`. The relay is a single
//! task polling every socket once per tick; see [`server::Server`].

pub mod command;
pub mod config;
pub mod connection;
pub mod error;
pub mod protocol;
pub mod registry;
pub mod router;
pub mod server;
pub mod storage;
pub mod types;

pub use config::ServerConfig;
pub use error::ChatError;
pub use server::Server;
