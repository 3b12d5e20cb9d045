use std::collections::HashSet;
use std::net::SocketAddr;

use tokio::net::{TcpListener, TcpStream};

use crate::config::ServerConfig;
use crate::connection::{ClientConnection, Readiness};
use crate::error::ChatError;
use crate::router::{Disposition, Router, SendOutcome};
use crate::storage::Storage;
use crate::types::ConnId;

/// The relay: one listener, an arena of client connections and the router.
///
/// Everything runs on one task. A tick accepts at most one connection,
/// polls every socket without waiting, handles what is readable and then
/// flushes queued chats to whatever is writable.
pub struct Server {
    listener: TcpListener,
    config: ServerConfig,
    connections: Vec<Option<ClientConnection>>,
    free_slots: Vec<ConnId>,
    router: Router,
}

impl Server {
    /// Bind the listening socket. Failing here is fatal to the process.
    pub async fn bind(config: ServerConfig, store: Box<dyn Storage>) -> Result<Self, ChatError> {
        let listener = TcpListener::bind(config.bind_addr()).await?;
        tracing::info!(addr = %listener.local_addr()?, "relay listening");

        let router = Router::new(store).logout_on_disconnect(config.logout_on_disconnect);
        Ok(Self {
            listener,
            config,
            connections: Vec::new(),
            free_slots: Vec::new(),
            router,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ChatError> {
        Ok(self.listener.local_addr()?)
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    pub fn connection_count(&self) -> usize {
        self.connections.iter().filter(|slot| slot.is_some()).count()
    }

    /// Tick forever. Never returns; stop the process to stop the relay.
    pub async fn run(mut self) {
        loop {
            self.tick().await;
            tokio::time::sleep(self.config.tick_interval).await;
        }
    }

    pub async fn tick(&mut self) {
        self.accept().await;

        let readiness = self.poll_readiness();
        let writable: HashSet<ConnId> = readiness
            .iter()
            .filter(|(_, ready)| ready.writable)
            .map(|(id, _)| *id)
            .collect();

        for (id, ready) in readiness {
            if ready.readable {
                self.service(id);
            }
        }

        self.flush(&writable);
    }

    async fn accept(&mut self) {
        match tokio::time::timeout(self.config.accept_wait, self.listener.accept()).await {
            Err(_) => {}
            Ok(Ok((stream, peer))) => self.admit(stream, peer),
            Ok(Err(e)) => tracing::warn!(error = %e, "accept failed"),
        }
    }

    fn admit(&mut self, stream: TcpStream, peer: SocketAddr) {
        if self.connection_count() >= self.config.max_clients {
            tracing::warn!(%peer, max = self.config.max_clients, "at capacity, refusing client");
            return;
        }

        let id = match self.free_slots.pop() {
            Some(id) => id,
            None => {
                self.connections.push(None);
                ConnId::new(self.connections.len() - 1)
            }
        };
        self.connections[id.index()] = Some(ClientConnection::new(id, stream, peer));
        tracing::info!(conn = %id, %peer, "client connected");
    }

    /// Zero-wait readiness for every live connection. Sockets that fail to
    /// poll are dropped here.
    fn poll_readiness(&mut self) -> Vec<(ConnId, Readiness)> {
        if self.connections.iter().all(Option::is_none) {
            return Vec::new();
        }

        let mut ready = Vec::new();
        let mut failed = Vec::new();
        for conn in self.connections.iter().flatten() {
            match conn.poll_ready() {
                Ok(readiness) => ready.push((conn.id(), readiness)),
                Err(e) => failed.push((conn.id(), e)),
            }
        }

        for (id, e) in failed {
            tracing::info!(conn = %id, error = %e, "readiness poll failed");
            self.drop_connection(id);
        }
        ready
    }

    /// Read once from a readable connection and act on it.
    fn service(&mut self, id: ConnId) {
        match self.read_and_dispatch(id) {
            Ok(true) => {}
            Ok(false) => self.drop_connection(id),
            Err(e) => {
                if e.is_peer_disconnect() {
                    tracing::info!(conn = %id, error = %e, "client disconnected");
                } else {
                    tracing::warn!(conn = %id, error = %e, "dropping client");
                }
                self.drop_connection(id);
            }
        }
    }

    /// `Ok(false)` when the router asked for the connection to close.
    fn read_and_dispatch(&mut self, id: ConnId) -> Result<bool, ChatError> {
        let Some(conn) = self.connections.get_mut(id.index()).and_then(Option::as_mut) else {
            return Ok(true);
        };
        let Some(raw) = conn.try_recv(self.config.max_message_len)? else {
            return Ok(true);
        };

        match self.router.dispatch(&mut conn.session, &raw)? {
            Disposition::Continue(reply) => {
                if let Some(reply) = reply {
                    conn.send_reply(&reply)?;
                }
                Ok(true)
            }
            Disposition::Disconnect(reply) => {
                if let Some(reply) = reply {
                    if let Err(e) = conn.send_reply(&reply) {
                        tracing::debug!(conn = %id, error = %e, "parting reply not sent");
                    }
                }
                Ok(false)
            }
        }
    }

    /// Hand queued chats to the router with this tick's writable set.
    fn flush(&mut self, writable: &HashSet<ConnId>) {
        let connections = &self.connections;
        let evicted = self.router.flush(|id, bytes| {
            let Some(conn) = connections.get(id.index()).and_then(Option::as_ref) else {
                return SendOutcome::Failed(ChatError::PeerGone(format!("{id} is gone")));
            };
            if !writable.contains(&id) {
                return SendOutcome::NotReady;
            }
            match conn.try_send(bytes) {
                Ok(true) => SendOutcome::Sent,
                Ok(false) => SendOutcome::NotReady,
                Err(e) => SendOutcome::Failed(e),
            }
        });

        for id in evicted {
            self.drop_connection(id);
        }
    }

    /// Remove a connection from the arena and its session from the router.
    /// The socket closes when the connection is dropped.
    fn drop_connection(&mut self, id: ConnId) {
        let Some(conn) = self.connections.get_mut(id.index()).and_then(Option::take) else {
            return;
        };
        self.router.disconnected(&conn.session);
        self.free_slots.push(id);
    }
}
