use std::io;
use std::net::SocketAddr;

use futures::FutureExt;
use tokio::io::Interest;
use tokio::net::TcpStream;

use crate::error::ChatError;
use crate::protocol::{self, Message, Response};
use crate::types::ConnId;

/// Connection lifecycle as seen by the router.
///
/// Unregistered → Registered → Closed
///
/// The connections of one relay sit side by side in a single arena, so the
/// state is a runtime value rather than a type parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Accepted, no presence yet.
    Unregistered,
    /// Presence accepted; the name is in the session registry.
    Registered,
    /// Terminal. The server drops the connection.
    Closed,
}

/// Plain per-connection data, without the socket.
///
/// The router only ever sees a `Session`, which keeps protocol handling
/// independent of real sockets.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: ConnId,
    pub peer: SocketAddr,
    pub name: Option<String>,
    pub state: SessionState,
}

impl Session {
    pub fn new(id: ConnId, peer: SocketAddr) -> Self {
        Self {
            id,
            peer,
            name: None,
            state: SessionState::Unregistered,
        }
    }

    pub fn register(&mut self, name: &str) {
        self.name = Some(name.to_string());
        self.state = SessionState::Registered;
    }

    pub fn close(&mut self) {
        self.state = SessionState::Closed;
    }

    pub fn is_registered(&self) -> bool {
        self.state == SessionState::Registered
    }

    pub fn is_closed(&self) -> bool {
        self.state == SessionState::Closed
    }

    /// Display name if registered, peer address otherwise. For logs.
    pub fn label(&self) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => self.peer.to_string(),
        }
    }
}

/// Result of one zero-wait readiness poll.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Readiness {
    pub readable: bool,
    pub writable: bool,
}

/// A live client: the socket plus its session.
pub struct ClientConnection {
    stream: TcpStream,
    pub session: Session,
}

impl ClientConnection {
    pub fn new(id: ConnId, stream: TcpStream, peer: SocketAddr) -> Self {
        Self {
            stream,
            session: Session::new(id, peer),
        }
    }

    pub fn id(&self) -> ConnId {
        self.session.id
    }

    /// Ask the reactor which directions are ready, without waiting.
    ///
    /// The readiness future is polled exactly once. `Pending` means the
    /// reactor has seen no event for this socket yet, which is reported as
    /// "neither readable nor writable".
    pub fn poll_ready(&self) -> Result<Readiness, ChatError> {
        let interest = Interest::READABLE | Interest::WRITABLE;
        match self.stream.ready(interest).now_or_never() {
            None => Ok(Readiness::default()),
            Some(Ok(ready)) => Ok(Readiness {
                readable: ready.is_readable() || ready.is_read_closed(),
                writable: ready.is_writable(),
            }),
            Some(Err(e)) => Err(e.into()),
        }
    }

    /// Read once, up to `max_len` bytes.
    ///
    /// `Ok(None)` means the readiness was stale and nothing was read. EOF is
    /// reported as `PeerGone`.
    pub fn try_recv(&mut self, max_len: usize) -> Result<Option<Vec<u8>>, ChatError> {
        let mut buf = vec![0; max_len];
        match self.stream.try_read(&mut buf) {
            Ok(0) => Err(ChatError::PeerGone(format!(
                "{} closed the connection",
                self.session.label()
            ))),
            Ok(n) => {
                buf.truncate(n);
                Ok(Some(buf))
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Write `bytes` without waiting.
    ///
    /// Returns `Ok(false)` if the socket would block before anything was
    /// written. A unit that is only partly written cannot be resumed, since
    /// the wire has no framing, so that case is `PeerGone`.
    pub fn try_send(&self, bytes: &[u8]) -> Result<bool, ChatError> {
        let mut written = 0;
        while written < bytes.len() {
            match self.stream.try_write(&bytes[written..]) {
                Ok(0) => {
                    return Err(ChatError::PeerGone(format!(
                        "{} stopped accepting data",
                        self.session.label()
                    )));
                }
                Ok(n) => written += n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock && written == 0 => {
                    return Ok(false);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    return Err(ChatError::PeerGone(format!(
                        "short write to {} ({written} of {} bytes)",
                        self.session.label(),
                        bytes.len()
                    )));
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(true)
    }

    /// Send a status reply right away. A full send buffer counts as failure.
    pub fn send_reply(&self, reply: &Response) -> Result<(), ChatError> {
        let bytes = protocol::encode(&Message::Response(reply.clone()))?;
        if self.try_send(&bytes)? {
            Ok(())
        } else {
            Err(ChatError::PeerGone(format!(
                "{} is not accepting replies",
                self.session.label()
            )))
        }
    }
}

/// RAII: dropping the connection closes the socket. The log line makes
/// every eviction path visible in one place.
impl Drop for ClientConnection {
    fn drop(&mut self) {
        tracing::debug!(
            conn = %self.session.id,
            peer = %self.session.peer,
            "connection closed"
        );
    }
}
