use std::collections::{HashSet, VecDeque};

use chrono::Utc;
use tracing::instrument;

use crate::connection::Session;
use crate::error::ChatError;
use crate::protocol::{self, Chat, Message, Request, Response};
use crate::registry::SessionRegistry;
use crate::storage::Storage;
use crate::types::ConnId;

/// What the server should do with a connection after a unit was handled.
#[derive(Debug, Clone, PartialEq)]
pub enum Disposition {
    /// Keep the connection, sending the reply if there is one.
    Continue(Option<Response>),
    /// Send the reply if there is one, then drop the connection.
    Disconnect(Option<Response>),
}

/// Result of one delivery attempt, reported back by the server.
#[derive(Debug)]
pub enum SendOutcome {
    Sent,
    /// The destination was not writable this tick. Try again next tick.
    NotReady,
    /// The destination cannot be written to any more.
    Failed(ChatError),
}

/// A chat accepted from a sender and not yet written to its destination.
#[derive(Debug)]
struct Pending {
    chat: Chat,
    /// Whether `destination` had a session when the chat was accepted.
    destination_known: bool,
}

/// Handles decoded units for every connection and owns the state they touch:
/// the session registry, the pending outbound queue and the store.
///
/// The server calls `dispatch` for each read and `flush` once per tick. Both
/// run on the relay loop, so none of the owned state needs a lock.
pub struct Router {
    registry: SessionRegistry,
    pending: VecDeque<Pending>,
    store: Box<dyn Storage>,
    logout_on_disconnect: bool,
}

impl Router {
    pub fn new(store: Box<dyn Storage>) -> Self {
        Self {
            registry: SessionRegistry::new(),
            pending: VecDeque::new(),
            store,
            logout_on_disconnect: false,
        }
    }

    pub fn logout_on_disconnect(mut self, enabled: bool) -> Self {
        self.logout_on_disconnect = enabled;
        self
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn store(&self) -> &dyn Storage {
        self.store.as_ref()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Decode one read and act on it.
    ///
    /// `Err` is returned only for bytes that do not decode to a JSON object;
    /// the caller must drop the connection. Everything else is answered
    /// through the returned `Disposition`.
    #[instrument(level = "debug", skip_all, fields(conn = %session.id, bytes = raw.len()))]
    pub fn dispatch(
        &mut self,
        session: &mut Session,
        raw: &[u8],
    ) -> Result<Disposition, ChatError> {
        let message = match protocol::decode(raw) {
            Ok(message) => message,
            Err(ChatError::ProtocolViolation(reason)) => {
                tracing::warn!(peer = %session.peer, %reason, "bad request");
                return Ok(Disposition::Continue(Some(Response::bad_request(
                    "malformed request",
                ))));
            }
            Err(e) => return Err(e),
        };

        let disposition = match message {
            Message::Request(Request::Presence { user, .. }) => {
                self.presence(session, &user.account_name)
            }
            Message::Request(Request::Chat(chat)) => self.chat(session, chat),
            Message::Request(Request::Exit { account_name, .. }) => {
                self.exit(session, &account_name)
            }
            Message::Response(_) => {
                tracing::warn!(peer = %session.peer, "client sent a status reply");
                Disposition::Continue(Some(Response::bad_request("malformed request")))
            }
        };
        Ok(disposition)
    }

    fn presence(&mut self, session: &mut Session, name: &str) -> Disposition {
        if session.is_registered() {
            tracing::warn!(
                conn = %session.id,
                current = %session.label(),
                requested = %name,
                "presence on an already registered connection"
            );
            return Disposition::Continue(Some(Response::bad_request("already registered")));
        }

        if let Err(e) = self.registry.register(name, session.id) {
            tracing::warn!(
                conn = %session.id,
                peer = %session.peer,
                error = %e,
                "presence rejected"
            );
            session.close();
            return Disposition::Disconnect(Some(Response::bad_request("name taken")));
        }

        session.register(name);
        tracing::info!(conn = %session.id, peer = %session.peer, name = %name, "client registered");

        let (ip, port) = (session.peer.ip(), session.peer.port());
        if let Err(e) = self.store.record_login(name, ip, port, Utc::now()) {
            tracing::error!(name = %name, error = %e, "failed to record login");
        }

        Disposition::Continue(Some(Response::ok()))
    }

    /// Chats are accepted from any connection, registered or not.
    fn chat(&mut self, session: &Session, chat: Chat) -> Disposition {
        if !session.is_registered() {
            tracing::debug!(peer = %session.peer, from = %chat.sender, "chat before presence");
        }

        if let Err(e) = self.store.record_message(&chat.sender, &chat.destination) {
            tracing::error!(
                from = %chat.sender,
                to = %chat.destination,
                error = %e,
                "failed to count message"
            );
        }

        let destination_known = self.registry.contains(&chat.destination);
        self.pending.push_back(Pending {
            chat,
            destination_known,
        });

        Disposition::Continue(None)
    }

    /// Log out `name`, free it, and close the sending connection.
    ///
    /// The named session need not belong to the sender; when it does not,
    /// its connection stays open but is no longer reachable by name.
    fn exit(&mut self, session: &mut Session, name: &str) -> Disposition {
        if let Err(e) = self.store.record_logout(name) {
            tracing::error!(name = %name, error = %e, "failed to record logout");
        }

        match self.registry.unregister(name) {
            Some(owner) if owner == session.id => {
                tracing::info!(conn = %session.id, name = %name, "client left");
            }
            Some(owner) => {
                tracing::warn!(
                    conn = %session.id,
                    name = %name,
                    owner = %owner,
                    "exit ended another connection's session"
                );
            }
            None => {
                tracing::debug!(conn = %session.id, name = %name, "exit for unknown name");
            }
        }

        session.close();
        Disposition::Disconnect(None)
    }

    /// Forget the session of a connection the server has dropped.
    ///
    /// The durable session record is only closed here when
    /// `logout_on_disconnect` is set; otherwise only `exit` closes it.
    pub fn disconnected(&mut self, session: &Session) {
        let Some(name) = &session.name else {
            return;
        };
        if self.registry.lookup(name) == Some(session.id) {
            self.end_session(name);
        }
    }

    fn end_session(&mut self, name: &str) {
        self.registry.unregister(name);
        tracing::info!(name = %name, "session removed");

        if self.logout_on_disconnect {
            if let Err(e) = self.store.record_logout(name) {
                tracing::error!(name = %name, error = %e, "failed to record logout");
            }
        }
    }

    /// Try to deliver every pending chat once.
    ///
    /// `send` performs the write for a destination connection. Chats whose
    /// destination is not ready stay queued in order; once a destination is
    /// not ready, its later chats wait too. Returns the connections whose
    /// writes failed; their sessions are already removed.
    pub fn flush<F>(&mut self, mut send: F) -> Vec<ConnId>
    where
        F: FnMut(ConnId, &[u8]) -> SendOutcome,
    {
        let mut evicted = Vec::new();
        let mut blocked: HashSet<String> = HashSet::new();
        let mut deferred = VecDeque::new();

        while let Some(pending) = self.pending.pop_front() {
            let chat = &pending.chat;
            if blocked.contains(&chat.destination) {
                deferred.push_back(pending);
                continue;
            }

            let Some(conn) = self.registry.lookup(&chat.destination) else {
                if pending.destination_known {
                    tracing::warn!(
                        from = %chat.sender,
                        to = %chat.destination,
                        "destination left before delivery, message dropped"
                    );
                } else {
                    let e = ChatError::UnknownDestination(chat.destination.clone());
                    tracing::error!(from = %chat.sender, error = %e, "message dropped");
                }
                continue;
            };

            let bytes = match protocol::encode(&Message::from(chat.clone())) {
                Ok(bytes) => bytes,
                Err(e) => {
                    tracing::error!(from = %chat.sender, error = %e, "could not encode message");
                    continue;
                }
            };

            match send(conn, &bytes) {
                SendOutcome::Sent => {
                    tracing::info!(from = %chat.sender, to = %chat.destination, "message relayed");
                }
                SendOutcome::NotReady => {
                    blocked.insert(chat.destination.clone());
                    deferred.push_back(pending);
                }
                SendOutcome::Failed(e) => {
                    tracing::warn!(
                        to = %chat.destination,
                        error = %e,
                        "relay failed, dropping destination"
                    );
                    let destination = chat.destination.clone();
                    self.end_session(&destination);
                    evicted.push(conn);
                }
            }
        }

        self.pending = deferred;
        evicted
    }
}
