use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("network error: {0}")]
    Network(#[from] std::io::Error),

    /// Bytes that are not UTF-8 JSON, or JSON that is not an object.
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    /// An object that matches none of the protocol units.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("name already taken: {0}")]
    NameConflict(String),

    #[error("unknown destination: {0}")]
    UnknownDestination(String),

    #[error("peer gone: {0}")]
    PeerGone(String),

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("config error: {0}")]
    Config(String),
}

impl ChatError {
    /// The peer went away, as opposed to the relay giving up on it.
    pub fn is_peer_disconnect(&self) -> bool {
        matches!(self, ChatError::Network(_) | ChatError::PeerGone(_))
    }
}

#[cfg(test)]
mod tests {
    use std::io;

    use super::*;

    #[test]
    fn only_io_and_closed_peers_count_as_disconnects() {
        let reset = io::Error::from(io::ErrorKind::ConnectionReset);
        assert!(ChatError::from(reset).is_peer_disconnect());
        assert!(ChatError::PeerGone("eof".into()).is_peer_disconnect());
        assert!(!ChatError::MalformedPayload("not json".into()).is_peer_disconnect());
    }
}
