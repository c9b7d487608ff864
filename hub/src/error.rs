use std::io;
use std::net::SocketAddr;

#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("failed to encode replication frame: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("failed to decode replication frame: {0}")]
    Decode(#[source] serde_json::Error),
}

/// Rejected first line of a connection.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HandshakeError {
    #[error("empty handshake")]
    Empty,
    #[error("unknown command '{0}'")]
    UnknownCommand(String),
    #[error("missing room id")]
    MissingRoom,
    #[error("invalid room id '{0}'")]
    InvalidRoom(String),
    #[error("unexpected argument '{0}'")]
    TrailingArgument(String),
}

#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Io(#[from] io::Error),
}
