//! A serving process: the accept loop, the connection handshake and the
//! standby-then-primary startup sequence.

use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use roomcast_rt::tasks::{
    self as rt,
    codec::{Framed, FramedParts, LinesCodec},
    io::{AsyncRead, AsyncWrite},
    net::TcpListener,
};

use crate::agent;
use crate::config::{NodeConfig, Role};
use crate::error::{HandshakeError, NodeError};
use crate::registry::RoomRegistry;
use crate::replication::{self, wire, BackupHandle, Promotion, Replica, Standby, REPLICATE_COMMAND};
use crate::store::{RoomId, Stores};

const ROOMS_COMMAND: &str = "ROOMS";
const JOIN_COMMAND: &str = "JOIN";
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// First line of every connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Handshake {
    /// `JOIN <room> [user]`
    Join {
        room_id: RoomId,
        user: Option<String>,
    },
    /// `ROOMS`
    Rooms,
    /// `REPLICATE`
    Replicate,
}

impl FromStr for Handshake {
    type Err = HandshakeError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut words = line.split_whitespace();
        let command = words.next().ok_or(HandshakeError::Empty)?;
        let handshake = match command {
            JOIN_COMMAND => {
                let room_id = words.next().ok_or(HandshakeError::MissingRoom)?;
                if !is_valid_room_id(room_id) {
                    return Err(HandshakeError::InvalidRoom(room_id.to_string()));
                }
                Handshake::Join {
                    room_id: room_id.to_string(),
                    user: words.next().map(str::to_string),
                }
            }
            ROOMS_COMMAND => Handshake::Rooms,
            REPLICATE_COMMAND => Handshake::Replicate,
            other => return Err(HandshakeError::UnknownCommand(other.to_string())),
        };
        match words.next() {
            Some(extra) => Err(HandshakeError::TrailingArgument(extra.to_string())),
            None => Ok(handshake),
        }
    }
}

pub fn is_valid_room_id(room_id: &str) -> bool {
    !room_id.is_empty() && room_id.bytes().all(|b| b.is_ascii_alphanumeric())
}

/// A process serving as primary. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Node {
    config: Arc<NodeConfig>,
    stores: Stores,
    registry: RoomRegistry,
    backup: BackupHandle,
}

impl Node {
    /// Starts the backup hub over `stores`. Room hubs start on demand.
    /// Must run inside the runtime.
    pub fn primary(config: NodeConfig, stores: Stores) -> Self {
        let backup = BackupHandle::start(&stores, config.handoff, config.backup_mailbox);
        let registry = RoomRegistry::new(stores.clone(), backup.clone(), config.room_mailbox);
        Self {
            config: Arc::new(config),
            stores,
            registry,
            backup,
        }
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn stores(&self) -> &Stores {
        &self.stores
    }

    pub fn registry(&self) -> &RoomRegistry {
        &self.registry
    }

    pub fn backup(&self) -> &BackupHandle {
        &self.backup
    }

    pub fn list_rooms(&self) -> Vec<RoomId> {
        self.registry.list_rooms()
    }

    /// Accepts connections forever, one task each.
    pub async fn serve(self, listener: TcpListener) {
        loop {
            let (stream, peer) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(error) => {
                    tracing::warn!(%error, "accept failed");
                    rt::sleep(ACCEPT_BACKOFF).await;
                    continue;
                }
            };
            if let Err(error) = stream.set_nodelay(true) {
                tracing::debug!(%peer, %error, "cannot disable nagle");
            }
            let node = self.clone();
            rt::spawn(async move {
                tracing::trace!(%peer, "connection accepted");
                node.handle_connection(stream).await;
            });
        }
    }

    /// Reads the handshake line and hands the connection to the matching
    /// session.
    pub async fn handle_connection<T>(&self, io: T)
    where
        T: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let codec = LinesCodec::new_with_max_length(self.config.client.max_line_len);
        let mut framed = Framed::new(io, codec);

        let line = match rt::timeout(self.config.handshake_timeout, framed.next()).await {
            Err(_) => {
                tracing::debug!("handshake timed out");
                return;
            }
            Ok(None) => return,
            Ok(Some(Err(error))) => {
                tracing::debug!(%error, "handshake read failed");
                return;
            }
            Ok(Some(Ok(line))) => line,
        };

        match line.parse::<Handshake>() {
            Err(error) => {
                tracing::warn!(%error, "rejecting connection");
                self.reply(&mut framed, format!("ERR {error}")).await;
            }
            Ok(Handshake::Rooms) => {
                let rooms = self.list_rooms().join(";");
                self.reply(&mut framed, rooms).await;
            }
            Ok(Handshake::Join { room_id, user }) => {
                let room = self.registry.get_or_create(&room_id);
                agent::serve_chat(framed, room, user, self.config.client.clone()).await;
            }
            Ok(Handshake::Replicate) => {
                // Keep whatever the peer pipelined after the handshake line
                let lines = framed.into_parts();
                let mut parts = FramedParts::new::<Bytes>(
                    lines.io,
                    wire::codec(self.config.link.max_frame_len),
                );
                parts.read_buf = lines.read_buf;
                parts.write_buf = lines.write_buf;
                replication::serve_replica(
                    Framed::from_parts(parts),
                    self.backup.clone(),
                    self.config.link.clone(),
                )
                .await;
            }
        }
    }

    async fn reply<T>(&self, framed: &mut Framed<T, LinesCodec>, line: String)
    where
        T: AsyncRead + AsyncWrite + Unpin,
    {
        match rt::timeout(self.config.client.write_wait, framed.send(line)).await {
            Ok(Ok(())) => {}
            Ok(Err(error)) => tracing::debug!(%error, "reply failed"),
            Err(_) => tracing::debug!("reply timed out"),
        }
        let closing = SinkExt::<String>::close(framed);
        let _ = rt::timeout(self.config.client.write_wait, closing).await;
    }
}

/// A node ready to serve.
#[derive(Debug)]
pub struct Startup {
    pub node: Node,
    pub listener: TcpListener,
    /// Set when the process started as a standby and took over.
    pub promotion: Option<Promotion>,
}

impl Startup {
    pub fn local_addr(&self) -> Result<SocketAddr, NodeError> {
        Ok(self.listener.local_addr()?)
    }
}

/// Brings a node up over `stores`. A standby mirrors its primary into
/// `stores` first and only returns once it has been promoted.
pub async fn start(config: NodeConfig, stores: Stores) -> Result<Startup, NodeError> {
    let promotion = match config.role {
        Role::Primary => None,
        Role::Standby => {
            tracing::info!(primary = %config.standby.primary_addr, "starting as standby");
            let replica = Replica::new(stores.clone());
            let standby = Standby::new(config.standby.clone(), config.link.clone(), replica);
            let promotion = standby.run().await;
            tracing::info!(
                failed_attempts = promotion.failed_attempts,
                error = %promotion.last_error,
                rooms = stores.log.room_ids().len(),
                "primary unreachable, serving as primary"
            );
            Some(promotion)
        }
    };

    let listener = TcpListener::bind(config.listen)
        .await
        .map_err(|source| NodeError::Bind {
            addr: config.listen,
            source,
        })?;
    let node = Node::primary(config, stores);
    Ok(Startup {
        node,
        listener,
        promotion,
    })
}

/// Starts and serves until the process is killed.
pub async fn run(config: NodeConfig) -> Result<(), NodeError> {
    let startup = start(config, Stores::new()).await?;
    tracing::info!(addr = %startup.local_addr()?, handoff = ?startup.node.config().handoff, "listening");
    startup.node.serve(startup.listener).await;
    Ok(())
}
