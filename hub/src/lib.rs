//! Room broadcast engine with primary/standby replication.
//!
//! Clients join a named room over a line-oriented connection, get the
//! room's history replayed and then every new message in order. Each room
//! is served by its own [`room::RoomHub`] actor. Every broadcast is also
//! handed to the [`replication::BackupHub`], which mirrors it to connected
//! standbys. A standby that loses its primary promotes itself and serves
//! the mirrored history.
//!
//! ```text
//! JOIN <room> [user]   chat session, one message per line
//! ROOMS                sorted room ids joined by ';'
//! REPLICATE            length-delimited replication frames
//! ```

pub mod agent;
pub mod config;
pub mod error;
pub mod lines;
pub mod metrics;
pub mod node;
pub mod outbox;
pub mod registry;
pub mod replication;
pub mod room;
pub mod store;

#[cfg(test)]
mod node_tests;

pub use config::{ClientConfig, HandoffPolicy, LinkConfig, NodeConfig, Role, StandbyConfig};
pub use error::{HandshakeError, NodeError, WireError};
pub use node::{run, start, Node, Startup};
pub use registry::RoomRegistry;
pub use room::{RoomHandle, RoomStatus};
pub use store::{RoomId, RoomLog, Stores};
