//! Primary to standby mirroring.
//!
//! The primary runs one [`BackupHub`](backup::BackupHub) and serves every
//! connected standby with [`link::serve_replica`]. A standby runs
//! [`Standby`](standby::Standby), which feeds a [`Replica`](replica::Replica)
//! until the primary is unreachable and then reports a promotion.

pub mod backup;
pub mod link;
pub mod replica;
pub mod standby;
pub mod wire;

pub use backup::{BackupHandle, BackupHub, ReplicationRecord};
pub use link::serve_replica;
pub use replica::{MirrorEnd, MirrorOutcome, Replica};
pub use standby::{LinkState, Promotion, Standby};
pub use wire::{WireFrame, REPLICATE_COMMAND};
