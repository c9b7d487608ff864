//! Runtime wrapper to keep tokio out of the hub code. Swapping the runtime
//! means changing this crate only.
//!
//! Only the slice of tokio and tokio-util that the actors, the client agents
//! and the replication link actually use is reexported here. Extend it as
//! needed.

pub mod tasks;
mod tracing;

pub use crate::tracing::init_tracing;
