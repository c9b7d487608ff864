//! Task runtime backed by tokio.
//!
//! Everything above this crate spawns, sleeps, frames and selects through
//! these reexports.

mod tokio;

use crate::tracing::init_tracing;
use std::future::Future;

pub use crate::tasks::tokio::codec;
pub use crate::tasks::tokio::io;
pub use crate::tasks::tokio::mpsc;
pub use crate::tasks::tokio::net;
pub use crate::tasks::tokio::oneshot;
pub use crate::tasks::tokio::watch;
pub use crate::tasks::tokio::CancellationToken;
pub use crate::tasks::tokio::{interval, sleep, timeout, timeout_at, Instant, MissedTickBehavior};
pub use crate::tasks::tokio::{select, spawn, JoinHandle, Runtime};

/// Installs tracing and drives `future` to completion on a fresh
/// multi-threaded runtime.
pub fn run<F: Future>(future: F) -> F::Output {
    init_tracing();

    let rt = Runtime::new().expect("failed to build the tokio runtime");
    rt.block_on(future)
}
