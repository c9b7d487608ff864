//! Standby connection loop and promotion.

use std::io;

use roomcast_rt::tasks::{
    self as rt,
    codec::{Framed, LengthDelimitedCodec},
    io::AsyncWriteExt,
    net::TcpStream,
    watch,
};

use crate::config::{LinkConfig, StandbyConfig};
use crate::replication::replica::Replica;
use crate::replication::wire::{self, REPLICATE_COMMAND};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connecting { attempt: u32 },
    Mirroring,
    /// Terminal. The process serves as primary from now on.
    Promoted,
}

/// Handed back once the primary is considered dead.
#[derive(Debug)]
pub struct Promotion {
    pub failed_attempts: u32,
    pub last_error: io::Error,
}

pub struct Standby {
    config: StandbyConfig,
    link: LinkConfig,
    replica: Replica,
    state: watch::Sender<LinkState>,
}

impl Standby {
    pub fn new(config: StandbyConfig, link: LinkConfig, replica: Replica) -> Self {
        let (state, _) = watch::channel(LinkState::Disconnected);
        Self {
            config,
            link,
            replica,
            state,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<LinkState> {
        self.state.subscribe()
    }

    /// Mirrors the primary, reconnecting whenever the link drops, until
    /// `connect_attempts` consecutive connects fail.
    ///
    /// A session that ends without a single frame counts as a failed
    /// attempt, so a peer that accepts and immediately hangs up still leads
    /// to promotion.
    pub async fn run(self) -> Promotion {
        let attempts = self.config.connect_attempts.max(1);
        let mut failures = 0u32;
        loop {
            self.set_state(LinkState::Connecting {
                attempt: failures + 1,
            });
            let error = match self.connect().await {
                Ok(framed) => {
                    self.set_state(LinkState::Mirroring);
                    tracing::info!(primary = %self.config.primary_addr, "mirroring primary");
                    let outcome = self.replica.mirror(framed, &self.link).await;
                    self.set_state(LinkState::Disconnected);
                    tracing::warn!(
                        end = ?outcome.end,
                        frames = outcome.frames,
                        "replication link ended, reconnecting"
                    );
                    if outcome.frames > 0 {
                        failures = 0;
                        continue;
                    }
                    io::Error::new(
                        io::ErrorKind::ConnectionAborted,
                        "primary closed the link before sending anything",
                    )
                }
                Err(error) => error,
            };

            failures += 1;
            tracing::warn!(
                primary = %self.config.primary_addr,
                attempt = failures,
                of = attempts,
                %error,
                "cannot reach primary"
            );
            if failures >= attempts {
                self.set_state(LinkState::Promoted);
                tracing::info!(failed_attempts = failures, "promoting to primary");
                return Promotion {
                    failed_attempts: failures,
                    last_error: error,
                };
            }
            rt::sleep(self.config.backoff(failures)).await;
        }
    }

    async fn connect(&self) -> io::Result<Framed<TcpStream, LengthDelimitedCodec>> {
        let addr = self.config.primary_addr.as_str();
        let mut stream = match rt::timeout(self.config.connect_timeout, TcpStream::connect(addr)).await {
            Ok(stream) => stream?,
            Err(_) => {
                return Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("connect to {addr} timed out"),
                ))
            }
        };
        stream.set_nodelay(true)?;
        stream
            .write_all(format!("{REPLICATE_COMMAND}\n").as_bytes())
            .await?;
        Ok(Framed::new(stream, wire::codec(self.link.max_frame_len)))
    }

    fn set_state(&self, state: LinkState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            tracing::debug!(?previous, current = ?state, "standby link state changed");
        }
    }
}
