//! Standby side: rebuilds the room log from the mirrored stream.

use std::io;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use roomcast_rt::tasks::{
    self as rt,
    codec::{Framed, LengthDelimitedCodec},
    io::{AsyncRead, AsyncWrite},
    Instant,
};

use crate::config::LinkConfig;
use crate::replication::wire::{self, WireFrame};
use crate::store::{Applied, Stores};

/// Why a mirroring session stopped.
#[derive(Debug)]
pub enum MirrorEnd {
    /// The primary closed the link.
    Closed,
    /// Nothing arrived for `pong_wait`.
    TimedOut,
    Failed(io::Error),
    /// A record skipped ahead of the local log. Reconnecting makes the
    /// primary replay the room from the start.
    Gap {
        room_id: String,
        expected: usize,
        received: u64,
    },
}

#[derive(Debug)]
pub struct MirrorOutcome {
    pub end: MirrorEnd,
    /// Frames received during the session, undecodable ones included.
    pub frames: u64,
}

#[derive(Debug, Clone)]
pub struct Replica {
    stores: Stores,
}

impl Replica {
    pub fn new(stores: Stores) -> Self {
        Self { stores }
    }

    pub fn stores(&self) -> &Stores {
        &self.stores
    }

    /// Applies one mirrored record to the local log.
    pub fn apply(&self, room_id: &str, seq: u64, payload: Bytes) -> Applied {
        let seq = usize::try_from(seq).unwrap_or(usize::MAX);
        let applied = self.stores.log.append_at(room_id, seq, payload);
        if let Applied::Appended(_) = applied {
            self.stores.metrics.record_applied();
        }
        applied
    }

    /// Consumes frames until the link ends. Records are applied in arrival
    /// order and pings are answered. Nothing is ever written back besides
    /// pongs.
    pub async fn mirror<T>(
        &self,
        mut framed: Framed<T, LengthDelimitedCodec>,
        config: &LinkConfig,
    ) -> MirrorOutcome
    where
        T: AsyncRead + AsyncWrite + Unpin,
    {
        let mut frames = 0u64;
        let end = loop {
            let next = match rt::timeout_at(Instant::now() + config.pong_wait, framed.next()).await {
                Ok(next) => next,
                Err(_) => break MirrorEnd::TimedOut,
            };
            let frame = match next {
                None => break MirrorEnd::Closed,
                Some(Err(error)) => break MirrorEnd::Failed(error),
                Some(Ok(frame)) => frame,
            };
            frames += 1;

            match wire::decode(&frame) {
                Err(error) => {
                    self.stores.metrics.record_rejected();
                    tracing::warn!(%error, len = frame.len(), "dropping undecodable replication frame");
                }
                Ok(WireFrame::Record {
                    room_id,
                    seq,
                    payload,
                }) => match self.apply(&room_id, seq, payload) {
                    Applied::Appended(_) => {
                        tracing::trace!(room = %room_id, seq, "record applied");
                    }
                    Applied::Duplicate => {
                        tracing::debug!(room = %room_id, seq, "skipping duplicate record");
                    }
                    Applied::Gap { expected } => {
                        tracing::warn!(room = %room_id, seq, expected, "record gap, resynchronising");
                        break MirrorEnd::Gap {
                            room_id,
                            expected,
                            received: seq,
                        };
                    }
                },
                Ok(WireFrame::Ping { nonce }) => {
                    let pong = match wire::encode(&WireFrame::Pong { nonce }) {
                        Ok(pong) => pong,
                        Err(error) => {
                            tracing::error!(%error, "failed to encode pong");
                            continue;
                        }
                    };
                    match rt::timeout(config.write_wait, framed.send(pong)).await {
                        Ok(Ok(())) => {}
                        Ok(Err(error)) => break MirrorEnd::Failed(error),
                        Err(_) => {
                            break MirrorEnd::Failed(io::Error::new(
                                io::ErrorKind::TimedOut,
                                "pong write timed out",
                            ))
                        }
                    }
                }
                Ok(WireFrame::Pong { .. }) => tracing::debug!("ignoring pong from primary"),
            }
        };
        MirrorOutcome { end, frames }
    }
}
