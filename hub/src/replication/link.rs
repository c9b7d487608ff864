//! Primary side of one replication link.

use std::io;

use bytes::{Bytes, BytesMut};
use futures::{Sink, SinkExt, Stream, StreamExt};
use roomcast_rt::tasks::{
    self as rt,
    codec::{Framed, LengthDelimitedCodec},
    io::{AsyncRead, AsyncWrite},
    CancellationToken, Instant, MissedTickBehavior,
};

use crate::config::LinkConfig;
use crate::outbox::{self, Inbox, Recv};
use crate::replication::backup::BackupHandle;
use crate::replication::wire::{self, WireFrame};

/// Registers the connection with the backup hub and pumps records to it
/// until either side gives up. Returns once the replica is unregistered.
pub async fn serve_replica<T>(
    framed: Framed<T, LengthDelimitedCodec>,
    backup: BackupHandle,
    config: LinkConfig,
) where
    T: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    let (subscriber, inbox) = outbox::channel::<Bytes>(config.queue_capacity, None);
    let id = subscriber.id();
    if let Err(error) = backup.register(subscriber).await {
        tracing::warn!(%error, "backup hub unavailable, refusing replica");
        return;
    }
    tracing::info!(replica = id, "replica connected");

    let (sink, stream) = framed.split();
    let token = CancellationToken::new();
    let writer = rt::spawn(write_pump(sink, inbox, config.clone(), token.clone()));

    read_pump(stream, &config, &token).await;
    token.cancel();
    if let Err(error) = backup.unregister(id).await {
        tracing::debug!(replica = id, %error, "backup hub gone before unregister");
    }
    if let Err(error) = writer.await {
        tracing::error!(replica = id, %error, "replica writer task failed");
    }
    tracing::info!(replica = id, "replica disconnected");
}

async fn write_pump<S>(
    mut sink: S,
    mut inbox: Inbox<Bytes>,
    config: LinkConfig,
    token: CancellationToken,
) where
    S: Sink<Bytes, Error = io::Error> + Unpin,
{
    let mut ticker = rt::interval(config.ping_period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes at once
    ticker.tick().await;
    let mut nonce = 0u64;
    let id = inbox.id();

    loop {
        let frame = rt::select! {
            _ = token.cancelled() => break,
            received = inbox.recv() => match received {
                Recv::Item(frame) => frame,
                Recv::Closed(reason) => {
                    tracing::debug!(replica = id, ?reason, "replica queue closed");
                    break;
                }
            },
            _ = ticker.tick() => {
                nonce += 1;
                match wire::encode(&WireFrame::Ping { nonce }) {
                    Ok(frame) => frame,
                    Err(error) => {
                        tracing::error!(%error, "failed to encode ping");
                        continue;
                    }
                }
            }
        };

        match rt::timeout(config.write_wait, sink.send(frame)).await {
            Ok(Ok(())) => {}
            Ok(Err(error)) => {
                tracing::warn!(replica = id, %error, "replica write failed");
                break;
            }
            Err(_) => {
                tracing::warn!(replica = id, "replica write timed out");
                break;
            }
        }
    }

    token.cancel();
    let _ = rt::timeout(config.write_wait, sink.close()).await;
}

async fn read_pump<S>(mut stream: S, config: &LinkConfig, token: &CancellationToken)
where
    S: Stream<Item = Result<BytesMut, io::Error>> + Unpin,
{
    let mut deadline = Instant::now() + config.pong_wait;
    loop {
        let next = rt::select! {
            _ = token.cancelled() => break,
            next = rt::timeout_at(deadline, stream.next()) => next,
        };
        match next {
            Err(_) => {
                tracing::warn!("replica missed its heartbeat, dropping link");
                break;
            }
            Ok(None) => {
                tracing::debug!("replica closed the link");
                break;
            }
            Ok(Some(Err(error))) => {
                tracing::warn!(%error, "replica read failed");
                break;
            }
            Ok(Some(Ok(frame))) => match wire::decode(&frame) {
                Ok(WireFrame::Pong { .. }) => deadline = Instant::now() + config.pong_wait,
                Ok(other) => tracing::debug!(frame = ?other, "ignoring unexpected frame from replica"),
                Err(error) => tracing::warn!(%error, "dropping undecodable frame from replica"),
            },
        }
    }
}
