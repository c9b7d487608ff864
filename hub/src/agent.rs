//! Chat client agent: bridges one line-oriented connection and its room.

use bytes::Bytes;
use futures::{Sink, SinkExt, Stream, StreamExt};
use roomcast_rt::tasks::{
    self as rt,
    codec::{Framed, FramedParts, LinesCodec, LinesCodecError},
    io::{AsyncRead, AsyncWrite},
    CancellationToken,
};

use crate::config::ClientConfig;
use crate::lines::{ChatCodec, ChatLine};
use crate::outbox::{self, ClientId, Delivery, Inbox, Recv};
use crate::room::RoomHandle;

/// Written before the first replayed message the user has not seen yet.
pub const UNREAD_MARKER: &str = "--- unread ---";

/// Serves a joined chat client until the connection or the room ends it.
/// Every inbound line is broadcast to the room; every delivery is written
/// back as one line. Lines over `max_line_len` are dropped and the session
/// goes on.
pub async fn serve_chat<T>(
    framed: Framed<T, LinesCodec>,
    room: RoomHandle,
    user: Option<String>,
    config: ClientConfig,
) where
    T: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    let (subscriber, inbox) = outbox::channel::<Delivery>(config.queue_capacity, user);
    let id = subscriber.id();
    if let Err(error) = room.register(subscriber).await {
        tracing::warn!(room = room.room_id(), %error, "room unavailable, closing client");
        return;
    }

    let handshake = framed.into_parts();
    let codec = ChatCodec::new(config.max_line_len);
    let mut parts = FramedParts::new::<String>(handshake.io, codec);
    parts.read_buf = handshake.read_buf;
    parts.write_buf = handshake.write_buf;
    let (sink, stream) = Framed::from_parts(parts).split();
    let token = CancellationToken::new();
    let writer = rt::spawn(write_pump(sink, inbox, config, token.clone()));

    read_pump(stream, &room, id, &token).await;
    token.cancel();
    if let Err(error) = room.unregister(id).await {
        tracing::debug!(room = room.room_id(), client = id, %error, "room gone before unregister");
    }
    if let Err(error) = writer.await {
        tracing::error!(client = id, %error, "client writer task failed");
    }
    tracing::debug!(room = room.room_id(), client = id, "client disconnected");
}

async fn read_pump<S>(mut stream: S, room: &RoomHandle, id: ClientId, token: &CancellationToken)
where
    S: Stream<Item = Result<ChatLine, LinesCodecError>> + Unpin,
{
    loop {
        let next = rt::select! {
            _ = token.cancelled() => break,
            next = stream.next() => next,
        };
        match next {
            None => break,
            Some(Ok(ChatLine::Text(line))) => {
                if let Err(error) = room.broadcast(Bytes::from(line)).await {
                    tracing::warn!(room = room.room_id(), client = id, %error, "room stopped");
                    break;
                }
            }
            Some(Ok(ChatLine::Overlong)) => {
                tracing::warn!(client = id, "discarding overlong line");
            }
            Some(Err(error)) => {
                tracing::warn!(client = id, %error, "client read failed");
                break;
            }
        }
    }
}

async fn write_pump<S>(
    mut sink: S,
    mut inbox: Inbox<Delivery>,
    config: ClientConfig,
    token: CancellationToken,
) where
    S: Sink<String, Error = LinesCodecError> + Unpin,
{
    let id = inbox.id();
    loop {
        let delivery = rt::select! {
            _ = token.cancelled() => break,
            received = inbox.recv() => match received {
                Recv::Item(delivery) => delivery,
                Recv::Closed(reason) => {
                    tracing::debug!(client = id, ?reason, "client queue closed");
                    break;
                }
            },
        };

        match rt::timeout(config.write_wait, write_delivery(&mut sink, delivery)).await {
            Ok(Ok(())) => {}
            Ok(Err(error)) => {
                tracing::warn!(client = id, %error, "client write failed");
                break;
            }
            Err(_) => {
                tracing::warn!(client = id, "client write timed out");
                break;
            }
        }
    }

    token.cancel();
    let _ = rt::timeout(config.write_wait, sink.close()).await;
}

/// Writes the unread marker when due, then the message itself.
async fn write_delivery<S>(sink: &mut S, delivery: Delivery) -> Result<(), LinesCodecError>
where
    S: Sink<String, Error = LinesCodecError> + Unpin,
{
    if delivery.unread_boundary {
        sink.feed(UNREAD_MARKER.to_string()).await?;
    }
    let line = String::from_utf8_lossy(&delivery.payload).into_owned();
    sink.send(line).await
}
