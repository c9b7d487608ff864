//! Bounded outbound queue between a hub and the pump that writes to a
//! transport.
//!
//! The hub owns the [`Subscriber`] half and is the only one able to close
//! it. The connection owns the [`Inbox`] half. Closing is explicit: once the
//! queued items are drained the inbox yields [`Recv::Closed`] with the
//! reason, which callers can tell apart from "nothing queued yet".

use bytes::Bytes;
use roomcast_rt::tasks::mpsc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

pub type ClientId = u64;

static NEXT_CLIENT_ID: AtomicU64 = AtomicU64::new(1);

/// One message handed to a chat subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Position of the message in the room log.
    pub seq: usize,
    pub payload: Bytes,
    /// Set on the first replayed message the user has not seen before.
    pub unread_boundary: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The connection asked to leave.
    Unregistered,
    /// The queue was full when the hub tried to deliver.
    Overflow,
    /// The hub stopped, or never accepted the subscriber.
    Shutdown,
}

#[derive(Debug, PartialEq, Eq)]
pub enum Recv<T> {
    Item(T),
    Closed(CloseReason),
}

#[derive(Debug, PartialEq, Eq)]
pub enum TryRecv<T> {
    Item(T),
    Empty,
    Closed(CloseReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DeliverError {
    #[error("outbound queue is full")]
    Full,
    #[error("outbound queue is closed")]
    Closed,
}

/// Creates a queue holding at most `capacity` undelivered items.
pub fn channel<T>(capacity: usize, user: Option<String>) -> (Subscriber<T>, Inbox<T>) {
    let id = NEXT_CLIENT_ID.fetch_add(1, Ordering::Relaxed);
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let reason = Arc::new(OnceLock::new());
    (
        Subscriber {
            id,
            user,
            tx,
            reason: reason.clone(),
        },
        Inbox { id, rx, reason },
    )
}

/// Producer half, owned by exactly one hub.
#[derive(Debug)]
pub struct Subscriber<T> {
    id: ClientId,
    user: Option<String>,
    tx: mpsc::Sender<T>,
    reason: Arc<OnceLock<CloseReason>>,
}

impl<T> Subscriber<T> {
    pub fn id(&self) -> ClientId {
        self.id
    }

    pub fn user(&self) -> Option<&str> {
        self.user.as_deref()
    }

    /// Non-blocking enqueue.
    pub fn try_deliver(&self, item: T) -> Result<(), DeliverError> {
        self.tx.try_send(item).map_err(|err| match err {
            mpsc::TrySendError::Full(_) => DeliverError::Full,
            mpsc::TrySendError::Closed(_) => DeliverError::Closed,
        })
    }

    /// Enqueue, waiting for the consumer to make room.
    pub async fn deliver(&self, item: T) -> Result<(), DeliverError> {
        self.tx
            .send(item)
            .await
            .map_err(|_| DeliverError::Closed)
    }

    /// Ends the stream. The inbox still drains what is already queued.
    pub fn close(self, reason: CloseReason) {
        let _ = self.reason.set(reason);
    }
}

/// Consumer half, owned by the connection.
#[derive(Debug)]
pub struct Inbox<T> {
    id: ClientId,
    rx: mpsc::Receiver<T>,
    reason: Arc<OnceLock<CloseReason>>,
}

impl<T> Inbox<T> {
    pub fn id(&self) -> ClientId {
        self.id
    }

    pub async fn recv(&mut self) -> Recv<T> {
        match self.rx.recv().await {
            Some(item) => Recv::Item(item),
            None => Recv::Closed(self.close_reason()),
        }
    }

    pub fn try_recv(&mut self) -> TryRecv<T> {
        match self.rx.try_recv() {
            Ok(item) => TryRecv::Item(item),
            Err(mpsc::TryRecvError::Empty) => TryRecv::Empty,
            Err(mpsc::TryRecvError::Disconnected) => TryRecv::Closed(self.close_reason()),
        }
    }

    fn close_reason(&self) -> CloseReason {
        self.reason.get().copied().unwrap_or(CloseReason::Shutdown)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_queue_is_reported_without_blocking() {
        let (subscriber, mut inbox) = channel::<u32>(2, None);
        assert_eq!(subscriber.try_deliver(1), Ok(()));
        assert_eq!(subscriber.try_deliver(2), Ok(()));
        assert_eq!(subscriber.try_deliver(3), Err(DeliverError::Full));
        assert_eq!(inbox.try_recv(), TryRecv::Item(1));
        assert_eq!(inbox.try_recv(), TryRecv::Item(2));
        assert_eq!(inbox.try_recv(), TryRecv::Empty);
    }

    #[test]
    fn close_drains_then_reports_reason() {
        let (subscriber, mut inbox) = channel::<u32>(4, Some("ann".into()));
        assert_eq!(subscriber.user(), Some("ann"));
        subscriber.try_deliver(7).unwrap();
        subscriber.close(CloseReason::Overflow);
        assert_eq!(inbox.try_recv(), TryRecv::Item(7));
        assert_eq!(inbox.try_recv(), TryRecv::Closed(CloseReason::Overflow));
    }

    #[test]
    fn dropped_subscriber_reads_as_shutdown() {
        let (subscriber, mut inbox) = channel::<u32>(1, None);
        drop(subscriber);
        assert_eq!(inbox.try_recv(), TryRecv::Closed(CloseReason::Shutdown));
    }

    #[test]
    fn delivering_to_a_dropped_inbox_fails() {
        let (subscriber, inbox) = channel::<u32>(1, None);
        assert_eq!(subscriber.id(), inbox.id());
        drop(inbox);
        assert_eq!(subscriber.try_deliver(1), Err(DeliverError::Closed));
    }

    #[test]
    fn ids_are_unique() {
        let (a, _ia) = channel::<u32>(1, None);
        let (b, _ib) = channel::<u32>(1, None);
        assert_ne!(a.id(), b.id());
    }
}
