//! Per-room broadcast actor.
//!
//! One [`RoomHub`] runs for every active room. It owns the subscriber set and
//! is the only writer of its room's log, so appends, fan-out and the hand-off
//! to the backup hub happen one event at a time in mailbox order.

use std::collections::HashMap;

use bytes::Bytes;
use roomcast_concurrency::tasks::{
    Actor, ActorRef, InitResult, MessageResponse, RequestResponse,
};
use roomcast_concurrency::ActorError;

use crate::outbox::{ClientId, CloseReason, Delivery, DeliverError, Subscriber};
use crate::replication::BackupHandle;
use crate::store::{RoomId, Stores};

pub enum RoomEvent {
    Register(Subscriber<Delivery>),
    Unregister(ClientId),
    Broadcast(Bytes),
}

pub enum RoomRequest {
    Status,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomStatus {
    pub room_id: RoomId,
    /// Sorted.
    pub subscribers: Vec<ClientId>,
    pub history_len: usize,
}

pub struct RoomHub {
    room_id: RoomId,
    subscribers: HashMap<ClientId, Subscriber<Delivery>>,
    stores: Stores,
    backup: BackupHandle,
}

impl RoomHub {
    pub fn new(room_id: impl Into<RoomId>, stores: Stores, backup: BackupHandle) -> Self {
        Self {
            room_id: room_id.into(),
            subscribers: HashMap::new(),
            stores,
            backup,
        }
    }

    fn register(&mut self, subscriber: Subscriber<Delivery>) {
        let id = subscriber.id();
        let history = self.stores.log.history(&self.room_id);
        let cursor = subscriber
            .user()
            .and_then(|user| self.stores.cursors.get(user, &self.room_id));

        for (seq, payload) in history.iter().enumerate() {
            let delivery = Delivery {
                seq,
                payload: payload.clone(),
                unread_boundary: cursor == Some(seq),
            };
            if let Err(error) = subscriber.try_deliver(delivery) {
                tracing::warn!(
                    room = %self.room_id,
                    client = id,
                    replayed = seq,
                    history = history.len(),
                    %error,
                    "history replay did not fit, dropping client"
                );
                self.close_failed(subscriber, error);
                return;
            }
        }

        if let Some(user) = subscriber.user() {
            self.stores
                .cursors
                .advance(user, &self.room_id, history.len());
        }
        tracing::debug!(room = %self.room_id, client = id, replayed = history.len(), "client joined");
        self.subscribers.insert(id, subscriber);
    }

    fn unregister(&mut self, id: ClientId) {
        if let Some(subscriber) = self.subscribers.remove(&id) {
            subscriber.close(CloseReason::Unregistered);
            tracing::debug!(room = %self.room_id, client = id, "client left");
        }
    }

    async fn broadcast(&mut self, payload: Bytes) {
        let seq = self.stores.log.append(&self.room_id, payload.clone());

        let mut failed = Vec::new();
        for (id, subscriber) in &self.subscribers {
            let delivery = Delivery {
                seq,
                payload: payload.clone(),
                unread_boundary: false,
            };
            match subscriber.try_deliver(delivery) {
                Ok(()) => {
                    if let Some(user) = subscriber.user() {
                        self.stores.cursors.advance(user, &self.room_id, seq + 1);
                    }
                }
                Err(error) => failed.push((*id, error)),
            }
        }
        for (id, error) in failed {
            if let Some(subscriber) = self.subscribers.remove(&id) {
                tracing::warn!(room = %self.room_id, client = id, seq, %error, "dropping client");
                self.close_failed(subscriber, error);
            }
        }

        tracing::trace!(room = %self.room_id, seq, "broadcast");
        self.backup.forward(&self.room_id, seq, payload).await;
    }

    fn close_failed(&self, subscriber: Subscriber<Delivery>, error: DeliverError) {
        match error {
            DeliverError::Full => {
                self.stores.metrics.subscriber_dropped();
                subscriber.close(CloseReason::Overflow);
            }
            // The connection is already gone, nobody reads the reason
            DeliverError::Closed => subscriber.close(CloseReason::Shutdown),
        }
    }

    fn status(&self) -> RoomStatus {
        let mut subscribers: Vec<ClientId> = self.subscribers.keys().copied().collect();
        subscribers.sort_unstable();
        RoomStatus {
            room_id: self.room_id.clone(),
            subscribers,
            history_len: self.stores.log.len(&self.room_id),
        }
    }
}

impl Actor for RoomHub {
    type Request = RoomRequest;
    type Message = RoomEvent;
    type Reply = RoomStatus;
    type Error = ();

    async fn init(self, _handle: &ActorRef<Self>) -> Result<InitResult<Self>, Self::Error> {
        self.stores.metrics.room_started();
        tracing::info!(room = %self.room_id, "room started");
        Ok(InitResult::Success(self))
    }

    async fn handle_request(
        &mut self,
        message: Self::Request,
        _handle: &ActorRef<Self>,
    ) -> RequestResponse<Self> {
        match message {
            RoomRequest::Status => RequestResponse::Reply(self.status()),
        }
    }

    async fn handle_message(
        &mut self,
        message: Self::Message,
        _handle: &ActorRef<Self>,
    ) -> MessageResponse {
        match message {
            RoomEvent::Register(subscriber) => self.register(subscriber),
            RoomEvent::Unregister(id) => self.unregister(id),
            RoomEvent::Broadcast(payload) => self.broadcast(payload).await,
        }
        MessageResponse::NoReply
    }

    async fn teardown(self, _handle: &ActorRef<Self>) -> Result<(), Self::Error> {
        tracing::info!(room = %self.room_id, subscribers = self.subscribers.len(), "room stopped");
        for (_, subscriber) in self.subscribers {
            subscriber.close(CloseReason::Shutdown);
        }
        Ok(())
    }
}

/// Cloneable address of a running [`RoomHub`].
#[derive(Debug, Clone)]
pub struct RoomHandle {
    room_id: RoomId,
    actor: ActorRef<RoomHub>,
}

impl RoomHandle {
    pub fn start(
        room_id: impl Into<RoomId>,
        stores: Stores,
        backup: BackupHandle,
        mailbox: usize,
    ) -> Self {
        let room_id = room_id.into();
        let actor = RoomHub::new(room_id.clone(), stores, backup).start_with_capacity(mailbox);
        Self { room_id, actor }
    }

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    pub async fn register(&self, subscriber: Subscriber<Delivery>) -> Result<(), ActorError> {
        self.actor.send(RoomEvent::Register(subscriber)).await
    }

    pub async fn unregister(&self, id: ClientId) -> Result<(), ActorError> {
        self.actor.send(RoomEvent::Unregister(id)).await
    }

    pub async fn broadcast(&self, payload: Bytes) -> Result<(), ActorError> {
        self.actor.send(RoomEvent::Broadcast(payload)).await
    }

    pub async fn status(&self) -> Result<RoomStatus, ActorError> {
        self.actor.request(RoomRequest::Status).await
    }

    pub fn is_running(&self) -> bool {
        self.actor.is_running()
    }

    pub fn same_actor(&self, other: &RoomHandle) -> bool {
        self.actor.same_actor(&other.actor)
    }

    /// Makes the handle report a stopped hub, as after a crash.
    #[cfg(test)]
    pub(crate) fn mark_stopped(&self) {
        self.actor.cancellation_token().cancel();
    }
}
