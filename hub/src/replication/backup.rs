//! Process-wide hub that mirrors every room's broadcasts to the connected
//! standbys.
//!
//! Room hubs forward `{room, seq, payload}` records here after appending
//! them to the log. A standby that registers first gets the whole log
//! replayed, waiting on the replica's queue as needed; live records already
//! covered by that replay are skipped so the replica never sees a message
//! twice.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use roomcast_concurrency::tasks::{Actor, ActorRef, MessageResponse, RequestResponse};
use roomcast_concurrency::ActorError;

use crate::config::HandoffPolicy;
use crate::metrics::HubMetrics;
use crate::outbox::{ClientId, CloseReason, DeliverError, Subscriber};
use crate::replication::wire::{self, WireFrame};
use crate::store::{RoomId, RoomLog, Stores};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicationRecord {
    pub room_id: RoomId,
    pub seq: usize,
    pub payload: Bytes,
}

pub enum BackupEvent {
    Register(Subscriber<Bytes>),
    Unregister(ClientId),
    Record(ReplicationRecord),
}

pub enum BackupRequest {
    Replicas,
}

struct Follower {
    subscriber: Subscriber<Bytes>,
    /// Per room, how many messages the registration replay already sent.
    replayed: HashMap<RoomId, usize>,
}

pub struct BackupHub {
    followers: HashMap<ClientId, Follower>,
    log: Arc<RoomLog>,
    metrics: Arc<HubMetrics>,
    policy: HandoffPolicy,
}

impl BackupHub {
    pub fn new(stores: &Stores, policy: HandoffPolicy) -> Self {
        Self {
            followers: HashMap::new(),
            log: stores.log.clone(),
            metrics: stores.metrics.clone(),
            policy,
        }
    }

    async fn register(&mut self, subscriber: Subscriber<Bytes>) {
        let id = subscriber.id();
        let mut follower = Follower {
            subscriber,
            replayed: HashMap::new(),
        };
        let mut sent = 0usize;

        for (room_id, history) in self.log.snapshot() {
            let replayed = history.len();
            for (seq, payload) in history.into_iter().enumerate() {
                let Some(frame) = encode_record(&room_id, seq, payload) else {
                    continue;
                };
                // Replays wait for room whatever the policy, so a log longer
                // than the queue still reaches the replica
                if let Err(error) = follower.subscriber.deliver(frame).await {
                    self.drop_follower(follower, error);
                    return;
                }
                sent += 1;
            }
            follower.replayed.insert(room_id, replayed);
        }

        tracing::info!(replica = id, records = sent, "replica registered");
        self.followers.insert(id, follower);
    }

    fn unregister(&mut self, id: ClientId) {
        if let Some(follower) = self.followers.remove(&id) {
            follower.subscriber.close(CloseReason::Unregistered);
            tracing::info!(replica = id, "replica left");
        }
    }

    async fn record(&mut self, record: ReplicationRecord) {
        let ReplicationRecord {
            room_id,
            seq,
            payload,
        } = record;
        let Some(frame) = encode_record(&room_id, seq, payload) else {
            return;
        };

        let mut dead = Vec::new();
        for (id, follower) in &self.followers {
            let covered = follower
                .replayed
                .get(&room_id)
                .is_some_and(|&replayed| seq < replayed);
            if covered {
                continue;
            }
            if let Err(error) = self.push(&follower.subscriber, frame.clone()).await {
                dead.push((*id, error));
            }
        }
        for (id, error) in dead {
            if let Some(follower) = self.followers.remove(&id) {
                self.drop_follower(follower, error);
            }
        }
    }

    /// Live records follow the hand-off policy.
    async fn push(&self, subscriber: &Subscriber<Bytes>, frame: Bytes) -> Result<(), DeliverError> {
        match self.policy {
            HandoffPolicy::Blocking => subscriber.deliver(frame).await,
            HandoffPolicy::DropOnFull => subscriber.try_deliver(frame),
        }
    }

    fn drop_follower(&self, follower: Follower, error: DeliverError) {
        let id = follower.subscriber.id();
        match error {
            DeliverError::Full => {
                self.metrics.replica_dropped();
                tracing::warn!(replica = id, "replica queue full, disconnecting it");
                follower.subscriber.close(CloseReason::Overflow);
            }
            DeliverError::Closed => {
                tracing::debug!(replica = id, "replica link already gone");
            }
        }
    }
}

/// A record that fails to encode is skipped, never sent in some other shape.
fn encode_record(room_id: &str, seq: usize, payload: Bytes) -> Option<Bytes> {
    match wire::encode(&WireFrame::record(room_id, seq, payload)) {
        Ok(frame) => Some(frame),
        Err(error) => {
            tracing::error!(%error, room = room_id, seq, "skipping record that cannot be encoded");
            None
        }
    }
}

impl Actor for BackupHub {
    type Request = BackupRequest;
    type Message = BackupEvent;
    type Reply = Vec<ClientId>;
    type Error = ();

    async fn handle_request(
        &mut self,
        message: Self::Request,
        _handle: &ActorRef<Self>,
    ) -> RequestResponse<Self> {
        match message {
            BackupRequest::Replicas => {
                let mut ids: Vec<ClientId> = self.followers.keys().copied().collect();
                ids.sort_unstable();
                RequestResponse::Reply(ids)
            }
        }
    }

    async fn handle_message(
        &mut self,
        message: Self::Message,
        _handle: &ActorRef<Self>,
    ) -> MessageResponse {
        match message {
            BackupEvent::Register(subscriber) => self.register(subscriber).await,
            BackupEvent::Unregister(id) => self.unregister(id),
            BackupEvent::Record(record) => self.record(record).await,
        }
        MessageResponse::NoReply
    }

    async fn teardown(self, _handle: &ActorRef<Self>) -> Result<(), Self::Error> {
        for (_, follower) in self.followers {
            follower.subscriber.close(CloseReason::Shutdown);
        }
        Ok(())
    }
}

/// Cloneable entry point to the backup hub.
#[derive(Debug, Clone)]
pub struct BackupHandle {
    actor: ActorRef<BackupHub>,
    policy: HandoffPolicy,
    metrics: Arc<HubMetrics>,
}

impl BackupHandle {
    pub fn start(stores: &Stores, policy: HandoffPolicy, mailbox: usize) -> Self {
        let actor = BackupHub::new(stores, policy).start_with_capacity(mailbox);
        Self {
            actor,
            policy,
            metrics: stores.metrics.clone(),
        }
    }

    pub async fn register(&self, subscriber: Subscriber<Bytes>) -> Result<(), ActorError> {
        self.actor.send(BackupEvent::Register(subscriber)).await
    }

    pub async fn unregister(&self, id: ClientId) -> Result<(), ActorError> {
        self.actor.send(BackupEvent::Unregister(id)).await
    }

    /// Hands a freshly appended message over for mirroring. Under
    /// [`HandoffPolicy::Blocking`] this waits for mailbox space.
    pub async fn forward(&self, room_id: &str, seq: usize, payload: Bytes) {
        let event = BackupEvent::Record(ReplicationRecord {
            room_id: room_id.to_string(),
            seq,
            payload,
        });
        let result = match self.policy {
            HandoffPolicy::Blocking => self.actor.send(event).await,
            HandoffPolicy::DropOnFull => self.actor.try_send(event),
        };
        if let Err(error) = result {
            self.metrics.record_dropped();
            tracing::warn!(%error, room = room_id, seq, "record not handed to the backup hub");
        }
    }

    /// Ids of the connected replicas, sorted.
    pub async fn replicas(&self) -> Result<Vec<ClientId>, ActorError> {
        self.actor.request(BackupRequest::Replicas).await
    }
}
