use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::replication::BackupHandle;
use crate::room::RoomHandle;
use crate::store::{RoomId, Stores};

/// Room id to running room hub. Hubs are started on first access and live
/// for the rest of the process.
#[derive(Debug, Clone)]
pub struct RoomRegistry {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    rooms: RwLock<HashMap<RoomId, RoomHandle>>,
    stores: Stores,
    backup: BackupHandle,
    mailbox: usize,
}

impl RoomRegistry {
    pub fn new(stores: Stores, backup: BackupHandle, mailbox: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                rooms: RwLock::new(HashMap::new()),
                stores,
                backup,
                mailbox,
            }),
        }
    }

    /// Returns the hub for `room_id`, starting it if needed. Concurrent
    /// callers always end up with handles to the same hub.
    pub fn get_or_create(&self, room_id: &str) -> RoomHandle {
        if let Some(room) = self.get(room_id) {
            return room;
        }

        let mut rooms = self
            .inner
            .rooms
            .write()
            .unwrap_or_else(|p| p.into_inner());
        // Someone may have won the race while we waited for the write lock
        if let Some(room) = rooms.get(room_id).filter(|room| room.is_running()) {
            return room.clone();
        }
        if rooms.contains_key(room_id) {
            tracing::warn!(room = room_id, "room hub stopped, starting a new one");
        }
        let room = RoomHandle::start(
            room_id,
            self.inner.stores.clone(),
            self.inner.backup.clone(),
            self.inner.mailbox,
        );
        rooms.insert(room_id.to_string(), room.clone());
        room
    }

    /// The running hub for `room_id`, if any.
    pub fn get(&self, room_id: &str) -> Option<RoomHandle> {
        let rooms = self.inner.rooms.read().unwrap_or_else(|p| p.into_inner());
        rooms
            .get(room_id)
            .filter(|room| room.is_running())
            .cloned()
    }

    /// Ids of the rooms with a hub, sorted.
    pub fn room_ids(&self) -> Vec<RoomId> {
        let rooms = self.inner.rooms.read().unwrap_or_else(|p| p.into_inner());
        let mut ids: Vec<RoomId> = rooms.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Every known room: those with a hub plus those that only have history,
    /// such as rooms mirrored before a promotion.
    pub fn list_rooms(&self) -> Vec<RoomId> {
        let mut ids = self.room_ids();
        ids.extend(self.inner.stores.log.room_ids());
        ids.sort();
        ids.dedup();
        ids
    }

    pub fn rooms_started(&self) -> u64 {
        self.inner.stores.metrics.snapshot().rooms_started
    }
}
