//! Shared room history and per-user read cursors.
//!
//! Both stores sit behind their own `RwLock`. Writers (append, cursor
//! advance) hold the lock for a single map update; readers copy what they
//! need out before releasing it, so every read is a point-in-time snapshot.

use bytes::Bytes;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::metrics::HubMetrics;

pub type RoomId = String;

/// Result of applying a replicated message at an explicit sequence number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Appended(usize),
    /// Already present locally; nothing changed.
    Duplicate,
    /// The record skips ahead of the local log, which expects `expected` next.
    Gap { expected: usize },
}

/// Append-only message history, keyed by room.
#[derive(Debug, Default)]
pub struct RoomLog {
    rooms: RwLock<HashMap<RoomId, Vec<Bytes>>>,
}

impl RoomLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `payload` and returns its sequence number.
    pub fn append(&self, room: &str, payload: Bytes) -> usize {
        let mut rooms = self.rooms.write().unwrap_or_else(|p| p.into_inner());
        let entries = rooms.entry(room.to_string()).or_default();
        entries.push(payload);
        entries.len() - 1
    }

    /// Appends only if `seq` is the next free index of `room`.
    pub fn append_at(&self, room: &str, seq: usize, payload: Bytes) -> Applied {
        let mut rooms = self.rooms.write().unwrap_or_else(|p| p.into_inner());
        let entries = rooms.entry(room.to_string()).or_default();
        let expected = entries.len();
        if seq < expected {
            Applied::Duplicate
        } else if seq > expected {
            Applied::Gap { expected }
        } else {
            entries.push(payload);
            Applied::Appended(seq)
        }
    }

    pub fn history(&self, room: &str) -> Vec<Bytes> {
        let rooms = self.rooms.read().unwrap_or_else(|p| p.into_inner());
        rooms.get(room).cloned().unwrap_or_default()
    }

    pub fn len(&self, room: &str) -> usize {
        let rooms = self.rooms.read().unwrap_or_else(|p| p.into_inner());
        rooms.get(room).map_or(0, Vec::len)
    }

    /// Known room ids, sorted.
    pub fn room_ids(&self) -> Vec<RoomId> {
        let mut ids: Vec<RoomId> = {
            let rooms = self.rooms.read().unwrap_or_else(|p| p.into_inner());
            rooms.keys().cloned().collect()
        };
        ids.sort();
        ids
    }

    /// Every room's history, rooms sorted by id.
    pub fn snapshot(&self) -> Vec<(RoomId, Vec<Bytes>)> {
        let mut rooms: Vec<(RoomId, Vec<Bytes>)> = {
            let rooms = self.rooms.read().unwrap_or_else(|p| p.into_inner());
            rooms
                .iter()
                .map(|(id, entries)| (id.clone(), entries.clone()))
                .collect()
        };
        rooms.sort_by(|a, b| a.0.cmp(&b.0));
        rooms
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CursorKey {
    user: String,
    room: RoomId,
}

/// How many messages of a room each user has been handed.
#[derive(Debug, Default)]
pub struct ReadCursors {
    cursors: RwLock<HashMap<CursorKey, usize>>,
}

impl ReadCursors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, user: &str, room: &str) -> Option<usize> {
        let key = CursorKey {
            user: user.to_string(),
            room: room.to_string(),
        };
        let cursors = self.cursors.read().unwrap_or_else(|p| p.into_inner());
        cursors.get(&key).copied()
    }

    /// Moves the cursor forward to `delivered`. Never moves it back.
    pub fn advance(&self, user: &str, room: &str, delivered: usize) {
        let key = CursorKey {
            user: user.to_string(),
            room: room.to_string(),
        };
        let mut cursors = self.cursors.write().unwrap_or_else(|p| p.into_inner());
        let cursor = cursors.entry(key).or_insert(0);
        *cursor = (*cursor).max(delivered);
    }
}

/// The process-wide shared state handed to every actor.
#[derive(Debug, Clone, Default)]
pub struct Stores {
    pub log: Arc<RoomLog>,
    pub cursors: Arc<ReadCursors>,
    pub metrics: Arc<HubMetrics>,
}

impl Stores {
    pub fn new() -> Self {
        Self::default()
    }
}
