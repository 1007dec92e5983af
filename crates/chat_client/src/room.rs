use std::collections::{HashMap, HashSet};

use shared::{domain::RoomId, protocol::ChatMessage};

use crate::typing::TypingSet;

/// Where the active room stands in its lifecycle. "Unjoined" is the absence
/// of an active room (or a different active id), so it needs no variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomPhase {
    /// History fetch in flight; not yet live.
    Joining,
    /// History loaded but no live subscription (transport down, or the room
    /// could not be confirmed).
    HistoryOnly,
    /// History loaded and joined for live updates.
    Joined,
}

pub(crate) struct ActiveRoom {
    pub id: RoomId,
    pub phase: RoomPhase,
    pub messages: Vec<ChatMessage>,
    pub typing: TypingSet,
}

impl ActiveRoom {
    pub(crate) fn new(id: RoomId) -> Self {
        Self {
            id,
            phase: RoomPhase::Joining,
            messages: Vec::new(),
            typing: TypingSet::new(),
        }
    }
}

/// Client-local room state: the one active room plus per-room counters that
/// outlive selection (unread badges, outstanding local typing flags).
#[derive(Default)]
pub(crate) struct RoomLedger {
    pub active: Option<ActiveRoom>,
    unread: HashMap<RoomId, u32>,
    local_typing: HashSet<RoomId>,
}

impl RoomLedger {
    pub(crate) fn is_active(&self, room: &RoomId) -> bool {
        self.active.as_ref().is_some_and(|active| &active.id == room)
    }

    pub(crate) fn active_mut(&mut self, room: &RoomId) -> Option<&mut ActiveRoom> {
        self.active.as_mut().filter(|active| &active.id == room)
    }

    pub(crate) fn unread(&self, room: &RoomId) -> u32 {
        self.unread.get(room).copied().unwrap_or(0)
    }

    pub(crate) fn set_unread(&mut self, room: RoomId, count: u32) {
        self.unread.insert(room, count);
    }

    pub(crate) fn bump_unread(&mut self, room: &RoomId) {
        *self.unread.entry(room.clone()).or_insert(0) += 1;
    }

    pub(crate) fn reset_unread(&mut self, room: &RoomId) {
        self.unread.insert(room.clone(), 0);
    }

    pub(crate) fn set_local_typing(&mut self, room: &RoomId, is_typing: bool) {
        if is_typing {
            self.local_typing.insert(room.clone());
        } else {
            self.local_typing.remove(room);
        }
    }

    /// Clears and reports the outstanding local typing flag for `room`.
    pub(crate) fn take_local_typing(&mut self, room: &RoomId) -> bool {
        self.local_typing.remove(room)
    }

    /// Live membership does not survive a transport loss: the active room
    /// degrades to its history and its typing set empties.
    pub(crate) fn demote_live(&mut self) {
        if let Some(active) = self.active.as_mut() {
            if active.phase == RoomPhase::Joined {
                active.phase = RoomPhase::HistoryOnly;
            }
            active.typing.clear();
        }
        self.local_typing.clear();
    }
}
