use std::time::Duration;

use crate::core::room::{Room, RoomId, RoomRegistry};
use crate::core::session::{Session, SessionManager};
use crate::error::{RelayError, Result};

/// All mutable relay state, guarded as one unit by the server
///
/// Room lifecycle operations live in `registry.rs`, message relay and
/// moderation in `relay.rs`.
pub struct RelayState {
    pub rooms: RoomRegistry,
    pub sessions: SessionManager,
}

impl RelayState {
    pub fn new(room_lifetime: Duration) -> Self {
        Self {
            rooms: RoomRegistry::new(room_lifetime),
            sessions: SessionManager::new(),
        }
    }

    /// The caller's session together with its live room
    pub(crate) fn session_in_room(&self, connection_id: &str) -> Result<(&Session, &Room)> {
        let session = self.sessions.require(connection_id)?;
        let room = session
            .room_id
            .as_ref()
            .and_then(|room_id| self.rooms.get(room_id))
            .ok_or(RelayError::NotInRoom)?;
        Ok((session, room))
    }

    /// Room id of the caller's live room, if any
    pub fn current_room(&self, connection_id: &str) -> Option<RoomId> {
        self.session_in_room(connection_id)
            .ok()
            .map(|(_, room)| room.id.clone())
    }
}
