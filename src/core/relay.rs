//! In-room traffic: ciphertext relay, typing indicators and admin moderation

use log::{info, warn};

use crate::constants::{KICKED_NOTICE, REASON_ADMIN_DESTROYED};
use crate::core::message_types::ServerEvent;
use crate::core::outbox::Outbox;
use crate::core::state::RelayState;
use crate::error::{RelayError, Result};

impl RelayState {
    /// Fan an opaque ciphertext out to every member, sender included
    pub fn relay_message(
        &self,
        connection_id: &str,
        encrypted_data: Vec<u8>,
        iv: Vec<u8>,
    ) -> Result<Outbox> {
        let (session, room) = self.session_in_room(connection_id)?;

        if encrypted_data.is_empty() || iv.is_empty() {
            return Err(RelayError::ValidationError(
                "Message payload is empty".to_string(),
            ));
        }

        let event = ServerEvent::Message {
            username: session.display_name().to_string(),
            encrypted_data,
            iv,
            is_admin: session.is_admin,
        };
        let mut outbox = Outbox::new();
        outbox.broadcast(room.member_ids(), &event);
        Ok(outbox)
    }

    /// Typing indicator start/stop, sent to everyone except the sender
    pub fn typing(&self, connection_id: &str, active: bool) -> Result<Outbox> {
        let (session, room) = self.session_in_room(connection_id)?;

        let event = if active {
            ServerEvent::DisplayTyping {
                username: session.display_name().to_string(),
            }
        } else {
            ServerEvent::HideTyping
        };
        let others = room
            .users()
            .iter()
            .filter(|member| member.connection_id != connection_id)
            .map(|member| member.connection_id.clone());

        let mut outbox = Outbox::new();
        outbox.broadcast(others, &event);
        Ok(outbox)
    }

    /// Admin-only: blacklist `target_username`, announce it and cut the target off
    pub fn kick(&mut self, connection_id: &str, target_username: &str) -> Result<Outbox> {
        let (room_id, admin_name) = {
            let (session, room) = self.session_in_room(connection_id)?;
            if !session.is_admin {
                warn!(
                    "Non-admin {} tried to kick {} from room {}",
                    connection_id, target_username, room.id
                );
                return Err(RelayError::NotAuthorized);
            }
            if session.username.as_deref() == Some(target_username) {
                return Err(RelayError::SelfKick);
            }
            (room.id.clone(), session.display_name().to_string())
        };

        let room = self
            .rooms
            .get_mut(&room_id)
            .ok_or(RelayError::RoomNotFound)?;
        let target_connection = room
            .find_user(target_username)
            .map(|member| member.connection_id.clone())
            .ok_or_else(|| RelayError::UserNotFound(target_username.to_string()))?;

        room.ban(target_username)?;

        let mut outbox = Outbox::new();
        outbox.broadcast(
            room.member_ids(),
            &ServerEvent::system(format!(
                "\"{}\" was forcibly disconnected by Admin.",
                target_username
            )),
        );
        outbox.send(
            target_connection.clone(),
            ServerEvent::Kicked {
                reason: KICKED_NOTICE.to_string(),
            },
        );
        outbox.terminate(target_connection.clone());

        room.remove_user(target_username);
        if let Some(session) = self.sessions.get_mut(&target_connection) {
            session.detach();
        }

        outbox.send(
            connection_id,
            ServerEvent::system(format!("Success: {} has been booted.", target_username)),
        );

        info!(
            "{} kicked and banned {} from room {}",
            admin_name, target_username, room_id
        );
        Ok(outbox)
    }

    /// Admin-only: destroy the caller's room
    pub fn request_room_deletion(&mut self, connection_id: &str) -> Result<Outbox> {
        let room_id = {
            let (session, room) = self.session_in_room(connection_id)?;
            if !session.is_admin {
                warn!(
                    "Non-admin {} tried to delete room {}",
                    connection_id, room.id
                );
                return Err(RelayError::NotAuthorized);
            }
            room.id.clone()
        };

        Ok(self.delete_room(&room_id, REASON_ADMIN_DESTROYED))
    }
}
