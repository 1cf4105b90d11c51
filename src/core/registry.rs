//! Room lifecycle: creation, join, leave and destruction

use log::{debug, info};
use tokio::time::Instant;

use crate::constants::REASON_EXPIRED;
use crate::core::message_types::ServerEvent;
use crate::core::outbox::Outbox;
use crate::core::room::RoomId;
use crate::core::state::RelayState;
use crate::error::{RelayError, Result};

/// Result of a successful room creation
#[derive(Debug)]
pub struct CreatedRoom {
    pub room_id: RoomId,
    /// When the expiry action must fire
    pub expires_at: Instant,
    pub outbox: Outbox,
}

impl RelayState {
    /// Create a room owned by `username`; the creator still has to join it
    pub fn create_room(
        &mut self,
        connection_id: &str,
        username: &str,
        room_name: &str,
        password_hash: &str,
        now: Instant,
    ) -> Result<CreatedRoom> {
        self.sessions.require(connection_id)?;

        if username.trim().is_empty() || room_name.trim().is_empty() || password_hash.is_empty() {
            return Err(RelayError::ValidationError(
                "Username, room name and password are required".to_string(),
            ));
        }

        let room = self.rooms.insert_new(
            room_name.to_string(),
            password_hash.to_string(),
            username.to_string(),
            connection_id.to_string(),
            now,
        );
        let room_id = room.id.clone();
        let expires_at = room.expires_at();

        info!(
            "Room {} created by {} ({}), expires in {}s",
            room_id,
            username,
            connection_id,
            self.rooms.room_lifetime().as_secs()
        );

        let mut outbox = Outbox::new();
        outbox.send(
            connection_id,
            ServerEvent::RoomCreated {
                room_id: room_id.clone(),
            },
        );

        Ok(CreatedRoom {
            room_id,
            expires_at,
            outbox,
        })
    }

    /// Join `room_id` under `username`
    ///
    /// Checks run in a fixed order: unknown room, wrong password, blacklisted
    /// name, name already present. A connection holds at most one room.
    pub fn join_room(
        &mut self,
        connection_id: &str,
        username: &str,
        room_id: &RoomId,
        password_hash: &str,
    ) -> Result<Outbox> {
        let session = self.sessions.require(connection_id)?;
        if let Some(current) = &session.room_id {
            if self.rooms.contains(current) {
                return Err(RelayError::AlreadyInRoom);
            }
        }
        if username.trim().is_empty() {
            return Err(RelayError::ValidationError("Username is required".to_string()));
        }

        let room = self
            .rooms
            .get_mut(room_id)
            .ok_or(RelayError::RoomNotFound)?;
        if !room.password_matches(password_hash) {
            return Err(RelayError::BadPassword);
        }
        room.add_user(connection_id.to_string(), username.to_string())?;

        let is_admin = room.is_admin_name(username);
        if let Some(session) = self.sessions.get_mut(connection_id) {
            session.attach(room.id.clone(), username.to_string(), is_admin);
        }

        let mut outbox = Outbox::new();
        outbox.send(
            connection_id,
            ServerEvent::Joined {
                room_id: room.id.clone(),
                room_name: room.name.clone(),
                admin_name: room.admin.clone(),
                is_admin,
                expiry_time: room.expiry_time().timestamp_millis(),
            },
        );
        let others = room
            .users()
            .iter()
            .filter(|member| member.connection_id != connection_id)
            .map(|member| member.connection_id.clone());
        outbox.broadcast(others, &ServerEvent::system(format!("{} joined.", username)));

        info!(
            "{} joined room {} as {}{}",
            connection_id,
            room.id,
            username,
            if is_admin { " (admin)" } else { "" }
        );
        Ok(outbox)
    }

    /// Drop the connection's room membership and tell the remaining members
    pub fn leave(&mut self, connection_id: &str) -> Outbox {
        let mut outbox = Outbox::new();

        let Some(session) = self.sessions.get_mut(connection_id) else {
            return outbox;
        };
        let Some(room_id) = session.room_id.clone() else {
            return outbox;
        };
        session.detach();

        let Some(room) = self.rooms.get_mut(&room_id) else {
            return outbox;
        };
        if let Some(member) = room.remove_connection(connection_id) {
            outbox.broadcast(
                room.member_ids(),
                &ServerEvent::system(format!("{} left.", member.username)),
            );
            debug!("{} left room {}", member.username, room_id);
        }
        outbox
    }

    /// Destroy a room: notify and disconnect every member, then forget it
    ///
    /// Deleting a room that no longer exists does nothing.
    pub fn delete_room(&mut self, room_id: &RoomId, reason: &str) -> Outbox {
        let mut outbox = Outbox::new();

        let Some(room) = self.rooms.remove(room_id) else {
            debug!("Room {} already gone, nothing to delete", room_id);
            return outbox;
        };

        let notice = ServerEvent::RoomDestroyed {
            reason: reason.to_string(),
        };
        for member in room.users() {
            outbox.send(member.connection_id.clone(), notice.clone());
            outbox.terminate(member.connection_id.clone());

            if let Some(session) = self.sessions.get_mut(&member.connection_id) {
                if session.room_id.as_ref() == Some(room_id) {
                    session.detach();
                }
            }
        }

        info!(
            "Room {} destroyed ({}), {} members disconnected",
            room_id,
            reason,
            room.member_count()
        );
        outbox
    }

    /// Expiry action: only acts if the room still exists and its time is up
    pub fn expire_room(&mut self, room_id: &RoomId, now: Instant) -> Outbox {
        match self.rooms.get(room_id) {
            Some(room) if room.is_expired(now) => self.delete_room(room_id, REASON_EXPIRED),
            Some(_) => {
                debug!("Expiry for room {} fired early, ignoring", room_id);
                Outbox::new()
            }
            None => Outbox::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::connection::Connection;
    use crate::core::session::ConnectionState;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn state_with(connections: &[&str]) -> RelayState {
        let mut state = RelayState::new(Duration::from_secs(120 * 60));
        for id in connections {
            let (tx, _rx) = mpsc::unbounded_channel();
            state
                .sessions
                .register(Connection::with_id(id.to_string(), tx), format!("ip-{}", id))
                .unwrap();
        }
        state
    }

    fn create(state: &mut RelayState, conn: &str, admin: &str) -> RoomId {
        state
            .create_room(conn, admin, "Node1", "abc123", Instant::now())
            .unwrap()
            .room_id
    }

    #[tokio::test]
    async fn test_create_requires_all_fields() {
        let mut state = state_with(&["a"]);
        for (user, name, pass) in [("", "n", "p"), ("u", " ", "p"), ("u", "n", "")] {
            assert!(matches!(
                state.create_room("a", user, name, pass, Instant::now()),
                Err(RelayError::ValidationError(_))
            ));
        }
        assert!(state.rooms.is_empty());
    }

    #[tokio::test]
    async fn test_create_does_not_join_creator() {
        let mut state = state_with(&["a"]);
        let created = state
            .create_room("a", "alice", "Node1", "abc123", Instant::now())
            .unwrap();

        assert_eq!(
            created.outbox.events_for("a"),
            vec![&ServerEvent::RoomCreated {
                room_id: created.room_id.clone()
            }]
        );
        assert_eq!(state.rooms.get(&created.room_id).unwrap().member_count(), 0);
        assert_eq!(state.sessions.get("a").unwrap().state(), ConnectionState::Anonymous);
    }

    #[tokio::test]
    async fn test_join_as_admin_and_notify_others() {
        let mut state = state_with(&["a", "b"]);
        let room_id = create(&mut state, "a", "alice");

        let outbox = state.join_room("a", "alice", &room_id, "abc123").unwrap();
        match outbox.events_for("a")[0] {
            ServerEvent::Joined {
                admin_name,
                is_admin,
                ..
            } => {
                assert_eq!(admin_name, "alice");
                assert!(*is_admin);
            }
            other => panic!("unexpected event {:?}", other),
        }

        let outbox = state.join_room("b", "bob", &room_id, "abc123").unwrap();
        assert_eq!(outbox.events_for("a"), vec![&ServerEvent::system("bob joined.")]);
        assert_eq!(outbox.events_for("b").len(), 1);
        assert!(!state.sessions.get("b").unwrap().is_admin);
    }

    #[tokio::test]
    async fn test_join_failures_leave_room_untouched() {
        let mut state = state_with(&["a", "b", "c"]);
        let room_id = create(&mut state, "a", "alice");
        state.join_room("a", "alice", &room_id, "abc123").unwrap();

        assert_eq!(
            state.join_room("b", "bob", &RoomId::from("nope"), "abc123"),
            Err(RelayError::RoomNotFound)
        );
        assert_eq!(
            state.join_room("b", "bob", &room_id, "wrong"),
            Err(RelayError::BadPassword)
        );
        assert_eq!(
            state.join_room("c", "alice", &room_id, "abc123"),
            Err(RelayError::NameTaken)
        );
        assert_eq!(state.rooms.get(&room_id).unwrap().member_count(), 1);
        assert_eq!(state.sessions.get("b").unwrap().state(), ConnectionState::Anonymous);
    }

    #[tokio::test]
    async fn test_second_join_is_refused() {
        let mut state = state_with(&["a"]);
        let first = create(&mut state, "a", "alice");
        let second = create(&mut state, "a", "alice");
        state.join_room("a", "alice", &first, "abc123").unwrap();

        assert_eq!(
            state.join_room("a", "alice", &second, "abc123"),
            Err(RelayError::AlreadyInRoom)
        );
    }

    #[tokio::test]
    async fn test_leave_notifies_remaining_members() {
        let mut state = state_with(&["a", "b"]);
        let room_id = create(&mut state, "a", "alice");
        state.join_room("a", "alice", &room_id, "abc123").unwrap();
        state.join_room("b", "bob", &room_id, "abc123").unwrap();

        let outbox = state.leave("b");
        assert_eq!(outbox.events_for("a"), vec![&ServerEvent::system("bob left.")]);
        assert!(outbox.events_for("b").is_empty());
        assert!(!state.rooms.get(&room_id).unwrap().has_user("bob"));

        // Leaving twice, or without a room, is a no-op
        assert!(state.leave("b").is_empty());
    }

    #[tokio::test]
    async fn test_delete_room_is_idempotent() {
        let mut state = state_with(&["a", "b"]);
        let room_id = create(&mut state, "a", "alice");
        state.join_room("a", "alice", &room_id, "abc123").unwrap();
        state.join_room("b", "bob", &room_id, "abc123").unwrap();

        let outbox = state.delete_room(&room_id, "Admin Destroyed");
        for conn in ["a", "b"] {
            assert_eq!(
                outbox.events_for(conn),
                vec![&ServerEvent::RoomDestroyed {
                    reason: "Admin Destroyed".to_string()
                }]
            );
            assert!(outbox.terminates(conn));
            assert_eq!(state.sessions.get(conn).unwrap().state(), ConnectionState::Anonymous);
        }
        assert!(!state.rooms.contains(&room_id));

        assert!(state.delete_room(&room_id, "Expired").is_empty());
        assert_eq!(
            state.join_room("b", "bob", &room_id, "abc123"),
            Err(RelayError::RoomNotFound)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_expire_room_only_after_deadline() {
        let mut state = state_with(&["a"]);
        let start = Instant::now();
        let room_id = create(&mut state, "a", "alice");
        state.join_room("a", "alice", &room_id, "abc123").unwrap();

        assert!(state
            .expire_room(&room_id, start + Duration::from_secs(119 * 60))
            .is_empty());
        assert!(state.rooms.contains(&room_id));

        let outbox = state.expire_room(&room_id, start + Duration::from_secs(120 * 60));
        assert_eq!(
            outbox.events_for("a"),
            vec![&ServerEvent::RoomDestroyed {
                reason: "Expired".to_string()
            }]
        );
        assert!(!state.rooms.contains(&room_id));
    }
}
