use std::collections::{HashMap, HashSet};
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::constants::ROOM_ID_BYTES;
use crate::error::{RelayError, Result};

/// Short random room identifier (8 hex characters)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(String);

impl RoomId {
    /// Generate a fresh identifier from 4 random bytes
    pub fn generate() -> Self {
        let mut bytes = [0u8; ROOM_ID_BYTES];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes.iter().map(|b| format!("{:02x}", b)).collect())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for RoomId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for RoomId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// A display name held by one connection inside a room
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomMember {
    pub connection_id: String,
    pub username: String,
}

/// A named, password-gated, time-bounded broadcast group
#[derive(Debug, Clone)]
pub struct Room {
    /// Unique identifier for the room
    pub id: RoomId,
    /// Display name of the room (not unique)
    pub name: String,
    /// Display name of the creator; whoever joins under it is admin
    pub admin: String,
    /// Connection that created the room, informational only
    pub admin_connection_id: String,
    /// Timestamp of room creation
    pub created_at: DateTime<Utc>,
    password_hash: String,
    expiry_time: DateTime<Utc>,
    expires_at: Instant,
    users: Vec<RoomMember>,
    blacklist: HashSet<String>,
}

impl Room {
    /// Creates a room that expires `lifetime` after `now`
    pub fn new(
        id: RoomId,
        name: String,
        password_hash: String,
        admin: String,
        admin_connection_id: String,
        lifetime: Duration,
        now: Instant,
    ) -> Self {
        let created_at = Utc::now();
        let expiry_time = chrono::Duration::from_std(lifetime)
            .map(|lifetime| created_at + lifetime)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        Self {
            id,
            name,
            admin,
            admin_connection_id,
            created_at,
            password_hash,
            expiry_time,
            expires_at: now + lifetime,
            users: Vec::new(),
            blacklist: HashSet::new(),
        }
    }

    /// Equality check on the opaque password token, independent of where the first mismatch is
    pub fn password_matches(&self, candidate: &str) -> bool {
        let stored = self.password_hash.as_bytes();
        let candidate = candidate.as_bytes();
        if stored.len() != candidate.len() {
            return false;
        }
        stored
            .iter()
            .zip(candidate)
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
    }

    /// Wall-clock expiry, as shown to clients
    pub fn expiry_time(&self) -> DateTime<Utc> {
        self.expiry_time
    }

    /// Monotonic expiry used for scheduling
    pub fn expires_at(&self) -> Instant {
        self.expires_at
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }

    pub fn is_admin_name(&self, username: &str) -> bool {
        self.admin == username
    }

    /// Adds a user, enforcing the blacklist and name uniqueness
    pub fn add_user(&mut self, connection_id: String, username: String) -> Result<()> {
        if self.is_banned(&username) {
            return Err(RelayError::Banned);
        }
        if self.has_user(&username) {
            return Err(RelayError::NameTaken);
        }

        self.users.push(RoomMember {
            connection_id,
            username,
        });
        Ok(())
    }

    /// Removes whichever user entry belongs to `connection_id`
    pub fn remove_connection(&mut self, connection_id: &str) -> Option<RoomMember> {
        let index = self
            .users
            .iter()
            .position(|member| member.connection_id == connection_id)?;
        Some(self.users.remove(index))
    }

    /// Removes the user entry holding `username`
    pub fn remove_user(&mut self, username: &str) -> Option<RoomMember> {
        let index = self
            .users
            .iter()
            .position(|member| member.username == username)?;
        Some(self.users.remove(index))
    }

    pub fn find_user(&self, username: &str) -> Option<&RoomMember> {
        self.users.iter().find(|member| member.username == username)
    }

    pub fn has_user(&self, username: &str) -> bool {
        self.find_user(username).is_some()
    }

    /// Bars `username` from ever joining this room again
    pub fn ban(&mut self, username: &str) -> Result<()> {
        if !self.blacklist.insert(username.to_string()) {
            return Err(RelayError::AlreadyBanned);
        }
        Ok(())
    }

    pub fn is_banned(&self, username: &str) -> bool {
        self.blacklist.contains(username)
    }

    pub fn users(&self) -> &[RoomMember] {
        &self.users
    }

    /// Connection ids of every member, in join order
    pub fn member_ids(&self) -> Vec<String> {
        self.users
            .iter()
            .map(|member| member.connection_id.clone())
            .collect()
    }

    /// Returns the number of members in the room
    pub fn member_count(&self) -> usize {
        self.users.len()
    }
}

/// In-memory table of live rooms
pub struct RoomRegistry {
    rooms: HashMap<RoomId, Room>,
    room_lifetime: Duration,
}

impl RoomRegistry {
    pub fn new(room_lifetime: Duration) -> Self {
        Self {
            rooms: HashMap::new(),
            room_lifetime,
        }
    }

    pub fn room_lifetime(&self) -> Duration {
        self.room_lifetime
    }

    /// Stores a new room under a freshly generated id
    pub fn insert_new(
        &mut self,
        name: String,
        password_hash: String,
        admin: String,
        admin_connection_id: String,
        now: Instant,
    ) -> &Room {
        let mut id = RoomId::generate();
        while self.rooms.contains_key(&id) {
            id = RoomId::generate();
        }
        let room = Room::new(
            id.clone(),
            name,
            password_hash,
            admin,
            admin_connection_id,
            self.room_lifetime,
            now,
        );
        self.rooms.entry(id).or_insert(room)
    }

    pub fn get(&self, room_id: &RoomId) -> Option<&Room> {
        self.rooms.get(room_id)
    }

    pub fn get_mut(&mut self, room_id: &RoomId) -> Option<&mut Room> {
        self.rooms.get_mut(room_id)
    }

    pub fn contains(&self, room_id: &RoomId) -> bool {
        self.rooms.contains_key(room_id)
    }

    pub fn remove(&mut self, room_id: &RoomId) -> Option<Room> {
        self.rooms.remove(room_id)
    }

    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn room() -> Room {
        Room::new(
            RoomId::from("r1"),
            "Node1".to_string(),
            "abc123".to_string(),
            "alice".to_string(),
            "conn-a".to_string(),
            Duration::from_secs(60),
            Instant::now(),
        )
    }

    #[test]
    fn test_room_id_is_eight_hex_chars() {
        let id = RoomId::generate();
        assert_eq!(id.as_str().len(), 8);
        assert!(id.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_password_matching() {
        let room = room();
        assert!(room.password_matches("abc123"));
        assert!(!room.password_matches("abc124"));
        assert!(!room.password_matches("abc12"));
        assert!(!room.password_matches(""));
    }

    #[test]
    fn test_usernames_are_unique() {
        let mut room = room();
        room.add_user("c1".to_string(), "bob".to_string()).unwrap();
        assert_eq!(
            room.add_user("c2".to_string(), "bob".to_string()),
            Err(RelayError::NameTaken)
        );
        assert_eq!(room.member_count(), 1);
    }

    #[test]
    fn test_blacklist_survives_removal() {
        let mut room = room();
        room.add_user("c1".to_string(), "bob".to_string()).unwrap();
        room.ban("bob").unwrap();
        room.remove_user("bob");

        assert_eq!(
            room.add_user("c9".to_string(), "bob".to_string()),
            Err(RelayError::Banned)
        );
        assert_eq!(room.ban("bob"), Err(RelayError::AlreadyBanned));
    }

    #[test]
    fn test_remove_connection_only_removes_that_entry() {
        let mut room = room();
        room.add_user("c1".to_string(), "bob".to_string()).unwrap();
        room.add_user("c2".to_string(), "carol".to_string()).unwrap();

        let removed = room.remove_connection("c1").unwrap();
        assert_eq!(removed.username, "bob");
        assert_eq!(room.member_ids(), vec!["c2".to_string()]);
        assert!(room.remove_connection("c1").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiry_is_fixed_at_creation() {
        let now = Instant::now();
        let room = room();
        assert!(!room.is_expired(now + Duration::from_secs(59)));
        assert!(room.is_expired(now + Duration::from_secs(60)));
        assert_eq!(room.expiry_time() - room.created_at, chrono::Duration::seconds(60));
    }
}
