use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;

use crate::core::connection::Connection;
use crate::core::room::RoomId;
use crate::error::{RelayError, Result};

/// Where a connection is in its lifecycle; `Terminated` connections are no longer tracked
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Anonymous,
    InRoom,
}

/// Per-connection ephemeral identity and room membership
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub connection_id: String,
    /// Network origin used as the rate limiting key
    pub client_identity: String,
    /// Display name claimed at join
    pub username: Option<String>,
    pub room_id: Option<RoomId>,
    /// True iff the username equalled the room's admin name at join time
    pub is_admin: bool,
}

impl Session {
    pub fn new(connection_id: String, client_identity: String) -> Self {
        Self {
            connection_id,
            client_identity,
            username: None,
            room_id: None,
            is_admin: false,
        }
    }

    pub fn attach(&mut self, room_id: RoomId, username: String, is_admin: bool) {
        self.room_id = Some(room_id);
        self.username = Some(username);
        self.is_admin = is_admin;
    }

    /// Drop the room association; the username is kept for leave notices
    pub fn detach(&mut self) {
        self.room_id = None;
        self.is_admin = false;
    }

    pub fn state(&self) -> ConnectionState {
        if self.room_id.is_some() {
            ConnectionState::InRoom
        } else {
            ConnectionState::Anonymous
        }
    }

    pub fn display_name(&self) -> &str {
        self.username.as_deref().unwrap_or("Unknown")
    }
}

struct SessionEntry {
    session: Session,
    connection: Connection,
}

// Manages connected clients and their session state
pub struct SessionManager {
    entries: HashMap<String, SessionEntry>,
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionManager {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    // Register a new client connection
    pub fn register(&mut self, connection: Connection, client_identity: String) -> Result<()> {
        if self.entries.contains_key(&connection.id) {
            return Err(RelayError::ConnectionError(format!(
                "Connection {} already registered",
                connection.id
            )));
        }

        let session = Session::new(connection.id.clone(), client_identity);
        self.entries.insert(
            connection.id.clone(),
            SessionEntry {
                session,
                connection,
            },
        );
        Ok(())
    }

    // Remove a client connection, returning its final session state
    pub fn unregister(&mut self, connection_id: &str) -> Option<Session> {
        self.entries
            .remove(connection_id)
            .map(|entry| entry.session)
    }

    pub fn get(&self, connection_id: &str) -> Option<&Session> {
        self.entries.get(connection_id).map(|entry| &entry.session)
    }

    pub fn get_mut(&mut self, connection_id: &str) -> Option<&mut Session> {
        self.entries
            .get_mut(connection_id)
            .map(|entry| &mut entry.session)
    }

    /// Session lookup that fails with `SessionNotFound`
    pub fn require(&self, connection_id: &str) -> Result<&Session> {
        self.get(connection_id)
            .ok_or_else(|| RelayError::SessionNotFound(connection_id.to_string()))
    }

    pub fn connection(&self, connection_id: &str) -> Option<&Connection> {
        self.entries
            .get(connection_id)
            .map(|entry| &entry.connection)
    }

    pub fn connection_mut(&mut self, connection_id: &str) -> Option<&mut Connection> {
        self.entries
            .get_mut(connection_id)
            .map(|entry| &mut entry.connection)
    }

    pub fn connections(&self) -> impl Iterator<Item = &Connection> {
        self.entries.values().map(|entry| &entry.connection)
    }

    /// Connections silent for longer than `timeout`
    pub fn stale_connections(&self, now: Instant, timeout: Duration) -> Vec<String> {
        self.entries
            .values()
            .filter(|entry| entry.connection.is_stale(now, timeout))
            .map(|entry| entry.connection.id.clone())
            .collect()
    }

    // Get current clients count
    pub fn client_count(&self) -> usize {
        self.entries.len()
    }
}
