//! WebSocket connection management
//! Handles the outbound side of a client connection and its forced shutdown

use std::sync::Arc;
use std::time::Duration;

use log::warn;
use tokio::sync::{mpsc, Notify};
use tokio::time::Instant;
use uuid::Uuid;
use warp::ws::Message;

use crate::core::message_types::ServerEvent;

/// Outbound handle for a single WebSocket connection
pub struct Connection {
    pub id: String,
    pub sender: mpsc::UnboundedSender<Message>,
    /// Last inbound frame of any kind, pongs included
    pub last_seen: Instant,
    shutdown: Arc<Notify>,
}

impl Connection {
    /// Create a new connection with a unique ID
    pub fn new(sender: mpsc::UnboundedSender<Message>) -> Self {
        Self::with_id(Uuid::new_v4().to_string(), sender)
    }

    pub fn with_id(id: String, sender: mpsc::UnboundedSender<Message>) -> Self {
        Self {
            id,
            sender,
            last_seen: Instant::now(),
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Send a text message through this connection
    pub fn send_text(&self, text: &str) -> bool {
        match self.sender.send(Message::text(text)) {
            Ok(_) => true,
            Err(_) => {
                warn!("Failed to send message to client {}", self.id);
                false
            }
        }
    }

    /// Serialize and send a server event
    pub fn send_event(&self, event: &ServerEvent) -> bool {
        match serde_json::to_string(event) {
            Ok(text) => self.send_text(&text),
            Err(e) => {
                warn!("Failed to serialize event for client {}: {}", self.id, e);
                false
            }
        }
    }

    /// Probe the peer; browsers answer with a pong on their own
    pub fn ping(&self) -> bool {
        self.sender.send(Message::ping(Vec::new())).is_ok()
    }

    pub fn mark_alive(&mut self, now: Instant) {
        self.last_seen = now;
    }

    /// Check if the connection is stale (silent for longer than `timeout`)
    pub fn is_stale(&self, now: Instant, timeout: Duration) -> bool {
        now.duration_since(self.last_seen) > timeout
    }

    /// Close the socket and wake the read loop so the session is torn down
    pub fn terminate(&self) {
        if self.sender.send(Message::close()).is_err() {
            log::debug!("Close frame for {} dropped, writer already gone", self.id);
        }
        self.shutdown.notify_one();
    }

    /// Signal fired by `terminate`; the gateway's read loop waits on it
    pub fn shutdown_signal(&self) -> Arc<Notify> {
        Arc::clone(&self.shutdown)
    }
}
