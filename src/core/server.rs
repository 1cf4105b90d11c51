//! Relay server that coordinates sessions, rooms, rate limits and the assistant

use std::sync::{Arc, Weak};
use log::{debug, info, trace, warn};
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;

use crate::assistant::Assistant;
use crate::config::ServerConfig;
use crate::core::connection::Connection;
use crate::core::message_types::{ClientEvent, ServerEvent};
use crate::core::outbox::{Delivery, Outbox};
use crate::core::rate_limiter::{
    start_cleanup_task, ActionClass, RateDecision, RateLimiter, SharedRateLimiter,
};
use crate::core::registry::CreatedRoom;
use crate::core::room::RoomId;
use crate::core::state::RelayState;
use crate::error::{RelayError, Result};

/// Owns all relay state and drives every inbound event
///
/// Rooms and sessions sit behind one lock so each room operation is a single
/// critical section. Collaborator calls happen with no lock held.
pub struct RelayServer {
    config: ServerConfig,
    state: RwLock<RelayState>,
    rate_limiter: SharedRateLimiter,
    assistant: Arc<Assistant>,
    this: Weak<RelayServer>,
}

// Thread-safe server handle
pub type SharedRelayServer = Arc<RelayServer>;

impl RelayServer {
    pub fn new(config: ServerConfig, assistant: Assistant) -> SharedRelayServer {
        let rate_limiter = Arc::new(Mutex::new(RateLimiter::new(config.rate_limits.clone())));
        let state = RwLock::new(RelayState::new(config.room_lifetime));
        info!("Assistant enabled: {}", assistant.is_enabled());

        Arc::new_cyclic(|this| Self {
            config,
            state,
            rate_limiter,
            assistant: Arc::new(assistant),
            this: this.clone(),
        })
    }

    /// Spawn the rate limiter sweep and the connection heartbeat
    pub fn start_housekeeping(&self) {
        start_cleanup_task(Arc::clone(&self.rate_limiter));

        let server = self.this.clone();
        let period = self.config.ping_interval;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            // The first tick completes immediately
            interval.tick().await;
            loop {
                interval.tick().await;
                let Some(server) = server.upgrade() else {
                    return;
                };
                server.heartbeat(Instant::now()).await;
            }
        });
    }

    /// Any inbound frame, pongs included, proves the peer is alive
    pub async fn record_activity(&self, connection_id: &str) {
        let mut state = self.state.write().await;
        if let Some(connection) = state.sessions.connection_mut(connection_id) {
            connection.mark_alive(Instant::now());
        }
    }

    /// Drop connections silent past the timeout and ping the rest
    ///
    /// A dropped connection leaves its room right away, so its display name
    /// is free again even if the socket never reports the loss.
    pub async fn heartbeat(&self, now: Instant) -> usize {
        let mut state = self.state.write().await;
        let stale = state
            .sessions
            .stale_connections(now, self.config.connection_timeout);

        for connection_id in &stale {
            if let Some(session) = state.sessions.get(connection_id) {
                info!(
                    "Dropping idle connection {} ({}, {:?})",
                    connection_id,
                    session.client_identity,
                    session.state()
                );
            }
            let outbox = state.leave(connection_id);
            Self::dispatch(&state, outbox);
            if let Some(connection) = state.sessions.connection(connection_id) {
                connection.terminate();
            }
            state.sessions.unregister(connection_id);
        }

        for connection in state.sessions.connections() {
            if !connection.ping() {
                trace!("Ping to {} dropped, writer already gone", connection.id);
            }
        }

        if !stale.is_empty() {
            info!("Current connections: {}", state.sessions.client_count());
        }
        stale.len()
    }

    /// Track a freshly upgraded connection as anonymous
    pub async fn register_connection(&self, connection: Connection, client_identity: String) -> Result<()> {
        let connection_id = connection.id.clone();
        let mut state = self.state.write().await;
        state.sessions.register(connection, client_identity.clone())?;

        info!("Client connected: {} from {}", connection_id, client_identity);
        info!("Current connections: {}", state.sessions.client_count());
        Ok(())
    }

    /// Tear down a connection: leave its room, then forget the session
    pub async fn unregister_connection(&self, connection_id: &str) {
        let mut state = self.state.write().await;
        let outbox = state.leave(connection_id);
        Self::dispatch(&state, outbox);

        if let Some(session) = state.sessions.unregister(connection_id) {
            info!(
                "Client disconnected: {} ({})",
                connection_id, session.client_identity
            );
        }
        info!("Current connections: {}", state.sessions.client_count());
    }

    /// Entry point for a raw text frame
    pub async fn handle_frame(&self, connection_id: &str, frame: &str) {
        if frame.len() > self.config.max_frame_size {
            self.report_error(connection_id, RelayError::MessageTooLarge(frame.len()))
                .await;
            return;
        }

        let event = match serde_json::from_str::<ClientEvent>(frame) {
            Ok(event) => event,
            Err(e) => {
                debug!("Unparseable frame from {}: {}", connection_id, e);
                self.report_error(connection_id, RelayError::MessageParseError(e.to_string()))
                    .await;
                return;
            }
        };

        if let Err(e) = self.handle_event(connection_id, event).await {
            self.report_error(connection_id, e).await;
        }
    }

    pub async fn handle_event(&self, connection_id: &str, event: ClientEvent) -> Result<()> {
        match event {
            ClientEvent::GenerateAlias => {
                self.check_rate(connection_id, ActionClass::Ai).await?;
                let alias = self.assistant.generate_alias().await;
                self.send_to(connection_id, ServerEvent::AliasGenerated(alias))
                    .await;
            }
            ClientEvent::GenerateRoomName => {
                self.check_rate(connection_id, ActionClass::Ai).await?;
                let name = self.assistant.generate_room_name().await;
                self.send_to(connection_id, ServerEvent::RoomNameGenerated { name })
                    .await;
            }
            ClientEvent::ScanUrl { url } => {
                self.check_rate(connection_id, ActionClass::Ai).await?;
                let verdict = self.assistant.scan_url(&url).await;
                self.send_to(connection_id, ServerEvent::ScanResult(verdict))
                    .await;
            }
            ClientEvent::CreateRoom {
                username,
                room_name,
                password_hash,
            } => {
                self.check_rate(connection_id, ActionClass::Create).await?;
                let (room_id, expires_at) = {
                    let mut state = self.state.write().await;
                    let CreatedRoom {
                        room_id,
                        expires_at,
                        outbox,
                    } = state.create_room(
                        connection_id,
                        &username,
                        &room_name,
                        &password_hash,
                        Instant::now(),
                    )?;
                    Self::dispatch(&state, outbox);
                    (room_id, expires_at)
                };
                self.schedule_expiry(room_id, expires_at);
            }
            ClientEvent::JoinRoom {
                username,
                room_id,
                password_hash,
            } => {
                self.check_rate(connection_id, ActionClass::Message).await?;
                let mut state = self.state.write().await;
                let outbox = state.join_room(
                    connection_id,
                    &username,
                    &RoomId::from(room_id),
                    &password_hash,
                )?;
                Self::dispatch(&state, outbox);
            }
            ClientEvent::ChatMessage { encrypted_data, iv } => {
                // No token is spent outside a room
                if self.state.read().await.current_room(connection_id).is_none() {
                    return Err(RelayError::NotInRoom);
                }
                self.check_rate(connection_id, ActionClass::Message).await?;
                // Exclusive so every member sees one arrival order
                let state = self.state.write().await;
                let outbox = state.relay_message(connection_id, encrypted_data, iv)?;
                Self::dispatch(&state, outbox);
            }
            ClientEvent::Typing => {
                let state = self.state.read().await;
                let outbox = state.typing(connection_id, true)?;
                Self::dispatch(&state, outbox);
            }
            ClientEvent::StopTyping => {
                let state = self.state.read().await;
                let outbox = state.typing(connection_id, false)?;
                Self::dispatch(&state, outbox);
            }
            ClientEvent::DeleteRoom => {
                let mut state = self.state.write().await;
                let outbox = state.request_room_deletion(connection_id)?;
                Self::dispatch(&state, outbox);
            }
            ClientEvent::KickUser { target_username } => {
                let mut state = self.state.write().await;
                let outbox = state.kick(connection_id, &target_username)?;
                Self::dispatch(&state, outbox);
            }
        }
        Ok(())
    }

    async fn check_rate(&self, connection_id: &str, class: ActionClass) -> Result<()> {
        let identity = {
            let state = self.state.read().await;
            state.sessions.require(connection_id)?.client_identity.clone()
        };

        let decision = self
            .rate_limiter
            .lock()
            .await
            .check(&identity, class, Instant::now());
        if decision != RateDecision::Allowed {
            debug!("{:?} for {} ({}) on {:?}", decision, connection_id, identity, class);
        }
        decision.into_result()
    }

    /// Turn a failed action into what the client sees
    async fn report_error(&self, connection_id: &str, error: RelayError) {
        match error {
            error if error.is_terminal() => {
                warn!("Dropping blocked connection {}", connection_id);
                let state = self.state.read().await;
                if let Some(connection) = state.sessions.connection(connection_id) {
                    connection.terminate();
                }
            }
            RelayError::RateLimited => {
                let notice = self.config.rate_limits.rate_limit_notice();
                self.send_to(connection_id, ServerEvent::error(notice)).await;
            }
            RelayError::NotInRoom => {
                debug!("Ignoring room action from {} outside any room", connection_id);
            }
            RelayError::SessionNotFound(_) => {
                trace!("Event for unknown connection {} dropped", connection_id);
            }
            other => {
                debug!("Action from {} refused: {}", connection_id, other);
                self.send_to(connection_id, ServerEvent::error(other.to_string()))
                    .await;
            }
        }
    }

    async fn send_to(&self, connection_id: &str, event: ServerEvent) {
        let mut outbox = Outbox::new();
        outbox.send(connection_id, event);
        let state = self.state.read().await;
        Self::dispatch(&state, outbox);
    }

    /// Flush deliveries to live connections; departed recipients are skipped
    fn dispatch(state: &RelayState, outbox: Outbox) {
        for delivery in outbox {
            match delivery {
                Delivery::Event { to, event } => match state.sessions.connection(&to) {
                    Some(connection) => {
                        connection.send_event(&event);
                    }
                    None => trace!("Dropping event for departed connection {}", to),
                },
                Delivery::Terminate { to } => {
                    if let Some(connection) = state.sessions.connection(&to) {
                        info!("Terminating connection {}", to);
                        connection.terminate();
                    }
                }
            }
        }
    }

    /// Fire-once expiry; the room may already be gone when it runs
    fn schedule_expiry(&self, room_id: RoomId, at: Instant) {
        let server = self.this.clone();
        tokio::spawn(async move {
            tokio::time::sleep_until(at).await;
            let Some(server) = server.upgrade() else {
                return;
            };
            let mut state = server.state.write().await;
            let outbox = state.expire_room(&room_id, Instant::now());
            Self::dispatch(&state, outbox);
        });
    }

    pub async fn connection_count(&self) -> usize {
        self.state.read().await.sessions.client_count()
    }

    pub async fn room_count(&self) -> usize {
        self.state.read().await.rooms.len()
    }
}
