//! Core functionality for the relay server

pub mod connection;
pub mod ip_extractor;
pub mod message_types;
pub mod outbox;
pub mod rate_limiter;
pub mod registry;
pub mod relay;
pub mod room;
pub mod server;
pub mod session;
pub mod state;

// Re-export main components for convenience
pub use connection::Connection;
pub use message_types::{ClientEvent, ServerEvent};
pub use outbox::{Delivery, Outbox};
pub use rate_limiter::{ActionClass, RateDecision, RateLimitConfig, RateLimiter};
pub use room::{Room, RoomId, RoomRegistry};
pub use server::{RelayServer, SharedRelayServer};
pub use session::{Session, SessionManager};
pub use state::RelayState;
