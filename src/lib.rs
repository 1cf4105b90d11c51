//! Uplink Relay - ephemeral, password-gated group chat relay
//!
//! Clients encrypt everything end to end; the relay only routes opaque
//! ciphertext between members of short-lived rooms, enforces room admission
//! and moderation, and rate limits abusive clients.

pub mod assistant;
pub mod config;
pub mod constants;
pub mod core;
pub mod error;
pub mod handlers;

// Re-export main components
pub use config::*;
pub use constants::*;
