use std::time::Duration;

// Fundamental configuration constants
pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 3000;
pub const WS_PATH: &str = "ws";
pub const HEALTH_PATH: &str = "health";

/// Largest inbound text frame accepted from a client
pub const DEFAULT_MAX_FRAME_SIZE: usize = 64 * 1024;

// Liveness
pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(25);
/// A connection silent for this long is treated as dead
pub const DEFAULT_CONNECTION_TIMEOUT: Duration = Duration::from_secs(60);

// Room lifecycle
pub const ROOM_LIFETIME: Duration = Duration::from_secs(120 * 60);
pub const ROOM_ID_BYTES: usize = 4;

// Rate limiting (token bucket per client identity and action class)
pub const CREATE_MAX_TOKENS: u32 = 3;
pub const CREATE_REFILL_WINDOW: Duration = Duration::from_secs(60);
pub const MESSAGE_MAX_TOKENS: u32 = 10;
pub const MESSAGE_REFILL_WINDOW: Duration = Duration::from_secs(1);
pub const AI_MAX_TOKENS: u32 = 5;
pub const AI_REFILL_WINDOW: Duration = Duration::from_secs(60);
pub const BAN_DURATION: Duration = Duration::from_secs(30);

/// How often idle rate records are swept
pub const HOUSEKEEPING_INTERVAL: Duration = Duration::from_secs(300);
/// Records untouched for longer than this (and not banned) are evicted
pub const RATE_RECORD_IDLE_TTL: Duration = Duration::from_secs(60);

// Generative-text collaborator
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.5-flash";
pub const DEFAULT_GEMINI_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_COLLABORATOR_TIMEOUT: Duration = Duration::from_secs(10);

// Notices
pub const REASON_EXPIRED: &str = "Expired";
pub const REASON_ADMIN_DESTROYED: &str = "Admin Destroyed";
pub const KICKED_NOTICE: &str = "You have been removed by the administrator.";
