use std::error::Error;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayError {
    // Abuse prevention
    RateLimited,
    Blocked,

    // Room errors
    RoomNotFound,
    BadPassword,
    Banned,
    AlreadyBanned,
    NameTaken,
    NotInRoom,
    AlreadyInRoom,

    // Moderation errors
    NotAuthorized,
    SelfKick,
    UserNotFound(String),

    // Session / connection errors
    SessionNotFound(String),
    ConnectionError(String),

    // Messages errors
    MessageParseError(String),
    MessageTooLarge(usize),

    // Validation errors
    ValidationError(String),

    // Generative-text collaborator
    CollaboratorUnavailable(String),

    // Configuration errors
    ConfigError(String),
}

impl RelayError {
    /// Whether the error must end the connection rather than just refuse the action
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Blocked)
    }
}

// Domain errors display as the exact notice the client receives
impl fmt::Display for RelayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RateLimited => write!(f, "RATE LIMIT: Too many requests."),
            Self::Blocked => write!(f, "Temporarily blocked for abuse"),
            Self::Banned => write!(f, "Banned"),
            Self::RoomNotFound => write!(f, "Room not found"),
            Self::BadPassword => write!(f, "Bad Password"),
            Self::AlreadyBanned => write!(f, "User is already banned from this room"),
            Self::NameTaken => write!(f, "Username taken"),
            Self::NotInRoom => write!(f, "You are not in a room."),
            Self::AlreadyInRoom => write!(f, "Already in a room. Reconnect to switch rooms."),
            Self::NotAuthorized => write!(f, "ACCESS DENIED: You are not the Host."),
            Self::SelfKick => write!(f, "You cannot kick yourself."),
            Self::UserNotFound(name) => {
                write!(f, "User '{}' not found. Check exact spelling.", name)
            }
            Self::SessionNotFound(id) => write!(f, "Session not found: {}", id),
            Self::ConnectionError(msg) => write!(f, "Connection error: {}", msg),
            Self::MessageParseError(msg) => write!(f, "Message parse error: {}", msg),
            Self::MessageTooLarge(size) => write!(f, "Message too large: {} bytes", size),
            Self::ValidationError(msg) => write!(f, "Validation error: {}", msg),
            Self::CollaboratorUnavailable(msg) => write!(f, "Collaborator unavailable: {}", msg),
            Self::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
        }
    }
}

impl Error for RelayError {}

// Generic result type for the relay
pub type Result<T> = std::result::Result<T, RelayError>;
