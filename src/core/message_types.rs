//! Wire events exchanged with clients
//!
//! Every frame is a JSON object `{"event": "<name>", "data": {...}}`; events
//! without a payload omit `data`. Ciphertext and IVs travel as base64.

use serde::{Deserialize, Serialize};

use crate::core::room::RoomId;

/// Client-to-server events
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum ClientEvent {
    /// Ask the collaborator for a hacker alias
    GenerateAlias,

    /// Ask the collaborator for a room name
    GenerateRoomName,

    /// Ask the collaborator for a link-safety opinion
    ScanUrl { url: String },

    /// Create a new room (does not join it)
    CreateRoom {
        #[serde(default)]
        username: String,
        #[serde(default)]
        room_name: String,
        #[serde(default)]
        password_hash: String,
    },

    /// Join an existing room
    JoinRoom {
        #[serde(default)]
        username: String,
        #[serde(default)]
        room_id: String,
        #[serde(default)]
        password_hash: String,
    },

    /// Opaque encrypted chat message
    ChatMessage {
        #[serde(with = "base64_bytes")]
        encrypted_data: Vec<u8>,
        #[serde(with = "base64_bytes")]
        iv: Vec<u8>,
    },

    Typing,
    StopTyping,

    /// Destroy the current room (admin only)
    DeleteRoom,

    /// Remove and blacklist a member (admin only)
    KickUser { target_username: String },
}

/// Server-to-client events
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum ServerEvent {
    AliasGenerated(AliasPayload),

    RoomNameGenerated { name: String },

    ScanResult(ScanPayload),

    RoomCreated { room_id: RoomId },

    Joined {
        room_id: RoomId,
        room_name: String,
        admin_name: String,
        is_admin: bool,
        /// Milliseconds since the Unix epoch
        expiry_time: i64,
    },

    /// Join/leave/kick/success notices
    SystemMessage { text: String },

    /// Relayed ciphertext, echoed to the sender as well
    Message {
        username: String,
        #[serde(with = "base64_bytes")]
        encrypted_data: Vec<u8>,
        #[serde(with = "base64_bytes")]
        iv: Vec<u8>,
        is_admin: bool,
    },

    DisplayTyping { username: String },

    HideTyping,

    /// Validation and authorization failures
    Error { text: String },

    /// Sent right before the kicked connection is closed
    Kicked { reason: String },

    /// Sent to every member right before their connection is closed
    RoomDestroyed { reason: String },
}

impl ServerEvent {
    pub fn system(text: impl Into<String>) -> Self {
        Self::SystemMessage { text: text.into() }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self::Error { text: text.into() }
    }
}

/// Collaborator-generated identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AliasPayload {
    pub username: String,
    pub backstory: String,
}

/// Link-safety verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ScanStatus {
    Safe,
    Unsafe,
    Error,
    Unknown,
}

impl ScanStatus {
    /// Lenient parse of a collaborator-provided status
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "SAFE" => Some(Self::Safe),
            "UNSAFE" => Some(Self::Unsafe),
            "ERROR" => Some(Self::Error),
            "UNKNOWN" => Some(Self::Unknown),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanPayload {
    pub url: String,
    pub status: ScanStatus,
    pub reason: String,
}

/// Serde adapter carrying byte sequences as standard base64 strings
pub mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}
