//! Protocol message types for the chat system
//!
//! All messages that travel between client and server, as closed tagged
//! unions. Uses serde for JSON serialization; the `type` field on the wire
//! selects the variant, so dispatch is an exhaustive match rather than a
//! string comparison.

use serde::{Deserialize, Serialize};

/// Maximum accepted nickname length in bytes
pub const MAX_NICKNAME_LEN: usize = 50;

/// Check that a nickname is acceptable for registration
pub fn valid_nickname(nickname: &str) -> bool {
    !nickname.is_empty()
        && nickname.len() <= MAX_NICKNAME_LEN
        && !nickname.chars().any(char::is_whitespace)
}

/// Messages sent by a client to the server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Claim a nickname; must be the first message on a connection
    Register { nickname: String },
    /// Join a channel (created lazily on first join)
    Join { channel: String },
    /// Leave a channel
    Leave { channel: String },
    /// Send a private message to another user
    Direct { to: String, body: String },
    /// Send a message to every member of a channel
    Broadcast { channel: String, body: String },
    /// Request the list of existing channels
    ListChannels,
    /// Request the member list of a channel
    ListUsers { channel: String },
    /// Gracefully leave all channels and disconnect
    Quit,
}

/// Messages sent by the server to a client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Registration succeeded
    Welcome { nickname: String },
    /// Informational server notice (joins, departures, ...)
    Notice { text: String },
    /// A channel message from another member
    Broadcast {
        channel: String,
        from: String,
        body: String,
    },
    /// A private message from another user
    Direct { from: String, body: String },
    /// Confirmation that a private message was handed to the recipient
    DirectSent { to: String },
    /// Channel listing requested via `list_channels`
    ChannelList { channels: Vec<String> },
    /// Member listing requested via `list_users`
    UserList {
        channel: String,
        users: Vec<String>,
    },
    /// A recoverable or fatal error, depending on the reason
    Error { reason: ErrorReason, detail: String },
}

impl ServerMessage {
    pub fn welcome(nickname: impl Into<String>) -> Self {
        ServerMessage::Welcome {
            nickname: nickname.into(),
        }
    }

    pub fn notice(text: impl Into<String>) -> Self {
        ServerMessage::Notice { text: text.into() }
    }

    pub fn error(reason: ErrorReason, detail: impl Into<String>) -> Self {
        ServerMessage::Error {
            reason,
            detail: detail.into(),
        }
    }
}

/// Error reasons reported to clients
///
/// Serialized as the bare variant name, e.g. `"NameTaken"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorReason {
    /// The requested nickname is held by another live session
    NameTaken,
    /// Direct message target is not connected
    UnknownRecipient,
    /// Broadcast to a channel the sender has not joined
    NotAMember,
    /// Frame failed to decode (bad JSON, unknown kind, oversized line)
    MalformedMessage,
    /// Nickname rejected at registration (empty, too long, whitespace)
    InvalidNickname,
    /// `register` received on an already-registered session
    AlreadyRegistered,
    /// A non-`register` message arrived before registration
    NotRegistered,
    /// Connection refused because the server is at its connection limit
    ServerFull,
}
