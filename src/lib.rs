//! TCP-based chat server with channel routing
//!
//! This library provides a multi-client chat server: clients connect over
//! TCP, register a nickname, join named channels, and exchange channel
//! broadcasts and direct messages. Messages are newline-delimited JSON.

pub mod client;
pub mod error;
pub mod protocol;
pub mod server;

pub use client::{ChatClient, ChatClientConfig};
pub use error::{ChatError, Result};
pub use server::ChatServer;

use crate::protocol::frame::MAX_FRAME_SIZE;

/// Chat server configuration
#[derive(Clone, Debug)]
pub struct ChatConfig {
    /// Server listen address
    pub bind_addr: std::net::SocketAddr,
    /// Maximum number of concurrent connections (0 = unlimited)
    pub max_connections: usize,
    /// Maximum wire frame size in bytes
    pub max_frame_size: usize,
    /// Per-session outbound queue depth; a session that falls this far
    /// behind starts losing messages instead of stalling senders
    pub outbound_queue_depth: usize,
    /// Keep channels around after their last member leaves
    pub retain_empty_channels: bool,
    /// Echo channel broadcasts back to their sender
    pub echo_broadcasts: bool,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:9000".parse().expect("valid default address"),
            max_connections: 1024,
            max_frame_size: MAX_FRAME_SIZE,
            outbound_queue_depth: 64,
            retain_empty_channels: false,
            echo_broadcasts: false,
        }
    }
}
