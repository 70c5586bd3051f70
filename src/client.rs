//! TCP chat client
//!
//! A thin typed wrapper over one connection: register a nickname, send
//! commands, and read decoded server messages. Used by the end-to-end
//! tests and by interactive tooling.

use std::net::SocketAddr;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

use crate::error::{ChatError, Result};
use crate::protocol::codec;
use crate::protocol::frame::{FrameCodec, MAX_FRAME_SIZE};
use crate::protocol::messages::{ClientMessage, ErrorReason, ServerMessage};

/// Chat client configuration
#[derive(Clone, Debug)]
pub struct ChatClientConfig {
    /// Server address to connect to
    pub server_addr: SocketAddr,
    /// Connection timeout in seconds
    pub connect_timeout_secs: u64,
    /// Maximum accepted frame size in bytes
    pub max_frame_size: usize,
}

impl Default for ChatClientConfig {
    fn default() -> Self {
        Self {
            server_addr: "127.0.0.1:9000".parse().expect("valid default address"),
            connect_timeout_secs: 10,
            max_frame_size: MAX_FRAME_SIZE,
        }
    }
}

/// A connected chat client
pub struct ChatClient {
    stream: TcpStream,
    codec: FrameCodec,
    buf: Vec<u8>,
    nickname: Option<String>,
}

impl ChatClient {
    /// Connect to the chat server
    pub async fn connect(config: ChatClientConfig) -> Result<Self> {
        debug!("connecting to chat server at {}", config.server_addr);
        let stream = tokio::time::timeout(
            Duration::from_secs(config.connect_timeout_secs),
            TcpStream::connect(config.server_addr),
        )
        .await
        .map_err(|_| ChatError::timeout("Connection timeout"))??;

        Ok(Self {
            stream,
            codec: FrameCodec::with_max_frame_size(config.max_frame_size),
            buf: vec![0u8; 4096],
            nickname: None,
        })
    }

    /// Register a nickname; the server's first reply decides the outcome
    pub async fn register(&mut self, nickname: impl Into<String>) -> Result<()> {
        let nickname = nickname.into();
        self.send(&ClientMessage::Register {
            nickname: nickname.clone(),
        })
        .await?;

        match self.next_message().await? {
            Some(ServerMessage::Welcome { .. }) => {
                self.nickname = Some(nickname);
                Ok(())
            }
            Some(ServerMessage::Error { reason, detail }) => Err(registration_error(reason, detail)),
            Some(other) => Err(ChatError::protocol(format!(
                "Unexpected registration reply: {:?}",
                other
            ))),
            None => Err(ChatError::connection("Server closed during registration")),
        }
    }

    /// The registered nickname, if registration succeeded
    pub fn nickname(&self) -> Option<&str> {
        self.nickname.as_deref()
    }

    /// Send a raw client message
    pub async fn send(&mut self, msg: &ClientMessage) -> Result<()> {
        let bytes = codec::encode(msg)?;
        self.stream.write_all(&bytes).await?;
        Ok(())
    }

    /// Join a channel
    pub async fn join(&mut self, channel: impl Into<String>) -> Result<()> {
        self.send(&ClientMessage::Join {
            channel: channel.into(),
        })
        .await
    }

    /// Leave a channel
    pub async fn leave(&mut self, channel: impl Into<String>) -> Result<()> {
        self.send(&ClientMessage::Leave {
            channel: channel.into(),
        })
        .await
    }

    /// Send a message to every member of a channel
    pub async fn broadcast_message(
        &mut self,
        channel: impl Into<String>,
        body: impl Into<String>,
    ) -> Result<()> {
        self.send(&ClientMessage::Broadcast {
            channel: channel.into(),
            body: body.into(),
        })
        .await
    }

    /// Send a private message to another user
    pub async fn direct(
        &mut self,
        to: impl Into<String>,
        body: impl Into<String>,
    ) -> Result<()> {
        self.send(&ClientMessage::Direct {
            to: to.into(),
            body: body.into(),
        })
        .await
    }

    /// Request the channel list
    pub async fn list_channels(&mut self) -> Result<()> {
        self.send(&ClientMessage::ListChannels).await
    }

    /// Request the member list of a channel
    pub async fn list_users(&mut self, channel: impl Into<String>) -> Result<()> {
        self.send(&ClientMessage::ListUsers {
            channel: channel.into(),
        })
        .await
    }

    /// Gracefully disconnect
    pub async fn quit(mut self) -> Result<()> {
        self.send(&ClientMessage::Quit).await?;
        self.stream.shutdown().await?;
        Ok(())
    }

    /// Read the next server message; `None` when the server closed the
    /// connection
    pub async fn next_message(&mut self) -> Result<Option<ServerMessage>> {
        match self.next_frame().await? {
            Some(frame) => Ok(Some(codec::decode(&frame)?)),
            None => Ok(None),
        }
    }

    async fn next_frame(&mut self) -> Result<Option<Bytes>> {
        loop {
            if let Some(frame) = self.codec.decode_next()? {
                return Ok(Some(frame));
            }
            let n = self.stream.read(&mut self.buf).await?;
            if n == 0 {
                return Ok(None);
            }
            self.codec.feed(&self.buf[..n]);
        }
    }
}

fn registration_error(reason: ErrorReason, detail: String) -> ChatError {
    match reason {
        ErrorReason::NameTaken => ChatError::nickname_in_use(detail),
        ErrorReason::InvalidNickname => ChatError::invalid_message(detail),
        ErrorReason::ServerFull => ChatError::resource_limit(detail),
        _ => ChatError::protocol(format!("Registration failed: {:?} ({})", reason, detail)),
    }
}
