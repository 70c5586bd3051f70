//! Client session: owns one accepted connection end-to-end
//!
//! A session reads frames from its socket, dispatches decoded messages to
//! the router, and drains a bounded outbound queue to the socket from a
//! dedicated writer task. Teardown always unregisters the nickname and
//! fans out departure notices, whatever path ended the session.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::Result;
use crate::protocol::codec;
use crate::protocol::frame::FrameCodec;
use crate::protocol::messages::{valid_nickname, ClientMessage, ErrorReason, ServerMessage};
use crate::server::registry::SessionHandle;
use crate::server::router::Router;
use crate::ChatConfig;

/// Connection lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Accepted, awaiting registration
    Connecting,
    /// Registered, read loop running
    Active,
    /// Tearing down, cascade in progress
    Disconnecting,
    /// Resources released
    Closed,
}

/// Why the read loop ended
enum LoopExit {
    /// Peer closed the connection or the transport failed
    Disconnected,
    /// Client sent `quit`
    Quit,
    /// A frame failed to decode
    Malformed(String),
    /// Server is shutting down
    Shutdown,
}

/// Server-side state for one connected client
pub struct Session {
    id: String,
    peer_addr: SocketAddr,
    state: SessionState,
    nickname: Option<String>,
    router: Arc<Router>,
    max_frame_size: usize,
    outbound_queue_depth: usize,
    shutdown: watch::Receiver<bool>,
}

impl Session {
    pub fn new(
        router: Arc<Router>,
        config: &ChatConfig,
        peer_addr: SocketAddr,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            peer_addr,
            state: SessionState::Connecting,
            nickname: None,
            router,
            max_frame_size: config.max_frame_size,
            outbound_queue_depth: config.outbound_queue_depth,
            shutdown,
        }
    }

    /// Run the session to completion; the main entry point spawned per
    /// accepted connection
    pub async fn run(mut self, stream: TcpStream) {
        debug!(session = %self.id, peer = %self.peer_addr, "session started");

        let (read_half, write_half) = stream.into_split();
        let (outbound_tx, outbound_rx) = mpsc::channel(self.outbound_queue_depth);
        let writer = spawn_writer(write_half, outbound_rx);

        let mut reader = FrameReader::new(read_half, self.max_frame_size);
        self.drive(&mut reader, &outbound_tx).await;

        self.set_state(SessionState::Disconnecting);
        if let Some(nickname) = self.nickname.take() {
            self.router.handle_disconnect(&nickname).await;
            info!(session = %self.id, nickname = %nickname, "session disconnected");
        }

        // Dropping the last sender lets the writer drain and close the socket
        drop(outbound_tx);
        let _ = writer.await;
        self.set_state(SessionState::Closed);
        debug!(session = %self.id, peer = %self.peer_addr, "session closed");
    }

    /// Registration handshake followed by the read loop
    async fn drive(&mut self, reader: &mut FrameReader, outbound: &mpsc::Sender<ServerMessage>) {
        let handle = match self.register(reader, outbound).await {
            Some(handle) => handle,
            None => return,
        };

        let exit = self.read_loop(reader, &handle).await;
        match exit {
            LoopExit::Disconnected => {}
            LoopExit::Quit => {
                debug!(session = %self.id, "client quit");
            }
            LoopExit::Malformed(detail) => {
                warn!(session = %self.id, %detail, "malformed frame, dropping session");
                let _ = handle.enqueue(ServerMessage::error(ErrorReason::MalformedMessage, detail));
            }
            LoopExit::Shutdown => {
                let _ = handle.enqueue(ServerMessage::notice("server shutting down"));
            }
        }
    }

    /// Await the registration message; any failure closes the connection
    async fn register(
        &mut self,
        reader: &mut FrameReader,
        outbound: &mpsc::Sender<ServerMessage>,
    ) -> Option<SessionHandle> {
        let refuse = |reason: ErrorReason, detail: &str| {
            // Best-effort: the writer flushes the error before the socket drops
            let _ = outbound.try_send(ServerMessage::error(reason, detail));
        };

        let frame = match self.next_frame(reader).await {
            FrameOutcome::Frame(frame) => frame,
            FrameOutcome::Eof | FrameOutcome::Shutdown => return None,
            FrameOutcome::Error(detail) => {
                refuse(ErrorReason::MalformedMessage, &detail);
                return None;
            }
        };

        let nickname = match codec::decode::<ClientMessage>(&frame) {
            Ok(ClientMessage::Register { nickname }) => nickname,
            Ok(_) => {
                refuse(ErrorReason::NotRegistered, "first message must be register");
                return None;
            }
            Err(e) => {
                refuse(ErrorReason::MalformedMessage, &e.to_string());
                return None;
            }
        };

        if !valid_nickname(&nickname) {
            refuse(ErrorReason::InvalidNickname, &nickname);
            return None;
        }

        let handle = SessionHandle::new(nickname.clone(), outbound.clone());
        if self
            .router
            .registry()
            .register(&nickname, handle.clone())
            .await
            .is_err()
        {
            info!(session = %self.id, %nickname, "nickname collision");
            refuse(ErrorReason::NameTaken, &nickname);
            return None;
        }

        self.nickname = Some(nickname.clone());
        self.set_state(SessionState::Active);
        info!(session = %self.id, %nickname, peer = %self.peer_addr, "registered");
        let _ = handle.enqueue(ServerMessage::welcome(nickname));
        Some(handle)
    }

    async fn read_loop(&mut self, reader: &mut FrameReader, handle: &SessionHandle) -> LoopExit {
        loop {
            let frame = match self.next_frame(reader).await {
                FrameOutcome::Frame(frame) => frame,
                FrameOutcome::Eof => return LoopExit::Disconnected,
                FrameOutcome::Shutdown => return LoopExit::Shutdown,
                FrameOutcome::Error(detail) => return LoopExit::Malformed(detail),
            };

            match codec::decode::<ClientMessage>(&frame) {
                Ok(ClientMessage::Quit) => return LoopExit::Quit,
                Ok(msg) => self.router.dispatch(handle, msg).await,
                Err(e) => return LoopExit::Malformed(e.to_string()),
            }
        }
    }

    /// Read until one complete frame is available, EOF, or shutdown
    async fn next_frame(&mut self, reader: &mut FrameReader) -> FrameOutcome {
        tokio::select! {
            result = reader.next_frame() => {
                match result {
                    Ok(Some(frame)) => FrameOutcome::Frame(frame),
                    Ok(None) => FrameOutcome::Eof,
                    Err(e) => FrameOutcome::Error(e.to_string()),
                }
            }
            _ = wait_shutdown(&mut self.shutdown) => FrameOutcome::Shutdown,
        }
    }

    fn set_state(&mut self, state: SessionState) {
        debug!(session = %self.id, from = ?self.state, to = ?state, "state change");
        self.state = state;
    }
}

/// Resolves only when shutdown is actually signalled; a dropped sender
/// means no shutdown will ever arrive
async fn wait_shutdown(rx: &mut watch::Receiver<bool>) {
    while rx.changed().await.is_ok() {
        if *rx.borrow() {
            return;
        }
    }
    std::future::pending::<()>().await;
}

enum FrameOutcome {
    Frame(Bytes),
    Eof,
    Shutdown,
    Error(String),
}

/// Buffered frame reader over the read half of the socket
struct FrameReader {
    read_half: OwnedReadHalf,
    codec: FrameCodec,
    buf: Vec<u8>,
}

impl FrameReader {
    fn new(read_half: OwnedReadHalf, max_frame_size: usize) -> Self {
        Self {
            read_half,
            codec: FrameCodec::with_max_frame_size(max_frame_size),
            buf: vec![0u8; 4096],
        }
    }

    /// `Ok(None)` means the peer closed the connection
    async fn next_frame(&mut self) -> Result<Option<Bytes>> {
        loop {
            if let Some(frame) = self.codec.decode_next()? {
                return Ok(Some(frame));
            }
            let n = self.read_half.read(&mut self.buf).await?;
            if n == 0 {
                return Ok(None);
            }
            self.codec.feed(&self.buf[..n]);
        }
    }
}

/// Writer task: drains the outbound queue to the socket
///
/// Exits when all senders are gone (session teardown) or the first write
/// fails (peer gone; the reader will notice on its side).
fn spawn_writer(
    mut write_half: OwnedWriteHalf,
    mut outbound: mpsc::Receiver<ServerMessage>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(msg) = outbound.recv().await {
            let bytes = match codec::encode(&msg) {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!("failed to encode outbound message: {}", e);
                    continue;
                }
            };
            if let Err(e) = write_half.write_all(&bytes).await {
                debug!("outbound write failed: {}", e);
                break;
            }
        }
        let _ = write_half.shutdown().await;
    })
}
