//! TCP listener: accepts connections and spawns a session per client

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::error::{ChatError, Result};
use crate::protocol::codec;
use crate::protocol::messages::{ErrorReason, ServerMessage};
use crate::server::registry::Registry;
use crate::server::router::Router;
use crate::server::session::Session;
use crate::ChatConfig;

/// The chat server: one bound endpoint plus shared routing state
pub struct ChatServer {
    config: ChatConfig,
    router: Arc<Router>,
    listener: Option<TcpListener>,
    local_addr: Option<SocketAddr>,
    shutdown_tx: Arc<watch::Sender<bool>>,
    active_sessions: Arc<AtomicUsize>,
}

impl ChatServer {
    /// Create a new chat server with the given configuration
    pub fn new(config: ChatConfig) -> Self {
        let registry = Arc::new(Registry::new(config.retain_empty_channels));
        let router = Arc::new(Router::new(registry, config.echo_broadcasts));
        let (shutdown_tx, _) = watch::channel(false);

        Self {
            config,
            router,
            listener: None,
            local_addr: None,
            shutdown_tx: Arc::new(shutdown_tx),
            active_sessions: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Bind the configured endpoint; failure here is fatal
    pub async fn bind(&mut self) -> Result<SocketAddr> {
        let listener = TcpListener::bind(self.config.bind_addr).await.map_err(|e| {
            ChatError::network(format!(
                "Failed to bind {}: {}",
                self.config.bind_addr, e
            ))
        })?;
        let addr = listener.local_addr()?;
        self.listener = Some(listener);
        self.local_addr = Some(addr);
        info!("chat server listening on {}", addr);
        Ok(addr)
    }

    /// Accept connections until the shutdown signal fires
    ///
    /// An individual accept failure is logged and acceptance continues;
    /// it never affects already-connected sessions.
    pub async fn run(&mut self) -> Result<()> {
        let listener = self
            .listener
            .take()
            .ok_or_else(|| ChatError::internal("server not bound"))?;
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => self.spawn_session(stream, peer),
                    Err(e) => {
                        error!("accept failed: {}", e);
                    }
                },
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("listener stopping");
                        break;
                    }
                }
            }
        }
        Ok(())
    }

    fn spawn_session(&self, stream: TcpStream, peer: SocketAddr) {
        if self.config.max_connections > 0
            && self.active_sessions.load(Ordering::SeqCst) >= self.config.max_connections
        {
            warn!(%peer, limit = self.config.max_connections, "connection refused: server full");
            tokio::spawn(refuse_connection(stream));
            return;
        }

        self.active_sessions.fetch_add(1, Ordering::SeqCst);
        let counter = Arc::clone(&self.active_sessions);
        let session = Session::new(
            Arc::clone(&self.router),
            &self.config,
            peer,
            self.shutdown_tx.subscribe(),
        );
        tokio::spawn(async move {
            session.run(stream).await;
            counter.fetch_sub(1, Ordering::SeqCst);
        });
    }

    /// Address the server is bound to, once bound
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Shared registry (for inspection and tests)
    pub fn registry(&self) -> &Arc<Registry> {
        self.router.registry()
    }

    /// Handle that can signal shutdown from another task
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            tx: Arc::clone(&self.shutdown_tx),
        }
    }

    /// Stop accepting and signal all sessions to close
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Number of currently connected sessions (registered or not)
    pub fn active_sessions(&self) -> usize {
        self.active_sessions.load(Ordering::SeqCst)
    }
}

/// Best-effort refusal: tell the excess client why, then close
async fn refuse_connection(mut stream: TcpStream) {
    let msg = ServerMessage::error(ErrorReason::ServerFull, "server full");
    if let Ok(bytes) = codec::encode(&msg) {
        let _ = stream.write_all(&bytes).await;
    }
    let _ = stream.shutdown().await;
}

/// Clonable handle for signalling server shutdown
#[derive(Clone)]
pub struct ShutdownHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        let _ = self.tx.send(true);
    }
}
