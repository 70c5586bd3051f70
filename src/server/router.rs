//! Message routing: one inbound message in, zero or more deliveries out
//!
//! The router translates a decoded client message plus current registry
//! state into enqueues on target sessions. It performs no socket I/O of
//! its own. A delivery waits a short grace period for queue capacity;
//! only a session still backed up after that loses the message, logged
//! and forgotten.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::protocol::messages::{ClientMessage, ErrorReason, ServerMessage};
use crate::server::registry::{Registry, SessionHandle};

/// How long a delivery may wait for queue space before being dropped
const DELIVERY_GRACE: Duration = Duration::from_millis(250);

/// Routes inbound messages from active sessions
pub struct Router {
    registry: Arc<Registry>,
    /// Whether a broadcast is echoed back to its sender
    echo_broadcasts: bool,
}

impl Router {
    pub fn new(registry: Arc<Registry>, echo_broadcasts: bool) -> Self {
        Self {
            registry,
            echo_broadcasts,
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Dispatch one message from a registered session
    pub async fn dispatch(&self, sender: &SessionHandle, msg: ClientMessage) {
        match msg {
            ClientMessage::Join { channel } => self.handle_join(sender, &channel).await,
            ClientMessage::Leave { channel } => self.handle_leave(sender, &channel).await,
            ClientMessage::Direct { to, body } => self.handle_direct(sender, &to, body).await,
            ClientMessage::Broadcast { channel, body } => {
                self.handle_broadcast(sender, &channel, body).await
            }
            ClientMessage::ListChannels => self.handle_list_channels(sender).await,
            ClientMessage::ListUsers { channel } => self.handle_list_users(sender, channel).await,
            ClientMessage::Register { .. } => {
                // Registration happens once, before the read loop
                self.deliver(
                    sender,
                    ServerMessage::error(ErrorReason::AlreadyRegistered, sender.nickname()),
                )
                .await;
            }
            ClientMessage::Quit => {
                // The session intercepts quit during its read loop
                debug!(nickname = %sender.nickname(), "quit reached router");
            }
        }
    }

    async fn handle_join(&self, sender: &SessionHandle, channel: &str) {
        match self.registry.join(sender.nickname(), channel).await {
            Ok(members) => {
                let text = format!("{} has joined {}", sender.nickname(), channel);
                for member in &members {
                    self.deliver(member, ServerMessage::notice(text.clone())).await;
                }
            }
            Err(_) => {
                // Only UnknownNickname can surface here
                self.deliver(
                    sender,
                    ServerMessage::error(ErrorReason::NotRegistered, sender.nickname()),
                )
                .await;
            }
        }
    }

    async fn handle_leave(&self, sender: &SessionHandle, channel: &str) {
        // Leaving a channel you are not in is a silent no-op
        if let Some(remaining) = self.registry.leave(sender.nickname(), channel).await {
            self.deliver(
                sender,
                ServerMessage::notice(format!("You have left {}", channel)),
            )
            .await;
            let text = format!("{} has left {}", sender.nickname(), channel);
            for member in &remaining {
                self.deliver(member, ServerMessage::notice(text.clone())).await;
            }
        }
    }

    async fn handle_direct(&self, sender: &SessionHandle, to: &str, body: String) {
        match self.registry.lookup(to).await {
            Some(target) => {
                self.deliver(
                    &target,
                    ServerMessage::Direct {
                        from: sender.nickname().to_string(),
                        body,
                    },
                )
                .await;
                self.deliver(sender, ServerMessage::DirectSent { to: to.to_string() })
                    .await;
            }
            None => {
                self.deliver(
                    sender,
                    ServerMessage::error(ErrorReason::UnknownRecipient, to),
                )
                .await;
            }
        }
    }

    async fn handle_broadcast(&self, sender: &SessionHandle, channel: &str, body: String) {
        let members = self.registry.members_of(channel).await;
        if !members.iter().any(|m| m.nickname() == sender.nickname()) {
            self.deliver(sender, ServerMessage::error(ErrorReason::NotAMember, channel))
                .await;
            return;
        }

        let msg = ServerMessage::Broadcast {
            channel: channel.to_string(),
            from: sender.nickname().to_string(),
            body,
        };
        for member in &members {
            if !self.echo_broadcasts && member.nickname() == sender.nickname() {
                continue;
            }
            self.deliver(member, msg.clone()).await;
        }
    }

    async fn handle_list_channels(&self, sender: &SessionHandle) {
        let channels = self.registry.channel_names().await;
        self.deliver(sender, ServerMessage::ChannelList { channels })
            .await;
    }

    async fn handle_list_users(&self, sender: &SessionHandle, channel: String) {
        let mut users: Vec<String> = self
            .registry
            .members_of(&channel)
            .await
            .iter()
            .map(|m| m.nickname().to_string())
            .collect();
        users.sort();
        self.deliver(sender, ServerMessage::UserList { channel, users })
            .await;
    }

    /// Disconnect cascade: unregister and notify former channel peers
    pub async fn handle_disconnect(&self, nickname: &str) {
        let departures = self.registry.unregister(nickname).await;
        for departure in departures {
            let text = format!("{} has left {}", nickname, departure.channel);
            for member in &departure.remaining {
                self.deliver(member, ServerMessage::notice(text.clone())).await;
            }
        }
    }

    async fn deliver(&self, target: &SessionHandle, msg: ServerMessage) {
        if let Err(reason) = target.send_timeout(msg, DELIVERY_GRACE).await {
            warn!(
                target = %target.nickname(),
                ?reason,
                "dropping outbound message"
            );
        }
    }
}
