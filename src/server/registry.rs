//! Session registry: the shared directory of nicknames and channels
//!
//! All routing state lives behind one lock so that every logical operation
//! (register, unregister, join, leave) updates the nickname table and the
//! channel table as a single atomic unit. A reader can never observe a
//! nickname gone from the table but still present in a member set.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::{SendTimeoutError, TrySendError};
use tokio::sync::RwLock;

use crate::protocol::messages::ServerMessage;

/// Errors returned by registry operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryError {
    /// The nickname is already held by a live session
    NameTaken,
    /// The nickname is not registered
    UnknownNickname,
}

/// Handle to a session's outbound queue
///
/// This is the only way other components reach a session: messages are
/// enqueued here and the session's writer task drains them to the socket.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    nickname: String,
    outbound: mpsc::Sender<ServerMessage>,
}

impl SessionHandle {
    pub fn new(nickname: impl Into<String>, outbound: mpsc::Sender<ServerMessage>) -> Self {
        Self {
            nickname: nickname.into(),
            outbound,
        }
    }

    pub fn nickname(&self) -> &str {
        &self.nickname
    }

    /// Best-effort enqueue; never blocks the caller
    ///
    /// A full queue (slow receiver) or a closed queue (session tearing
    /// down) drops the message and reports the loss to the caller.
    pub fn enqueue(&self, msg: ServerMessage) -> std::result::Result<(), EnqueueError> {
        self.outbound.try_send(msg).map_err(|e| match e {
            TrySendError::Full(_) => EnqueueError::QueueFull,
            TrySendError::Closed(_) => EnqueueError::SessionClosed,
        })
    }

    /// Enqueue, waiting up to `wait` for queue capacity
    ///
    /// A receiver that is merely bursty frees a slot within the grace
    /// period and loses nothing; only a session that stays backed up for
    /// the whole window has the message dropped.
    pub async fn send_timeout(
        &self,
        msg: ServerMessage,
        wait: Duration,
    ) -> std::result::Result<(), EnqueueError> {
        self.outbound
            .send_timeout(msg, wait)
            .await
            .map_err(|e| match e {
                SendTimeoutError::Timeout(_) => EnqueueError::QueueFull,
                SendTimeoutError::Closed(_) => EnqueueError::SessionClosed,
            })
    }
}

/// Why an enqueue was dropped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueError {
    /// The session's bounded outbound queue is full
    QueueFull,
    /// The session is closing and no longer reads its queue
    SessionClosed,
}

/// Remaining members of one channel after a departure
#[derive(Debug)]
pub struct ChannelDeparture {
    pub channel: String,
    pub remaining: Vec<SessionHandle>,
}

#[derive(Debug, Default)]
struct RegistryInner {
    /// nickname -> session handle
    sessions: HashMap<String, SessionHandle>,
    /// channel name -> member nicknames
    channels: HashMap<String, HashSet<String>>,
}

impl RegistryInner {
    fn snapshot_members(&self, channel: &str) -> Vec<SessionHandle> {
        self.channels
            .get(channel)
            .map(|members| {
                members
                    .iter()
                    .filter_map(|nick| self.sessions.get(nick).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    fn drop_channel_if_empty(&mut self, channel: &str, retain_empty: bool) {
        if retain_empty {
            return;
        }
        if self
            .channels
            .get(channel)
            .is_some_and(|members| members.is_empty())
        {
            self.channels.remove(channel);
        }
    }
}

/// Shared, concurrency-safe directory of sessions and channel memberships
#[derive(Debug)]
pub struct Registry {
    inner: RwLock<RegistryInner>,
    retain_empty_channels: bool,
}

impl Registry {
    /// Create a registry; `retain_empty_channels` controls whether a
    /// channel survives its last member leaving
    pub fn new(retain_empty_channels: bool) -> Self {
        Self {
            inner: RwLock::new(RegistryInner::default()),
            retain_empty_channels,
        }
    }

    /// Register a nickname; fails if it is already taken
    pub async fn register(
        &self,
        nickname: &str,
        handle: SessionHandle,
    ) -> std::result::Result<(), RegistryError> {
        let mut inner = self.inner.write().await;
        if inner.sessions.contains_key(nickname) {
            return Err(RegistryError::NameTaken);
        }
        inner.sessions.insert(nickname.to_string(), handle);
        Ok(())
    }

    /// Remove a nickname from the table and from every channel it joined
    ///
    /// Idempotent. Returns, per channel the nickname was a member of, the
    /// remaining members so the caller can fan out departure notices.
    pub async fn unregister(&self, nickname: &str) -> Vec<ChannelDeparture> {
        let mut inner = self.inner.write().await;
        if inner.sessions.remove(nickname).is_none() {
            return Vec::new();
        }

        let affected: Vec<String> = inner
            .channels
            .iter()
            .filter(|(_, members)| members.contains(nickname))
            .map(|(name, _)| name.clone())
            .collect();

        let mut departures = Vec::with_capacity(affected.len());
        for channel in affected {
            if let Some(members) = inner.channels.get_mut(&channel) {
                members.remove(nickname);
            }
            inner.drop_channel_if_empty(&channel, self.retain_empty_channels);
            departures.push(ChannelDeparture {
                remaining: inner.snapshot_members(&channel),
                channel,
            });
        }
        departures
    }

    /// Add a nickname to a channel, creating the channel on first join
    ///
    /// Returns the member snapshot after the join (the joiner included).
    pub async fn join(
        &self,
        nickname: &str,
        channel: &str,
    ) -> std::result::Result<Vec<SessionHandle>, RegistryError> {
        let mut inner = self.inner.write().await;
        if !inner.sessions.contains_key(nickname) {
            return Err(RegistryError::UnknownNickname);
        }
        inner
            .channels
            .entry(channel.to_string())
            .or_default()
            .insert(nickname.to_string());
        Ok(inner.snapshot_members(channel))
    }

    /// Remove a nickname from a channel
    ///
    /// Idempotent: returns `Some(remaining members)` when the nickname was
    /// actually a member, `None` otherwise.
    pub async fn leave(&self, nickname: &str, channel: &str) -> Option<Vec<SessionHandle>> {
        let mut inner = self.inner.write().await;
        let removed = inner
            .channels
            .get_mut(channel)
            .is_some_and(|members| members.remove(nickname));
        if !removed {
            return None;
        }
        inner.drop_channel_if_empty(channel, self.retain_empty_channels);
        Some(inner.snapshot_members(channel))
    }

    /// Look up a session handle by nickname
    pub async fn lookup(&self, nickname: &str) -> Option<SessionHandle> {
        self.inner.read().await.sessions.get(nickname).cloned()
    }

    /// Snapshot of a channel's members; empty if the channel does not exist
    pub async fn members_of(&self, channel: &str) -> Vec<SessionHandle> {
        self.inner.read().await.snapshot_members(channel)
    }

    /// Snapshot of all channel names
    pub async fn channel_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.read().await.channels.keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of registered sessions
    pub async fn session_count(&self) -> usize {
        self.inner.read().await.sessions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn handle(nickname: &str) -> (SessionHandle, mpsc::Receiver<ServerMessage>) {
        let (tx, rx) = mpsc::channel(16);
        (SessionHandle::new(nickname, tx), rx)
    }

    #[tokio::test]
    async fn test_register_rejects_duplicate() {
        let registry = Registry::new(false);
        let (alice, _rx) = handle("alice");
        let (imposter, _rx2) = handle("alice");

        assert!(registry.register("alice", alice).await.is_ok());
        assert_eq!(
            registry.register("alice", imposter).await,
            Err(RegistryError::NameTaken)
        );
        assert_eq!(registry.session_count().await, 1);
    }

    #[tokio::test]
    async fn test_nicknames_are_case_sensitive() {
        let registry = Registry::new(false);
        let (bob, _rx) = handle("bob");
        let (big_bob, _rx2) = handle("Bob");

        assert!(registry.register("bob", bob).await.is_ok());
        assert!(registry.register("Bob", big_bob).await.is_ok());
        assert_eq!(registry.session_count().await, 2);
    }

    #[tokio::test]
    async fn test_join_requires_registration() {
        let registry = Registry::new(false);
        assert!(matches!(
            registry.join("ghost", "general").await,
            Err(RegistryError::UnknownNickname)
        ));
    }

    #[tokio::test]
    async fn test_join_creates_channel_and_snapshots_members() {
        let registry = Registry::new(false);
        let (alice, _rx) = handle("alice");
        let (bob, _rx2) = handle("bob");
        registry.register("alice", alice).await.unwrap();
        registry.register("bob", bob).await.unwrap();

        let members = registry.join("alice", "general").await.unwrap();
        assert_eq!(members.len(), 1);

        let members = registry.join("bob", "general").await.unwrap();
        let mut names: Vec<&str> = members.iter().map(|h| h.nickname()).collect();
        names.sort();
        assert_eq!(names, ["alice", "bob"]);
    }

    #[tokio::test]
    async fn test_leave_is_idempotent() {
        let registry = Registry::new(false);
        let (alice, _rx) = handle("alice");
        registry.register("alice", alice).await.unwrap();
        registry.join("alice", "general").await.unwrap();

        assert!(registry.leave("alice", "general").await.is_some());
        assert!(registry.leave("alice", "general").await.is_none());
        assert!(registry.leave("alice", "no-such-channel").await.is_none());
    }

    #[tokio::test]
    async fn test_unregister_cascades_across_channels() {
        let registry = Registry::new(false);
        let (alice, _rx) = handle("alice");
        let (bob, _rx2) = handle("bob");
        registry.register("alice", alice).await.unwrap();
        registry.register("bob", bob).await.unwrap();
        registry.join("alice", "general").await.unwrap();
        registry.join("alice", "random").await.unwrap();
        registry.join("bob", "general").await.unwrap();

        let mut departures = registry.unregister("alice").await;
        departures.sort_by(|a, b| a.channel.cmp(&b.channel));
        assert_eq!(departures.len(), 2);
        assert_eq!(departures[0].channel, "general");
        assert_eq!(departures[0].remaining.len(), 1);
        assert_eq!(departures[0].remaining[0].nickname(), "bob");
        assert_eq!(departures[1].channel, "random");
        assert!(departures[1].remaining.is_empty());

        // Immediately absent from every member set
        assert!(registry
            .members_of("general")
            .await
            .iter()
            .all(|h| h.nickname() != "alice"));
        assert!(registry.lookup("alice").await.is_none());

        // Idempotent
        assert!(registry.unregister("alice").await.is_empty());
    }

    #[tokio::test]
    async fn test_empty_channel_evicted_by_default() {
        let registry = Registry::new(false);
        let (alice, _rx) = handle("alice");
        registry.register("alice", alice).await.unwrap();
        registry.join("alice", "general").await.unwrap();
        registry.leave("alice", "general").await.unwrap();

        assert!(registry.channel_names().await.is_empty());
    }

    #[tokio::test]
    async fn test_empty_channel_retained_when_configured() {
        let registry = Registry::new(true);
        let (alice, _rx) = handle("alice");
        registry.register("alice", alice).await.unwrap();
        registry.join("alice", "general").await.unwrap();
        registry.leave("alice", "general").await.unwrap();

        assert_eq!(registry.channel_names().await, ["general"]);
        assert!(registry.members_of("general").await.is_empty());

        // Same for the unregister path
        registry.join("alice", "random").await.unwrap();
        registry.unregister("alice").await;
        let names = registry.channel_names().await;
        assert!(names.contains(&"random".to_string()));
    }

    #[tokio::test]
    async fn test_concurrent_register_exactly_one_winner() {
        let registry = Arc::new(Registry::new(false));
        let mut tasks = Vec::new();

        for _ in 0..16 {
            let registry = Arc::clone(&registry);
            tasks.push(tokio::spawn(async move {
                let (h, _rx) = {
                    let (tx, rx) = mpsc::channel(1);
                    (SessionHandle::new("bob", tx), rx)
                };
                registry.register("bob", h).await.is_ok()
            }));
        }

        let mut successes = 0;
        for task in tasks {
            if task.await.unwrap() {
                successes += 1;
            }
        }
        assert_eq!(successes, 1);
        assert_eq!(registry.session_count().await, 1);
    }

    #[tokio::test]
    async fn test_membership_consistency_after_mixed_operations() {
        let registry = Registry::new(false);
        let mut receivers = Vec::new();
        for nick in ["alice", "bob", "carol"] {
            let (h, rx) = handle(nick);
            receivers.push(rx);
            registry.register(nick, h).await.unwrap();
        }
        registry.join("alice", "general").await.unwrap();
        registry.join("bob", "general").await.unwrap();
        registry.join("carol", "general").await.unwrap();
        registry.join("carol", "random").await.unwrap();
        registry.leave("bob", "general").await;
        registry.unregister("carol").await;

        // Every member of every channel maps to a live session
        for channel in registry.channel_names().await {
            for member in registry.members_of(&channel).await {
                assert!(
                    registry.lookup(member.nickname()).await.is_some(),
                    "dangling member {} in {}",
                    member.nickname(),
                    channel
                );
            }
        }

        let members = registry.members_of("general").await;
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].nickname(), "alice");
    }

    #[tokio::test]
    async fn test_enqueue_reports_full_and_closed() {
        let (tx, mut rx) = mpsc::channel(1);
        let h = SessionHandle::new("alice", tx);

        assert!(h.enqueue(ServerMessage::notice("one")).is_ok());
        assert_eq!(
            h.enqueue(ServerMessage::notice("two")),
            Err(EnqueueError::QueueFull)
        );

        rx.close();
        assert_eq!(
            h.enqueue(ServerMessage::notice("three")),
            Err(EnqueueError::SessionClosed)
        );
    }

    #[tokio::test]
    async fn test_send_timeout_waits_for_capacity() {
        let (tx, mut rx) = mpsc::channel(1);
        let h = SessionHandle::new("alice", tx);
        h.enqueue(ServerMessage::notice("one")).unwrap();

        // Nobody draining: the deadline expires and the message is lost
        assert_eq!(
            h.send_timeout(ServerMessage::notice("two"), Duration::from_millis(20))
                .await,
            Err(EnqueueError::QueueFull)
        );

        // A drain within the deadline frees the slot
        let drainer = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            rx.recv().await
        });
        assert!(h
            .send_timeout(ServerMessage::notice("three"), Duration::from_secs(1))
            .await
            .is_ok());
        assert!(drainer.await.unwrap().is_some());
    }
}
