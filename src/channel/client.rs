//! Reconnecting channel client
//!
//! Owns at most one live link to one topic:
//! - `connect` supersedes whatever link or reconnect timer came before
//! - frames are only sent while the link is open, never queued
//! - an unexpected close schedules exactly one reconnect after a fixed delay
//! - `shutdown` (or drop) cancels everything, including a pending timer

use super::router::Router;
use super::transport::{Connector, Link, LinkCommand, LinkEvent};
use crate::config::{ClientConfig, ReconnectConfig, Topic};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Channel is not open")]
    NotConnected,

    #[error("Failed to encode frame: {0}")]
    Encode(String),

    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),
}

// ============================================================================
// EVENTS & POLICY
// ============================================================================

/// Lifecycle events of a channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    Connected { topic: Topic },
    /// Link closed without the client asking for it
    Disconnected { topic: Topic, reason: String },
    /// Connection attempt failed
    Failed { topic: Topic, error: String },
    ReconnectScheduled { topic: Topic, delay: Duration },
    /// Retry limit reached, channel stays down
    GaveUp { topic: Topic },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconnectPolicy {
    /// Retry after `delay`; `max_attempts` caps consecutive failed attempts
    Fixed {
        delay: Duration,
        max_attempts: Option<u32>,
    },
    /// Stay closed after any close
    Never,
}

impl From<&ReconnectConfig> for ReconnectPolicy {
    fn from(config: &ReconnectConfig) -> Self {
        ReconnectPolicy::Fixed {
            delay: config.delay(),
            max_attempts: config.max_attempts,
        }
    }
}

// ============================================================================
// CLIENT STATE
// ============================================================================

#[derive(Default)]
struct LinkState {
    /// Bumped by every `connect`/`shutdown`; older tasks compare against it
    generation: u64,
    topic: Option<Topic>,
    outgoing: Option<mpsc::UnboundedSender<LinkCommand>>,
    task: Option<JoinHandle<()>>,
}

struct Shared {
    config: Arc<ClientConfig>,
    connector: Arc<dyn Connector>,
    policy: ReconnectPolicy,
    router: Router,
    state: Mutex<LinkState>,
    event_tx: broadcast::Sender<ChannelEvent>,
}

// ============================================================================
// CHANNEL CLIENT
// ============================================================================

/// Client for one logical channel (chat conversation, presence feed, call room)
pub struct ChannelClient {
    shared: Arc<Shared>,
}

impl ChannelClient {
    pub fn new(
        config: Arc<ClientConfig>,
        connector: Arc<dyn Connector>,
        policy: ReconnectPolicy,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(100);

        Self {
            shared: Arc::new(Shared {
                config,
                connector,
                policy,
                router: Router::new(),
                state: Mutex::new(LinkState::default()),
                event_tx,
            }),
        }
    }

    /// Receiver for lifecycle events
    pub fn subscribe(&self) -> broadcast::Receiver<ChannelEvent> {
        self.shared.event_tx.subscribe()
    }

    pub fn router(&self) -> &Router {
        &self.shared.router
    }

    /// Registers a typed handler for inbound frames of `frame_type`
    pub fn on<T, F>(&self, frame_type: &str, handler: F)
    where
        T: DeserializeOwned,
        F: Fn(T) + Send + Sync + 'static,
    {
        self.shared.router.on(frame_type, handler);
    }

    pub fn topic(&self) -> Option<Topic> {
        self.shared.state.lock().topic.clone()
    }

    pub fn is_open(&self) -> bool {
        self.shared
            .state
            .lock()
            .outgoing
            .as_ref()
            .is_some_and(|tx| !tx.is_closed())
    }

    /// Targets the channel at `topic`.
    ///
    /// The previous link (whatever its topic) is closed gracefully and its
    /// pending reconnect, if any, is cancelled. Must be called inside a Tokio
    /// runtime.
    pub fn connect(&self, topic: Topic) {
        let generation = {
            let mut state = self.shared.state.lock();
            if let Some(previous) = state.topic.as_ref() {
                tracing::info!("Closing channel {} before connecting to {}", previous, topic);
            }
            Self::release(&mut state);
            state.topic = Some(topic.clone());
            state.generation
        };

        let task = tokio::spawn(Self::run(Arc::clone(&self.shared), topic, generation));

        let mut state = self.shared.state.lock();
        if state.generation == generation {
            state.task = Some(task);
        } else {
            task.abort();
        }
    }

    /// Serializes and transmits a frame if the link is open.
    ///
    /// Nothing is queued: while disconnected the frame is dropped and
    /// `NotConnected` returned.
    pub fn send<T: Serialize>(&self, frame: &T) -> Result<(), ChannelError> {
        let text = serde_json::to_string(frame).map_err(|e| ChannelError::Encode(e.to_string()))?;
        let state = self.shared.state.lock();

        let Some(tx) = state.outgoing.as_ref() else {
            tracing::warn!(
                "Channel {} not open, dropping frame",
                state.topic.as_ref().map(ToString::to_string).unwrap_or_default()
            );
            return Err(ChannelError::NotConnected);
        };

        tx.send(LinkCommand::Text(text)).map_err(|_| {
            tracing::warn!("Channel link already gone, dropping frame");
            ChannelError::NotConnected
        })
    }

    /// Closes the link and cancels any scheduled reconnect
    pub fn shutdown(&self) {
        let mut state = self.shared.state.lock();
        if let Some(topic) = state.topic.take() {
            tracing::info!("Shutting down channel {}", topic);
        }
        Self::release(&mut state);
    }

    /// Invalidates the current generation and tears down its resources
    fn release(state: &mut LinkState) {
        state.generation += 1;
        if let Some(task) = state.task.take() {
            task.abort();
        }
        if let Some(tx) = state.outgoing.take() {
            let _ = tx.send(LinkCommand::Close);
        }
    }

    // ========================================================================
    // CONNECTION TASK
    // ========================================================================

    async fn run(shared: Arc<Shared>, topic: Topic, generation: u64) {
        let url = match shared.config.ws_url(&topic) {
            Ok(url) => url,
            Err(e) => {
                tracing::error!("Cannot build endpoint for {}: {}", topic, e);
                shared.emit(ChannelEvent::Failed {
                    topic,
                    error: ChannelError::InvalidEndpoint(e.to_string()).to_string(),
                });
                return;
            }
        };
        let cookie = shared.config.cookie_header();
        let mut failures: u32 = 0;

        loop {
            tracing::info!("Connecting channel {} ({})", topic, url);

            match shared.connector.connect(&url, cookie.as_deref()).await {
                Ok(link) => {
                    failures = 0;
                    if !shared.serve(link, &topic, generation).await {
                        return;
                    }
                }
                Err(e) => {
                    failures += 1;
                    tracing::warn!("Channel {} connection failed: {}", topic, e);
                    shared.emit(ChannelEvent::Failed {
                        topic: topic.clone(),
                        error: e.to_string(),
                    });
                }
            }

            if !shared.is_current(generation) {
                return;
            }

            match &shared.policy {
                ReconnectPolicy::Never => return,
                ReconnectPolicy::Fixed {
                    delay,
                    max_attempts,
                } => {
                    if max_attempts.is_some_and(|max| failures >= max) {
                        tracing::error!("Channel {}: giving up after {} attempts", topic, failures);
                        shared.emit(ChannelEvent::GaveUp { topic });
                        return;
                    }

                    tracing::warn!("Channel {} reconnecting in {:?}", topic, delay);
                    shared.emit(ChannelEvent::ReconnectScheduled {
                        topic: topic.clone(),
                        delay: *delay,
                    });
                    tokio::time::sleep(*delay).await;

                    if !shared.is_current(generation) {
                        return;
                    }
                }
            }
        }
    }
}

impl Shared {
    fn emit(&self, event: ChannelEvent) {
        let _ = self.event_tx.send(event);
    }

    fn is_current(&self, generation: u64) -> bool {
        self.state.lock().generation == generation
    }

    /// Pumps one link until it closes.
    ///
    /// Returns `false` if the link was superseded, `true` if it closed on
    /// its own.
    async fn serve(&self, link: Link, topic: &Topic, generation: u64) -> bool {
        let Link {
            outgoing,
            mut incoming,
        } = link;

        {
            let mut state = self.state.lock();
            if state.generation != generation {
                let _ = outgoing.send(LinkCommand::Close);
                return false;
            }
            state.outgoing = Some(outgoing);
        }

        tracing::info!("Channel {} connected", topic);
        self.emit(ChannelEvent::Connected {
            topic: topic.clone(),
        });

        let reason = loop {
            match incoming.recv().await {
                Some(LinkEvent::Text(text)) => {
                    self.router.dispatch(&text);
                }
                Some(LinkEvent::Closed { code, reason }) => {
                    tracing::warn!(
                        "Channel {} closed unexpectedly (code {:?}, reason '{}')",
                        topic,
                        code,
                        reason
                    );
                    break reason;
                }
                Some(LinkEvent::Error(e)) => {
                    tracing::error!("Channel {} error: {}", topic, e);
                    break e;
                }
                None => break "link dropped".to_string(),
            }
        };

        {
            let mut state = self.state.lock();
            if state.generation != generation {
                return false;
            }
            state.outgoing = None;
        }

        self.emit(ChannelEvent::Disconnected {
            topic: topic.clone(),
            reason,
        });
        true
    }
}

impl Drop for ChannelClient {
    fn drop(&mut self) {
        Self::release(&mut self.shared.state.lock());
    }
}

impl std::fmt::Debug for ChannelClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("ChannelClient")
            .field("topic", &state.topic)
            .field("generation", &state.generation)
            .field("open", &state.outgoing.is_some())
            .field("policy", &self.shared.policy)
            .finish()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::memory::MemoryConnector;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Deserialize)]
    struct Note {
        text: String,
    }

    fn client(connector: Arc<MemoryConnector>, policy: ReconnectPolicy) -> ChannelClient {
        let config = Arc::new(ClientConfig {
            host: "chat.test".to_string(),
            session_cookie: Some("s3cret".to_string()),
            ..Default::default()
        });
        ChannelClient::new(config, connector, policy)
    }

    fn fixed() -> ReconnectPolicy {
        ReconnectPolicy::Fixed {
            delay: Duration::from_secs(5),
            max_attempts: None,
        }
    }

    async fn wait_for<P>(events: &mut broadcast::Receiver<ChannelEvent>, pred: P) -> ChannelEvent
    where
        P: Fn(&ChannelEvent) -> bool,
    {
        loop {
            let event = events.recv().await.unwrap();
            if pred(&event) {
                return event;
            }
        }
    }

    async fn connected(events: &mut broadcast::Receiver<ChannelEvent>) {
        wait_for(events, |e| matches!(e, ChannelEvent::Connected { .. })).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_only_while_open() {
        let (connector, mut servers) = MemoryConnector::new();
        let client = client(Arc::clone(&connector), fixed());
        let mut events = client.subscribe();

        assert_eq!(client.send(&json!({"type": "message"})), Err(ChannelError::NotConnected));

        client.connect(Topic::Chat("1".to_string()));
        let mut server = servers.recv().await.unwrap();
        connected(&mut events).await;

        assert_eq!(server.url.as_str(), "ws://chat.test/ws/chat/1/");
        assert_eq!(server.cookie.as_deref(), Some("sessionid=s3cret"));

        client.send(&json!({"type": "message", "content": "hi"})).unwrap();
        let frame = server.next_json().await.unwrap();
        assert_eq!(frame["content"], "hi");

        server.close();
        wait_for(&mut events, |e| matches!(e, ChannelEvent::Disconnected { .. })).await;
        assert!(!client.is_open());
        assert_eq!(client.send(&json!({"type": "message"})), Err(ChannelError::NotConnected));
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_frame_keeps_channel_open() {
        let (connector, mut servers) = MemoryConnector::new();
        let client = client(connector, fixed());
        let mut events = client.subscribe();

        let (tx, mut rx) = mpsc::unbounded_channel();
        client.on("note", move |note: Note| {
            let _ = tx.send(note.text);
        });

        client.connect(Topic::Chat("1".to_string()));
        let server = servers.recv().await.unwrap();
        connected(&mut events).await;

        server.push("{{{ definitely not json");
        server.push(r#"{"no_type": true}"#);
        server.push(r#"{"type": "unknown_kind"}"#);
        server.push_json(json!({"type": "note", "text": "still here"}));

        assert_eq!(rx.recv().await.unwrap(), "still here");
        assert!(client.is_open());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unexpected_close_schedules_one_reconnect_after_delay() {
        let (connector, mut servers) = MemoryConnector::new();
        let client = client(Arc::clone(&connector), fixed());
        let mut events = client.subscribe();

        client.connect(Topic::Chat("5".to_string()));
        let server = servers.recv().await.unwrap();
        connected(&mut events).await;

        server.close();
        let event = wait_for(&mut events, |e| matches!(e, ChannelEvent::ReconnectScheduled { .. })).await;
        assert_eq!(
            event,
            ChannelEvent::ReconnectScheduled {
                topic: Topic::Chat("5".to_string()),
                delay: Duration::from_secs(5),
            }
        );

        tokio::time::sleep(Duration::from_millis(4_900)).await;
        assert_eq!(connector.attempts().len(), 1);

        let again = servers.recv().await.unwrap();
        assert_eq!(connector.attempts().len(), 2);
        assert_eq!(again.url.as_str(), "ws://chat.test/ws/chat/5/");
        connected(&mut events).await;
        assert!(client.is_open());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_cancels_pending_reconnect() {
        let (connector, mut servers) = MemoryConnector::new();
        let client = client(Arc::clone(&connector), fixed());
        let mut events = client.subscribe();

        client.connect(Topic::Status);
        let server = servers.recv().await.unwrap();
        connected(&mut events).await;

        server.close();
        wait_for(&mut events, |e| matches!(e, ChannelEvent::ReconnectScheduled { .. })).await;
        client.shutdown();

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(connector.attempts().len(), 1);
        assert!(servers.try_recv().is_err());
        assert_eq!(client.topic(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retarget_closes_previous_topic() {
        let (connector, mut servers) = MemoryConnector::new();
        let client = client(Arc::clone(&connector), fixed());
        let mut events = client.subscribe();

        client.connect(Topic::Chat("room-42".to_string()));
        let mut old = servers.recv().await.unwrap();
        connected(&mut events).await;

        client.connect(Topic::Chat("room-99".to_string()));
        assert_eq!(old.next_command().await, Some(LinkCommand::Close));

        let new = servers.recv().await.unwrap();
        assert_eq!(new.url.as_str(), "ws://chat.test/ws/chat/room-99/");
        connected(&mut events).await;

        // The old server finishing its close must not revive room-42
        old.close();
        tokio::time::sleep(Duration::from_secs(20)).await;

        let attempts = connector.attempts();
        assert_eq!(attempts.len(), 2);
        assert!(attempts[1].as_str().ends_with("/ws/chat/room-99/"));
        assert!(servers.try_recv().is_err());
        assert_eq!(client.topic(), Some(Topic::Chat("room-99".to_string())));
        assert!(client.is_open());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_connects_retry_forever_by_default() {
        let (connector, _servers) = MemoryConnector::new();
        connector.refuse(true);
        let client = client(Arc::clone(&connector), fixed());

        client.connect(Topic::Chat("1".to_string()));
        tokio::time::sleep(Duration::from_millis(20_100)).await;

        // t = 0, 5, 10, 15, 20
        assert_eq!(connector.attempts().len(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_max_attempts_gives_up() {
        let (connector, _servers) = MemoryConnector::new();
        connector.refuse(true);
        let client = client(
            Arc::clone(&connector),
            ReconnectPolicy::Fixed {
                delay: Duration::from_secs(1),
                max_attempts: Some(3),
            },
        );
        let mut events = client.subscribe();

        client.connect(Topic::Chat("1".to_string()));
        wait_for(&mut events, |e| matches!(e, ChannelEvent::GaveUp { .. })).await;

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(connector.attempts().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_policy_stays_closed() {
        let (connector, mut servers) = MemoryConnector::new();
        let client = client(Arc::clone(&connector), ReconnectPolicy::Never);
        let mut events = client.subscribe();

        client.connect(Topic::Voice("3".to_string()));
        let server = servers.recv().await.unwrap();
        connected(&mut events).await;

        server.close();
        wait_for(&mut events, |e| matches!(e, ChannelEvent::Disconnected { .. })).await;

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(connector.attempts().len(), 1);
        assert!(!client.is_open());
    }
}
