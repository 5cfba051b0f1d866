//! Chat conversation session
//!
//! Binds a reconnecting channel on `/ws/chat/<id>/` to a [`ChatView`].

use super::messages::*;
use super::view::ChatView;
use crate::channel::{ChannelClient, ChannelError, Connector, ReconnectPolicy};
use crate::config::{ClientConfig, Topic};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChatError {
    #[error("Message is empty")]
    EmptyMessage,

    #[error(transparent)]
    Channel(#[from] ChannelError),
}

pub struct ChatSession {
    channel: ChannelClient,
}

impl ChatSession {
    /// Creates the session and wires inbound frames to `view`.
    /// Nothing connects until [`ChatSession::open`].
    pub fn new(
        config: Arc<ClientConfig>,
        connector: Arc<dyn Connector>,
        view: Arc<dyn ChatView>,
    ) -> Self {
        let policy = ReconnectPolicy::from(&config.reconnect);
        let channel = ChannelClient::new(config, connector, policy);
        Self::register_handlers(&channel, view);
        Self { channel }
    }

    fn register_handlers(channel: &ChannelClient, view: Arc<dyn ChatView>) {
        let v = Arc::clone(&view);
        channel.on("chat_message", move |message: PostedMessage| {
            // Reconnects can replay messages that are already on screen
            if v.has_message(message.id) {
                tracing::debug!("Message {} already rendered, skipping", message.id);
                return;
            }
            tracing::debug!("New message {} from {}", message.id, message.sender_name);
            v.add_message(message);
        });

        let v = Arc::clone(&view);
        channel.on("edit_message", move |edit: EditedMessage| {
            v.edit_message(edit.id, &edit.content);
        });

        let v = Arc::clone(&view);
        channel.on("delete_message", move |delete: DeletedMessage| {
            v.delete_message(delete.id);
        });

        let v = Arc::clone(&view);
        channel.on("pin_message", move |pin: PinnedMessage| {
            tracing::debug!("Message pinned: {}", pin.message_id);
            v.pin_message(pin.message_id, &pin.content);
        });

        channel.on("unpin_message", move |_: UnpinnedMessage| {
            view.unpin_message();
        });
    }

    /// Opens (or switches to) a conversation; the previous one is closed
    pub fn open(&self, conversation_id: impl Into<String>) {
        self.channel.connect(Topic::Chat(conversation_id.into()));
    }

    /// Posts a message. Blank input is rejected, and nothing is buffered
    /// while offline.
    pub fn post(&self, content: &str) -> Result<(), ChatError> {
        if content.trim().is_empty() {
            return Err(ChatError::EmptyMessage);
        }
        self.channel
            .send(&PostMessagePayload::new(content.to_string()))?;
        Ok(())
    }

    pub fn channel(&self) -> &ChannelClient {
        &self.channel
    }

    pub fn close(&self) {
        self.channel.shutdown();
    }
}

impl std::fmt::Debug for ChatSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatSession")
            .field("channel", &self.channel)
            .finish()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::memory::{MemoryConnector, ServerEnd};
    use crate::channel::ChannelEvent;
    use crate::chat::MessageLog;
    use serde_json::json;
    use std::time::Duration;
    use tokio::sync::mpsc;

    struct Fixture {
        session: ChatSession,
        log: Arc<MessageLog>,
        connector: Arc<MemoryConnector>,
        servers: mpsc::UnboundedReceiver<ServerEnd>,
    }

    fn fixture() -> Fixture {
        let (connector, servers) = MemoryConnector::new();
        let config = Arc::new(ClientConfig {
            current_user_id: Some(1),
            ..Default::default()
        });
        let log = Arc::new(MessageLog::new(config.current_user_id));
        let session = ChatSession::new(config, connector.clone(), log.clone());
        Fixture {
            session,
            log,
            connector,
            servers,
        }
    }

    fn posted(id: i64, sender: i64, content: &str) -> serde_json::Value {
        json!({
            "type": "chat_message",
            "message_id": id,
            "sender_id": sender,
            "sender_name": format!("user{}", sender),
            "content": content,
            "timestamp": "2024-05-01 10:20:30+00:00"
        })
    }

    /// Lets the channel task drain what was pushed
    async fn settle() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    async fn open(fx: &mut Fixture, id: &str) -> ServerEnd {
        let mut events = fx.session.channel().subscribe();
        fx.session.open(id);
        let server = fx.servers.recv().await.unwrap();
        while !matches!(events.recv().await.unwrap(), ChannelEvent::Connected { .. }) {}
        server
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_delivery_renders_once() {
        let mut fx = fixture();
        let server = open(&mut fx, "42").await;

        server.push_json(posted(7, 2, "hello"));
        tokio::time::sleep(Duration::from_millis(200)).await;
        server.push_json(posted(7, 2, "hello"));
        settle().await;

        assert_eq!(fx.log.len(), 1);
        assert_eq!(fx.log.get(7).unwrap().message.content.as_deref(), Some("hello"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_replay_after_reconnect_is_deduplicated() {
        let mut fx = fixture();
        let server = open(&mut fx, "42").await;

        server.push_json(posted(7, 2, "before"));
        server.push_json(posted(8, 1, "mine"));
        settle().await;
        server.close();

        // Reconnect after the fixed delay, server replays history
        let replay = fx.servers.recv().await.unwrap();
        settle().await;
        replay.push_json(posted(7, 2, "before"));
        replay.push_json(posted(8, 1, "mine"));
        replay.push_json(posted(9, 2, "after"));
        settle().await;

        assert_eq!(fx.connector.attempts().len(), 2);
        let ids: Vec<i64> = fx.log.entries().iter().map(|e| e.message.id).collect();
        assert_eq!(ids, vec![7, 8, 9]);
        assert!(fx.log.get(8).unwrap().own);
        assert!(!fx.log.get(7).unwrap().own);
    }

    #[tokio::test(start_paused = true)]
    async fn test_message_carrying_both_id_fields() {
        let mut fx = fixture();
        let server = open(&mut fx, "42").await;

        let mut frame = posted(11, 2, "both");
        frame["id"] = json!(10);
        server.push_json(frame);
        let mut anonymous = posted(12, 2, "none");
        anonymous.as_object_mut().unwrap().remove("message_id");
        server.push_json(anonymous);
        server.push_json(posted(13, 2, "next"));
        settle().await;

        let ids: Vec<i64> = fx.log.entries().iter().map(|e| e.message.id).collect();
        assert_eq!(ids, vec![10, 13]);
        assert!(fx.session.channel().is_open());
    }

    #[tokio::test(start_paused = true)]
    async fn test_edit_delete_pin_unpin() {
        let mut fx = fixture();
        let server = open(&mut fx, "5").await;

        server.push_json(posted(1, 2, "first"));
        server.push_json(posted(2, 2, "second"));
        server.push_json(json!({"type": "edit_message", "id": 1, "content": "first!"}));
        server.push_json(json!({"type": "pin_message", "message_id": 2, "content": "second"}));
        settle().await;

        let first = fx.log.get(1).unwrap();
        assert!(first.edited);
        assert_eq!(first.message.content.as_deref(), Some("first!"));
        assert_eq!(fx.log.pinned().unwrap().message_id, 2);

        server.push_json(json!({"type": "unpin_message"}));
        server.push_json(json!({"type": "delete_message", "id": 1}));
        settle().await;

        assert_eq!(fx.log.pinned(), None);
        assert_eq!(fx.log.len(), 1);
        assert!(fx.log.get(1).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_garbage_between_messages() {
        let mut fx = fixture();
        let server = open(&mut fx, "5").await;

        server.push_json(posted(1, 2, "a"));
        server.push("<html>502 Bad Gateway</html>");
        server.push_json(json!({"type": "chat_message", "id": "oops"}));
        server.push_json(posted(2, 2, "b"));
        settle().await;

        assert_eq!(fx.log.len(), 2);
        assert!(fx.session.channel().is_open());
    }

    #[tokio::test(start_paused = true)]
    async fn test_post_message() {
        let mut fx = fixture();

        // Offline: dropped, not queued
        assert_eq!(
            fx.session.post("lost"),
            Err(ChatError::Channel(ChannelError::NotConnected))
        );

        let mut server = open(&mut fx, "5").await;
        assert_eq!(fx.session.post("   "), Err(ChatError::EmptyMessage));
        fx.session.post("hello there").unwrap();

        let frame = server.next_json().await.unwrap();
        assert_eq!(frame, json!({"type": "message", "content": "hello there"}));
        assert!(server.try_command().is_none());
    }
}
