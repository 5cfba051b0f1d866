//! Presence feed on `/ws/status/`
//!
//! Friends' status changes arrive as `friend_status`; the user's own manual
//! status is pushed with `status_change`.

use crate::channel::{ChannelClient, ChannelError, Connector, ReconnectPolicy};
use crate::chat::UserId;
use crate::config::{ClientConfig, Topic};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// `friend_status`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FriendStatus {
    pub user_id: UserId,
    pub status: String,
}

/// `status_change`
#[derive(Debug, Clone, Serialize)]
pub struct StatusChangePayload {
    #[serde(rename = "type")]
    pub msg_type: &'static str,
    pub status: String,
}

impl StatusChangePayload {
    pub fn new(status: String) -> Self {
        Self {
            msg_type: "status_change",
            status,
        }
    }
}

pub trait PresenceView: Send + Sync {
    fn update_friend_status(&self, user_id: UserId, status: &str);
}

/// Last known status per friend
#[derive(Debug, Default)]
pub struct FriendStatuses {
    statuses: Mutex<HashMap<UserId, String>>,
}

impl FriendStatuses {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status_of(&self, user_id: UserId) -> Option<String> {
        self.statuses.lock().get(&user_id).cloned()
    }
}

impl PresenceView for FriendStatuses {
    fn update_friend_status(&self, user_id: UserId, status: &str) {
        self.statuses.lock().insert(user_id, status.to_string());
    }
}

pub struct PresenceSession {
    channel: ChannelClient,
}

impl PresenceSession {
    pub fn new(
        config: Arc<ClientConfig>,
        connector: Arc<dyn Connector>,
        view: Arc<dyn PresenceView>,
    ) -> Self {
        let policy = ReconnectPolicy::from(&config.reconnect);
        let channel = ChannelClient::new(config, connector, policy);

        channel.on("friend_status", move |update: FriendStatus| {
            tracing::debug!("User {} is now {}", update.user_id, update.status);
            view.update_friend_status(update.user_id, &update.status);
        });

        Self { channel }
    }

    pub fn open(&self) {
        self.channel.connect(Topic::Status);
    }

    pub fn set_status(&self, status: &str) -> Result<(), ChannelError> {
        self.channel
            .send(&StatusChangePayload::new(status.to_string()))
    }

    pub fn channel(&self) -> &ChannelClient {
        &self.channel
    }

    pub fn close(&self) {
        self.channel.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::memory::MemoryConnector;
    use crate::channel::ChannelEvent;
    use serde_json::json;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_friend_status_updates_and_reconnect() {
        let (connector, mut servers) = MemoryConnector::new();
        let statuses = Arc::new(FriendStatuses::new());
        let session = PresenceSession::new(
            Arc::new(ClientConfig::default()),
            connector.clone(),
            statuses.clone(),
        );
        let mut events = session.channel().subscribe();

        session.open();
        let mut server = servers.recv().await.unwrap();
        assert!(server.url.as_str().ends_with("/ws/status/"));
        while !matches!(events.recv().await.unwrap(), ChannelEvent::Connected { .. }) {}

        server.push_json(json!({"type": "friend_status", "user_id": 4, "status": "online"}));
        server.push_json(json!({"type": "friend_status", "user_id": 4, "status": "away"}));
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(statuses.status_of(4).as_deref(), Some("away"));

        session.set_status("dnd").unwrap();
        assert_eq!(
            server.next_json().await.unwrap(),
            json!({"type": "status_change", "status": "dnd"})
        );

        server.close();
        let again = servers.recv().await.unwrap();
        assert!(again.url.as_str().ends_with("/ws/status/"));

        session.close();
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(connector.attempts().len(), 2);
    }
}
