//! In-memory connector for tests
//!
//! Every successful `connect` hands the far end of the link to the test as a
//! [`ServerEnd`], so tests can play the server.

use super::transport::{Connector, Link, LinkCommand, LinkEvent};
use super::ChannelError;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use url::Url;

pub(crate) struct ServerEnd {
    pub url: Url,
    pub cookie: Option<String>,
    to_client: mpsc::UnboundedSender<LinkEvent>,
    from_client: mpsc::UnboundedReceiver<LinkCommand>,
}

impl ServerEnd {
    pub fn push(&self, text: &str) {
        let _ = self.to_client.send(LinkEvent::Text(text.to_string()));
    }

    pub fn push_json(&self, value: serde_json::Value) {
        self.push(&value.to_string());
    }

    /// Server-side close
    pub fn close(&self) {
        let _ = self.to_client.send(LinkEvent::Closed {
            code: Some(1006),
            reason: "gone".to_string(),
        });
    }

    pub async fn next_command(&mut self) -> Option<LinkCommand> {
        self.from_client.recv().await
    }

    /// Next text frame sent by the client, parsed
    pub async fn next_json(&mut self) -> Option<serde_json::Value> {
        loop {
            match self.from_client.recv().await? {
                LinkCommand::Text(text) => return serde_json::from_str(&text).ok(),
                LinkCommand::Close => return None,
            }
        }
    }

    pub fn try_command(&mut self) -> Option<LinkCommand> {
        self.from_client.try_recv().ok()
    }
}

pub(crate) struct MemoryConnector {
    attempts: Mutex<Vec<Url>>,
    refuse: AtomicBool,
    servers: mpsc::UnboundedSender<ServerEnd>,
}

impl MemoryConnector {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<ServerEnd>) {
        let (servers, rx) = mpsc::unbounded_channel();
        let connector = Arc::new(Self {
            attempts: Mutex::new(Vec::new()),
            refuse: AtomicBool::new(false),
            servers,
        });
        (connector, rx)
    }

    /// Makes subsequent connects fail
    pub fn refuse(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }

    pub fn attempts(&self) -> Vec<Url> {
        self.attempts.lock().clone()
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, url: &Url, cookie: Option<&str>) -> Result<Link, ChannelError> {
        self.attempts.lock().push(url.clone());

        if self.refuse.load(Ordering::SeqCst) {
            return Err(ChannelError::ConnectionFailed("refused".to_string()));
        }

        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();

        let _ = self.servers.send(ServerEnd {
            url: url.clone(),
            cookie: cookie.map(str::to_string),
            to_client: in_tx,
            from_client: out_rx,
        });

        Ok(Link {
            outgoing: out_tx,
            incoming: in_rx,
        })
    }
}
