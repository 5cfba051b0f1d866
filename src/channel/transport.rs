//! Transport seam between the channel client and the network
//!
//! A [`Link`] is one established duplex connection, exposed as a pair of
//! queues so the client never touches the socket directly. [`WsConnector`]
//! backs it with tokio-tungstenite.

use super::ChannelError;
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{header::COOKIE, HeaderValue};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use url::Url;
use uuid::Uuid;

/// Command sent towards the remote end
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkCommand {
    Text(String),
    /// Graceful close initiated by this side
    Close,
}

/// Something the remote end (or the socket) did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    Text(String),
    Closed { code: Option<u16>, reason: String },
    Error(String),
}

/// An open connection
#[derive(Debug)]
pub struct Link {
    pub outgoing: mpsc::UnboundedSender<LinkCommand>,
    pub incoming: mpsc::UnboundedReceiver<LinkEvent>,
}

/// Opens links to endpoint URLs
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// `cookie` is the raw `Cookie` header value for the handshake
    async fn connect(&self, url: &Url, cookie: Option<&str>) -> Result<Link, ChannelError>;
}

// ============================================================================
// WEBSOCKET CONNECTOR
// ============================================================================

/// WebSocket connector with one reader and one writer task per link
#[derive(Debug, Default, Clone, Copy)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, url: &Url, cookie: Option<&str>) -> Result<Link, ChannelError> {
        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| ChannelError::ConnectionFailed(e.to_string()))?;

        if let Some(cookie) = cookie {
            let value = HeaderValue::from_str(cookie)
                .map_err(|e| ChannelError::ConnectionFailed(e.to_string()))?;
            request.headers_mut().insert(COOKIE, value);
        }

        let (ws_stream, _) = connect_async(request)
            .await
            .map_err(|e| ChannelError::ConnectionFailed(e.to_string()))?;

        let (mut write, mut read) = ws_stream.split();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<LinkCommand>();
        let (in_tx, in_rx) = mpsc::unbounded_channel::<LinkEvent>();
        let link_id = Uuid::new_v4();

        tracing::debug!(%link_id, "WebSocket link open: {}", url);

        // Read-Task
        tokio::spawn(async move {
            while let Some(msg_result) = read.next().await {
                match msg_result {
                    Ok(Message::Text(text)) => {
                        if in_tx.send(LinkEvent::Text(text)).is_err() {
                            // Client dropped the link
                            return;
                        }
                    }
                    Ok(Message::Close(frame)) => {
                        let (code, reason) = frame
                            .map(|f| (Some(u16::from(f.code)), f.reason.to_string()))
                            .unwrap_or((None, String::new()));
                        tracing::debug!(%link_id, ?code, "WebSocket closed by server");
                        let _ = in_tx.send(LinkEvent::Closed { code, reason });
                        return;
                    }
                    Err(e) => {
                        tracing::debug!(%link_id, "WebSocket read error: {}", e);
                        let _ = in_tx.send(LinkEvent::Error(e.to_string()));
                        return;
                    }
                    _ => {}
                }
            }

            let _ = in_tx.send(LinkEvent::Closed {
                code: None,
                reason: "stream ended".to_string(),
            });
        });

        // Write-Task
        tokio::spawn(async move {
            while let Some(cmd) = out_rx.recv().await {
                match cmd {
                    LinkCommand::Text(text) => {
                        if let Err(e) = write.send(Message::Text(text)).await {
                            tracing::error!(%link_id, "Failed to send WebSocket message: {}", e);
                            break;
                        }
                    }
                    LinkCommand::Close => {
                        let _ = write.send(Message::Close(None)).await;
                        break;
                    }
                }
            }
            let _ = write.close().await;
            tracing::debug!(%link_id, "WebSocket writer finished");
        });

        Ok(Link {
            outgoing: out_tx,
            incoming: in_rx,
        })
    }
}
