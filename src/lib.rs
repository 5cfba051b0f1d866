//! Chatline - realtime chat and voice call client
//!
//! Client side of a chat web app's realtime channels:
//! - conversation channel with reconnect and message de-duplication
//! - presence feed
//! - voice call signaling with a WebRTC peer connection
//! - file upload into a conversation

pub mod call_engine;
pub mod channel;
pub mod chat;
pub mod config;
pub mod media;
pub mod notice;
pub mod presence;
pub mod upload;

use call_engine::{CallDeps, CallSession, Participants, RemoteOutputs, RtcPeerFactory};
use channel::{Connector, WsConnector};
use chat::{ChatSession, MessageLog};
use config::ClientConfig;
use media::MicrophoneDevices;
use notice::{LogNotifier, Notifier};
use once_cell::sync::OnceCell;
use presence::{FriendStatuses, PresenceSession};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use upload::Uploader;

static LOGGING: OnceCell<()> = OnceCell::new();

/// Installs the `tracing` subscriber. Only the first call has an effect.
pub fn init_logging() {
    LOGGING.get_or_init(|| {
        let mut filter = EnvFilter::from_default_env();
        for directive in ["chatline=debug", "webrtc=warn"] {
            if let Ok(directive) = directive.parse() {
                filter = filter.add_directive(directive);
            }
        }
        let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
    });
}

// ============================================================================
// PAGE STATE
// ============================================================================

/// Everything one chat page runs: the open conversation, the presence feed
/// and the call room, plus the in-memory state they render into.
pub struct ChatPage {
    pub config: Arc<ClientConfig>,
    pub chat: ChatSession,
    pub messages: Arc<MessageLog>,
    pub presence: PresenceSession,
    pub friends: Arc<FriendStatuses>,
    pub call: Arc<CallSession>,
    pub participants: Arc<Participants>,
    pub remote_outputs: Arc<RemoteOutputs>,
    pub uploader: Uploader,
    conversation: parking_lot::Mutex<Option<String>>,
}

impl ChatPage {
    /// Wires sessions over real WebSockets, webrtc-rs and the default microphone
    pub fn new(config: ClientConfig) -> Self {
        let peers = Arc::new(RtcPeerFactory::new(&config.ice_servers));
        Self::with_parts(config, Arc::new(WsConnector), peers, Arc::new(MicrophoneDevices))
    }

    pub fn with_parts(
        config: ClientConfig,
        connector: Arc<dyn Connector>,
        peers: Arc<dyn call_engine::PeerFactory>,
        media: Arc<dyn media::MediaDevices>,
    ) -> Self {
        let config = Arc::new(config);
        let notifier: Arc<dyn Notifier> = Arc::new(LogNotifier);

        let messages = Arc::new(MessageLog::new(config.current_user_id));
        let chat = ChatSession::new(Arc::clone(&config), Arc::clone(&connector), messages.clone());

        let friends = Arc::new(FriendStatuses::new());
        let presence = PresenceSession::new(Arc::clone(&config), Arc::clone(&connector), friends.clone());

        let participants = Arc::new(Participants::new());
        let remote_outputs = Arc::new(RemoteOutputs::new());
        let call = CallSession::new(
            Arc::clone(&config),
            connector,
            CallDeps {
                peers,
                media,
                output: remote_outputs.clone(),
                notifier: Arc::clone(&notifier),
                participants: participants.clone(),
            },
        );

        let uploader = Uploader::new(Arc::clone(&config), notifier);

        Self {
            config,
            chat,
            messages,
            presence,
            friends,
            call,
            participants,
            remote_outputs,
            uploader,
            conversation: parking_lot::Mutex::new(None),
        }
    }

    /// Opens the conversation, its call room and the presence feed.
    /// Must be called inside a Tokio runtime.
    pub fn open(&self, conversation_id: &str) {
        tracing::info!("Opening conversation {}", conversation_id);
        *self.conversation.lock() = Some(conversation_id.to_string());
        self.chat.open(conversation_id);
        self.call.open(conversation_id);
        self.presence.open();
    }

    /// Switches to another conversation; the previous channels are closed
    pub async fn switch_conversation(&self, conversation_id: &str) {
        self.call.stop_audio().await;
        *self.conversation.lock() = Some(conversation_id.to_string());
        self.chat.open(conversation_id);
        self.call.open(conversation_id);
    }

    /// Conversation currently shown, if any
    pub fn conversation(&self) -> Option<String> {
        self.conversation.lock().clone()
    }

    /// Uploads a file into the current conversation
    pub async fn upload(&self, path: &std::path::Path) -> Result<upload::UploadedFile, upload::UploadError> {
        let conversation_id = self
            .conversation()
            .ok_or(upload::UploadError::NoConversation)?;
        self.uploader.upload_file(&conversation_id, path).await
    }

    pub async fn close(&self) {
        self.call.close().await;
        self.chat.close();
        self.presence.close();
    }
}

impl std::fmt::Debug for ChatPage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatPage")
            .field("chat", &self.chat)
            .field("call", &self.call)
            .finish()
    }
}
