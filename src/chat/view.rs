//! Chat view observer and the in-memory message log

use super::messages::{MessageId, PostedMessage, UserId};
use parking_lot::Mutex;

/// Receives chat updates. Implemented by whatever renders the conversation.
pub trait ChatView: Send + Sync {
    /// Whether a message with this id is already rendered
    fn has_message(&self, id: MessageId) -> bool;
    fn add_message(&self, message: PostedMessage);
    fn edit_message(&self, id: MessageId, content: &str);
    fn delete_message(&self, id: MessageId);
    fn pin_message(&self, id: MessageId, content: &str);
    fn unpin_message(&self);
}

/// One rendered entry
#[derive(Debug, Clone, PartialEq)]
pub struct LogEntry {
    pub message: PostedMessage,
    pub own: bool,
    pub edited: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PinBanner {
    pub message_id: MessageId,
    pub content: String,
}

#[derive(Debug, Default)]
struct LogState {
    entries: Vec<LogEntry>,
    pinned: Option<PinBanner>,
}

/// Ordered, de-duplicated list of rendered messages plus the pin banner
#[derive(Debug, Default)]
pub struct MessageLog {
    current_user_id: Option<UserId>,
    state: Mutex<LogState>,
}

impl MessageLog {
    pub fn new(current_user_id: Option<UserId>) -> Self {
        Self {
            current_user_id,
            state: Mutex::new(LogState::default()),
        }
    }

    pub fn entries(&self) -> Vec<LogEntry> {
        self.state.lock().entries.clone()
    }

    pub fn get(&self, id: MessageId) -> Option<LogEntry> {
        self.state
            .lock()
            .entries
            .iter()
            .find(|e| e.message.id == id)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn pinned(&self) -> Option<PinBanner> {
        self.state.lock().pinned.clone()
    }
}

impl ChatView for MessageLog {
    fn has_message(&self, id: MessageId) -> bool {
        self.state.lock().entries.iter().any(|e| e.message.id == id)
    }

    fn add_message(&self, message: PostedMessage) {
        let mut state = self.state.lock();
        if state.entries.iter().any(|e| e.message.id == message.id) {
            return;
        }
        let own = message.is_own(self.current_user_id);
        state.entries.push(LogEntry {
            message,
            own,
            edited: false,
        });
    }

    fn edit_message(&self, id: MessageId, content: &str) {
        let mut state = self.state.lock();
        if let Some(entry) = state.entries.iter_mut().find(|e| e.message.id == id) {
            entry.message.content = Some(content.to_string());
            entry.edited = true;
        }
    }

    fn delete_message(&self, id: MessageId) {
        let mut state = self.state.lock();
        state.entries.retain(|e| e.message.id != id);
        if state.pinned.as_ref().is_some_and(|p| p.message_id == id) {
            state.pinned = None;
        }
    }

    /// Only one message is pinned at a time; unknown ids are ignored
    fn pin_message(&self, id: MessageId, content: &str) {
        let mut state = self.state.lock();
        if state.entries.iter().any(|e| e.message.id == id) {
            state.pinned = Some(PinBanner {
                message_id: id,
                content: content.to_string(),
            });
        }
    }

    fn unpin_message(&self) {
        self.state.lock().pinned = None;
    }
}
