//! Chat Module - conversation channel and message rendering state
//!

mod messages;
mod session;
mod view;

pub use messages::*;
pub use session::{ChatError, ChatSession};
pub use view::{ChatView, LogEntry, MessageLog, PinBanner};
