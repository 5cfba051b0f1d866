//! User-visible notices
//!
//! Whatever the page would have shown as an alert ends up here.

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// Microphone could not be opened; the call did not start
    MicrophoneUnavailable(String),
    /// Start requested before the signaling channel was open
    SignalingNotOpen,
    /// Signaling channel could not be opened
    SignalingUnavailable(String),
    /// Signaling channel went away; it is not reconnected
    SignalingLost,
    NegotiationFailed(String),
    /// File upload was rejected or did not reach the server
    UploadFailed(String),
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notice::MicrophoneUnavailable(reason) => {
                write!(f, "Could not access the microphone. Check permissions. ({})", reason)
            }
            Notice::SignalingNotOpen => write!(f, "Call connection is not ready yet"),
            Notice::SignalingUnavailable(reason) => write!(f, "Could not open call connection: {}", reason),
            Notice::SignalingLost => write!(f, "Call connection lost"),
            Notice::NegotiationFailed(reason) => write!(f, "Call setup failed: {}", reason),
            Notice::UploadFailed(reason) => write!(f, "Could not upload the file: {}", reason),
        }
    }
}

pub trait Notifier: Send + Sync {
    fn notify(&self, notice: Notice);
}

/// Writes notices to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, notice: Notice) {
        tracing::warn!("{}", notice);
    }
}
