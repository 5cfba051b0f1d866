//! What the call engine tells the page besides notices: remote tracks,
//! roster, button affordances

use super::peer::RemoteTrack;
use crate::chat::UserId;
use parking_lot::Mutex;

// ============================================================================
// REMOTE OUTPUT
// ============================================================================

/// Receives every remote track; each one gets its own output
pub trait OutputSurface: Send + Sync {
    fn attach(&self, track: RemoteTrack);
}

/// Keeps one output entry per attached remote track
#[derive(Debug, Default)]
pub struct RemoteOutputs {
    attached: Mutex<Vec<RemoteTrack>>,
}

impl RemoteOutputs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attached(&self) -> Vec<RemoteTrack> {
        self.attached.lock().clone()
    }
}

impl OutputSurface for RemoteOutputs {
    fn attach(&self, track: RemoteTrack) {
        tracing::info!("Attaching remote track {} (stream {})", track.id, track.stream_id);
        self.attached.lock().push(track);
    }
}

// ============================================================================
// PARTICIPANTS
// ============================================================================

pub trait ParticipantView: Send + Sync {
    fn joined(&self, user_id: UserId, username: &str);
    fn left(&self, user_id: UserId);
}

/// Room roster in join order
#[derive(Debug, Default)]
pub struct Participants {
    members: Mutex<Vec<(UserId, String)>>,
}

impl Participants {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn members(&self) -> Vec<(UserId, String)> {
        self.members.lock().clone()
    }
}

impl ParticipantView for Participants {
    fn joined(&self, user_id: UserId, username: &str) {
        let mut members = self.members.lock();
        match members.iter_mut().find(|(id, _)| *id == user_id) {
            Some(entry) => entry.1 = username.to_string(),
            None => members.push((user_id, username.to_string())),
        }
    }

    fn left(&self, user_id: UserId) {
        self.members.lock().retain(|(id, _)| *id != user_id);
    }
}

// ============================================================================
// CONTROLS
// ============================================================================

/// Enabled state of the start/stop buttons
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallControls {
    pub start_enabled: bool,
    pub stop_enabled: bool,
}

impl CallControls {
    pub fn idle() -> Self {
        Self {
            start_enabled: true,
            stop_enabled: false,
        }
    }

    pub fn in_call() -> Self {
        Self {
            start_enabled: false,
            stop_enabled: true,
        }
    }
}

impl Default for CallControls {
    fn default() -> Self {
        Self::idle()
    }
}
