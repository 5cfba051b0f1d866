//! Media Module - local capture
//!
//! [`MediaDevices`] hands out [`LocalStream`]s; the call engine only sees
//! these traits. [`MicrophoneDevices`] is the cpal-backed implementation.

mod microphone;

pub use microphone::{Microphone, MicrophoneDevices, CHANNELS, SAMPLE_RATE};

use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MediaError {
    #[error("Microphone access denied: {0}")]
    PermissionDenied(String),

    #[error("No audio input device found")]
    NoInputDevice,

    #[error("Unsupported media request: {0}")]
    Unsupported(String),

    #[error("Unsupported audio configuration: {0}")]
    UnsupportedConfig(String),

    #[error("Audio stream failed: {0}")]
    Stream(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaConstraints {
    pub audio: bool,
    pub video: bool,
}

impl MediaConstraints {
    pub fn audio_only() -> Self {
        Self {
            audio: true,
            video: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Audio,
    Video,
}

/// A captured track as the peer connection sees it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalTrack {
    pub id: String,
    pub stream_id: String,
    pub kind: TrackKind,
}

/// Captured media owned by the call for its duration
pub trait LocalStream: Send {
    fn id(&self) -> &str;
    fn tracks(&self) -> Vec<LocalTrack>;
    /// Stops every track; further calls do nothing
    fn stop(&mut self);
    fn is_active(&self) -> bool;
}

#[async_trait]
pub trait MediaDevices: Send + Sync {
    async fn get_user_media(
        &self,
        constraints: MediaConstraints,
    ) -> Result<Box<dyn LocalStream>, MediaError>;
}
