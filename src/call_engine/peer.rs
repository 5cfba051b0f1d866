//! Peer connection seam
//!
//! The call engine negotiates through [`PeerConnection`] and learns about
//! transport-side happenings through [`PeerEvent`]s. [`super::RtcPeerFactory`]
//! implements both on webrtc-rs.

use crate::media::{LocalTrack, TrackKind};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NegotiationError {
    #[error("WebRTC error: {0}")]
    WebRTC(String),

    #[error("Invalid SDP: {0}")]
    InvalidSdp(String),

    #[error("Invalid ICE candidate: {0}")]
    InvalidCandidate(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdpKind {
    Offer,
    Answer,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionDescription {
    pub kind: SdpKind,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: String) -> Self {
        Self {
            kind: SdpKind::Offer,
            sdp,
        }
    }

    pub fn answer(sdp: String) -> Self {
        Self {
            kind: SdpKind::Answer,
            sdp,
        }
    }
}

/// ICE candidate as carried by a `candidate` frame
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    pub candidate: String,
    pub sdp_mid: Option<String>,
    pub sdp_mline_index: Option<u16>,
}

/// Track received from the remote peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTrack {
    pub id: String,
    pub stream_id: String,
    pub kind: TrackKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerEvent {
    /// Locally gathered candidate to relay to the remote peer
    LocalCandidate(IceCandidate),
    RemoteTrack(RemoteTrack),
    StateChanged(PeerState),
}

/// Where a peer connection reports its events, tagged with the peer's
/// generation so events of a discarded peer can be told apart
#[derive(Debug, Clone)]
pub struct PeerEventSink {
    generation: u64,
    tx: mpsc::UnboundedSender<(u64, PeerEvent)>,
}

impl PeerEventSink {
    pub fn new(generation: u64, tx: mpsc::UnboundedSender<(u64, PeerEvent)>) -> Self {
        Self { generation, tx }
    }

    /// Generation of the peer this sink belongs to
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Queues `event` for the driver; dropped once the session is gone
    pub fn emit(&self, event: PeerEvent) {
        let _ = self.tx.send((self.generation, event));
    }
}

/// One negotiated connection to the remote peer
#[async_trait]
pub trait PeerConnection: Send + Sync {
    /// Sends `track` to the remote peer; takes effect with the next offer
    async fn add_local_track(&self, track: &LocalTrack) -> Result<(), NegotiationError>;

    /// Offer covering every track added so far
    async fn create_offer(&self) -> Result<SessionDescription, NegotiationError>;

    /// Answer to the remote offer; requires one to be set first
    async fn create_answer(&self) -> Result<SessionDescription, NegotiationError>;

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), NegotiationError>;

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), NegotiationError>;

    /// Adds a remote candidate; requires the remote description
    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), NegotiationError>;

    /// Tears down the connection; no events follow
    async fn close(&self) -> Result<(), NegotiationError>;
}

#[async_trait]
pub trait PeerFactory: Send + Sync {
    /// New peer connection reporting to `events`
    async fn create(&self, events: PeerEventSink) -> Result<Arc<dyn PeerConnection>, NegotiationError>;
}
