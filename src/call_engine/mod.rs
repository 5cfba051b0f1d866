//! Call Engine Module - voice calls signaled over `/ws/voice/<room>/`
//!
//! This module manages:
//! - the offer/answer/candidate exchange with the remote peer
//! - WebRTC peer connections (webrtc-rs)
//! - the local microphone stream for the duration of a call

mod engine;
mod messages;
mod observers;
mod peer;
mod rtc;

pub use engine::{CallDeps, CallError, CallEvent, CallSession, CallState, Role};
pub use messages::CallFrame;
pub use observers::{CallControls, OutputSurface, ParticipantView, Participants, RemoteOutputs};
pub use peer::{
    IceCandidate, NegotiationError, PeerConnection, PeerEvent, PeerEventSink, PeerFactory, PeerState, RemoteTrack,
    SdpKind, SessionDescription,
};
pub use rtc::RtcPeerFactory;
