//! webrtc-rs backed peer connections

use super::peer::*;
use crate::media::{LocalTrack, TrackKind, CHANNELS, SAMPLE_RATE};
use async_trait::async_trait;
use std::sync::Arc;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::track::track_local::track_local_static_rtp::TrackLocalStaticRTP;
use webrtc::track::track_local::TrackLocal;

// ============================================================================
// FACTORY
// ============================================================================

/// Creates peer connections with the default codecs and interceptors
#[derive(Debug, Clone)]
pub struct RtcPeerFactory {
    ice_servers: Vec<RTCIceServer>,
}

impl RtcPeerFactory {
    /// All `ice_server_urls` go into one ICE server entry; an empty list
    /// means host candidates only
    pub fn new(ice_server_urls: &[String]) -> Self {
        let ice_servers = if ice_server_urls.is_empty() {
            Vec::new()
        } else {
            vec![RTCIceServer {
                urls: ice_server_urls.to_vec(),
                ..Default::default()
            }]
        };
        Self { ice_servers }
    }

    /// Forwards state, local candidates and remote tracks to `events`
    fn register_handlers(pc: &RTCPeerConnection, events: PeerEventSink) {
        let sink = events.clone();
        pc.on_peer_connection_state_change(Box::new(move |s: RTCPeerConnectionState| {
            tracing::info!("Peer connection state: {:?}", s);
            let state = match s {
                RTCPeerConnectionState::New | RTCPeerConnectionState::Unspecified => PeerState::New,
                RTCPeerConnectionState::Connecting => PeerState::Connecting,
                RTCPeerConnectionState::Connected => PeerState::Connected,
                RTCPeerConnectionState::Disconnected => PeerState::Disconnected,
                RTCPeerConnectionState::Failed => PeerState::Failed,
                RTCPeerConnectionState::Closed => PeerState::Closed,
            };
            sink.emit(PeerEvent::StateChanged(state));
            Box::pin(async {})
        }));

        // Gathering finished is signalled with `None`; nothing to relay then
        let sink = events.clone();
        pc.on_ice_candidate(Box::new(move |candidate| {
            if let Some(c) = candidate {
                match c.to_json() {
                    Ok(init) => sink.emit(PeerEvent::LocalCandidate(IceCandidate {
                        candidate: init.candidate,
                        sdp_mid: init.sdp_mid,
                        sdp_mline_index: init.sdp_mline_index,
                    })),
                    Err(e) => tracing::warn!("Failed to serialize local ICE candidate: {}", e),
                }
            }
            Box::pin(async {})
        }));

        let sink = events;
        pc.on_track(Box::new(move |track, _, _| {
            let remote = RemoteTrack {
                id: track.id(),
                stream_id: track.stream_id(),
                kind: match track.kind() {
                    RTPCodecType::Video => TrackKind::Video,
                    _ => TrackKind::Audio,
                },
            };
            tracing::info!("Received remote track {} ({:?})", remote.id, track.codec());
            sink.emit(PeerEvent::RemoteTrack(remote.clone()));

            Box::pin(async move {
                // Keep the receiver drained until the track ends
                tokio::spawn(async move {
                    let mut packets: u64 = 0;
                    while track.read_rtp().await.is_ok() {
                        packets += 1;
                    }
                    tracing::debug!("Remote track {} ended after {} packets", remote.id, packets);
                });
            })
        }));
    }
}

#[async_trait]
impl PeerFactory for RtcPeerFactory {
    async fn create(&self, events: PeerEventSink) -> Result<Arc<dyn PeerConnection>, NegotiationError> {
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs().map_err(webrtc_err)?;

        // RTCP reports, NACK, TWCC
        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine).map_err(webrtc_err)?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let config = RTCConfiguration {
            ice_servers: self.ice_servers.clone(),
            ..Default::default()
        };

        let pc = api.new_peer_connection(config).await.map_err(webrtc_err)?;
        Self::register_handlers(&pc, events);

        Ok(Arc::new(RtcPeer { pc: Arc::new(pc) }))
    }
}

fn webrtc_err(e: webrtc::Error) -> NegotiationError {
    NegotiationError::WebRTC(e.to_string())
}

// ============================================================================
// PEER
// ============================================================================

/// One `RTCPeerConnection`; dropped by the engine after `close`
struct RtcPeer {
    pc: Arc<RTCPeerConnection>,
}

impl RtcPeer {
    fn to_rtc(desc: SessionDescription) -> Result<RTCSessionDescription, NegotiationError> {
        let result = match desc.kind {
            SdpKind::Offer => RTCSessionDescription::offer(desc.sdp),
            SdpKind::Answer => RTCSessionDescription::answer(desc.sdp),
        };
        result.map_err(|e| NegotiationError::InvalidSdp(e.to_string()))
    }
}

#[async_trait]
impl PeerConnection for RtcPeer {
    async fn add_local_track(&self, track: &LocalTrack) -> Result<(), NegotiationError> {
        let (mime_type, clock_rate, channels) = match track.kind {
            TrackKind::Audio => ("audio/opus", SAMPLE_RATE, CHANNELS),
            TrackKind::Video => ("video/VP8", 90000, 0),
        };

        // TODO: feed captured PCM into this track once an Opus encoder is wired in
        let local = Arc::new(TrackLocalStaticRTP::new(
            RTCRtpCodecCapability {
                mime_type: mime_type.to_string(),
                clock_rate,
                channels,
                ..Default::default()
            },
            track.id.clone(),
            track.stream_id.clone(),
        ));

        self.pc
            .add_track(local as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .map_err(webrtc_err)?;
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription, NegotiationError> {
        let offer = self.pc.create_offer(None).await.map_err(webrtc_err)?;
        Ok(SessionDescription::offer(offer.sdp))
    }

    async fn create_answer(&self) -> Result<SessionDescription, NegotiationError> {
        let answer = self.pc.create_answer(None).await.map_err(webrtc_err)?;
        Ok(SessionDescription::answer(answer.sdp))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), NegotiationError> {
        let desc = Self::to_rtc(desc)?;
        self.pc.set_local_description(desc).await.map_err(webrtc_err)
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), NegotiationError> {
        let desc = Self::to_rtc(desc)?;
        self.pc.set_remote_description(desc).await.map_err(webrtc_err)
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), NegotiationError> {
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_mline_index,
            username_fragment: None,
        };
        self.pc
            .add_ice_candidate(init)
            .await
            .map_err(|e| NegotiationError::InvalidCandidate(e.to_string()))
    }

    async fn close(&self) -> Result<(), NegotiationError> {
        self.pc.close().await.map_err(webrtc_err)
    }
}
