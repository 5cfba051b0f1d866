//! Call Session
//!
//! Drives one call room over the voice signaling channel:
//!
//! ```text
//! Idle ──start_audio──▶ NegotiatingCaller ──answer──▶ Connected
//!   │                                                    │
//!   └──────offer──────▶ NegotiatingCallee ──answered──▶──┤
//!                                                        ▼
//!                                  stop_audio ──▶ Closed ──▶ Idle
//! ```
//!
//! Inbound frames and peer events are processed one at a time by a driver
//! task. Every peer carries a generation; work belonging to a peer that was
//! discarded in the meantime is dropped.

use super::messages::CallFrame;
use super::observers::{CallControls, OutputSurface, ParticipantView};
use super::peer::*;
use crate::channel::{ChannelClient, ChannelError, ChannelEvent, Connector, ReconnectPolicy};
use crate::config::{ClientConfig, Topic};
use crate::media::{LocalStream, LocalTrack, MediaConstraints, MediaDevices, MediaError};
use crate::notice::{Notice, Notifier};
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CallError {
    #[error("Signaling channel is not open")]
    SignalingNotOpen,

    #[error("Already in a call")]
    AlreadyInCall,

    #[error("Call was hung up")]
    Superseded,

    #[error("Media error: {0}")]
    Media(#[from] MediaError),

    #[error("Negotiation error: {0}")]
    Negotiation(#[from] NegotiationError),

    #[error(transparent)]
    Channel(#[from] ChannelError),
}

// ============================================================================
// CALL STATE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    Idle,
    /// Offer sent, waiting for the answer
    NegotiatingCaller,
    /// Remote offer received, answering
    NegotiatingCallee,
    Connected,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Caller,
    Callee,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallEvent {
    StateChanged(CallState),
    PeerState(PeerState),
}

struct PeerSlot {
    generation: u64,
    peer: Arc<dyn PeerConnection>,
    role: Role,
    offer_outstanding: bool,
}

struct CallInner {
    state: CallState,
    peer: Option<PeerSlot>,
    local_stream: Option<Box<dyn LocalStream>>,
    controls: CallControls,
    /// Last generation handed out; bumped on hang-up as well
    next_generation: u64,
    driver: Option<JoinHandle<()>>,
    receivers: Option<Receivers>,
}

struct Receivers {
    frames: mpsc::UnboundedReceiver<CallFrame>,
    peer_events: mpsc::UnboundedReceiver<(u64, PeerEvent)>,
}

/// Collaborators of a [`CallSession`]
pub struct CallDeps {
    pub peers: Arc<dyn PeerFactory>,
    pub media: Arc<dyn MediaDevices>,
    pub output: Arc<dyn OutputSurface>,
    pub notifier: Arc<dyn Notifier>,
    pub participants: Arc<dyn ParticipantView>,
}

// ============================================================================
// CALL SESSION
// ============================================================================

pub struct CallSession {
    channel: ChannelClient,
    deps: CallDeps,
    inner: Mutex<CallInner>,
    peer_tx: mpsc::UnboundedSender<(u64, PeerEvent)>,
    event_tx: broadcast::Sender<CallEvent>,
}

impl CallSession {
    /// Creates an idle session; nothing connects until [`CallSession::open`]
    pub fn new(config: Arc<ClientConfig>, connector: Arc<dyn Connector>, deps: CallDeps) -> Arc<Self> {
        // A lost signaling channel ends up as a notice, not a retry loop
        let channel = ChannelClient::new(config, connector, ReconnectPolicy::Never);

        let (frame_tx, frames) = mpsc::unbounded_channel();
        for frame_type in CallFrame::TYPES {
            let tx = frame_tx.clone();
            channel.on(frame_type, move |frame: CallFrame| {
                let _ = tx.send(frame);
            });
        }

        let (peer_tx, peer_events) = mpsc::unbounded_channel();
        let (event_tx, _) = broadcast::channel(100);

        Arc::new(Self {
            channel,
            deps,
            inner: Mutex::new(CallInner {
                state: CallState::Idle,
                peer: None,
                local_stream: None,
                controls: CallControls::idle(),
                next_generation: 0,
                driver: None,
                receivers: Some(Receivers { frames, peer_events }),
            }),
            peer_tx,
            event_tx,
        })
    }

    /// State changes of the call and of its peer connection
    pub fn subscribe(&self) -> broadcast::Receiver<CallEvent> {
        self.event_tx.subscribe()
    }

    /// The voice signaling channel
    pub fn channel(&self) -> &ChannelClient {
        &self.channel
    }

    /// Current negotiation state
    pub fn state(&self) -> CallState {
        self.inner.lock().state
    }

    /// Which of the start/stop buttons are enabled
    pub fn controls(&self) -> CallControls {
        self.inner.lock().controls
    }

    /// Role of the current peer, `None` without a peer
    pub fn role(&self) -> Option<Role> {
        self.inner.lock().peer.as_ref().map(|slot| slot.role)
    }

    /// Connects the signaling channel for `room_id` and starts the driver.
    /// Calling it again retargets the channel; the driver keeps running.
    pub fn open(self: &Arc<Self>, room_id: impl Into<String>) {
        let channel_events = self.channel.subscribe();
        self.channel.connect(Topic::Voice(room_id.into()));

        let mut inner = self.inner.lock();
        if let Some(receivers) = inner.receivers.take() {
            let driver = tokio::spawn(Self::drive(Arc::downgrade(self), receivers, channel_events));
            inner.driver = Some(driver);
        }
    }

    async fn drive(
        session: Weak<Self>,
        mut receivers: Receivers,
        mut channel_events: broadcast::Receiver<ChannelEvent>,
    ) {
        loop {
            tokio::select! {
                Some(frame) = receivers.frames.recv() => {
                    let Some(session) = session.upgrade() else { break };
                    session.handle_frame(frame).await;
                }
                Some((generation, event)) = receivers.peer_events.recv() => {
                    let Some(session) = session.upgrade() else { break };
                    session.handle_peer_event(generation, event);
                }
                event = channel_events.recv() => {
                    let Some(session) = session.upgrade() else { break };
                    match event {
                        Ok(ChannelEvent::Disconnected { topic, reason }) => {
                            tracing::warn!("Signaling channel {} lost: {}", topic, reason);
                            session.deps.notifier.notify(Notice::SignalingLost);
                        }
                        Ok(ChannelEvent::Failed { topic, error }) => {
                            tracing::error!("Signaling channel {} could not be opened: {}", topic, error);
                            session.deps.notifier.notify(Notice::SignalingUnavailable(error));
                        }
                        Ok(_) => {}
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            tracing::warn!("Missed {} signaling channel events", n);
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
                else => break,
            }
        }
        tracing::debug!("Call driver stopped");
    }

    // ========================================================================
    // LOCAL ACTIONS
    // ========================================================================

    /// Captures the microphone and calls the room.
    ///
    /// Requires an open signaling channel; otherwise nothing is acquired.
    pub async fn start_audio(&self) -> Result<(), CallError> {
        if !self.channel.is_open() {
            tracing::warn!("Cannot start call: signaling channel not open");
            self.deps.notifier.notify(Notice::SignalingNotOpen);
            return Err(CallError::SignalingNotOpen);
        }
        if self.inner.lock().local_stream.is_some() {
            return Err(CallError::AlreadyInCall);
        }

        let stream = match self.deps.media.get_user_media(MediaConstraints::audio_only()).await {
            Ok(stream) => stream,
            Err(e) => {
                tracing::error!("Error accessing microphone: {}", e);
                self.deps.notifier.notify(Notice::MicrophoneUnavailable(e.to_string()));
                return Err(e.into());
            }
        };
        let tracks = stream.tracks();

        let rejected = {
            let mut inner = self.inner.lock();
            if inner.local_stream.is_some() {
                Some(stream)
            } else {
                inner.local_stream = Some(stream);
                inner.controls = CallControls::in_call();
                None
            }
        };
        if let Some(mut stream) = rejected {
            stream.stop();
            return Err(CallError::AlreadyInCall);
        }

        self.call(tracks).await
    }

    async fn call(&self, tracks: Vec<LocalTrack>) -> Result<(), CallError> {
        tracing::info!("Starting call with {} local track(s)", tracks.len());

        let (generation, peer) = self.ensure_peer(Role::Caller).await.inspect_err(|e| {
            self.negotiation_failed("creating peer connection", e);
        })?;

        for track in &tracks {
            if let Err(e) = peer.add_local_track(track).await {
                return Err(self.step_failed("adding local track", e));
            }
        }

        if !self.with_current(generation, |slot| {
            slot.role = Role::Caller;
            slot.offer_outstanding = false;
        }) {
            return self.superseded("start");
        }
        self.set_state(CallState::NegotiatingCaller);

        let offer = match peer.create_offer().await {
            Ok(offer) => offer,
            Err(e) => return Err(self.step_failed("creating offer", e)),
        };
        if !self.is_current(generation) {
            return self.superseded("offer");
        }

        if let Err(e) = peer.set_local_description(offer.clone()).await {
            return Err(self.step_failed("setting local offer", e));
        }
        if !self.with_current(generation, |slot| slot.offer_outstanding = true) {
            return self.superseded("offer");
        }

        self.channel
            .send(&CallFrame::Offer { sdp: offer.sdp })
            .inspect_err(|e| tracing::error!("Failed to send offer: {}", e))?;
        tracing::info!("Offer sent");
        Ok(())
    }

    /// Stops local tracks and discards the peer. Does nothing when there is
    /// no call.
    pub async fn stop_audio(&self) {
        let (stream, slot) = {
            let mut inner = self.inner.lock();
            if inner.local_stream.is_none() && inner.peer.is_none() && inner.state == CallState::Idle {
                return;
            }
            inner.next_generation += 1;
            inner.controls = CallControls::idle();
            (inner.local_stream.take(), inner.peer.take())
        };

        tracing::info!("Stopping call");

        if let Some(mut stream) = stream {
            stream.stop();
        }
        if let Some(slot) = slot {
            if let Err(e) = slot.peer.close().await {
                tracing::warn!("Failed to close peer connection: {}", e);
            }
        }

        self.set_state(CallState::Closed);
        self.set_state(CallState::Idle);
    }

    /// Hangs up and closes the signaling channel
    pub async fn close(&self) {
        self.stop_audio().await;
        self.channel.shutdown();
        if let Some(driver) = self.inner.lock().driver.take() {
            driver.abort();
        }
    }

    // ========================================================================
    // INBOUND FRAMES
    // ========================================================================

    /// Applies one signaling frame from the room.
    ///
    /// An offer creates a callee peer when there is none; answers and
    /// candidates without a matching peer are dropped.
    pub async fn handle_frame(&self, frame: CallFrame) {
        match frame {
            CallFrame::Offer { sdp } => {
                if let Err(e) = self.answer_offer(sdp).await {
                    tracing::error!("Failed to answer offer: {}", e);
                }
            }
            CallFrame::Answer { sdp } => self.accept_answer(sdp).await,
            CallFrame::Candidate {
                candidate,
                sdp_mid,
                sdp_mline_index,
            } => self.apply_candidate(candidate, sdp_mid, sdp_mline_index).await,
            CallFrame::UserJoined { user_id, username } => {
                tracing::info!("{} ({}) joined the room", username, user_id);
                self.deps.participants.joined(user_id, &username);
            }
            CallFrame::UserLeft { user_id } => {
                tracing::info!("User {} left the room", user_id);
                self.deps.participants.left(user_id);
            }
        }
    }

    async fn answer_offer(&self, sdp: String) -> Result<(), CallError> {
        tracing::info!("Received offer");

        let (generation, peer) = self.ensure_peer(Role::Callee).await.inspect_err(|e| {
            self.negotiation_failed("creating peer connection", e);
        })?;

        if !self.with_current(generation, |slot| {
            slot.role = Role::Callee;
            slot.offer_outstanding = false;
        }) {
            return self.superseded("offer");
        }
        self.set_state(CallState::NegotiatingCallee);

        if let Err(e) = peer.set_remote_description(SessionDescription::offer(sdp)).await {
            return Err(self.step_failed("setting remote offer", e));
        }
        if !self.is_current(generation) {
            return self.superseded("answer");
        }

        let answer = match peer.create_answer().await {
            Ok(answer) => answer,
            Err(e) => return Err(self.step_failed("creating answer", e)),
        };
        if !self.is_current(generation) {
            return self.superseded("answer");
        }

        if let Err(e) = peer.set_local_description(answer.clone()).await {
            return Err(self.step_failed("setting local answer", e));
        }
        if !self.is_current(generation) {
            return self.superseded("answer");
        }

        self.channel.send(&CallFrame::Answer { sdp: answer.sdp })?;
        tracing::info!("Answer sent");
        self.set_state(CallState::Connected);
        Ok(())
    }

    async fn accept_answer(&self, sdp: String) {
        let target = {
            let inner = self.inner.lock();
            match inner.peer.as_ref() {
                Some(slot) if slot.role == Role::Caller && slot.offer_outstanding => {
                    Some((slot.generation, Arc::clone(&slot.peer)))
                }
                _ => None,
            }
        };
        let Some((generation, peer)) = target else {
            tracing::warn!("Ignoring answer: no outstanding offer");
            return;
        };

        if let Err(e) = peer.set_remote_description(SessionDescription::answer(sdp)).await {
            self.step_failed("setting remote answer", e);
            return;
        }
        if !self.with_current(generation, |slot| slot.offer_outstanding = false) {
            tracing::debug!("Call was hung up while applying the answer");
            return;
        }

        tracing::info!("Answer applied");
        self.set_state(CallState::Connected);
    }

    async fn apply_candidate(&self, candidate: Option<String>, sdp_mid: Option<String>, sdp_mline_index: Option<u16>) {
        let Some(peer) = self.inner.lock().peer.as_ref().map(|slot| Arc::clone(&slot.peer)) else {
            tracing::warn!("Dropping ICE candidate: no peer connection");
            return;
        };

        let candidate = match candidate {
            Some(c) if !c.is_empty() => c,
            _ => {
                tracing::debug!("Remote end of candidates");
                return;
            }
        };

        let result = peer
            .add_ice_candidate(IceCandidate {
                candidate,
                sdp_mid,
                sdp_mline_index,
            })
            .await;
        if let Err(e) = result {
            tracing::warn!("Failed to add ICE candidate: {}", e);
        }
    }

    // ========================================================================
    // PEER EVENTS
    // ========================================================================

    fn handle_peer_event(&self, generation: u64, event: PeerEvent) {
        if !self.is_current(generation) {
            tracing::debug!("Ignoring event of discarded peer {}: {:?}", generation, event);
            return;
        }

        match event {
            PeerEvent::LocalCandidate(candidate) => {
                if !self.channel.is_open() {
                    tracing::debug!("Signaling channel closed, dropping local candidate");
                    return;
                }
                let frame = CallFrame::Candidate {
                    candidate: Some(candidate.candidate),
                    sdp_mid: candidate.sdp_mid,
                    sdp_mline_index: candidate.sdp_mline_index,
                };
                if let Err(e) = self.channel.send(&frame) {
                    tracing::warn!("Failed to relay local candidate: {}", e);
                }
            }
            PeerEvent::RemoteTrack(track) => self.deps.output.attach(track),
            PeerEvent::StateChanged(state) => {
                if state == PeerState::Failed {
                    tracing::error!("Peer connection failed");
                }
                let _ = self.event_tx.send(CallEvent::PeerState(state));
            }
        }
    }

    // ========================================================================
    // HELPERS
    // ========================================================================

    /// Returns the current peer, creating one for `role` if there is none
    async fn ensure_peer(&self, role: Role) -> Result<(u64, Arc<dyn PeerConnection>), CallError> {
        let generation = {
            let mut inner = self.inner.lock();
            if let Some(slot) = inner.peer.as_ref() {
                return Ok((slot.generation, Arc::clone(&slot.peer)));
            }
            inner.next_generation += 1;
            inner.next_generation
        };

        let peer = self
            .deps
            .peers
            .create(PeerEventSink::new(generation, self.peer_tx.clone()))
            .await?;

        let existing = {
            let mut inner = self.inner.lock();
            if inner.next_generation == generation && inner.peer.is_none() {
                inner.peer = Some(PeerSlot {
                    generation,
                    peer: Arc::clone(&peer),
                    role,
                    offer_outstanding: false,
                });
                tracing::debug!("Created peer connection {} as {:?}", generation, role);
                return Ok((generation, peer));
            }
            inner.peer.as_ref().map(|slot| (slot.generation, Arc::clone(&slot.peer)))
        };

        // Hung up or raced while creating; this peer is not needed
        if let Err(e) = peer.close().await {
            tracing::warn!("Failed to close unused peer connection: {}", e);
        }
        existing.ok_or(CallError::Superseded)
    }

    fn is_current(&self, generation: u64) -> bool {
        self.inner
            .lock()
            .peer
            .as_ref()
            .is_some_and(|slot| slot.generation == generation)
    }

    /// Runs `f` on the peer slot if it still belongs to `generation`
    fn with_current(&self, generation: u64, f: impl FnOnce(&mut PeerSlot)) -> bool {
        let mut inner = self.inner.lock();
        match inner.peer.as_mut() {
            Some(slot) if slot.generation == generation => {
                f(slot);
                true
            }
            _ => false,
        }
    }

    fn superseded(&self, step: &str) -> Result<(), CallError> {
        tracing::debug!("Call was hung up during {}, dropping result", step);
        Ok(())
    }

    fn step_failed(&self, step: &str, error: NegotiationError) -> CallError {
        let error = CallError::from(error);
        self.negotiation_failed(step, &error);
        error
    }

    fn negotiation_failed(&self, step: &str, error: &CallError) {
        tracing::error!("Failed {}: {}", step, error);
        if *error != CallError::Superseded {
            self.deps
                .notifier
                .notify(Notice::NegotiationFailed(format!("{}: {}", step, error)));
        }
    }

    fn set_state(&self, state: CallState) {
        let changed = {
            let mut inner = self.inner.lock();
            let changed = inner.state != state;
            inner.state = state;
            changed
        };
        if changed {
            tracing::debug!("Call state: {:?}", state);
            let _ = self.event_tx.send(CallEvent::StateChanged(state));
        }
    }
}

impl Drop for CallSession {
    fn drop(&mut self) {
        let inner = self.inner.get_mut();
        if let Some(driver) = inner.driver.take() {
            driver.abort();
        }
        if let Some(mut stream) = inner.local_stream.take() {
            stream.stop();
        }
    }
}

impl std::fmt::Debug for CallSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("CallSession")
            .field("channel", &self.channel)
            .field("state", &inner.state)
            .field("controls", &inner.controls)
            .field("peer", &inner.peer.as_ref().map(|slot| (slot.generation, slot.role)))
            .finish()
    }
}

// ============================================================================
// TESTS
// ============================================================================
