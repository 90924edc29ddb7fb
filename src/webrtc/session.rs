//! Peer session state machine and orchestration
//!
//! `PeerSession` owns one peer-connection primitive and drives the
//! negotiation lifecycle: Uninitialized -> Initialized -> Negotiating
//! -> Connected -> Closed. The transport-reported sub-state is observed
//! but never owned. `SessionManager` owns one session per remote peer,
//! routes signaling messages, and supervises reconnection.

use super::data_channel::DataChannelAdapter;
use super::events::{ConnectionState, IceCandidatePayload, SessionEvent, TrackKind};
use super::peer_connection::PeerConnectionFactory;
use super::reconnect::{ReconnectFn, ReconnectSupervisor};
use super::signaling::SignalingMessage;
use super::PeerError;
use crate::config::Config;
use crate::notifier::{LogNotifier, SessionStatus, StatusNotifier};
use log::{debug, error, info, warn};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use webrtc::data_channel::data_channel_state::RTCDataChannelState;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::track::track_local::TrackLocal;

/// Negotiation role, fixed at construction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerRole {
    /// Initiates the first session description and creates the data channel
    Offerer,
    /// Applies the remote offer and adopts the inbound data channel
    Answerer,
}

/// Role tag of a produced session description
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptionKind {
    Offer,
    Answer,
}

/// Outcome of a local negotiation step, handed to the signaling channel
#[derive(Debug, Clone)]
pub struct SessionDescription {
    pub kind: DescriptionKind,
    pub sdp: String,
}

/// One negotiated session with a single remote peer
pub struct PeerSession {
    peer_id: String,
    role: PeerRole,
    config: Arc<crate::config::PeerConfig>,
    pc: RwLock<Option<Arc<RTCPeerConnection>>>,
    state: Arc<RwLock<ConnectionState>>,
    transport_state: Arc<RwLock<RTCPeerConnectionState>>,
    ice_state: Arc<RwLock<RTCIceConnectionState>>,
    channel: Arc<DataChannelAdapter>,
    senders: RwLock<HashMap<String, Arc<RTCRtpSender>>>,
    pending_candidates: Mutex<Vec<RTCIceCandidateInit>>,
    remote_description_set: AtomicBool,
    events: broadcast::Sender<SessionEvent>,
    connectivity: Arc<watch::Sender<bool>>,
}

impl PeerSession {
    pub fn new(peer_id: String, role: PeerRole, config: Arc<crate::config::PeerConfig>) -> Self {
        let (events, _) = broadcast::channel(64);
        let (connectivity, _) = watch::channel(false);
        let channel = Arc::new(DataChannelAdapter::new(peer_id.clone(), events.clone()));
        Self {
            peer_id,
            role,
            config,
            pc: RwLock::new(None),
            state: Arc::new(RwLock::new(ConnectionState::Uninitialized)),
            transport_state: Arc::new(RwLock::new(RTCPeerConnectionState::New)),
            ice_state: Arc::new(RwLock::new(RTCIceConnectionState::New)),
            channel,
            senders: RwLock::new(HashMap::new()),
            pending_candidates: Mutex::new(Vec::new()),
            remote_description_set: AtomicBool::new(false),
            events,
            connectivity: Arc::new(connectivity),
        }
    }

    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    pub fn role(&self) -> PeerRole {
        self.role
    }

    /// Subscribe to this session's lifecycle events
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Boolean connectivity signal, true while the transport is connected
    pub fn connectivity(&self) -> watch::Receiver<bool> {
        self.connectivity.subscribe()
    }

    pub(crate) fn event_sender(&self) -> broadcast::Sender<SessionEvent> {
        self.events.clone()
    }

    pub async fn state(&self) -> ConnectionState {
        *self.state.read().await
    }

    pub async fn transport_state(&self) -> RTCPeerConnectionState {
        *self.transport_state.read().await
    }

    /// Observed ICE sub-state; informational only
    pub async fn ice_state(&self) -> RTCIceConnectionState {
        *self.ice_state.read().await
    }

    /// Construct the peer-connection primitive and arm its callbacks.
    /// A second call without an intervening `close()` is refused; a
    /// fresh primitive is never created over a live one.
    pub async fn initialize(&self) -> Result<(), PeerError> {
        let mut guard = self.pc.write().await;
        if guard.is_some() {
            warn!("Peer {} already initialized, ignoring", self.peer_id);
            return Err(PeerError::Configuration(format!(
                "peer {} is already initialized",
                self.peer_id
            )));
        }

        let pc = PeerConnectionFactory::build(&self.config).await?;
        self.install_callbacks(&pc).await;

        if self.role == PeerRole::Offerer {
            let dc = pc
                .create_data_channel(&self.config.data_channel_label, None)
                .await
                .map_err(|e| {
                    PeerError::DataChannel(format!("Failed to create data channel: {}", e))
                })?;
            self.channel.adopt(dc).await;
        }

        *guard = Some(pc);
        drop(guard);

        self.set_state(ConnectionState::Initialized).await;
        info!("Peer {} initialized as {:?}", self.peer_id, self.role);
        Ok(())
    }

    async fn install_callbacks(&self, pc: &Arc<RTCPeerConnection>) {
        let events = self.events.clone();
        pc.on_ice_candidate(Box::new(move |candidate| {
            let events = events.clone();
            Box::pin(async move {
                if let Some(candidate) = candidate {
                    match candidate.to_json() {
                        Ok(init) => {
                            let _ = events
                                .send(SessionEvent::LocalCandidate(IceCandidatePayload::from_init(init)));
                        }
                        Err(e) => warn!("Failed to serialize local candidate: {}", e),
                    }
                }
            })
        }));

        let events = self.events.clone();
        let peer_id = self.peer_id.clone();
        let state = self.state.clone();
        let transport_state = self.transport_state.clone();
        let connectivity = self.connectivity.clone();
        pc.on_peer_connection_state_change(Box::new(move |new_state| {
            let events = events.clone();
            let peer_id = peer_id.clone();
            let state = state.clone();
            let transport_state = transport_state.clone();
            let connectivity = connectivity.clone();
            Box::pin(async move {
                info!("Peer {} transport state: {:?}", peer_id, new_state);
                *transport_state.write().await = new_state;
                let _ = events.send(SessionEvent::TransportChanged(new_state));
                connectivity.send_replace(new_state == RTCPeerConnectionState::Connected);

                if new_state == RTCPeerConnectionState::Connected {
                    let mut current = state.write().await;
                    if *current != ConnectionState::Closed && *current != ConnectionState::Connected {
                        debug!(
                            "Peer {} state {:?} -> {:?}",
                            peer_id,
                            *current,
                            ConnectionState::Connected
                        );
                        *current = ConnectionState::Connected;
                        let _ = events.send(SessionEvent::StateChanged(ConnectionState::Connected));
                    }
                }
            })
        }));

        let peer_id = self.peer_id.clone();
        let ice_state = self.ice_state.clone();
        pc.on_ice_connection_state_change(Box::new(move |new_state| {
            let peer_id = peer_id.clone();
            let ice_state = ice_state.clone();
            Box::pin(async move {
                debug!("Peer {} ICE state: {:?}", peer_id, new_state);
                *ice_state.write().await = new_state;
            })
        }));

        let events = self.events.clone();
        pc.on_negotiation_needed(Box::new(move || {
            let events = events.clone();
            Box::pin(async move {
                let _ = events.send(SessionEvent::NegotiationNeeded);
            })
        }));

        let events = self.events.clone();
        let peer_id = self.peer_id.clone();
        pc.on_track(Box::new(move |track, _receiver, _transceiver| {
            let events = events.clone();
            let peer_id = peer_id.clone();
            Box::pin(async move {
                match TrackKind::from_codec_type(track.kind()) {
                    Some(kind) => {
                        info!("Peer {} received remote {} track", peer_id, kind.as_str());
                        let _ = events.send(SessionEvent::RemoteTrack(kind));
                    }
                    None => warn!("Peer {} received track of unspecified kind", peer_id),
                }
            })
        }));

        if self.role == PeerRole::Answerer {
            let channel = self.channel.clone();
            let events = self.events.clone();
            pc.on_data_channel(Box::new(move |dc| {
                let channel = channel.clone();
                let events = events.clone();
                Box::pin(async move {
                    let already_open = dc.ready_state() == RTCDataChannelState::Open;
                    channel.adopt(dc).await;
                    // the open handler is armed too late if the channel
                    // raced ahead of adoption
                    if already_open {
                        let _ = events.send(SessionEvent::ChannelOpened);
                    }
                })
            }));
        }
    }

    /// Produce a local offer and commit it as the local description.
    /// Two sequential asynchronous steps; a failure at either surfaces
    /// as a negotiation error and never advances the state to Connected.
    pub async fn create_offer(&self) -> Result<SessionDescription, PeerError> {
        let pc = self.primitive().await?;
        self.set_state(ConnectionState::Negotiating).await;

        let offer = pc
            .create_offer(None)
            .await
            .map_err(|e| PeerError::Negotiation(format!("Failed to create offer: {}", e)))?;
        let sdp = offer.sdp.clone();

        pc.set_local_description(offer)
            .await
            .map_err(|e| PeerError::Negotiation(format!("Failed to set local description: {}", e)))?;

        Ok(SessionDescription {
            kind: DescriptionKind::Offer,
            sdp,
        })
    }

    /// Produce a local answer after a remote offer has been applied
    pub async fn create_answer(&self) -> Result<SessionDescription, PeerError> {
        let pc = self.primitive().await?;
        self.set_state(ConnectionState::Negotiating).await;

        let answer = pc
            .create_answer(None)
            .await
            .map_err(|e| PeerError::Negotiation(format!("Failed to create answer: {}", e)))?;
        let sdp = answer.sdp.clone();

        pc.set_local_description(answer)
            .await
            .map_err(|e| PeerError::Negotiation(format!("Failed to set local description: {}", e)))?;

        Ok(SessionDescription {
            kind: DescriptionKind::Answer,
            sdp,
        })
    }

    /// Apply an inbound offer as the remote description
    pub async fn handle_remote_offer(&self, sdp: &str) -> Result<(), PeerError> {
        let offer = RTCSessionDescription::offer(sdp.to_string())
            .map_err(|e| PeerError::Negotiation(format!("Invalid offer: {}", e)))?;
        self.apply_remote_description(offer).await
    }

    /// Apply an inbound answer as the remote description
    pub async fn handle_remote_answer(&self, sdp: &str) -> Result<(), PeerError> {
        let answer = RTCSessionDescription::answer(sdp.to_string())
            .map_err(|e| PeerError::Negotiation(format!("Invalid answer: {}", e)))?;
        self.apply_remote_description(answer).await
    }

    async fn apply_remote_description(
        &self,
        description: RTCSessionDescription,
    ) -> Result<(), PeerError> {
        let pc = self.pc.read().await.clone().ok_or_else(|| {
            PeerError::Negotiation(format!("peer {} is not initialized", self.peer_id))
        })?;

        self.set_state(ConnectionState::Negotiating).await;
        pc.set_remote_description(description)
            .await
            .map_err(|e| PeerError::Negotiation(format!("Failed to set remote description: {}", e)))?;
        self.remote_description_set.store(true, Ordering::SeqCst);

        // replay candidates that arrived ahead of the description
        let pending: Vec<RTCIceCandidateInit> =
            self.pending_candidates.lock().await.drain(..).collect();
        for init in pending {
            if let Err(e) = pc.add_ice_candidate(init).await {
                warn!("Peer {} buffered candidate rejected: {}", self.peer_id, e);
            }
        }
        Ok(())
    }

    /// Forward a remote candidate to the primitive. Never an error to
    /// the caller: before `initialize()` it is a logged no-op, and
    /// before the remote description is set the candidate is buffered.
    pub async fn add_ice_candidate(&self, candidate: IceCandidatePayload) -> Result<(), PeerError> {
        let guard = self.pc.read().await;
        let Some(pc) = guard.as_ref() else {
            error!(
                "Peer {} dropped candidate: peer connection not initialized",
                self.peer_id
            );
            return Ok(());
        };

        let init = candidate.into_init();
        if !self.remote_description_set.load(Ordering::SeqCst) {
            debug!("Peer {} buffering candidate until remote description", self.peer_id);
            self.pending_candidates.lock().await.push(init);
            return Ok(());
        }

        if let Err(e) = pc.add_ice_candidate(init).await {
            warn!("Peer {} failed to add candidate: {}", self.peer_id, e);
        }
        Ok(())
    }

    /// Attach a local track and record its sender
    pub async fn add_track(
        &self,
        track: Arc<dyn TrackLocal + Send + Sync>,
    ) -> Result<(), PeerError> {
        let pc = self.primitive().await?;
        let track_id = track.id().to_string();

        let mut senders = self.senders.write().await;
        if senders.contains_key(&track_id) {
            return Err(PeerError::InvalidState(format!(
                "track {} is already registered",
                track_id
            )));
        }

        let sender = pc
            .add_track(track)
            .await
            .map_err(|e| PeerError::Transport(format!("Failed to add track: {}", e)))?;
        debug!("Peer {} registered track {}", self.peer_id, track_id);
        senders.insert(track_id, sender);
        Ok(())
    }

    /// Detach a track and forget its sender; unknown ids are a no-op
    pub async fn remove_track(&self, track_id: &str) {
        let sender = self.senders.write().await.remove(track_id);
        match sender {
            Some(sender) => {
                if let Some(pc) = self.pc.read().await.as_ref() {
                    if let Err(e) = pc.remove_track(&sender).await {
                        warn!("Peer {} failed to detach track {}: {}", self.peer_id, track_id, e);
                    }
                }
                debug!("Peer {} removed track {}", self.peer_id, track_id);
            }
            None => debug!("Peer {} remove_track: unknown track {}", self.peer_id, track_id),
        }
    }

    /// Ids of the tracks currently attached to the live connection
    pub async fn registered_tracks(&self) -> Vec<String> {
        self.senders.read().await.keys().cloned().collect()
    }

    /// Best-effort send on the data channel
    pub async fn send_message(&self, message: &str) {
        self.channel.send(message).await;
    }

    /// Whether the data channel is attached and open
    pub async fn channel_open(&self) -> bool {
        self.channel.is_open().await
    }

    /// Tear the session down: data channel first, then every sender,
    /// then the primitive. Idempotent and safe from any state; a closed
    /// session may be initialized again.
    pub async fn close(&self) {
        self.channel.close().await;

        let pc = self.pc.write().await.take();
        let mut senders = self.senders.write().await;
        if let Some(pc) = pc {
            for (track_id, sender) in senders.drain() {
                if let Err(e) = pc.remove_track(&sender).await {
                    debug!("Peer {} sender release for {}: {}", self.peer_id, track_id, e);
                }
            }
            if let Err(e) = pc.close().await {
                warn!("Peer {} close failed: {}", self.peer_id, e);
            }
        } else {
            senders.clear();
        }
        drop(senders);

        self.pending_candidates.lock().await.clear();
        self.remote_description_set.store(false, Ordering::SeqCst);
        self.connectivity.send_replace(false);
        self.set_state(ConnectionState::Closed).await;
    }

    async fn primitive(&self) -> Result<Arc<RTCPeerConnection>, PeerError> {
        self.pc.read().await.clone().ok_or_else(|| {
            PeerError::InvalidState(format!("peer {} is not initialized", self.peer_id))
        })
    }

    async fn set_state(&self, next: ConnectionState) {
        let mut current = self.state.write().await;
        if *current != next {
            debug!("Peer {} state {:?} -> {:?}", self.peer_id, *current, next);
            *current = next;
            let _ = self.events.send(SessionEvent::StateChanged(next));
        }
    }
}

struct SessionEntry {
    session: Arc<PeerSession>,
    supervisor: Arc<ReconnectSupervisor>,
    pump: JoinHandle<()>,
}

/// Owns one PeerSession per remote peer, routes signaling, and wires
/// each session to its reconnection supervisor
pub struct SessionManager {
    config: Arc<Config>,
    sessions: Arc<RwLock<HashMap<String, SessionEntry>>>,
    outgoing: mpsc::UnboundedSender<SignalingMessage>,
    notifier: Arc<dyn StatusNotifier>,
}

impl SessionManager {
    /// Create a manager; the returned receiver yields signaling
    /// messages the embedding application must relay to the remote side
    pub fn new(
        config: Arc<Config>,
        notifier: Arc<dyn StatusNotifier>,
    ) -> (Self, mpsc::UnboundedReceiver<SignalingMessage>) {
        let (outgoing, outgoing_rx) = mpsc::unbounded_channel();
        (
            Self {
                config,
                sessions: Arc::new(RwLock::new(HashMap::new())),
                outgoing,
                notifier,
            },
            outgoing_rx,
        )
    }

    /// Manager with a log-only presenter
    pub fn with_log_notifier(config: Arc<Config>) -> (Self, mpsc::UnboundedReceiver<SignalingMessage>) {
        Self::new(config, Arc::new(LogNotifier))
    }

    /// Create and initialize a session for a remote peer
    pub async fn create_session(
        &self,
        peer_id: &str,
        role: PeerRole,
    ) -> Result<Arc<PeerSession>, PeerError> {
        {
            let sessions = self.sessions.read().await;
            if sessions.contains_key(peer_id) {
                return Err(PeerError::InvalidState(format!(
                    "session for peer {} already exists",
                    peer_id
                )));
            }
        }

        let session = Arc::new(PeerSession::new(
            peer_id.to_string(),
            role,
            Arc::new(self.config.peer.clone()),
        ));
        session.initialize().await?;

        let reconnect = self.reconnect_entry(session.clone());
        let supervisor = Arc::new(ReconnectSupervisor::new(
            &self.config.reconnect,
            session.event_sender(),
            session.connectivity(),
            reconnect,
        ));

        let pump = self.spawn_event_pump(session.clone(), supervisor.clone());

        let mut sessions = self.sessions.write().await;
        sessions.insert(
            peer_id.to_string(),
            SessionEntry {
                session: session.clone(),
                supervisor,
                pump,
            },
        );
        info!("Created session for peer {} as {:?}", peer_id, role);
        Ok(session)
    }

    /// The supervisor's reconnect entry point: rebuild the primitive
    /// and, on the offering side, push a fresh offer to signaling
    fn reconnect_entry(&self, session: Arc<PeerSession>) -> ReconnectFn {
        let outgoing = self.outgoing.clone();
        Arc::new(move || {
            let session = session.clone();
            let outgoing = outgoing.clone();
            Box::pin(async move {
                session.close().await;
                if let Err(e) = session.initialize().await {
                    warn!("Peer {} reconnect initialize failed: {}", session.peer_id(), e);
                    return;
                }
                if session.role() == PeerRole::Offerer {
                    match session.create_offer().await {
                        Ok(offer) => {
                            let _ = outgoing.send(SignalingMessage::offer(
                                offer.sdp,
                                session.peer_id().to_string(),
                            ));
                        }
                        Err(e) => {
                            warn!("Peer {} reconnect offer failed: {}", session.peer_id(), e)
                        }
                    }
                }
            })
        })
    }

    fn spawn_event_pump(
        &self,
        session: Arc<PeerSession>,
        supervisor: Arc<ReconnectSupervisor>,
    ) -> JoinHandle<()> {
        let mut rx = session.subscribe();
        let outgoing = self.outgoing.clone();
        let notifier = self.notifier.clone();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(SessionEvent::LocalCandidate(payload)) => {
                        let _ = outgoing.send(SignalingMessage::candidate(
                            payload,
                            session.peer_id().to_string(),
                        ));
                    }
                    Ok(SessionEvent::TransportChanged(state)) => {
                        if matches!(
                            state,
                            RTCPeerConnectionState::Disconnected | RTCPeerConnectionState::Failed
                        ) {
                            supervisor.trigger();
                        }
                    }
                    Ok(SessionEvent::ConnectionLost) => {
                        notifier.notify(SessionStatus::ConnectionLost {
                            peer_id: session.peer_id().to_string(),
                        });
                    }
                    Ok(SessionEvent::ConnectionRestored) => {
                        notifier.notify(SessionStatus::ConnectionRestored {
                            peer_id: session.peer_id().to_string(),
                        });
                    }
                    Ok(SessionEvent::ReconnectExhausted { attempts }) => {
                        notifier.notify(SessionStatus::ReconnectFailed {
                            peer_id: session.peer_id().to_string(),
                            attempts,
                        });
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Peer {} event pump lagged by {}", session.peer_id(), n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    /// Route an inbound signaling message to the right session. An
    /// offer for an unknown peer creates an answering session first.
    pub async fn dispatch(&self, message: SignalingMessage) -> Result<(), PeerError> {
        match message {
            SignalingMessage::Offer { sdp, peer_id } => {
                let session = match self.get_session(&peer_id).await {
                    Some(session) => session,
                    None => self.create_session(&peer_id, PeerRole::Answerer).await?,
                };
                session.handle_remote_offer(&sdp).await?;
                let answer = session.create_answer().await?;
                let _ = self
                    .outgoing
                    .send(SignalingMessage::answer(answer.sdp, peer_id));
                Ok(())
            }
            SignalingMessage::Answer { sdp, peer_id } => {
                self.require_session(&peer_id)
                    .await?
                    .handle_remote_answer(&sdp)
                    .await
            }
            SignalingMessage::Candidate {
                candidate,
                sdp_mid,
                sdp_mline_index,
                peer_id,
            } => {
                self.require_session(&peer_id)
                    .await?
                    .add_ice_candidate(IceCandidatePayload {
                        candidate,
                        sdp_mid,
                        sdp_mline_index,
                    })
                    .await
            }
            SignalingMessage::Close { peer_id, reason } => {
                info!(
                    "Peer {} requested close ({})",
                    peer_id,
                    reason.as_deref().unwrap_or("no reason")
                );
                self.remove_session(&peer_id).await;
                Ok(())
            }
            SignalingMessage::Error { code, message, peer_id } => {
                warn!(
                    "Signaling error from {}: {} ({})",
                    peer_id.as_deref().unwrap_or("unknown"),
                    message,
                    code
                );
                Ok(())
            }
        }
    }

    /// Begin negotiation with a peer: produce an offer and push it to
    /// the signaling channel. The session must have been created with
    /// the Offerer role.
    pub async fn start_negotiation(&self, peer_id: &str) -> Result<(), PeerError> {
        let session = self.require_session(peer_id).await?;
        if session.role() != PeerRole::Offerer {
            return Err(PeerError::InvalidState(format!(
                "peer {} is not the offering side",
                peer_id
            )));
        }
        let offer = session.create_offer().await?;
        let _ = self
            .outgoing
            .send(SignalingMessage::offer(offer.sdp, peer_id.to_string()));
        Ok(())
    }

    pub async fn get_session(&self, peer_id: &str) -> Option<Arc<PeerSession>> {
        self.sessions
            .read()
            .await
            .get(peer_id)
            .map(|entry| entry.session.clone())
    }

    async fn require_session(&self, peer_id: &str) -> Result<Arc<PeerSession>, PeerError> {
        self.get_session(peer_id).await.ok_or_else(|| {
            PeerError::InvalidState(format!("no session for peer {}", peer_id))
        })
    }

    /// Tear down and forget a session
    pub async fn remove_session(&self, peer_id: &str) -> Option<Arc<PeerSession>> {
        let entry = self.sessions.write().await.remove(peer_id)?;
        entry.supervisor.shutdown();
        entry.pump.abort();
        entry.session.close().await;
        info!("Removed session for peer {}", peer_id);
        Some(entry.session)
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn peer_config() -> Arc<crate::config::PeerConfig> {
        Arc::new(crate::config::PeerConfig::default())
    }

    fn session(peer_id: &str, role: PeerRole) -> PeerSession {
        PeerSession::new(peer_id.to_string(), role, peer_config())
    }

    async fn wait_until(
        rx: &mut broadcast::Receiver<SessionEvent>,
        mut pred: impl FnMut(&SessionEvent) -> bool,
    ) {
        tokio::time::timeout(Duration::from_secs(30), async {
            loop {
                match rx.recv().await {
                    Ok(ev) => {
                        if pred(&ev) {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(broadcast::error::RecvError::Closed) => panic!("event channel closed"),
                }
            }
        })
        .await
        .expect("timed out waiting for session event");
    }

    #[tokio::test]
    async fn test_initialize_twice_is_refused() {
        let s = session("p1", PeerRole::Offerer);
        s.initialize().await.unwrap();
        let err = s.initialize().await.unwrap_err();
        assert!(matches!(err, PeerError::Configuration(_)));
        s.close().await;
    }

    #[tokio::test]
    async fn test_add_ice_candidate_before_initialize_is_noop() {
        let s = session("p2", PeerRole::Answerer);
        let result = s
            .add_ice_candidate(IceCandidatePayload {
                candidate: "candidate:1 1 udp 1 192.0.2.1 9 typ host".to_string(),
                sdp_mid: Some("0".to_string()),
                sdp_mline_index: Some(0),
            })
            .await;
        assert!(result.is_ok());
        assert_eq!(s.state().await, ConnectionState::Uninitialized);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let s = session("p3", PeerRole::Offerer);
        s.initialize().await.unwrap();
        s.close().await;
        assert_eq!(s.state().await, ConnectionState::Closed);
        assert!(s.registered_tracks().await.is_empty());
        s.close().await;
        assert_eq!(s.state().await, ConnectionState::Closed);
        assert!(s.registered_tracks().await.is_empty());
    }

    #[tokio::test]
    async fn test_close_from_uninitialized_is_safe() {
        let s = session("p4", PeerRole::Answerer);
        s.close().await;
        assert_eq!(s.state().await, ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_reinitialize_after_close() {
        let s = session("p5", PeerRole::Offerer);
        s.initialize().await.unwrap();
        s.close().await;
        s.initialize().await.unwrap();
        assert_eq!(s.state().await, ConnectionState::Initialized);
        s.close().await;
    }

    #[tokio::test]
    async fn test_create_offer_requires_initialize() {
        let s = session("p6", PeerRole::Offerer);
        assert!(matches!(
            s.create_offer().await.unwrap_err(),
            PeerError::InvalidState(_)
        ));
    }

    #[tokio::test]
    async fn test_track_registry_add_remove() {
        let s = session("p7", PeerRole::Offerer);
        s.initialize().await.unwrap();

        assert!(s.registered_tracks().await.is_empty());
        let track = PeerConnectionFactory::create_video_track();
        let track_id = track.id().to_string();

        s.add_track(track.clone()).await.unwrap();
        assert_eq!(s.registered_tracks().await, vec![track_id.clone()]);

        // duplicate registration is a contract violation
        assert!(matches!(
            s.add_track(track).await.unwrap_err(),
            PeerError::InvalidState(_)
        ));

        s.remove_track(&track_id).await;
        assert!(s.registered_tracks().await.is_empty());

        // unknown id is a no-op
        s.remove_track("no-such-track").await;
        assert!(s.registered_tracks().await.is_empty());
        s.close().await;
    }

    #[tokio::test]
    async fn test_add_track_before_initialize_is_invalid_state() {
        let s = session("p8", PeerRole::Offerer);
        let track = PeerConnectionFactory::create_video_track();
        assert!(matches!(
            s.add_track(track).await.unwrap_err(),
            PeerError::InvalidState(_)
        ));
    }

    #[tokio::test]
    async fn test_offer_answer_exchange() {
        let offerer = session("a", PeerRole::Offerer);
        let answerer = session("b", PeerRole::Answerer);
        offerer.initialize().await.unwrap();
        answerer.initialize().await.unwrap();

        let offer = offerer.create_offer().await.unwrap();
        assert_eq!(offer.kind, DescriptionKind::Offer);
        assert!(offer.sdp.starts_with("v=0"));
        assert_eq!(offerer.state().await, ConnectionState::Negotiating);

        answerer.handle_remote_offer(&offer.sdp).await.unwrap();
        let answer = answerer.create_answer().await.unwrap();
        assert_eq!(answer.kind, DescriptionKind::Answer);
        assert_eq!(answerer.state().await, ConnectionState::Negotiating);

        offerer.handle_remote_answer(&answer.sdp).await.unwrap();

        offerer.close().await;
        answerer.close().await;
    }

    #[tokio::test]
    async fn test_malformed_remote_answer_is_negotiation_error() {
        let offerer = session("a2", PeerRole::Offerer);
        offerer.initialize().await.unwrap();
        offerer.create_offer().await.unwrap();

        let err = offerer.handle_remote_answer("not an sdp").await.unwrap_err();
        assert!(matches!(err, PeerError::Negotiation(_)));
        // a failed negotiation step must not advance the state
        assert_eq!(offerer.state().await, ConnectionState::Negotiating);
        offerer.close().await;
    }

    #[tokio::test]
    async fn test_remote_offer_without_initialize_is_negotiation_error() {
        let s = session("p9", PeerRole::Answerer);
        // well-formed description applied to an uninitialized session
        let offerer = session("p9-remote", PeerRole::Offerer);
        offerer.initialize().await.unwrap();
        let offer = offerer.create_offer().await.unwrap();

        let err = s.handle_remote_offer(&offer.sdp).await.unwrap_err();
        assert!(matches!(err, PeerError::Negotiation(_)));
        offerer.close().await;
    }

    #[tokio::test]
    async fn test_full_connection_with_candidate_exchange() {
        let offerer = Arc::new(session("conn-a", PeerRole::Offerer));
        let answerer = Arc::new(session("conn-b", PeerRole::Answerer));

        let mut offerer_events = offerer.subscribe();
        let mut answerer_events = answerer.subscribe();

        offerer.initialize().await.unwrap();
        answerer.initialize().await.unwrap();

        // relay candidates in both directions as they are generated
        let mut a_rx = offerer.subscribe();
        let b = answerer.clone();
        tokio::spawn(async move {
            while let Ok(ev) = a_rx.recv().await {
                if let SessionEvent::LocalCandidate(payload) = ev {
                    let _ = b.add_ice_candidate(payload).await;
                }
            }
        });
        let mut b_rx = answerer.subscribe();
        let a = offerer.clone();
        tokio::spawn(async move {
            while let Ok(ev) = b_rx.recv().await {
                if let SessionEvent::LocalCandidate(payload) = ev {
                    let _ = a.add_ice_candidate(payload).await;
                }
            }
        });

        let offer = offerer.create_offer().await.unwrap();
        answerer.handle_remote_offer(&offer.sdp).await.unwrap();
        let answer = answerer.create_answer().await.unwrap();
        offerer.handle_remote_answer(&answer.sdp).await.unwrap();

        wait_until(&mut offerer_events, |ev| {
            matches!(ev, SessionEvent::StateChanged(ConnectionState::Connected))
        })
        .await;
        wait_until(&mut answerer_events, |ev| {
            matches!(ev, SessionEvent::StateChanged(ConnectionState::Connected))
        })
        .await;

        wait_until(&mut offerer_events, |ev| matches!(ev, SessionEvent::ChannelOpened)).await;
        wait_until(&mut answerer_events, |ev| matches!(ev, SessionEvent::ChannelOpened)).await;

        assert_eq!(offerer.state().await, ConnectionState::Connected);
        assert_eq!(answerer.state().await, ConnectionState::Connected);
        assert!(offerer.channel_open().await);
        assert!(answerer.channel_open().await);

        // message delivery across the open channel
        let mut b_messages = answerer.subscribe();
        offerer.send_message("m,100,200").await;
        wait_until(&mut b_messages, |ev| {
            matches!(ev, SessionEvent::ChannelMessage(text) if text == "m,100,200")
        })
        .await;

        offerer.close().await;
        answerer.close().await;
    }

    fn manager() -> (SessionManager, mpsc::UnboundedReceiver<SignalingMessage>) {
        SessionManager::with_log_notifier(Arc::new(Config::default()))
    }

    #[tokio::test]
    async fn test_manager_answers_inbound_offer() {
        let (manager, mut outgoing) = manager();

        // a remote offerer produces the inbound description
        let remote = session("remote", PeerRole::Offerer);
        remote.initialize().await.unwrap();
        let offer = remote.create_offer().await.unwrap();

        manager
            .dispatch(SignalingMessage::offer(offer.sdp, "remote".to_string()))
            .await
            .unwrap();
        assert_eq!(manager.session_count().await, 1);
        let local = manager.get_session("remote").await.unwrap();
        assert_eq!(local.role(), PeerRole::Answerer);

        let reply = tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                match outgoing.recv().await.expect("outgoing channel closed") {
                    SignalingMessage::Answer { sdp, peer_id } => break (sdp, peer_id),
                    // candidates may precede the answer
                    _ => {}
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(reply.1, "remote");
        assert!(reply.0.starts_with("v=0"));

        remote.close().await;
        manager.remove_session("remote").await;
    }

    #[tokio::test]
    async fn test_manager_start_negotiation_pushes_offer() {
        let (manager, mut outgoing) = manager();
        manager.create_session("peer-x", PeerRole::Offerer).await.unwrap();
        manager.start_negotiation("peer-x").await.unwrap();

        let msg = tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                match outgoing.recv().await.expect("outgoing channel closed") {
                    SignalingMessage::Offer { peer_id, .. } => break peer_id,
                    _ => {}
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(msg, "peer-x");
        manager.remove_session("peer-x").await;
    }

    #[tokio::test]
    async fn test_manager_rejects_duplicate_session() {
        let (manager, _outgoing) = manager();
        manager.create_session("dup", PeerRole::Offerer).await.unwrap();
        assert!(matches!(
            manager.create_session("dup", PeerRole::Answerer).await,
            Err(PeerError::InvalidState(_))
        ));
        manager.remove_session("dup").await;
    }

    #[tokio::test]
    async fn test_manager_start_negotiation_requires_offerer() {
        let (manager, _outgoing) = manager();

        let remote = session("remote2", PeerRole::Offerer);
        remote.initialize().await.unwrap();
        let offer = remote.create_offer().await.unwrap();
        manager
            .dispatch(SignalingMessage::offer(offer.sdp, "remote2".to_string()))
            .await
            .unwrap();

        assert!(matches!(
            manager.start_negotiation("remote2").await.unwrap_err(),
            PeerError::InvalidState(_)
        ));
        remote.close().await;
        manager.remove_session("remote2").await;
    }

    #[tokio::test]
    async fn test_manager_close_message_removes_session() {
        let (manager, _outgoing) = manager();
        manager.create_session("bye", PeerRole::Offerer).await.unwrap();
        manager
            .dispatch(SignalingMessage::Close {
                peer_id: "bye".to_string(),
                reason: Some("done".to_string()),
            })
            .await
            .unwrap();
        assert_eq!(manager.session_count().await, 0);
    }

    #[tokio::test]
    async fn test_manager_candidate_for_unknown_peer_is_invalid_state() {
        let (manager, _outgoing) = manager();
        let err = manager
            .dispatch(SignalingMessage::Candidate {
                candidate: "candidate:1".to_string(),
                sdp_mid: None,
                sdp_mline_index: None,
                peer_id: "ghost".to_string(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, PeerError::InvalidState(_)));
    }
}
