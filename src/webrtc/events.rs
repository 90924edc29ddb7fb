//! Session lifecycle events
//!
//! Events for one PeerSession fan out over a `tokio::sync::broadcast`
//! channel in the order the underlying transport raises them. There is
//! no cross-session ordering.

use serde::{Deserialize, Serialize};
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;

/// Negotiation lifecycle of one PeerSession
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No peer-connection primitive exists yet
    Uninitialized,
    /// Primitive built, callbacks armed, no description exchanged
    Initialized,
    /// Offer/answer exchange in progress
    Negotiating,
    /// Transport reported connected
    Connected,
    /// Intentionally torn down
    Closed,
}

/// Media track kind, resolved once when a remote track arrives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Audio,
    Video,
}

impl TrackKind {
    /// Map the transport codec type; `Unspecified` tracks are dropped
    pub fn from_codec_type(kind: RTPCodecType) -> Option<Self> {
        match kind {
            RTPCodecType::Audio => Some(TrackKind::Audio),
            RTPCodecType::Video => Some(TrackKind::Video),
            RTPCodecType::Unspecified => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TrackKind::Audio => "audio",
            TrackKind::Video => "video",
        }
    }
}

/// Opaque connectivity descriptor, forwarded and never interpreted
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IceCandidatePayload {
    pub candidate: String,
    #[serde(rename = "sdpMid")]
    pub sdp_mid: Option<String>,
    #[serde(rename = "sdpMLineIndex")]
    pub sdp_mline_index: Option<u16>,
}

impl IceCandidatePayload {
    pub fn from_init(init: RTCIceCandidateInit) -> Self {
        Self {
            candidate: init.candidate,
            sdp_mid: init.sdp_mid,
            sdp_mline_index: init.sdp_mline_index,
        }
    }

    pub fn into_init(self) -> RTCIceCandidateInit {
        RTCIceCandidateInit {
            candidate: self.candidate,
            sdp_mid: self.sdp_mid,
            sdp_mline_index: self.sdp_mline_index,
            username_fragment: None,
        }
    }
}

/// Events emitted by a PeerSession and its reconnection supervisor
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// The local transport produced an ICE candidate for the remote peer
    LocalCandidate(IceCandidatePayload),
    /// Negotiation state machine moved to a new state
    StateChanged(ConnectionState),
    /// Transport-reported sub-state changed (informational)
    TransportChanged(RTCPeerConnectionState),
    /// Renegotiation is required, e.g. a track was added post-connection
    NegotiationNeeded,
    /// A remote media track arrived
    RemoteTrack(TrackKind),
    /// Data channel reached the Open state
    ChannelOpened,
    /// Data channel closed
    ChannelClosed,
    /// Decoded text message received on the data channel
    ChannelMessage(String),
    /// Reconnection supervisor took over after connection loss
    ConnectionLost,
    /// Connectivity came back while the supervisor was active
    ConnectionRestored,
    /// All reconnect attempts failed; terminal
    ReconnectExhausted { attempts: u32 },
}
