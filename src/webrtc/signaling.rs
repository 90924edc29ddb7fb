//! Signaling protocol boundary
//!
//! Message types relayed between peers by the signaling channel. The
//! transport itself (WebSocket or otherwise) lives outside this crate;
//! only the per-peer message kinds are defined here.

use super::events::IceCandidatePayload;
use super::PeerError;
use serde::{Deserialize, Serialize};

/// Signaling message types exchanged per peer
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SignalingMessage {
    /// Session description from the offering side
    Offer {
        sdp: String,
        peer_id: String,
    },

    /// Session description from the answering side
    Answer {
        sdp: String,
        peer_id: String,
    },

    /// ICE candidate
    Candidate {
        candidate: String,
        #[serde(rename = "sdpMid")]
        sdp_mid: Option<String>,
        #[serde(rename = "sdpMLineIndex")]
        sdp_mline_index: Option<u16>,
        peer_id: String,
    },

    /// Error report
    Error {
        code: String,
        message: String,
        #[serde(default)]
        peer_id: Option<String>,
    },

    /// Session teardown request
    Close {
        peer_id: String,
        reason: Option<String>,
    },
}

impl SignalingMessage {
    /// Parse a signaling message from JSON
    pub fn from_json(json: &str) -> Result<Self, PeerError> {
        serde_json::from_str(json)
            .map_err(|e| PeerError::Negotiation(format!("Invalid signaling message: {}", e)))
    }

    /// Serialize to JSON
    pub fn to_json(&self) -> Result<String, PeerError> {
        serde_json::to_string(self)
            .map_err(|e| PeerError::Negotiation(format!("Failed to serialize message: {}", e)))
    }

    /// Create an offer message
    pub fn offer(sdp: String, peer_id: String) -> Self {
        SignalingMessage::Offer { sdp, peer_id }
    }

    /// Create an answer message
    pub fn answer(sdp: String, peer_id: String) -> Self {
        SignalingMessage::Answer { sdp, peer_id }
    }

    /// Create a candidate message from a locally generated candidate
    pub fn candidate(payload: IceCandidatePayload, peer_id: String) -> Self {
        SignalingMessage::Candidate {
            candidate: payload.candidate,
            sdp_mid: payload.sdp_mid,
            sdp_mline_index: payload.sdp_mline_index,
            peer_id,
        }
    }

    /// Create an error message
    pub fn error(code: &str, message: &str, peer_id: Option<String>) -> Self {
        SignalingMessage::Error {
            code: code.to_string(),
            message: message.to_string(),
            peer_id,
        }
    }

    /// Get the peer ID if present
    pub fn peer_id(&self) -> Option<&str> {
        match self {
            SignalingMessage::Offer { peer_id, .. } => Some(peer_id),
            SignalingMessage::Answer { peer_id, .. } => Some(peer_id),
            SignalingMessage::Candidate { peer_id, .. } => Some(peer_id),
            SignalingMessage::Error { peer_id, .. } => peer_id.as_deref(),
            SignalingMessage::Close { peer_id, .. } => Some(peer_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_json_offer() {
        let json = r#"{"type": "offer", "sdp": "v=0\r\n...", "peer_id": "peer-1"}"#;
        let msg = SignalingMessage::from_json(json).unwrap();
        match msg {
            SignalingMessage::Offer { sdp, peer_id } => {
                assert!(sdp.starts_with("v=0"));
                assert_eq!(peer_id, "peer-1");
            }
            _ => panic!("Expected Offer"),
        }
    }

    #[test]
    fn test_candidate_field_names() {
        let msg = SignalingMessage::candidate(
            IceCandidatePayload {
                candidate: "candidate:1".to_string(),
                sdp_mid: Some("0".to_string()),
                sdp_mline_index: Some(0),
            },
            "peer-2".to_string(),
        );
        let json = msg.to_json().unwrap();
        assert!(json.contains("sdpMid"));
        assert!(json.contains("sdpMLineIndex"));
        assert!(json.contains("candidate"));
    }

    #[test]
    fn test_message_round_trip() {
        let msg = SignalingMessage::answer("v=0...".to_string(), "peer-3".to_string());
        let json = msg.to_json().unwrap();
        let parsed = SignalingMessage::from_json(&json).unwrap();
        assert_eq!(parsed.peer_id(), Some("peer-3"));
    }

    #[test]
    fn test_invalid_json_is_negotiation_error() {
        let err = SignalingMessage::from_json("not json").unwrap_err();
        assert!(matches!(err, PeerError::Negotiation(_)));
    }

    #[test]
    fn test_error_message_optional_peer() {
        let msg = SignalingMessage::error("AUTH_FAILED", "token rejected", None);
        let json = msg.to_json().unwrap();
        let parsed = SignalingMessage::from_json(&json).unwrap();
        assert_eq!(parsed.peer_id(), None);
    }
}
