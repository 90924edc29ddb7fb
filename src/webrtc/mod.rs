//! Peer session core
//!
//! This module provides the WebRTC peer-connection lifecycle:
//! - Offer/answer negotiation state machine
//! - Track/sender bookkeeping
//! - DataChannel adapter for input messages
//! - Reconnection supervision with bounded backoff

pub mod peer_connection;
pub mod signaling;
pub mod data_channel;
pub mod events;
pub mod session;
pub mod reconnect;

pub use events::{ConnectionState, IceCandidatePayload, SessionEvent, TrackKind};
pub use reconnect::ReconnectSupervisor;
pub use session::{DescriptionKind, PeerRole, PeerSession, SessionDescription, SessionManager};
pub use signaling::SignalingMessage;

use std::error::Error;
use std::fmt;

/// Peer session errors
#[derive(Debug)]
pub enum PeerError {
    /// Bad or missing connectivity parameters; not retried
    Configuration(String),
    /// Offer/answer creation or application failed; negotiation may be retried
    Negotiation(String),
    /// Underlying connection failed or dropped
    Transport(String),
    /// Operation invoked outside its valid state
    InvalidState(String),
    /// Data channel error
    DataChannel(String),
    /// Token exchange with the auth server failed
    Auth(String),
}

impl fmt::Display for PeerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeerError::Configuration(msg) => write!(f, "Configuration error: {}", msg),
            PeerError::Negotiation(msg) => write!(f, "Negotiation error: {}", msg),
            PeerError::Transport(msg) => write!(f, "Transport error: {}", msg),
            PeerError::InvalidState(msg) => write!(f, "Invalid state: {}", msg),
            PeerError::DataChannel(msg) => write!(f, "DataChannel error: {}", msg),
            PeerError::Auth(msg) => write!(f, "Authentication error: {}", msg),
        }
    }
}

impl Error for PeerError {}
