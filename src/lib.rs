//! peerlink-core - peer-to-peer session core
//!
//! Negotiates and supervises WebRTC sessions between a streaming host
//! and an input-forwarding client: offer/answer state machine, track
//! and data-channel lifecycles, and bounded reconnection with backoff.

pub mod auth;
pub mod config;
pub mod notifier;
pub mod webrtc;

// Re-exports
pub use auth::AuthClient;
pub use config::{Config, IceServerConfig, PeerConfig, ReconnectConfig};
pub use notifier::{LogNotifier, SessionStatus, StatusNotifier};
pub use webrtc::{
    ConnectionState, PeerError, PeerRole, PeerSession, ReconnectSupervisor, SessionEvent,
    SessionManager, SignalingMessage, TrackKind,
};

/// Initialize env_logger from the configured level filter
pub fn init_logging(config: &config::LoggingConfig) {
    env_logger::Builder::new()
        .parse_filters(&config.level)
        .try_init()
        .ok();
}
