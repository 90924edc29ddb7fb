//! PeerConnection primitive construction
//!
//! Builds RTCPeerConnection instances from the declarative peer
//! configuration and provides local track constructors.

use super::PeerError;
use crate::config::PeerConfig;
use std::sync::Arc;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::api::setting_engine::SettingEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_rtp::TrackLocalStaticRTP;

/// Factory for peer-connection primitives and local tracks
pub struct PeerConnectionFactory;

impl PeerConnectionFactory {
    /// Create a new RTCPeerConnection with the configured ICE servers
    pub async fn build(config: &PeerConfig) -> Result<Arc<RTCPeerConnection>, PeerError> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| PeerError::Configuration(format!("Failed to register codecs: {}", e)))?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine).map_err(|e| {
            PeerError::Configuration(format!("Failed to register interceptors: {}", e))
        })?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .with_setting_engine(SettingEngine::default())
            .build();

        let ice_servers = config
            .ice_servers
            .iter()
            .map(|server| RTCIceServer {
                urls: server.urls.clone(),
                username: server.username.clone().unwrap_or_default(),
                credential: server.credential.clone().unwrap_or_default(),
                ..Default::default()
            })
            .collect();

        let rtc_config = RTCConfiguration {
            ice_servers,
            ..Default::default()
        };

        let peer_connection = api.new_peer_connection(rtc_config).await.map_err(|e| {
            PeerError::Transport(format!("Failed to create peer connection: {}", e))
        })?;

        Ok(Arc::new(peer_connection))
    }

    /// Create a local VP8 video track
    pub fn create_video_track() -> Arc<TrackLocalStaticRTP> {
        Arc::new(TrackLocalStaticRTP::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_VP8.to_string(),
                clock_rate: 90000,
                channels: 0,
                sdp_fmtp_line: String::new(),
                rtcp_feedback: vec![],
            },
            format!("video-{}", uuid::Uuid::new_v4()),
            "peerlink-stream".to_string(),
        ))
    }

    /// Create a local Opus audio track
    pub fn create_audio_track() -> Arc<TrackLocalStaticRTP> {
        Arc::new(TrackLocalStaticRTP::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_OPUS.to_string(),
                clock_rate: 48000,
                channels: 2,
                sdp_fmtp_line: String::new(),
                rtcp_feedback: vec![],
            },
            format!("audio-{}", uuid::Uuid::new_v4()),
            "peerlink-stream".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IceServerConfig;
    use webrtc::track::track_local::TrackLocal;

    #[tokio::test]
    async fn test_build_with_empty_ice_servers() {
        let config = PeerConfig::default();
        let pc = PeerConnectionFactory::build(&config).await.unwrap();
        let _ = pc.close().await;
    }

    #[tokio::test]
    async fn test_build_with_stun_server() {
        let config = PeerConfig {
            ice_servers: vec![IceServerConfig {
                urls: vec!["stun:stun.l.google.com:19302".to_string()],
                username: None,
                credential: None,
            }],
            ..Default::default()
        };
        let pc = PeerConnectionFactory::build(&config).await.unwrap();
        let _ = pc.close().await;
    }

    #[test]
    fn test_track_ids_are_unique() {
        let a = PeerConnectionFactory::create_video_track();
        let b = PeerConnectionFactory::create_video_track();
        assert_ne!(a.id(), b.id());
        assert!(a.id().starts_with("video-"));
        assert!(PeerConnectionFactory::create_audio_track().id().starts_with("audio-"));
    }
}
