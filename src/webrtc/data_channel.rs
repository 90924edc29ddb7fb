//! Data channel adapter
//!
//! Wraps the single ordered, reliable data channel of one PeerSession.
//! The offering side creates the channel eagerly; the answering side
//! adopts the first channel offered by the transport. Sends are
//! best-effort: a channel that is absent or not yet open drops the
//! message with a log line instead of surfacing an error, because sends
//! originate from input-forwarding paths that must not branch on
//! channel readiness.

use super::events::SessionEvent;
use log::{debug, warn};
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::data_channel_state::RTCDataChannelState;
use webrtc::data_channel::RTCDataChannel;

pub struct DataChannelAdapter {
    peer_id: String,
    channel: RwLock<Option<Arc<RTCDataChannel>>>,
    events: broadcast::Sender<SessionEvent>,
}

impl DataChannelAdapter {
    pub fn new(peer_id: String, events: broadcast::Sender<SessionEvent>) -> Self {
        Self {
            peer_id,
            channel: RwLock::new(None),
            events,
        }
    }

    /// Adopt a channel and arm its handlers. Only the first channel per
    /// session is kept; later ones are ignored with a warning.
    pub async fn adopt(&self, channel: Arc<RTCDataChannel>) {
        let mut guard = self.channel.write().await;
        if guard.is_some() {
            warn!(
                "Peer {} already has data channel, ignoring '{}'",
                self.peer_id,
                channel.label()
            );
            return;
        }

        let events = self.events.clone();
        channel.on_open(Box::new(move || {
            let events = events.clone();
            Box::pin(async move {
                let _ = events.send(SessionEvent::ChannelOpened);
            })
        }));

        let events = self.events.clone();
        let peer_id = self.peer_id.clone();
        channel.on_message(Box::new(move |msg: DataChannelMessage| {
            let events = events.clone();
            let peer_id = peer_id.clone();
            Box::pin(async move {
                match String::from_utf8(msg.data.to_vec()) {
                    Ok(text) => {
                        let _ = events.send(SessionEvent::ChannelMessage(text));
                    }
                    Err(_) => {
                        warn!("Peer {} dropped non-UTF8 data channel message", peer_id);
                    }
                }
            })
        }));

        let events = self.events.clone();
        channel.on_close(Box::new(move || {
            let events = events.clone();
            Box::pin(async move {
                let _ = events.send(SessionEvent::ChannelClosed);
            })
        }));

        debug!("Peer {} adopted data channel '{}'", self.peer_id, channel.label());
        *guard = Some(channel);
    }

    /// Best-effort text send; silently drops when the channel is not open
    pub async fn send(&self, message: &str) {
        let guard = self.channel.read().await;
        match guard.as_ref() {
            Some(channel) if channel.ready_state() == RTCDataChannelState::Open => {
                if let Err(e) = channel.send_text(message.to_string()).await {
                    debug!("Peer {} data channel send failed: {}", self.peer_id, e);
                }
            }
            Some(channel) => {
                debug!(
                    "Peer {} data channel not open ({:?}), dropping message",
                    self.peer_id,
                    channel.ready_state()
                );
            }
            None => {
                debug!("Peer {} has no data channel, dropping message", self.peer_id);
            }
        }
    }

    /// Whether a channel is attached and open
    pub async fn is_open(&self) -> bool {
        self.channel
            .read()
            .await
            .as_ref()
            .map(|c| c.ready_state() == RTCDataChannelState::Open)
            .unwrap_or(false)
    }

    /// Close and release the channel; idempotent
    pub async fn close(&self) {
        if let Some(channel) = self.channel.write().await.take() {
            if let Err(e) = channel.close().await {
                debug!("Peer {} data channel close failed: {}", self.peer_id, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adapter() -> DataChannelAdapter {
        let (tx, _rx) = broadcast::channel(16);
        DataChannelAdapter::new("peer-test".to_string(), tx)
    }

    #[tokio::test]
    async fn test_send_without_channel_is_silent() {
        let adapter = adapter();
        // must not panic or error
        adapter.send("m,10,20").await;
        assert!(!adapter.is_open().await);
    }

    #[tokio::test]
    async fn test_close_without_channel_is_idempotent() {
        let adapter = adapter();
        adapter.close().await;
        adapter.close().await;
        assert!(!adapter.is_open().await);
    }

    #[tokio::test]
    async fn test_send_on_unopened_channel_is_silent() {
        use crate::config::PeerConfig;
        use crate::webrtc::peer_connection::PeerConnectionFactory;

        let pc = PeerConnectionFactory::build(&PeerConfig::default()).await.unwrap();
        let channel = pc.create_data_channel("input", None).await.unwrap();

        let adapter = adapter();
        adapter.adopt(channel).await;
        // channel exists but has never connected; send must be a no-op
        assert!(!adapter.is_open().await);
        adapter.send("k,65,1").await;

        adapter.close().await;
        let _ = pc.close().await;
    }
}
