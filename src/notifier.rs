//! Status presenter boundary
//!
//! The core pushes lifecycle status to a notifier and never waits for
//! acknowledgment. The notifier is constructed explicitly at startup
//! and handed to the SessionManager; only configuration failures and
//! exhausted reconnection are terminal, everything else is advisory.

use log::{error, info, warn};

/// User-visible session status
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionStatus {
    ConnectionLost { peer_id: String },
    ConnectionRestored { peer_id: String },
    /// Terminal: reconnection gave up after the given attempt count
    ReconnectFailed { peer_id: String, attempts: u32 },
}

pub trait StatusNotifier: Send + Sync {
    fn notify(&self, status: SessionStatus);
}

/// Default presenter that renders status into the log
pub struct LogNotifier;

impl StatusNotifier for LogNotifier {
    fn notify(&self, status: SessionStatus) {
        match status {
            SessionStatus::ConnectionLost { peer_id } => {
                warn!("Connection to peer {} lost, reconnecting", peer_id);
            }
            SessionStatus::ConnectionRestored { peer_id } => {
                info!("Connection to peer {} restored", peer_id);
            }
            SessionStatus::ReconnectFailed { peer_id, attempts } => {
                error!(
                    "Giving up on peer {} after {} reconnect attempts",
                    peer_id, attempts
                );
            }
        }
    }
}
