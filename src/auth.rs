//! Authentication boundary
//!
//! Exchanges client credentials for an opaque session token before the
//! signaling channel is established. One blocking request/response call;
//! failures surface to the orchestrator, never into the session core.

use crate::config::AuthConfig;
use crate::webrtc::PeerError;
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: String,
}

pub struct AuthClient {
    server_url: String,
    client_id: String,
    client_type: String,
    timeout: Duration,
}

impl AuthClient {
    pub fn new(config: &AuthConfig) -> Self {
        Self {
            server_url: config.server_url.clone(),
            client_id: config.client_id.clone(),
            client_type: config.client_type.clone(),
            timeout: Duration::from_secs(5),
        }
    }

    /// Request a session token. Call before starting the async session
    /// machinery; the request blocks the calling thread.
    pub fn request_token(&self, auth_key: &str) -> Result<String, PeerError> {
        if self.server_url.is_empty() {
            return Err(PeerError::Auth("auth server URL is not configured".to_string()));
        }

        let response = ureq::post(&self.server_url)
            .timeout(self.timeout)
            .send_json(serde_json::json!({
                "client_id": self.client_id,
                "client_type": self.client_type,
                "auth_key": auth_key,
            }))
            .map_err(|e| PeerError::Auth(format!("Token request failed: {}", e)))?;

        let body: TokenResponse = response
            .into_json()
            .map_err(|e| PeerError::Auth(format!("Invalid token response: {}", e)))?;

        if body.token.is_empty() {
            return Err(PeerError::Auth("auth server returned an empty token".to_string()));
        }
        Ok(body.token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AuthConfig;

    #[test]
    fn test_missing_server_url_is_auth_error() {
        let client = AuthClient::new(&AuthConfig::default());
        let err = client.request_token("secret").unwrap_err();
        assert!(matches!(err, PeerError::Auth(_)));
    }

    #[test]
    fn test_unreachable_server_is_auth_error() {
        let config = AuthConfig {
            server_url: "http://127.0.0.1:1/token".to_string(),
            client_id: "client-1".to_string(),
            client_type: "client".to_string(),
        };
        let err = AuthClient::new(&config).request_token("secret").unwrap_err();
        assert!(matches!(err, PeerError::Auth(_)));
    }
}
