//! SDK configuration.

use waypoint_core::protocol::PROTOCOL_NAMESPACE;

use crate::error::{SdkError, SdkResult};
use crate::reconnect::ReconnectConfig;

/// Connection settings passed to `Waypoint::init`.
#[derive(Debug, Clone)]
pub struct SdkConfig {
    /// Gateway base URL, e.g. `wss://api.example.com`.
    pub ws_url: String,
    /// Environment SDK token.
    pub token: String,
    /// Stable browser id. The gateway keys resumable state on it.
    pub client_id: String,
    pub reconnect: ReconnectConfig,
}

impl SdkConfig {
    /// Build a config with a fresh client id and default backoff.
    pub fn new(ws_url: impl Into<String>, token: impl Into<String>) -> SdkResult<Self> {
        let config = Self {
            ws_url: ws_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
            client_id: uuid::Uuid::new_v4().to_string(),
            reconnect: ReconnectConfig::default(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Reuse a client id persisted by the host application.
    pub fn with_client_id(mut self, client_id: impl Into<String>) -> SdkResult<Self> {
        self.client_id = client_id.into();
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> SdkResult<()> {
        if !(self.ws_url.starts_with("ws://") || self.ws_url.starts_with("wss://")) {
            return Err(SdkError::Config(format!(
                "ws_url must start with ws:// or wss://, got '{}'",
                self.ws_url
            )));
        }
        if self.token.is_empty() {
            return Err(SdkError::Config("token must not be empty".into()));
        }
        // Both values go into the query string verbatim.
        for (name, value) in [("token", &self.token), ("client_id", &self.client_id)] {
            if value.is_empty() || !value.chars().all(is_unreserved) {
                return Err(SdkError::Config(format!(
                    "{name} may only contain letters, digits, '-', '.', '_' and '~'"
                )));
            }
        }
        Ok(())
    }

    /// Full socket URL, e.g. `wss://host/v2/ws?token=..&clientId=..`.
    pub fn socket_url(&self) -> String {
        format!(
            "{}{}/ws?token={}&clientId={}",
            self.ws_url, PROTOCOL_NAMESPACE, self.token, self.client_id
        )
    }
}

fn is_unreserved(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_' | '~')
}
