//! Agent configuration.
//!
//! The configuration is assembled once at startup and shared read-only
//! through [`AgentContext`](crate::context::AgentContext).
//!
//! # Examples
//!
//! ```rust
//! use didcomm_agent_node::AgentConfig;
//!
//! let config = AgentConfig {
//!     label: "Alice".to_string(),
//!     endpoint: "https://alice.example/endpoint".to_string(),
//!     ..Default::default()
//! };
//! assert!(config.validate().is_ok());
//! ```

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Configuration for the outbound transport queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// The HTTP client timeout in seconds
    pub timeout_secs: u64,
    /// Delivery attempts after the first failure
    pub max_retries: u32,
    /// Base delay between attempts in milliseconds, multiplied by the attempt number
    pub retry_backoff_ms: u64,
    /// Capacity of the outbound queue
    pub queue_capacity: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            max_retries: 3,
            retry_backoff_ms: 500,
            queue_capacity: 64,
        }
    }
}

/// Configuration for an agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Label presented to peers in invitations and requests
    pub label: String,

    /// Endpoint peers deliver messages to
    pub endpoint: String,

    /// Respond to connection requests without operator approval
    pub auto_accept_requests: bool,

    /// Send a connection request as soon as an invitation is received
    pub auto_accept_invites: bool,

    /// Send a trust ping after accepting a connection response
    pub auto_ping_connection: bool,

    /// Reject connection requests that match no stored invitation
    pub require_invitation: bool,

    /// Capacity of the admin event channel
    pub event_channel_capacity: usize,

    /// Outbound transport settings
    pub transport: TransportConfig,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            label: "DIDComm Agent".to_string(),
            endpoint: "http://localhost:8020".to_string(),
            auto_accept_requests: false,
            auto_accept_invites: false,
            auto_ping_connection: false,
            require_invitation: false,
            event_channel_capacity: 100,
            transport: TransportConfig::default(),
        }
    }
}

impl AgentConfig {
    /// Loads a configuration from JSON, filling absent fields with defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is malformed or the result fails
    /// [`AgentConfig::validate`].
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks the configuration for values the agent cannot run with.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] for an unparseable endpoint or a zero
    /// channel capacity.
    pub fn validate(&self) -> Result<()> {
        url::Url::parse(&self.endpoint)
            .map_err(|e| Error::InvalidConfig(format!("endpoint {}: {e}", self.endpoint)))?;
        if self.event_channel_capacity == 0 {
            return Err(Error::InvalidConfig(
                "event_channel_capacity must be positive".to_string(),
            ));
        }
        if self.transport.queue_capacity == 0 {
            return Err(Error::InvalidConfig(
                "transport.queue_capacity must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_agent_config_defaults() {
        let config = AgentConfig::default();
        assert_eq!(config.label, "DIDComm Agent");
        assert!(!config.auto_accept_requests);
        assert!(!config.require_invitation);
        assert_eq!(config.transport.timeout_secs, 30);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_json_fills_defaults() {
        let config = AgentConfig::from_json(
            r#"{"label": "Bob", "auto_ping_connection": true, "transport": {"max_retries": 5}}"#,
        )
        .unwrap();
        assert_eq!(config.label, "Bob");
        assert!(config.auto_ping_connection);
        assert_eq!(config.transport.max_retries, 5);
        assert_eq!(config.transport.queue_capacity, 64);
        assert_eq!(config.endpoint, AgentConfig::default().endpoint);
    }

    #[test]
    fn test_invalid_config() {
        assert!(matches!(
            AgentConfig::from_json(r#"{"endpoint": "not a url"}"#),
            Err(Error::InvalidConfig(_))
        ));
        assert!(matches!(
            AgentConfig::from_json(r#"{"event_channel_capacity": 0}"#),
            Err(Error::InvalidConfig(_))
        ));
        assert!(matches!(
            AgentConfig::from_json("{"),
            Err(Error::Serialization(_))
        ));
    }
}
