//! Protocol timing and fan-out settings

use crate::error::CrnError;
use anyhow::Result;
use std::time::Duration;

/// Timeouts, attempt counts and fan-out bounds used by a node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeConfig {
    /// How long each `N` probe waits for its `O`
    pub lookup_timeout: Duration,
    /// How long each read attempt waits for an `S`
    pub read_timeout: Duration,
    /// How long a write waits for an `X` before resending
    pub write_timeout: Duration,
    /// How long a final relay waits before retransmitting to the target
    pub relay_timeout: Duration,
    /// Total sends a final relay makes before giving up
    pub relay_attempts: u32,
    /// Read attempts before reporting not found
    pub read_attempts: u32,
    /// Peers probed per lookup round
    pub lookup_fanout: usize,
    /// Candidates queried per read attempt
    pub read_fanout: usize,
    /// How long to absorb `O` replies after widening the candidate pool
    pub expand_drain: Duration,
    /// Pause between read attempts, spent servicing the inbox
    pub retry_pause: Duration,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            lookup_timeout: Duration::from_secs(2),
            read_timeout: Duration::from_secs(10),
            write_timeout: Duration::from_secs(5),
            relay_timeout: Duration::from_secs(5),
            relay_attempts: 3,
            read_attempts: 20,
            lookup_fanout: 5,
            read_fanout: 5,
            expand_drain: Duration::from_secs(1),
            retry_pause: Duration::from_millis(500),
        }
    }
}

impl NodeConfig {
    /// Reject settings that would stall or disable the protocol
    pub fn validate(&self) -> Result<()> {
        let timeouts = [
            ("lookup_timeout", self.lookup_timeout),
            ("read_timeout", self.read_timeout),
            ("write_timeout", self.write_timeout),
            ("relay_timeout", self.relay_timeout),
        ];
        for (field, value) in timeouts {
            if value.is_zero() {
                return Err(CrnError::config_error_with_field("Timeout must be positive", field).into());
            }
        }
        if self.relay_attempts == 0 {
            return Err(CrnError::config_error_with_field("Must be at least 1", "relay_attempts").into());
        }
        if self.read_attempts == 0 {
            return Err(CrnError::config_error_with_field("Must be at least 1", "read_attempts").into());
        }
        if self.lookup_fanout == 0 {
            return Err(CrnError::config_error_with_field("Must be at least 1", "lookup_fanout").into());
        }
        if self.read_fanout == 0 {
            return Err(CrnError::config_error_with_field("Must be at least 1", "read_fanout").into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = NodeConfig::default();
        assert_eq!(config.read_attempts, 20);
        assert_eq!(config.relay_attempts, 3);
        assert_eq!(config.read_timeout, Duration::from_secs(10));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero() {
        let config = NodeConfig { relay_attempts: 0, ..NodeConfig::default() };
        assert!(config.validate().is_err());

        let config = NodeConfig { write_timeout: Duration::ZERO, ..NodeConfig::default() };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("write_timeout"));
    }
}
