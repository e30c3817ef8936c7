//! Error types for the CRN-25 node
//!
//! This module defines the error types surfaced by the node. Protocol faults
//! on the wire are never raised to callers; these errors describe misuse of
//! the node (port not open, name not set) and configuration problems.

use std::fmt;

/// Error type for CRN-25 node operations
#[derive(Debug, Clone)]
pub enum CrnError {
    /// Wire format errors (malformed or truncated messages)
    ProtocolError {
        message: String,
        source: Option<String>,
    },

    /// Transport errors
    NetworkError {
        message: String,
        address: Option<String>,
        source: Option<String>,
    },

    /// Node lifecycle errors (name not set, port not open)
    NodeError {
        message: String,
        node: Option<String>,
    },

    /// Configuration errors
    ConfigError {
        message: String,
        field: Option<String>,
    },

    /// Validation errors
    ValidationError {
        message: String,
        field: Option<String>,
    },
}

impl CrnError {
    /// Create a new ProtocolError
    pub fn protocol_error(message: impl Into<String>) -> Self {
        CrnError::ProtocolError {
            message: message.into(),
            source: None,
        }
    }

    /// Create a new ProtocolError with source
    pub fn protocol_error_with_source(message: impl Into<String>, source: impl Into<String>) -> Self {
        CrnError::ProtocolError {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Create a new NetworkError
    pub fn network_error(message: impl Into<String>) -> Self {
        CrnError::NetworkError {
            message: message.into(),
            address: None,
            source: None,
        }
    }

    /// Create a new NetworkError with address and source
    pub fn network_error_full(message: impl Into<String>, address: impl Into<String>, source: impl Into<String>) -> Self {
        CrnError::NetworkError {
            message: message.into(),
            address: Some(address.into()),
            source: Some(source.into()),
        }
    }

    /// Create a new NodeError
    pub fn node_error(message: impl Into<String>) -> Self {
        CrnError::NodeError {
            message: message.into(),
            node: None,
        }
    }

    /// Create a new NodeError naming the node
    pub fn node_error_with_node(message: impl Into<String>, node: impl Into<String>) -> Self {
        CrnError::NodeError {
            message: message.into(),
            node: Some(node.into()),
        }
    }

    /// Create a new ConfigError
    pub fn config_error(message: impl Into<String>) -> Self {
        CrnError::ConfigError {
            message: message.into(),
            field: None,
        }
    }

    /// Create a new ConfigError with field
    pub fn config_error_with_field(message: impl Into<String>, field: impl Into<String>) -> Self {
        CrnError::ConfigError {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Create a new ValidationError
    pub fn validation_error(message: impl Into<String>) -> Self {
        CrnError::ValidationError {
            message: message.into(),
            field: None,
        }
    }

    /// Create a new ValidationError with field
    pub fn validation_error_with_field(message: impl Into<String>, field: impl Into<String>) -> Self {
        CrnError::ValidationError {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Add context to the error
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        let ctx = context.into();
        match &mut self {
            CrnError::ProtocolError { source, .. } | CrnError::NetworkError { source, .. } => {
                *source = Some(source.as_ref().map_or_else(|| ctx.clone(), |s| format!("{}: {}", s, ctx)));
            }
            CrnError::NodeError { message, .. } => {
                *message = format!("{} ({})", message, ctx);
            }
            _ => {}
        }
        self
    }
}

impl fmt::Display for CrnError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CrnError::ProtocolError { message, source } => {
                if let Some(src) = source {
                    write!(f, "Protocol error: {} (source: {})", message, src)
                } else {
                    write!(f, "Protocol error: {}", message)
                }
            }
            CrnError::NetworkError { message, address, source } => {
                match (address, source) {
                    (Some(a), Some(s)) => write!(f, "Network error: {} (address: {}, source: {})", message, a, s),
                    (Some(a), None) => write!(f, "Network error: {} (address: {})", message, a),
                    (None, Some(s)) => write!(f, "Network error: {} (source: {})", message, s),
                    (None, None) => write!(f, "Network error: {}", message),
                }
            }
            CrnError::NodeError { message, node } => {
                if let Some(n) = node {
                    write!(f, "Node error: {} (node: {})", message, n)
                } else {
                    write!(f, "Node error: {}", message)
                }
            }
            CrnError::ConfigError { message, field } => {
                if let Some(field_val) = field {
                    write!(f, "Config error: {} (field: {})", message, field_val)
                } else {
                    write!(f, "Config error: {}", message)
                }
            }
            CrnError::ValidationError { message, field } => {
                if let Some(field_val) = field {
                    write!(f, "Validation error: {} (field: {})", message, field_val)
                } else {
                    write!(f, "Validation error: {}", message)
                }
            }
        }
    }
}

impl std::error::Error for CrnError {}

impl From<std::io::Error> for CrnError {
    fn from(err: std::io::Error) -> Self {
        CrnError::network_error_full(err.to_string(), "unknown".to_string(), err.kind().to_string())
    }
}

impl From<std::net::AddrParseError> for CrnError {
    fn from(err: std::net::AddrParseError) -> Self {
        CrnError::network_error_full("Failed to parse address", "unknown".to_string(), err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_error() {
        let err = CrnError::protocol_error("Truncated message");
        assert_eq!(err.to_string(), "Protocol error: Truncated message");
    }

    #[test]
    fn test_protocol_error_with_source() {
        let err = CrnError::protocol_error_with_source("Bad CRN string", "missing space count");
        assert!(err.to_string().contains("Bad CRN string"));
        assert!(err.to_string().contains("missing space count"));
    }

    #[test]
    fn test_node_error_with_node() {
        let err = CrnError::node_error_with_node("Port not open", "N:alice");
        assert!(err.to_string().contains("Node error"));
        assert!(err.to_string().contains("N:alice"));
    }

    #[test]
    fn test_with_context() {
        let err = CrnError::protocol_error("Invalid data").with_context("while decoding O response");
        assert!(err.to_string().contains("while decoding O response"));
    }

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::AddrInUse, "Address in use");
        let err: CrnError = io_err.into();
        assert!(matches!(err, CrnError::NetworkError { .. }));
    }

    #[test]
    fn test_from_addr_parse_error() {
        let addr_err = "invalid:address".parse::<std::net::SocketAddr>().unwrap_err();
        let err: CrnError = addr_err.into();
        assert!(matches!(err, CrnError::NetworkError { .. }));
    }

    #[test]
    fn test_config_error_with_field() {
        let err = CrnError::config_error_with_field("Must be positive", "read_attempts");
        assert!(err.to_string().contains("Config error"));
        assert!(err.to_string().contains("read_attempts"));
    }

    #[test]
    fn test_validation_error_with_field() {
        let err = CrnError::validation_error_with_field("Names must start with N:", "name");
        assert!(err.to_string().contains("Validation error"));
        assert!(err.to_string().contains("name"));
    }
}
