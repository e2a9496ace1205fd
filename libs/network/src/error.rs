//! Client Error Types
//!
//! Every failure a caller of the proxy client can observe. Transport faults
//! (`ConnectionLost`, `Timeout`, `Network`, `Io`, `Closed`) and malformed
//! responses are retryable on another proxy; decoded remote errors, local
//! encoding failures and empty pools are not.

use rpc_codec::CodecError;
pub use rpc_codec::RpcError;
use thiserror::Error;

/// Main client error type
#[derive(Error, Debug)]
pub enum RpcClientError {
    /// Local encoding failure, or malformed bytes outside a response
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    /// A proxy answered with bytes that do not decode
    #[error("Malformed response from {address}: {source}")]
    MalformedResponse { address: String, source: CodecError },

    /// The bus carrying the request went away
    #[error("Connection lost: {address}: {message}")]
    ConnectionLost { address: String, message: String },

    #[error("Timeout error: {operation} exceeded {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    /// The caller abandoned the request
    #[error("Request cancelled")]
    Cancelled,

    #[error("No proxies available in data center '{data_center}'")]
    NoProxiesAvailable { data_center: String },

    /// Application error decoded from the response header
    #[error("Remote error: {0}")]
    Rpc(RpcError),

    #[error("Network error: {message}")]
    Network {
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("I/O error: {message}")]
    Io {
        message: String,
        source: std::io::Error,
    },

    #[error("Configuration error: {message}")]
    Configuration {
        message: String,
        field: Option<String>,
    },

    /// Operation on a closed bus, pool or client
    #[error("{what} is closed")]
    Closed { what: String },
}

/// Result type alias for client operations
pub type Result<T> = std::result::Result<T, RpcClientError>;

impl RpcClientError {
    pub fn connection_lost(address: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConnectionLost {
            address: address.into(),
            message: message.into(),
        }
    }

    pub fn timeout(operation: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }

    pub fn no_proxies(data_center: impl Into<String>) -> Self {
        Self::NoProxiesAvailable {
            data_center: data_center.into(),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
            source: None,
        }
    }

    /// Create a network error with source
    pub fn network_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Network {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn configuration(message: impl Into<String>, field: Option<&str>) -> Self {
        Self::Configuration {
            message: message.into(),
            field: field.map(|s| s.to_string()),
        }
    }

    pub fn malformed_response(address: impl Into<String>, source: CodecError) -> Self {
        Self::MalformedResponse {
            address: address.into(),
            source,
        }
    }

    pub fn closed(what: impl Into<String>) -> Self {
        Self::Closed { what: what.into() }
    }

    /// Whether the failover executor may try the next candidate
    pub fn is_retryable(&self) -> bool {
        match self {
            RpcClientError::ConnectionLost { .. } => true,
            RpcClientError::Timeout { .. } => true,
            RpcClientError::Network { .. } => true,
            RpcClientError::Io { .. } => true,
            RpcClientError::Closed { .. } => true,
            RpcClientError::MalformedResponse { .. } => true,
            RpcClientError::Codec(_) => false,
            RpcClientError::Cancelled => false,
            RpcClientError::NoProxiesAvailable { .. } => false,
            RpcClientError::Rpc(_) => false,
            RpcClientError::Configuration { .. } => false,
        }
    }

    /// The remote error, if this is one
    pub fn rpc_error(&self) -> Option<&RpcError> {
        match self {
            RpcClientError::Rpc(error) => Some(error),
            _ => None,
        }
    }

    /// Get error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            RpcClientError::Codec(_) => "codec",
            RpcClientError::MalformedResponse { .. } => "malformed_response",
            RpcClientError::ConnectionLost { .. } => "connection_lost",
            RpcClientError::Timeout { .. } => "timeout",
            RpcClientError::Cancelled => "cancelled",
            RpcClientError::NoProxiesAvailable { .. } => "no_proxies",
            RpcClientError::Rpc(_) => "rpc",
            RpcClientError::Network { .. } => "network",
            RpcClientError::Io { .. } => "io",
            RpcClientError::Configuration { .. } => "configuration",
            RpcClientError::Closed { .. } => "closed",
        }
    }
}

// Boxed sources and io::Error are not Clone, so sources are dropped
impl Clone for RpcClientError {
    fn clone(&self) -> Self {
        match self {
            RpcClientError::Codec(error) => RpcClientError::Codec(error.clone()),
            RpcClientError::MalformedResponse { address, source } => {
                RpcClientError::MalformedResponse {
                    address: address.clone(),
                    source: source.clone(),
                }
            }
            RpcClientError::ConnectionLost { address, message } => RpcClientError::ConnectionLost {
                address: address.clone(),
                message: message.clone(),
            },
            RpcClientError::Timeout {
                operation,
                timeout_ms,
            } => RpcClientError::Timeout {
                operation: operation.clone(),
                timeout_ms: *timeout_ms,
            },
            RpcClientError::Cancelled => RpcClientError::Cancelled,
            RpcClientError::NoProxiesAvailable { data_center } => {
                RpcClientError::NoProxiesAvailable {
                    data_center: data_center.clone(),
                }
            }
            RpcClientError::Rpc(error) => RpcClientError::Rpc(error.clone()),
            RpcClientError::Network { message, .. } => RpcClientError::Network {
                message: message.clone(),
                source: None,
            },
            RpcClientError::Io { message, source } => RpcClientError::Io {
                message: message.clone(),
                source: std::io::Error::new(source.kind(), message.as_str()),
            },
            RpcClientError::Configuration { message, field } => RpcClientError::Configuration {
                message: message.clone(),
                field: field.clone(),
            },
            RpcClientError::Closed { what } => RpcClientError::Closed { what: what.clone() },
        }
    }
}

impl From<std::io::Error> for RpcClientError {
    fn from(error: std::io::Error) -> Self {
        RpcClientError::Io {
            message: error.to_string(),
            source: error,
        }
    }
}

impl From<RpcError> for RpcClientError {
    fn from(error: RpcError) -> Self {
        RpcClientError::Rpc(error)
    }
}

impl From<bincode::Error> for RpcClientError {
    fn from(error: bincode::Error) -> Self {
        RpcClientError::Codec(CodecError::from(error))
    }
}
