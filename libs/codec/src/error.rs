//! Codec errors for message envelopes, bus packets and rowsets
//!
//! Each variant carries enough context to tell a truncated stream from a peer
//! speaking a different format. Malformed bytes are fatal to the single
//! message being decoded; only `CorruptPacket` implies the stream itself is
//! unusable.

use rpc_types::{ColumnValueType, RowsetKind, TypesError};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum CodecError {
    /// Envelope framing or envelope header is malformed
    #[error("Corrupt envelope: {reason} (buffer: {buffer_size} bytes)")]
    CorruptEnvelope { reason: String, buffer_size: usize },

    /// Only the identity codec (0) is implemented
    #[error("Unsupported compression codec {codec}: only codec 0 is implemented")]
    UnsupportedCodec { codec: u32 },

    /// Rowset descriptor declares a wire format version this client does not speak
    #[error("Unsupported rowset wire format version {actual}: expected {expected}")]
    UnsupportedWireFormat { expected: u32, actual: u32 },

    /// Rowset descriptor declares the other rowset kind
    #[error("Wrong rowset kind {actual}: expected {expected:?}")]
    WrongRowsetKind { expected: RowsetKind, actual: u32 },

    /// Bus packet framing is broken; the stream cannot be resynchronised
    #[error("Corrupt packet: {reason}")]
    CorruptPacket { reason: String },

    /// Buffer ended before a declared structure was complete
    #[error("Truncated data: need {need} bytes, got {got} (context: {context})")]
    Truncated {
        need: usize,
        got: usize,
        context: String,
    },

    /// Header or body (de)serialization failed
    #[error("Serialization failed: {0}")]
    Serialization(String),

    /// A cell could not be coerced to its column type
    #[error("Cannot convert value of type {actual:?} to {expected:?} for column '{column}'")]
    ValueConversion {
        column: String,
        expected: ColumnValueType,
        actual: ColumnValueType,
    },

    /// Rows do not line up with the schema they are encoded against
    #[error("Schema mismatch: {0}")]
    SchemaMismatch(String),

    /// Unknown tag or other type-level violation
    #[error(transparent)]
    Types(#[from] TypesError),
}

impl CodecError {
    pub fn corrupt_envelope(reason: impl Into<String>, buffer_size: usize) -> Self {
        Self::CorruptEnvelope {
            reason: reason.into(),
            buffer_size,
        }
    }

    pub fn corrupt_packet(reason: impl Into<String>) -> Self {
        Self::CorruptPacket {
            reason: reason.into(),
        }
    }

    pub fn truncated(need: usize, got: usize, context: impl Into<String>) -> Self {
        Self::Truncated {
            need,
            got,
            context: context.into(),
        }
    }

    pub fn schema_mismatch(message: impl Into<String>) -> Self {
        Self::SchemaMismatch(message.into())
    }

    /// True when the error means the byte stream itself can no longer be trusted
    pub fn is_stream_fatal(&self) -> bool {
        matches!(self, CodecError::CorruptPacket { .. })
    }
}

impl From<bincode::Error> for CodecError {
    fn from(err: bincode::Error) -> Self {
        CodecError::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for CodecError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::UnexpectedEof => CodecError::truncated(0, 0, err.to_string()),
            _ => CodecError::Serialization(err.to_string()),
        }
    }
}

/// Result type for codec operations
pub type CodecResult<T> = std::result::Result<T, CodecError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages_carry_context() {
        let err = CodecError::UnsupportedWireFormat {
            expected: 1,
            actual: 7,
        };
        assert_eq!(
            err.to_string(),
            "Unsupported rowset wire format version 7: expected 1"
        );

        let err = CodecError::truncated(8, 3, "envelope prefix");
        assert!(err.to_string().contains("need 8 bytes, got 3"));
    }

    #[test]
    fn test_stream_fatal_classification() {
        assert!(CodecError::corrupt_packet("bad signature").is_stream_fatal());
        assert!(!CodecError::corrupt_envelope("short", 2).is_stream_fatal());
        assert!(!CodecError::UnsupportedCodec { codec: 3 }.is_stream_fatal());
    }
}
