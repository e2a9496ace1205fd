//! Error types for identifier parsing and enum tag validation

use thiserror::Error;

/// Errors raised while interpreting raw type-level data
#[derive(Debug, Error, Clone, PartialEq)]
pub enum TypesError {
    /// Guid text is not four dash-separated hex groups
    #[error("Invalid guid '{input}': expected four dash-separated hex groups")]
    InvalidGuid { input: String },

    /// Column value type tag is not a known `ColumnValueType`
    #[error("Unknown column value type {value:#04x}")]
    UnknownValueType { value: u32 },

    /// RPC message type tag is not a known `RpcMessageType`
    #[error("Unknown RPC message type {value:#010x}")]
    UnknownMessageType { value: u32 },

    /// Packet type tag is not a known `PacketType`
    #[error("Unknown packet type {value}")]
    UnknownPacketType { value: u16 },

    /// Rowset kind tag is not a known `RowsetKind`
    #[error("Unknown rowset kind {value}")]
    UnknownRowsetKind { value: u32 },

    /// Column lookup by name failed
    #[error("Column '{name}' is not part of the schema")]
    UnknownColumn { name: String },

    /// Key columns must form a prefix of the schema
    #[error("Key column '{name}' at position {position} follows a value column")]
    KeyColumnsNotPrefix { name: String, position: usize },

    /// Microsecond arithmetic overflowed
    #[error("Time value overflow: {message}")]
    TimeOverflow { message: String },
}

/// Result alias for type-level operations
pub type Result<T> = std::result::Result<T, TypesError>;
