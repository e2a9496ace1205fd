//! # Proxy RPC Codec
//!
//! ## Purpose
//!
//! The "rules" layer of the proxy RPC client: pure functions that turn
//! headers, bodies and rows into wire bytes and back. No state, no I/O.
//!
//! ## Architecture Role
//!
//! ```text
//! libs/types → [codec] → libs/network
//!     ↑           ↓            ↓
//! Pure Data   Wire Rules    Transport
//! Guid, rows  Envelopes     Bus, RpcClient
//! ```
//!
//! ## What This Crate Contains
//! - [`message`]: type-tagged headers, the fixed body envelope, request /
//!   response / cancel message builders and parsers
//! - [`packet`]: bus packet framing with header checksums and part limits
//! - [`wire`]: varint-based rowset reader and writer
//! - [`rowset`]: descriptor validation, rowset (de)serialization, value
//!   coercion and row consumers
//! - [`RpcError`]: remote error trees carried in response headers
//!
//! ## What This Crate Does NOT Contain
//! - Sockets, timers or futures (belongs in `rpc-network`)
//! - Compression codecs; only the identity codec is accepted

pub mod error;
pub mod message;
pub mod packet;
pub mod rowset;
pub mod rpc_error;
pub mod wire;

pub use error::{CodecError, CodecResult};
pub use message::{
    create_cancel_message, create_error_response_message, create_request_message,
    create_response_message, decode_envelope, decode_header, decode_message_type, encode_envelope,
    encode_header, parse_cancel_message, parse_request_message, parse_response_message,
    EnvelopeHeader, ParsedRequest, ParsedResponse, RequestCancelationHeader, RequestHeader,
    ResponseHeader, IDENTITY_CODEC,
};
pub use packet::{
    decode_packet, decode_part_sizes, encode_packet, Packet, PacketHeader, PacketLimits,
    PACKET_HEADER_SIZE,
};
pub use rowset::{
    build_unversioned_row, convert_key_columns, convert_value_columns,
    deserialize_rowset_schema, deserialize_unversioned_rowset, deserialize_versioned_rowset,
    make_rowset_descriptor, serialize_unversioned_rowset, serialize_versioned_rowset,
    validate_descriptor, ConvertOptions, FromUnversionedRow, MappedRowConsumer, RowConsumer,
    UnversionedRowset, VersionedRowset,
};
pub use rpc_error::RpcError;
pub use wire::{WireRowsetReader, WireRowsetWriter};
