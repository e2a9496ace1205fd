//! # Proxy RPC Types
//!
//! Plain data shared by every layer of the proxy RPC client.
//!
//! ## Architecture Role
//!
//! ```text
//! libs/types → libs/codec → libs/network
//!     ↑             ↓             ↓
//!  Pure data    Wire rules    Connections
//!  Guid, rows   Envelopes     Bus, pools
//! ```
//!
//! ## What This Crate Contains
//! - [`Guid`]: 128-bit request, trace and packet identifiers
//! - [`RpcMessageType`] and [`PacketType`]: wire tags
//! - [`TableSchema`] / [`ColumnSchema`] / [`ColumnValueType`]
//! - [`UnversionedValue`], [`VersionedValue`], [`UnversionedRow`], [`VersionedRow`]
//! - [`RowsetDescriptor`] and [`RowsetKind`]
//! - Microsecond conversion helpers in [`time`]
//!
//! ## What This Crate Does NOT Contain
//! - Byte-level encoding (belongs in `rpc-codec`)
//! - Sockets, futures or timers (belongs in `rpc-network`)

pub mod error;
pub mod guid;
pub mod protocol;
pub mod table;
pub mod time;

pub use error::{Result, TypesError};
pub use guid::Guid;
pub use protocol::{
    PacketFlags, PacketType, RpcMessageType, PACKET_SIGNATURE, WIRE_FORMAT_VERSION,
};
pub use table::{
    ColumnDescriptor, ColumnSchema, ColumnValueType, RowsetDescriptor, RowsetKind, TableSchema,
    TableSchemaBuilder, UnversionedRow, UnversionedValue, Value, VersionedRow, VersionedValue,
};
pub use time::{
    duration_from_micros, duration_to_micros, system_time_from_micros, system_time_to_micros,
};
