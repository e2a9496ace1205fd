//! Protocol constants and wire tags
//!
//! These are fundamental data types shared by the codec and the transport.
//! Encoding logic lives in `rpc-codec`.

use crate::error::{Result, TypesError};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::{Deserialize, Serialize};

/// First four bytes of every bus packet
pub const PACKET_SIGNATURE: u32 = 0x7861_6d6f;

/// Rowset wire format version understood by this client
pub const WIRE_FORMAT_VERSION: u32 = 1;

/// Tag stored in the first four bytes of an RPC message's first part
#[repr(u32)]
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TryFromPrimitive, IntoPrimitive,
)]
pub enum RpcMessageType {
    Request = 0x6963_7072,
    Cancel = 0x6363_7072,
    Response = 0x6f63_7072,
}

impl RpcMessageType {
    pub fn from_value(value: u32) -> Result<Self> {
        Self::try_from(value).map_err(|_| TypesError::UnknownMessageType { value })
    }

    pub fn value(self) -> u32 {
        self.into()
    }
}

/// Bus packet kind
#[repr(u16)]
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TryFromPrimitive, IntoPrimitive,
)]
pub enum PacketType {
    /// Carries a multi-part message
    Message = 0,
    /// Confirms receipt of a message packet with the same id
    Ack = 1,
}

impl PacketType {
    pub fn from_value(value: u16) -> Result<Self> {
        Self::try_from(value).map_err(|_| TypesError::UnknownPacketType { value })
    }
}

/// Packet flag bits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PacketFlags(u16);

impl PacketFlags {
    pub const NONE: PacketFlags = PacketFlags(0);
    /// Sender wants an Ack packet back
    pub const REQUEST_ACK: PacketFlags = PacketFlags(0b0000_0001);

    pub const fn from_bits(bits: u16) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u16 {
        self.0
    }

    pub const fn contains(self, other: PacketFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn union(self, other: PacketFlags) -> Self {
        Self(self.0 | other.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_type_tags() {
        assert_eq!(RpcMessageType::Request.value(), 0x6963_7072);
        assert_eq!(
            RpcMessageType::from_value(0x6f63_7072).unwrap(),
            RpcMessageType::Response
        );
        assert_eq!(
            RpcMessageType::from_value(7),
            Err(TypesError::UnknownMessageType { value: 7 })
        );
    }

    #[test]
    fn test_packet_flags() {
        let flags = PacketFlags::NONE.union(PacketFlags::REQUEST_ACK);
        assert!(flags.contains(PacketFlags::REQUEST_ACK));
        assert!(!PacketFlags::NONE.contains(PacketFlags::REQUEST_ACK));
        assert_eq!(PacketFlags::from_bits(flags.bits()), flags);
        assert!(PacketType::from_value(9).is_err());
    }
}
