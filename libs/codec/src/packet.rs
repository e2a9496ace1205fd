//! # Bus Packet Framing
//!
//! Every bus message travels as one packet on the byte stream:
//!
//! ```text
//! ┌───────────┬──────┬───────┬───────────┬────────────┐
//! │ signature │ type │ flags │ packet id │ header crc │  28 bytes
//! │  u32 LE   │u16 LE│u16 LE │  16 bytes │   u32 LE   │
//! └───────────┴──────┴───────┴───────────┴────────────┘
//! Message packets continue with:
//! [part count u32 LE][part size u32 LE * count][part bytes ...]
//! ```
//!
//! Ack packets are the fixed header alone and echo the packet id of the
//! message they confirm. The crc covers the 24 bytes before it, so a stream
//! that lost sync is detected at the next header.

use crate::error::{CodecError, CodecResult};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use bytes::{Bytes, BytesMut};
use rpc_types::{Guid, PacketFlags, PacketType, PACKET_SIGNATURE};
use std::io::Cursor;

pub const PACKET_HEADER_SIZE: usize = 28;
const CRC_OFFSET: usize = 24;

pub const DEFAULT_MAX_PART_COUNT: usize = 1 << 16;
pub const DEFAULT_MAX_PART_SIZE: usize = 256 * 1024 * 1024;

/// Upper bounds applied to incoming message packets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketLimits {
    pub max_part_count: usize,
    pub max_part_size: usize,
}

impl Default for PacketLimits {
    fn default() -> Self {
        Self {
            max_part_count: DEFAULT_MAX_PART_COUNT,
            max_part_size: DEFAULT_MAX_PART_SIZE,
        }
    }
}

impl PacketLimits {
    pub fn check_part_count(&self, count: usize) -> CodecResult<()> {
        if count > self.max_part_count {
            return Err(CodecError::corrupt_packet(format!(
                "part count {} exceeds limit {}",
                count, self.max_part_count
            )));
        }
        Ok(())
    }

    pub fn check_part_size(&self, index: usize, size: usize) -> CodecResult<()> {
        if size > self.max_part_size {
            return Err(CodecError::corrupt_packet(format!(
                "part {} size {} exceeds limit {}",
                index, size, self.max_part_size
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub packet_type: PacketType,
    pub flags: PacketFlags,
    pub packet_id: Guid,
}

impl PacketHeader {
    pub fn message(packet_id: Guid, flags: PacketFlags) -> Self {
        Self {
            packet_type: PacketType::Message,
            flags,
            packet_id,
        }
    }

    pub fn ack(packet_id: Guid) -> Self {
        Self {
            packet_type: PacketType::Ack,
            flags: PacketFlags::NONE,
            packet_id,
        }
    }

    pub fn encode(&self, out: &mut Vec<u8>) {
        let start = out.len();
        out.extend_from_slice(&PACKET_SIGNATURE.to_le_bytes());
        out.extend_from_slice(&u16::from(self.packet_type).to_le_bytes());
        out.extend_from_slice(&self.flags.bits().to_le_bytes());
        out.extend_from_slice(&self.packet_id.to_bytes());
        let crc = crc32fast::hash(&out[start..start + CRC_OFFSET]);
        out.extend_from_slice(&crc.to_le_bytes());
    }

    pub fn decode(data: &[u8]) -> CodecResult<Self> {
        if data.len() < PACKET_HEADER_SIZE {
            return Err(CodecError::truncated(
                PACKET_HEADER_SIZE,
                data.len(),
                "packet header",
            ));
        }

        let mut cursor = Cursor::new(&data[..PACKET_HEADER_SIZE]);
        let signature = cursor.read_u32::<LittleEndian>()?;
        if signature != PACKET_SIGNATURE {
            return Err(CodecError::corrupt_packet(format!(
                "invalid signature {:#010x}, expected {:#010x}",
                signature, PACKET_SIGNATURE
            )));
        }
        let raw_type = cursor.read_u16::<LittleEndian>()?;
        let flags = PacketFlags::from_bits(cursor.read_u16::<LittleEndian>()?);
        let mut id = [0u8; Guid::SIZE];
        std::io::Read::read_exact(&mut cursor, &mut id)?;
        let expected_crc = cursor.read_u32::<LittleEndian>()?;

        let actual_crc = crc32fast::hash(&data[..CRC_OFFSET]);
        if actual_crc != expected_crc {
            return Err(CodecError::corrupt_packet(format!(
                "header checksum mismatch: expected {:#010x}, calculated {:#010x}",
                expected_crc, actual_crc
            )));
        }

        let packet_type = PacketType::from_value(raw_type)
            .map_err(|e| CodecError::corrupt_packet(e.to_string()))?;

        Ok(Self {
            packet_type,
            flags,
            packet_id: Guid::from_bytes(id),
        })
    }
}

/// A decoded packet; `parts` is empty for acks
#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    pub header: PacketHeader,
    pub parts: Vec<Bytes>,
}

/// Serialize a complete packet
pub fn encode_packet(header: &PacketHeader, parts: &[Bytes]) -> CodecResult<Bytes> {
    let payload: usize = parts.iter().map(Bytes::len).sum();
    let mut out = Vec::with_capacity(PACKET_HEADER_SIZE + 4 + 4 * parts.len() + payload);
    header.encode(&mut out);

    if header.packet_type == PacketType::Message {
        let count = u32::try_from(parts.len())
            .map_err(|_| CodecError::corrupt_packet("too many message parts"))?;
        out.write_u32::<LittleEndian>(count)?;
        for part in parts {
            let size = u32::try_from(part.len())
                .map_err(|_| CodecError::corrupt_packet("message part exceeds u32 length"))?;
            out.write_u32::<LittleEndian>(size)?;
        }
        for part in parts {
            out.extend_from_slice(part);
        }
    }

    Ok(Bytes::from(out))
}

/// Decode the part size table that follows a message header
///
/// `data` must hold exactly `4 * count` bytes.
pub fn decode_part_sizes(data: &[u8], limits: &PacketLimits) -> CodecResult<Vec<usize>> {
    let count = data.len() / 4;
    limits.check_part_count(count)?;
    let mut cursor = Cursor::new(data);
    let mut sizes = Vec::with_capacity(count);
    for index in 0..count {
        let size = cursor.read_u32::<LittleEndian>()? as usize;
        limits.check_part_size(index, size)?;
        sizes.push(size);
    }
    Ok(sizes)
}

/// Take one complete packet off the front of `buffer`
///
/// Returns `Ok(None)` when more bytes are needed; the buffer is left as is.
pub fn decode_packet(buffer: &mut BytesMut, limits: &PacketLimits) -> CodecResult<Option<Packet>> {
    if buffer.len() < PACKET_HEADER_SIZE {
        return Ok(None);
    }
    let header = PacketHeader::decode(&buffer[..PACKET_HEADER_SIZE])?;

    if header.packet_type == PacketType::Ack {
        let _ = buffer.split_to(PACKET_HEADER_SIZE);
        return Ok(Some(Packet {
            header,
            parts: Vec::new(),
        }));
    }

    if buffer.len() < PACKET_HEADER_SIZE + 4 {
        return Ok(None);
    }
    let mut cursor = Cursor::new(&buffer[PACKET_HEADER_SIZE..PACKET_HEADER_SIZE + 4]);
    let count = cursor.read_u32::<LittleEndian>()? as usize;
    limits.check_part_count(count)?;

    let table_start = PACKET_HEADER_SIZE + 4;
    let table_end = table_start + 4 * count;
    if buffer.len() < table_end {
        return Ok(None);
    }
    let sizes = decode_part_sizes(&buffer[table_start..table_end], limits)?;
    let total: usize = table_end + sizes.iter().sum::<usize>();
    if buffer.len() < total {
        return Ok(None);
    }

    let mut frame = buffer.split_to(total).freeze();
    let _ = frame.split_to(table_end);
    let parts = sizes.into_iter().map(|size| frame.split_to(size)).collect();

    Ok(Some(Packet { header, parts }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message_packet() -> Bytes {
        let header = PacketHeader::message(Guid::new(7, 8), PacketFlags::REQUEST_ACK);
        encode_packet(
            &header,
            &[Bytes::from_static(b"head"), Bytes::new(), Bytes::from_static(b"tail!")],
        )
        .unwrap()
    }

    #[test]
    fn test_header_layout() {
        let mut out = Vec::new();
        PacketHeader::ack(Guid::new(1, 2)).encode(&mut out);
        assert_eq!(out.len(), PACKET_HEADER_SIZE);
        assert_eq!(hex::encode(&out[..4]), "6f6d6178");
        assert_eq!(&out[4..6], &[1, 0]);

        let decoded = PacketHeader::decode(&out).unwrap();
        assert_eq!(decoded, PacketHeader::ack(Guid::new(1, 2)));
    }

    #[test]
    fn test_message_packet_decodes_in_pieces() {
        let encoded = message_packet();
        let limits = PacketLimits::default();
        let mut buffer = BytesMut::new();

        for chunk in encoded.chunks(5) {
            assert!(decode_packet(&mut buffer, &limits).unwrap().is_none());
            buffer.extend_from_slice(chunk);
        }
        let packet = decode_packet(&mut buffer, &limits).unwrap().unwrap();
        assert!(buffer.is_empty());
        assert_eq!(packet.header.packet_id, Guid::new(7, 8));
        assert!(packet.header.flags.contains(PacketFlags::REQUEST_ACK));
        assert_eq!(packet.parts.len(), 3);
        assert_eq!(&packet.parts[2][..], b"tail!");
        assert!(packet.parts[1].is_empty());
    }

    #[test]
    fn test_back_to_back_packets() {
        let mut buffer = BytesMut::new();
        buffer.extend_from_slice(&message_packet());
        buffer.extend_from_slice(&encode_packet(&PacketHeader::ack(Guid::new(7, 8)), &[]).unwrap());

        let limits = PacketLimits::default();
        let first = decode_packet(&mut buffer, &limits).unwrap().unwrap();
        let second = decode_packet(&mut buffer, &limits).unwrap().unwrap();
        assert_eq!(first.header.packet_type, PacketType::Message);
        assert_eq!(second.header.packet_type, PacketType::Ack);
        assert!(decode_packet(&mut buffer, &limits).unwrap().is_none());
    }

    #[test]
    fn test_corrupt_header_detected() {
        let mut raw = message_packet().to_vec();
        raw[10] ^= 0xff;
        let mut buffer = BytesMut::from(&raw[..]);
        let err = decode_packet(&mut buffer, &PacketLimits::default()).unwrap_err();
        assert!(err.is_stream_fatal());

        let mut raw = message_packet().to_vec();
        raw[0] = 0;
        assert!(matches!(
            PacketHeader::decode(&raw),
            Err(CodecError::CorruptPacket { .. })
        ));
    }

    #[test]
    fn test_limits_enforced() {
        let limits = PacketLimits {
            max_part_count: 2,
            max_part_size: 4,
        };
        let mut buffer = BytesMut::from(&message_packet()[..]);
        assert!(matches!(
            decode_packet(&mut buffer, &limits),
            Err(CodecError::CorruptPacket { .. })
        ));

        let limits = PacketLimits {
            max_part_count: 8,
            max_part_size: 4,
        };
        let mut buffer = BytesMut::from(&message_packet()[..]);
        let err = decode_packet(&mut buffer, &limits).unwrap_err();
        assert!(err.to_string().contains("part 2 size 5"));
    }
}
