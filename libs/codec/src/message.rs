//! # RPC Message Construction and Parsing
//!
//! ## Purpose
//!
//! Builds and parses the multi-part messages exchanged with proxies. A message
//! is an ordered list of byte parts:
//!
//! ```text
//! part 0: [type tag u32 LE][header (bincode)]
//! part 1: [envelope header len u32 LE][body len u32 LE][envelope header][body]
//! part 2+: attachments, passed through untouched
//! ```
//!
//! Cancellation messages and error responses consist of part 0 only.
//!
//! ## Architecture Role
//!
//! ```text
//! RpcClient → [create_request_message] → Vec<Bytes> → Bus
//! Bus → Vec<Bytes> → [parse_response_message] → RpcClient
//! ```
//!
//! Bodies are opaque here; typed requests serialize their own payloads.

use crate::error::{CodecError, CodecResult};
use crate::rpc_error::RpcError;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use bytes::Bytes;
use rpc_types::{Guid, RpcMessageType};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::io::Cursor;

/// Size of the fixed envelope prefix: header length plus body length
pub const ENVELOPE_PREFIX_SIZE: usize = 8;

/// Size of the message type tag at the start of part 0
pub const MESSAGE_TYPE_SIZE: usize = 4;

/// The only supported compression codec
pub const IDENTITY_CODEC: u32 = 0;

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EnvelopeHeader {
    pub codec: u32,
}

/// Header of an outgoing request
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RequestHeader {
    pub request_id: Guid,
    pub service: String,
    pub method: String,
    pub trace_id: Option<Guid>,
    /// Request timeout in microseconds
    pub timeout: Option<u64>,
    /// Client send time in microseconds since the Unix epoch
    pub start_time: Option<u64>,
    pub request_ack: bool,
    /// Set when the request is re-sent to another proxy after a failure
    pub retry: bool,
    pub user: Option<String>,
    /// Authentication token sent alongside `user`
    pub user_token: Option<String>,
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ResponseHeader {
    pub request_id: Guid,
    pub error: Option<RpcError>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RequestCancelationHeader {
    pub request_id: Guid,
    pub service: String,
    pub method: String,
}

/// Request message split into its parts
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedRequest {
    pub header: RequestHeader,
    pub body: Bytes,
    pub attachments: Vec<Bytes>,
}

/// Response message split into its parts
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedResponse {
    pub header: ResponseHeader,
    /// Empty for error responses
    pub body: Bytes,
    pub attachments: Vec<Bytes>,
}

/// Encode part 0: little-endian type tag followed by the serialized header
pub fn encode_header<H: Serialize>(message_type: RpcMessageType, header: &H) -> CodecResult<Bytes> {
    let size = bincode::serialized_size(header)? as usize;
    let mut out = Vec::with_capacity(MESSAGE_TYPE_SIZE + size);
    out.write_u32::<LittleEndian>(message_type.value())?;
    bincode::serialize_into(&mut out, header)?;
    Ok(Bytes::from(out))
}

/// Read the type tag of part 0
pub fn decode_message_type(part: &[u8]) -> CodecResult<RpcMessageType> {
    if part.len() < MESSAGE_TYPE_SIZE {
        return Err(CodecError::truncated(
            MESSAGE_TYPE_SIZE,
            part.len(),
            "message type tag",
        ));
    }
    let mut cursor = Cursor::new(part);
    let tag = cursor.read_u32::<LittleEndian>()?;
    Ok(RpcMessageType::from_value(tag)?)
}

/// Decode part 0, checking the type tag against `expected`
pub fn decode_header<H: DeserializeOwned>(
    part: &[u8],
    expected: RpcMessageType,
) -> CodecResult<H> {
    let actual = decode_message_type(part)?;
    if actual != expected {
        return Err(CodecError::schema_mismatch(format!(
            "expected {:?} message, got {:?}",
            expected, actual
        )));
    }
    Ok(bincode::deserialize(&part[MESSAGE_TYPE_SIZE..])?)
}

/// Wrap `body` in the fixed envelope
pub fn encode_envelope(body: &[u8], codec: u32) -> CodecResult<Bytes> {
    if codec != IDENTITY_CODEC {
        return Err(CodecError::UnsupportedCodec { codec });
    }
    let header = bincode::serialize(&EnvelopeHeader { codec })?;
    let body_len = u32::try_from(body.len())
        .map_err(|_| CodecError::schema_mismatch("message body exceeds u32 length"))?;

    let mut out = Vec::with_capacity(ENVELOPE_PREFIX_SIZE + header.len() + body.len());
    out.write_u32::<LittleEndian>(header.len() as u32)?;
    out.write_u32::<LittleEndian>(body_len)?;
    out.extend_from_slice(&header);
    out.extend_from_slice(body);
    Ok(Bytes::from(out))
}

/// Split an enveloped part into its envelope header and body
///
/// The body is a zero-copy slice of `part`.
pub fn decode_envelope(part: &Bytes) -> CodecResult<(EnvelopeHeader, Bytes)> {
    if part.len() < ENVELOPE_PREFIX_SIZE {
        return Err(CodecError::corrupt_envelope(
            "missing fixed envelope prefix",
            part.len(),
        ));
    }
    let mut cursor = Cursor::new(&part[..ENVELOPE_PREFIX_SIZE]);
    let header_len = cursor.read_u32::<LittleEndian>()? as usize;
    let body_len = cursor.read_u32::<LittleEndian>()? as usize;

    let header_end = ENVELOPE_PREFIX_SIZE + header_len;
    let body_end = header_end
        .checked_add(body_len)
        .ok_or_else(|| CodecError::corrupt_envelope("declared lengths overflow", part.len()))?;
    if body_end > part.len() {
        return Err(CodecError::corrupt_envelope(
            format!(
                "declared header {} + body {} bytes exceed buffer",
                header_len, body_len
            ),
            part.len(),
        ));
    }

    let header: EnvelopeHeader = bincode::deserialize(&part[ENVELOPE_PREFIX_SIZE..header_end])
        .map_err(|e| {
            CodecError::corrupt_envelope(format!("bad envelope header: {}", e), part.len())
        })?;
    if header.codec != IDENTITY_CODEC {
        return Err(CodecError::corrupt_envelope(
            format!("compression codec {} is not supported", header.codec),
            part.len(),
        ));
    }

    Ok((header, part.slice(header_end..body_end)))
}

pub fn create_request_message(
    header: &RequestHeader,
    body: &[u8],
    attachments: &[Bytes],
) -> CodecResult<Vec<Bytes>> {
    let mut message = Vec::with_capacity(2 + attachments.len());
    message.push(encode_header(RpcMessageType::Request, header)?);
    message.push(encode_envelope(body, IDENTITY_CODEC)?);
    message.extend(attachments.iter().cloned());
    Ok(message)
}

pub fn create_cancel_message(header: &RequestCancelationHeader) -> CodecResult<Vec<Bytes>> {
    Ok(vec![encode_header(RpcMessageType::Cancel, header)?])
}

pub fn create_response_message(
    request_id: Guid,
    body: &[u8],
    attachments: &[Bytes],
) -> CodecResult<Vec<Bytes>> {
    let header = ResponseHeader {
        request_id,
        error: None,
    };
    let mut message = Vec::with_capacity(2 + attachments.len());
    message.push(encode_header(RpcMessageType::Response, &header)?);
    message.push(encode_envelope(body, IDENTITY_CODEC)?);
    message.extend(attachments.iter().cloned());
    Ok(message)
}

pub fn create_error_response_message(request_id: Guid, error: RpcError) -> CodecResult<Vec<Bytes>> {
    let header = ResponseHeader {
        request_id,
        error: Some(error),
    };
    Ok(vec![encode_header(RpcMessageType::Response, &header)?])
}

pub fn parse_request_message(parts: &[Bytes]) -> CodecResult<ParsedRequest> {
    let (first, rest) = parts
        .split_first()
        .ok_or_else(|| CodecError::truncated(1, 0, "request message parts"))?;
    let header: RequestHeader = decode_header(first, RpcMessageType::Request)?;
    let (body_part, attachments) = rest
        .split_first()
        .ok_or_else(|| CodecError::truncated(2, 1, "request body part"))?;
    let (_, body) = decode_envelope(body_part)?;

    Ok(ParsedRequest {
        header,
        body,
        attachments: attachments.to_vec(),
    })
}

pub fn parse_cancel_message(parts: &[Bytes]) -> CodecResult<RequestCancelationHeader> {
    let first = parts
        .first()
        .ok_or_else(|| CodecError::truncated(1, 0, "cancel message parts"))?;
    decode_header(first, RpcMessageType::Cancel)
}

/// Parse a response; error responses may omit the body part
pub fn parse_response_message(parts: &[Bytes]) -> CodecResult<ParsedResponse> {
    let (first, rest) = parts
        .split_first()
        .ok_or_else(|| CodecError::truncated(1, 0, "response message parts"))?;
    let header: ResponseHeader = decode_header(first, RpcMessageType::Response)?;

    match rest.split_first() {
        Some((body_part, attachments)) => {
            let (_, body) = decode_envelope(body_part)?;
            Ok(ParsedResponse {
                header,
                body,
                attachments: attachments.to_vec(),
            })
        }
        None if header.error.is_some() => Ok(ParsedResponse {
            header,
            body: Bytes::new(),
            attachments: Vec::new(),
        }),
        None => Err(CodecError::truncated(2, 1, "response body part")),
    }
}
