//! Binary protocol response parsing and encoding.
//!
//! Clients parse frames with [`ParsedBinaryResponse`]. [`BinaryResponse`]
//! encodes the server half of the exchange and is used by test servers.

use bytes::{BufMut, BytesMut};

use super::header::{HEADER_SIZE, Opcode, ResponseHeader, Status, read_u32, read_u64};
use crate::DEFAULT_MAX_VALUE_LEN;
use crate::error::ParseError;

/// A binary protocol response builder.
pub struct BinaryResponse;

impl BinaryResponse {
    /// Encode a successful GET/GETK response.
    ///
    /// The response carries a 4-byte flags extra, and the key when `key` is
    /// `Some` (GETK/GETKQ).
    pub fn encode_value(
        buf: &mut BytesMut,
        opcode: Opcode,
        opaque: u32,
        flags: u32,
        key: Option<&[u8]>,
        value: &[u8],
    ) -> usize {
        let mut header = ResponseHeader::new(opcode, Status::NoError);
        header.opaque = opaque;
        put_frame(buf, header, &flags.to_be_bytes(), key.unwrap_or_default(), value)
    }

    /// Encode an INCREMENT/DECREMENT success response holding the new value.
    pub fn encode_counter(buf: &mut BytesMut, opcode: Opcode, opaque: u32, value: u64) -> usize {
        let mut header = ResponseHeader::new(opcode, Status::NoError);
        header.opaque = opaque;
        put_frame(buf, header, &[], &[], &value.to_be_bytes())
    }

    /// Encode a VERSION response.
    pub fn encode_version(buf: &mut BytesMut, opaque: u32, version: &[u8]) -> usize {
        let mut header = ResponseHeader::new(Opcode::Version, Status::NoError);
        header.opaque = opaque;
        put_frame(buf, header, &[], &[], version)
    }

    /// Encode a response with only a status and an optional message body.
    ///
    /// Used for plain successes (SET, DELETE, FLUSH, NOOP) as well as errors.
    pub fn encode_status(
        buf: &mut BytesMut,
        opcode: Opcode,
        opaque: u32,
        status: Status,
        message: &[u8],
    ) -> usize {
        let mut header = ResponseHeader::new(opcode, status);
        header.opaque = opaque;
        put_frame(buf, header, &[], &[], message)
    }
}

fn put_frame(
    buf: &mut BytesMut,
    mut header: ResponseHeader,
    extras: &[u8],
    key: &[u8],
    value: &[u8],
) -> usize {
    let total_body = extras.len() + key.len() + value.len();
    header.extras_length = extras.len() as u8;
    header.key_length = key.len() as u16;
    header.total_body_length = total_body as u32;

    buf.reserve(HEADER_SIZE + total_body);
    buf.put_slice(&header.to_bytes());
    buf.put_slice(extras);
    buf.put_slice(key);
    buf.put_slice(value);
    HEADER_SIZE + total_body
}

/// Parsed binary response for client use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedBinaryResponse<'a> {
    /// GET/GETK response with value
    Value {
        opcode: Opcode,
        opaque: u32,
        cas: u64,
        flags: u32,
        key: Option<&'a [u8]>,
        value: &'a [u8],
    },
    /// Counter response (INCR/DECR)
    Counter {
        opcode: Opcode,
        opaque: u32,
        cas: u64,
        value: u64,
    },
    /// Simple success response (SET, DELETE, FLUSH, NOOP, SASL, etc.)
    Success { opcode: Opcode, opaque: u32, cas: u64 },
    /// Error response; the body is the server's message.
    Error {
        opcode: Opcode,
        status: Status,
        opaque: u32,
        message: &'a [u8],
    },
    /// VERSION response
    Version { opaque: u32, version: &'a [u8] },
}

impl<'a> ParsedBinaryResponse<'a> {
    /// Parse a binary response from a buffer.
    #[inline]
    pub fn parse(data: &'a [u8]) -> Result<(Self, usize), ParseError> {
        Self::parse_with_limit(data, DEFAULT_MAX_VALUE_LEN)
    }

    /// Parse a binary response, rejecting values larger than `max_value_len`
    /// as soon as the header is available.
    pub fn parse_with_limit(
        data: &'a [u8],
        max_value_len: usize,
    ) -> Result<(Self, usize), ParseError> {
        let header = ResponseHeader::parse(data)?;

        let value_len = header
            .value_length()
            .ok_or(ParseError::Protocol("header lengths exceed body length"))?;
        if value_len > max_value_len {
            return Err(ParseError::ValueTooLarge {
                len: value_len,
                limit: max_value_len,
            });
        }

        let total_len = HEADER_SIZE + header.total_body_length as usize;
        if data.len() < total_len {
            return Err(ParseError::Incomplete);
        }

        let body = &data[HEADER_SIZE..total_len];
        let extras_len = header.extras_length as usize;
        let key_end = extras_len + header.key_length as usize;

        if !header.status.is_success() {
            return Ok((
                ParsedBinaryResponse::Error {
                    opcode: header.opcode,
                    status: header.status,
                    opaque: header.opaque,
                    message: &body[key_end..],
                },
                total_len,
            ));
        }

        let response = match header.opcode {
            Opcode::Get | Opcode::GetQ | Opcode::GetK | Opcode::GetKQ => {
                if extras_len < 4 {
                    return Err(ParseError::Protocol("missing flags in value response"));
                }
                let key = &body[extras_len..key_end];
                ParsedBinaryResponse::Value {
                    opcode: header.opcode,
                    opaque: header.opaque,
                    cas: header.cas,
                    flags: read_u32(body, 0),
                    key: (!key.is_empty()).then_some(key),
                    value: &body[key_end..],
                }
            }
            Opcode::Increment | Opcode::Decrement => {
                if body.len() != 8 {
                    return Err(ParseError::Protocol("counter response must be 8 bytes"));
                }
                ParsedBinaryResponse::Counter {
                    opcode: header.opcode,
                    opaque: header.opaque,
                    cas: header.cas,
                    value: read_u64(body, 0),
                }
            }
            Opcode::Version => ParsedBinaryResponse::Version {
                opaque: header.opaque,
                version: &body[key_end..],
            },
            _ => ParsedBinaryResponse::Success {
                opcode: header.opcode,
                opaque: header.opaque,
                cas: header.cas,
            },
        };

        Ok((response, total_len))
    }

    /// Returns the opaque value from this response.
    pub fn opaque(&self) -> u32 {
        match self {
            ParsedBinaryResponse::Value { opaque, .. }
            | ParsedBinaryResponse::Counter { opaque, .. }
            | ParsedBinaryResponse::Success { opaque, .. }
            | ParsedBinaryResponse::Error { opaque, .. }
            | ParsedBinaryResponse::Version { opaque, .. } => *opaque,
        }
    }

    /// Returns the status carried by this response.
    pub fn status(&self) -> Status {
        match self {
            ParsedBinaryResponse::Error { status, .. } => *status,
            _ => Status::NoError,
        }
    }
}
