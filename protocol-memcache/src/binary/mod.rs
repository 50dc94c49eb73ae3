//! Memcache binary protocol implementation.
//!
//! The binary protocol uses fixed 24-byte headers for both requests and
//! responses, which avoids text parsing and lets clients correlate pipelined
//! replies through the opaque field.
//!
//! - Request magic: 0x80
//! - Response magic: 0x81
//!
//! # Example
//!
//! ```
//! use bytes::BytesMut;
//! use protocol_memcache::binary::{BinaryRequest, BinaryResponse, Opcode, ParsedBinaryResponse};
//!
//! let mut buf = BytesMut::new();
//! BinaryRequest::encode_get(&mut buf, b"mykey", 1);
//!
//! let mut reply = BytesMut::new();
//! BinaryResponse::encode_value(&mut reply, Opcode::Get, 1, 0, None, b"hello");
//! let (response, consumed) = ParsedBinaryResponse::parse(&reply).unwrap();
//! assert_eq!(consumed, reply.len());
//! assert_eq!(response.opaque(), 1);
//! ```

mod header;
mod request;
mod response;

pub use header::{
    HEADER_SIZE, Opcode, REQUEST_MAGIC, RESPONSE_MAGIC, RequestHeader, ResponseHeader, Status,
};
pub use request::{BinaryRequest, COUNTER_NO_CREATE};
pub use response::{BinaryResponse, ParsedBinaryResponse};

/// Returns true if the data starts with the binary response magic (0x81).
#[inline]
pub fn is_binary_response(data: &[u8]) -> bool {
    data.first().copied() == Some(RESPONSE_MAGIC)
}
