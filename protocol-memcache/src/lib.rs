//! Client-side Memcache protocol codec.
//!
//! Encodes requests and incrementally parses responses for both the ASCII
//! and binary protocols. Parsers return [`ParseError::Incomplete`] until a
//! whole response is buffered, so callers read more data and retry.
//!
//! # Features
//!
//! - `ascii` (default): ASCII text protocol support
//! - `binary`: Binary protocol support
//! - `full`: Both ASCII and binary protocols
//!
//! # ASCII Protocol
//!
//! ```
//! use bytes::BytesMut;
//! use protocol_memcache::{Request, Response};
//!
//! let mut buf = BytesMut::new();
//! Request::get(b"mykey").encode(&mut buf);
//! assert_eq!(&buf[..], b"get mykey\r\n");
//!
//! let response_data = b"VALUE mykey 0 5\r\nhello\r\nEND\r\n";
//! let (response, consumed) = Response::parse(response_data).unwrap();
//! assert_eq!(consumed, response_data.len());
//! assert!(!response.is_miss());
//! ```
//!
//! # Binary Protocol
//!
//! The binary protocol uses fixed 24-byte headers. Enable with the `binary`
//! feature; see the [`binary`] module.

mod error;
#[cfg(feature = "ascii")]
mod request;
#[cfg(feature = "ascii")]
mod response;

#[cfg(feature = "binary")]
pub mod binary;

pub use error::ParseError;
#[cfg(feature = "ascii")]
pub use request::{Request, StorageCommand, StorageRequest};
#[cfg(feature = "ascii")]
pub use response::{Item, Response};

/// Longest key memcached accepts.
pub const MAX_KEY_LEN: usize = 250;

/// Default limit on a single value, matching memcached's 1MB item size.
pub const DEFAULT_MAX_VALUE_LEN: usize = 1024 * 1024;
