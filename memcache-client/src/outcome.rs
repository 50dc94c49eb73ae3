//! Result types for cache reads and writes.
//!
//! A miss or a failed write is an ordinary outcome for a cache, so these are
//! values rather than errors. Faults that must never be swallowed (bad keys,
//! unserializable values) still come back as [`Error`](crate::Error).

use crate::error::Error;
use crate::value::Value;

/// Why a read or write did not complete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Failure {
    /// The value exceeds the server's item size limit, even after compression.
    TooLarge,
    /// The server answered with an error.
    Server(String),
    /// The node could not be reached or the exchange broke down.
    Transport(String),
    /// The stored payload could not be decompressed or decoded.
    Corrupt(String),
}

impl Failure {
    pub(crate) fn from_error(err: &Error) -> Self {
        match err {
            Error::Server(msg) if is_too_large(msg) => Failure::TooLarge,
            Error::Server(msg) => Failure::Server(msg.clone()),
            other => Failure::Transport(other.to_string()),
        }
    }
}

/// memcached reports oversize items as `SERVER_ERROR object too large for cache`
/// (text) or status 0x0003 "Value too large" (binary).
pub(crate) fn is_too_large(msg: &str) -> bool {
    let msg = msg.to_ascii_lowercase();
    msg.contains("too large")
}

/// Outcome of a single-key read.
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup {
    Hit(Value),
    Miss,
    Failure(Failure),
}

impl Lookup {
    /// Returns the value on a hit.
    pub fn into_value(self) -> Option<Value> {
        match self {
            Lookup::Hit(value) => Some(value),
            _ => None,
        }
    }

    pub fn is_hit(&self) -> bool {
        matches!(self, Lookup::Hit(_))
    }
}

/// Outcome of a single-key write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Store {
    /// The item was written.
    Stored,
    /// ADD found an existing key, or REPLACE found none.
    NotStored,
    Failure(Failure),
}

impl Store {
    /// Collapses the outcome to the boolean a generic cache interface expects.
    pub fn is_stored(&self) -> bool {
        matches!(self, Store::Stored)
    }
}
