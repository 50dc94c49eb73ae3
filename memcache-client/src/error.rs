//! Error types for the memcache client.

use std::io;

use protocol_memcache::ParseError;

/// Result type for memcache client operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur when using the memcache client.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The key is empty, too long, or contains whitespace or control bytes.
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// INCR/DECR on a key that does not exist.
    #[error("key not found")]
    NotFound,

    /// INCR/DECR on a value that is not a decimal counter.
    #[error("value is not numeric")]
    NotNumeric,

    /// Socket failure: connect, read, write, timeout or EOF.
    #[error("connection error: {0}")]
    Connection(#[from] io::Error),

    /// The server sent bytes the codec could not frame.
    #[error("protocol error: {0}")]
    Protocol(#[from] ParseError),

    /// The server returned ERROR, CLIENT_ERROR, SERVER_ERROR or a binary error status.
    #[error("server error: {0}")]
    Server(String),

    /// The response type did not match the expected type for the command.
    #[error("unexpected response")]
    UnexpectedResponse,

    /// Authentication was rejected while opening a connection.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// No connection became available within the acquire timeout.
    #[error("connection pool exhausted for {node}")]
    PoolExhausted { node: String },

    /// A value could not be serialized or deserialized.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A value could not be compressed or decompressed.
    #[error("compression error: {0}")]
    Compression(io::Error),

    /// Invalid client configuration.
    #[error("config error: {0}")]
    Config(String),
}

impl Error {
    /// Returns true for faults of the node or the link to it.
    ///
    /// These are contained by the client and reported as a miss or a failed
    /// write. Everything else is surfaced to the caller.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Error::Connection(_) | Error::Protocol(_) | Error::Server(_) | Error::UnexpectedResponse
        )
    }

    /// Returns true if retrying the same call may succeed.
    pub fn is_retryable(&self) -> bool {
        self.is_transport() || matches!(self, Error::PoolExhausted { .. })
    }

    /// Returns true if the connection that produced this error must be discarded.
    pub(crate) fn poisons_connection(&self) -> bool {
        matches!(
            self,
            Error::Connection(_) | Error::Protocol(_) | Error::UnexpectedResponse
        )
    }
}
