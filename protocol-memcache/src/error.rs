//! Framing errors.

/// Why a buffer could not be decoded into a response.
///
/// Everything except [`ParseError::Incomplete`] means the byte stream can no
/// longer be trusted and the connection should be dropped.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    /// The buffer ends mid-frame. Read more and parse again.
    #[error("incomplete data")]
    Incomplete,

    #[error("protocol error: {0}")]
    Protocol(&'static str),

    #[error("invalid number")]
    InvalidNumber,

    /// A data block announced more bytes than the configured limit.
    #[error("value of {len} bytes exceeds limit of {limit} bytes")]
    ValueTooLarge { len: usize, limit: usize },

    #[cfg(feature = "binary")]
    #[error("unknown opcode: {0:#04x}")]
    UnknownOpcode(u8),

    #[cfg(feature = "binary")]
    #[error("unknown status: {0:#06x}")]
    UnknownStatus(u16),

    #[cfg(feature = "binary")]
    #[error("invalid magic byte: {0:#04x}")]
    InvalidMagic(u8),
}

impl ParseError {
    #[inline]
    pub fn is_incomplete(&self) -> bool {
        matches!(self, ParseError::Incomplete)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_incomplete_is_recoverable() {
        assert!(ParseError::Incomplete.is_incomplete());
        for fatal in [
            ParseError::Protocol("bad line"),
            ParseError::InvalidNumber,
            ParseError::ValueTooLarge { len: 2, limit: 1 },
        ] {
            assert!(!fatal.is_incomplete(), "{fatal}");
        }
    }

    #[test]
    fn messages() {
        assert_eq!(
            ParseError::Protocol("expected CRLF").to_string(),
            "protocol error: expected CRLF"
        );
        assert_eq!(
            ParseError::ValueTooLarge { len: 10, limit: 4 }.to_string(),
            "value of 10 bytes exceeds limit of 4 bytes"
        );
    }

    #[cfg(feature = "binary")]
    #[test]
    fn binary_messages() {
        assert_eq!(ParseError::UnknownOpcode(0x42).to_string(), "unknown opcode: 0x42");
        assert_eq!(ParseError::UnknownStatus(0x99).to_string(), "unknown status: 0x0099");
        assert_eq!(ParseError::InvalidMagic(0x81).to_string(), "invalid magic byte: 0x81");
    }
}
