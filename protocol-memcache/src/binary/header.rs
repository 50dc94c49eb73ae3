//! The fixed 24-byte header shared by binary requests and responses.
//!
//! ```text
//!  0      1      2             4      5      6             8
//!  +------+------+-------------+------+------+-------------+
//!  |magic |opcode| key length  |extras| type |vbucket/stat |
//!  +------+------+-------------+------+------+-------------+
//!  8                          12                          16
//!  | total body length         | opaque                    |
//!  +---------------------------+---------------------------+
//! 16                                                      24
//!  | cas                                                   |
//!  +-------------------------------------------------------+
//! ```
//!
//! Requests carry a vbucket id in bytes 6..8, responses a status. The client
//! never uses vbuckets or data types, so both are written as zero and not
//! kept after parsing.

use crate::error::ParseError;

/// Magic byte for binary request packets.
pub const REQUEST_MAGIC: u8 = 0x80;

/// Magic byte for binary response packets.
pub const RESPONSE_MAGIC: u8 = 0x81;

/// Size of every binary header.
pub const HEADER_SIZE: usize = 24;

macro_rules! opcodes {
    ($($name:ident = $value:literal,)*) => {
        /// Binary protocol opcodes used by the client.
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        #[repr(u8)]
        pub enum Opcode {
            $($name = $value,)*
        }

        impl Opcode {
            pub fn from_u8(value: u8) -> Option<Self> {
                match value {
                    $($value => Some(Opcode::$name),)*
                    _ => None,
                }
            }
        }
    };
}

opcodes! {
    Get = 0x00,
    Set = 0x01,
    Add = 0x02,
    Replace = 0x03,
    Delete = 0x04,
    Increment = 0x05,
    Decrement = 0x06,
    Quit = 0x07,
    Flush = 0x08,
    GetQ = 0x09,
    Noop = 0x0A,
    Version = 0x0B,
    GetK = 0x0C,
    GetKQ = 0x0D,
    SetQ = 0x11,
    AddQ = 0x12,
    ReplaceQ = 0x13,
    DeleteQ = 0x14,
    SaslListMechs = 0x20,
    SaslAuth = 0x21,
    SaslStep = 0x22,
}

impl Opcode {
    /// Quiet opcodes get no response on success (or on a miss, for gets).
    pub fn is_quiet(&self) -> bool {
        self.to_non_quiet() != *self
    }

    /// The loud counterpart of a quiet opcode; other opcodes map to themselves.
    pub fn to_non_quiet(&self) -> Opcode {
        match self {
            Opcode::GetQ => Opcode::Get,
            Opcode::GetKQ => Opcode::GetK,
            Opcode::SetQ => Opcode::Set,
            Opcode::AddQ => Opcode::Add,
            Opcode::ReplaceQ => Opcode::Replace,
            Opcode::DeleteQ => Opcode::Delete,
            other => *other,
        }
    }
}

macro_rules! statuses {
    ($($name:ident = $value:literal => $text:literal,)*) => {
        /// Response status codes.
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        #[repr(u16)]
        pub enum Status {
            $($name = $value,)*
        }

        impl Status {
            pub fn from_u16(value: u16) -> Option<Self> {
                match value {
                    $($value => Some(Status::$name),)*
                    _ => None,
                }
            }

            /// Short human-readable description.
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Status::$name => $text,)*
                }
            }
        }
    };
}

statuses! {
    NoError = 0x0000 => "No error",
    KeyNotFound = 0x0001 => "Key not found",
    KeyExists = 0x0002 => "Key exists",
    ValueTooLarge = 0x0003 => "Value too large",
    InvalidArguments = 0x0004 => "Invalid arguments",
    ItemNotStored = 0x0005 => "Item not stored",
    NonNumericValue = 0x0006 => "Incr/Decr on non-numeric value",
    WrongVbucket = 0x0007 => "Wrong vbucket",
    AuthError = 0x0008 => "Authentication error",
    AuthContinue = 0x0009 => "Authentication continue",
    AuthRequired = 0x0020 => "Authentication required",
    AuthFurtherStep = 0x0021 => "Further authentication steps required",
    UnknownCommand = 0x0081 => "Unknown command",
    OutOfMemory = 0x0082 => "Out of memory",
    NotSupported = 0x0083 => "Not supported",
    InternalError = 0x0084 => "Internal error",
    Busy = 0x0085 => "Busy",
    TempFailure = 0x0086 => "Temporary failure",
}

impl Status {
    pub fn is_success(&self) -> bool {
        *self == Status::NoError
    }

    /// memcached answers `AuthRequired` to any command on a SASL-enabled
    /// server before authentication, and `AuthError` to bad credentials.
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, Status::AuthError | Status::AuthRequired)
    }
}

/// Fields common to both directions, in wire order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Layout {
    opcode: Opcode,
    key_length: u16,
    extras_length: u8,
    word6: u16,
    total_body_length: u32,
    opaque: u32,
    cas: u64,
}

impl Layout {
    fn parse(data: &[u8], magic: u8) -> Result<Self, ParseError> {
        let Some(data) = data.get(..HEADER_SIZE) else {
            return Err(ParseError::Incomplete);
        };
        if data[0] != magic {
            return Err(ParseError::InvalidMagic(data[0]));
        }
        Ok(Self {
            opcode: Opcode::from_u8(data[1]).ok_or(ParseError::UnknownOpcode(data[1]))?,
            key_length: u16::from_be_bytes([data[2], data[3]]),
            extras_length: data[4],
            word6: u16::from_be_bytes([data[6], data[7]]),
            total_body_length: read_u32(data, 8),
            opaque: read_u32(data, 12),
            cas: read_u64(data, 16),
        })
    }

    fn write(&self, magic: u8) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0] = magic;
        buf[1] = self.opcode as u8;
        buf[2..4].copy_from_slice(&self.key_length.to_be_bytes());
        buf[4] = self.extras_length;
        buf[6..8].copy_from_slice(&self.word6.to_be_bytes());
        buf[8..12].copy_from_slice(&self.total_body_length.to_be_bytes());
        buf[12..16].copy_from_slice(&self.opaque.to_be_bytes());
        buf[16..24].copy_from_slice(&self.cas.to_be_bytes());
        buf
    }
}

/// `None` when extras and key claim more bytes than the body holds.
fn value_length(total: u32, extras: u8, key: u16) -> Option<usize> {
    (total as usize).checked_sub(usize::from(extras) + usize::from(key))
}

/// Binary request header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestHeader {
    pub opcode: Opcode,
    pub key_length: u16,
    pub extras_length: u8,
    /// extras + key + value
    pub total_body_length: u32,
    /// Echoed back in the response.
    pub opaque: u32,
    pub cas: u64,
}

impl RequestHeader {
    pub fn new(opcode: Opcode) -> Self {
        Self {
            opcode,
            key_length: 0,
            extras_length: 0,
            total_body_length: 0,
            opaque: 0,
            cas: 0,
        }
    }

    pub fn parse(data: &[u8]) -> Result<Self, ParseError> {
        let l = Layout::parse(data, REQUEST_MAGIC)?;
        Ok(Self {
            opcode: l.opcode,
            key_length: l.key_length,
            extras_length: l.extras_length,
            total_body_length: l.total_body_length,
            opaque: l.opaque,
            cas: l.cas,
        })
    }

    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        Layout {
            opcode: self.opcode,
            key_length: self.key_length,
            extras_length: self.extras_length,
            word6: 0,
            total_body_length: self.total_body_length,
            opaque: self.opaque,
            cas: self.cas,
        }
        .write(REQUEST_MAGIC)
    }

    pub fn value_length(&self) -> Option<usize> {
        value_length(self.total_body_length, self.extras_length, self.key_length)
    }
}

/// Binary response header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseHeader {
    /// Echoed from the request.
    pub opcode: Opcode,
    /// Non-zero only for GetK/GetKQ hits.
    pub key_length: u16,
    /// 4 (flags) on get hits.
    pub extras_length: u8,
    pub status: Status,
    pub total_body_length: u32,
    pub opaque: u32,
    pub cas: u64,
}

impl ResponseHeader {
    pub fn new(opcode: Opcode, status: Status) -> Self {
        Self {
            opcode,
            key_length: 0,
            extras_length: 0,
            status,
            total_body_length: 0,
            opaque: 0,
            cas: 0,
        }
    }

    /// Unknown status codes are an error: the body that follows cannot be
    /// interpreted without knowing what the status means.
    pub fn parse(data: &[u8]) -> Result<Self, ParseError> {
        let l = Layout::parse(data, RESPONSE_MAGIC)?;
        Ok(Self {
            opcode: l.opcode,
            key_length: l.key_length,
            extras_length: l.extras_length,
            status: Status::from_u16(l.word6).ok_or(ParseError::UnknownStatus(l.word6))?,
            total_body_length: l.total_body_length,
            opaque: l.opaque,
            cas: l.cas,
        })
    }

    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        Layout {
            opcode: self.opcode,
            key_length: self.key_length,
            extras_length: self.extras_length,
            word6: self.status as u16,
            total_body_length: self.total_body_length,
            opaque: self.opaque,
            cas: self.cas,
        }
        .write(RESPONSE_MAGIC)
    }

    pub fn value_length(&self) -> Option<usize> {
        value_length(self.total_body_length, self.extras_length, self.key_length)
    }
}

/// Big-endian u32 at `at`. Callers check the length first.
#[inline]
pub(crate) fn read_u32(data: &[u8], at: usize) -> u32 {
    let mut word = [0u8; 4];
    word.copy_from_slice(&data[at..at + 4]);
    u32::from_be_bytes(word)
}

/// Big-endian u64 at `at`. Callers check the length first.
#[inline]
pub(crate) fn read_u64(data: &[u8], at: usize) -> u64 {
    let mut word = [0u8; 8];
    word.copy_from_slice(&data[at..at + 8]);
    u64::from_be_bytes(word)
}
