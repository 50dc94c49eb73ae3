//! Typed cache values and their item flags.
//!
//! The flag bits follow the libmemcached convention so items written
//! by this client can be read by those clients and vice versa.

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::{Error, Result};

/// Item flag bits.
pub mod flags {
    /// Value is a serialized (JSON) document.
    pub const SERIALIZED: u32 = 1 << 0;
    /// Value is an ASCII decimal integer that fits in 32 bits.
    pub const INTEGER: u32 = 1 << 1;
    /// Value is an ASCII decimal integer outside the 32-bit range.
    pub const LONG: u32 = 1 << 2;
    /// Value is zlib-compressed.
    pub const COMPRESSED: u32 = 1 << 3;
    /// Value is opaque bytes, even when it happens to be valid UTF-8.
    pub const BINARY: u32 = 1 << 4;

    pub(crate) const TYPE_MASK: u32 = SERIALIZED | INTEGER | LONG | BINARY;
}

/// A value stored in or read from the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Text(String),
    Bytes(Vec<u8>),
    Integer(i64),
    /// A JSON document, usually produced by [`Value::serialize`].
    Serialized(Vec<u8>),
}

impl Value {
    /// Serialize any `serde` value into a [`Value::Serialized`].
    pub fn serialize<T: Serialize + ?Sized>(value: &T) -> Result<Self> {
        Ok(Value::Serialized(serde_json::to_vec(value)?))
    }

    /// Deserialize this value into `T`.
    ///
    /// Text, integers and bytes deserialize as their JSON equivalents, so an
    /// integer counter reads back as any integer type.
    pub fn deserialize<T: DeserializeOwned>(&self) -> Result<T> {
        let value = match self {
            Value::Serialized(doc) => return Ok(serde_json::from_slice(doc)?),
            Value::Text(text) => serde_json::Value::from(text.as_str()),
            Value::Integer(n) => serde_json::Value::from(*n),
            Value::Bytes(bytes) => serde_json::Value::from(bytes.as_slice()),
        };
        Ok(serde_json::from_value(value)?)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(n) => Some(*n),
            _ => None,
        }
    }

    /// Raw payload bytes as they would be stored before compression.
    pub fn as_bytes(&self) -> std::borrow::Cow<'_, [u8]> {
        match self {
            Value::Text(text) => text.as_bytes().into(),
            Value::Bytes(bytes) | Value::Serialized(bytes) => bytes.as_slice().into(),
            Value::Integer(n) => n.to_string().into_bytes().into(),
        }
    }

    /// Encode into payload bytes and item flags.
    pub(crate) fn encode(&self) -> (Vec<u8>, u32) {
        match self {
            Value::Text(text) => (text.as_bytes().to_vec(), 0),
            Value::Bytes(bytes) => (bytes.clone(), flags::BINARY),
            Value::Integer(n) => {
                let flag = if i32::try_from(*n).is_ok() {
                    flags::INTEGER
                } else {
                    flags::LONG
                };
                (n.to_string().into_bytes(), flag)
            }
            Value::Serialized(doc) => (doc.clone(), flags::SERIALIZED),
        }
    }

    /// Decode payload bytes (already decompressed) using the item flags.
    pub(crate) fn decode(data: Vec<u8>, item_flags: u32) -> Result<Self> {
        match item_flags & flags::TYPE_MASK {
            f if f & flags::SERIALIZED != 0 => Ok(Value::Serialized(data)),
            f if f & (flags::INTEGER | flags::LONG) != 0 => {
                // decremented counters may carry trailing spaces
                std::str::from_utf8(&data)
                    .ok()
                    .and_then(|s| s.trim().parse().ok())
                    .map(Value::Integer)
                    .ok_or(Error::Protocol(protocol_memcache::ParseError::InvalidNumber))
            }
            f if f & flags::BINARY != 0 => Ok(Value::Bytes(data)),
            _ => Ok(match String::from_utf8(data) {
                Ok(text) => Value::Text(text),
                Err(err) => Value::Bytes(err.into_bytes()),
            }),
        }
    }
}

impl From<&str> for Value {
    fn from(text: &str) -> Self {
        Value::Text(text.to_owned())
    }
}

impl From<String> for Value {
    fn from(text: String) -> Self {
        Value::Text(text)
    }
}

impl From<&[u8]> for Value {
    fn from(bytes: &[u8]) -> Self {
        Value::Bytes(bytes.to_vec())
    }
}

impl From<Vec<u8>> for Value {
    fn from(bytes: Vec<u8>) -> Self {
        Value::Bytes(bytes)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Integer(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Integer(n.into())
    }
}

impl From<u32> for Value {
    fn from(n: u32) -> Self {
        Value::Integer(n.into())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use serde::Deserialize;

    use super::*;

    fn roundtrip(value: Value) -> Value {
        let (data, flags) = value.encode();
        Value::decode(data, flags).unwrap()
    }

    #[test]
    fn typed_values_keep_their_type() {
        for value in [
            Value::from("hello"),
            Value::from("Iñtërnâtiônàlizætiøn, 中文"),
            Value::from(""),
            Value::from(vec![0u8, 159, 146, 150]),
            Value::from(b"valid utf8 bytes".as_slice()),
            Value::from(42i32),
            Value::from(-7i64),
            Value::from(i64::MAX),
            Value::serialize(&vec![1, 2, 3]).unwrap(),
        ] {
            assert_eq!(roundtrip(value.clone()), value);
        }
    }

    #[test]
    fn integer_flags() {
        assert_eq!(Value::from(41i32).encode(), (b"41".to_vec(), flags::INTEGER));
        assert_eq!(
            Value::from(1i64 << 40).encode().1,
            flags::LONG,
            "values outside i32 use the long flag"
        );
    }

    #[test]
    fn untagged_bytes_decode_as_text_when_utf8() {
        assert_eq!(
            Value::decode(b"plain".to_vec(), 0).unwrap(),
            Value::Text("plain".into())
        );
        assert_eq!(
            Value::decode(vec![0xff, 0xfe], 0).unwrap(),
            Value::Bytes(vec![0xff, 0xfe])
        );
        // unknown bits are ignored
        assert_eq!(
            Value::decode(b"x".to_vec(), 1 << 20).unwrap(),
            Value::Text("x".into())
        );
    }

    #[test]
    fn counters_with_padding_decode() {
        assert_eq!(
            Value::decode(b"9 ".to_vec(), flags::INTEGER).unwrap(),
            Value::Integer(9)
        );
        assert!(matches!(
            Value::decode(b"nine".to_vec(), flags::INTEGER),
            Err(Error::Protocol(_))
        ));
    }

    #[test]
    fn serialize_and_deserialize_structs() {
        #[derive(Debug, PartialEq, Serialize, Deserialize)]
        struct Session {
            user: String,
            roles: Vec<String>,
        }

        let session = Session {
            user: "ada".into(),
            roles: vec!["admin".into()],
        };
        let value = roundtrip(Value::serialize(&session).unwrap());
        assert_eq!(value.deserialize::<Session>().unwrap(), session);

        let map = BTreeMap::from([("A".to_string(), 1u32), ("B".to_string(), 2)]);
        let value = Value::serialize(&map).unwrap();
        assert_eq!(value.deserialize::<BTreeMap<String, u32>>().unwrap(), map);
    }

    #[test]
    fn scalars_deserialize_as_json_equivalents() {
        assert_eq!(Value::Integer(42).deserialize::<u16>().unwrap(), 42);
        assert_eq!(Value::from("hi").deserialize::<String>().unwrap(), "hi");
        assert_eq!(
            Value::from(vec![1u8, 2]).deserialize::<Vec<u8>>().unwrap(),
            vec![1, 2]
        );
        assert!(matches!(
            Value::from("hi").deserialize::<u32>(),
            Err(Error::Serialization(_))
        ));
    }

    #[test]
    fn accessors() {
        assert_eq!(Value::from("a").as_str(), Some("a"));
        assert_eq!(Value::from(3i32).as_integer(), Some(3));
        assert_eq!(Value::from(3i32).as_str(), None);
        assert_eq!(&*Value::from(12i32).as_bytes(), b"12");
    }
}
