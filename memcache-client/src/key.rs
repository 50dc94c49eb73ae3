//! Key validation.
//!
//! memcached keys travel inside a whitespace-delimited text command, so a
//! key may not contain spaces or control bytes and is limited to 250 bytes.
//! The same rules apply in binary mode so that a key valid for one protocol
//! is valid for the other.

use protocol_memcache::MAX_KEY_LEN;

use crate::error::{Error, Result};

/// Check that `key` can be sent to memcached.
pub fn validate(key: &[u8]) -> Result<()> {
    if key.is_empty() {
        return Err(Error::InvalidKey("key is empty".into()));
    }
    if key.len() > MAX_KEY_LEN {
        return Err(Error::InvalidKey(format!(
            "key is {} bytes, limit is {MAX_KEY_LEN}",
            key.len()
        )));
    }
    if let Some(pos) = key.iter().position(|&b| b <= b' ' || b == 0x7f) {
        return Err(Error::InvalidKey(format!(
            "key {:?} contains byte {:#04x} at offset {pos}",
            String::from_utf8_lossy(key),
            key[pos]
        )));
    }
    Ok(())
}

/// Validate every key of a batch before any of them is sent.
pub fn validate_all<K: AsRef<[u8]>>(keys: &[K]) -> Result<()> {
    keys.iter().try_for_each(|key| validate(key.as_ref()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_ordinary_keys() {
        assert!(validate(b"user:42:profile").is_ok());
        assert!(validate("ключ-юникод".as_bytes()).is_ok());
        assert!(validate(&[b'a'; MAX_KEY_LEN]).is_ok());
    }

    #[test]
    fn rejects_bad_keys() {
        let long = [b'a'; MAX_KEY_LEN + 1];
        let cases: [&[u8]; 7] = [
            b"",
            &long,
            b"has space",
            b"new\nline",
            b"tab\there",
            b"nul\0byte",
            b"del\x7f",
        ];
        for key in cases {
            assert!(
                matches!(validate(key), Err(Error::InvalidKey(_))),
                "{key:?} should be rejected"
            );
        }
    }

    #[test]
    fn validate_all_stops_at_first_bad_key() {
        assert!(validate_all(&["a", "b", "c"]).is_ok());
        let err = validate_all(&["a", "b c", ""]).unwrap_err();
        assert!(err.to_string().contains("b c"), "{err}");
    }
}
