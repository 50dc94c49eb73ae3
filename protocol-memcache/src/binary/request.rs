//! Client-side binary protocol request encoding.
//!
//! Every encoder appends a complete frame to a [`BytesMut`] and returns the
//! number of bytes written, so pipelined batches are built by calling the
//! encoders back to back.

use bytes::{BufMut, BytesMut};

use super::header::{HEADER_SIZE, Opcode, RequestHeader};

/// Counter expiration telling the server to fail with `KeyNotFound` instead
/// of creating the counter with the initial value.
pub const COUNTER_NO_CREATE: u32 = 0xFFFF_FFFF;

/// A binary protocol request builder.
pub struct BinaryRequest;

impl BinaryRequest {
    /// Encode a GET request.
    pub fn encode_get(buf: &mut BytesMut, key: &[u8], opaque: u32) -> usize {
        put_frame(buf, Opcode::Get, opaque, &[], key, &[])
    }

    /// Encode a GETK request (returns key in response).
    pub fn encode_getk(buf: &mut BytesMut, key: &[u8], opaque: u32) -> usize {
        put_frame(buf, Opcode::GetK, opaque, &[], key, &[])
    }

    /// Encode a GETKQ request. The server stays silent on a miss, so a
    /// batch of these must be terminated with [`BinaryRequest::encode_noop`].
    pub fn encode_getkq(buf: &mut BytesMut, key: &[u8], opaque: u32) -> usize {
        put_frame(buf, Opcode::GetKQ, opaque, &[], key, &[])
    }

    /// Encode a storage request.
    ///
    /// `opcode` is one of SET/ADD/REPLACE or their quiet variants.
    pub fn encode_store(
        buf: &mut BytesMut,
        opcode: Opcode,
        key: &[u8],
        value: &[u8],
        flags: u32,
        expiration: u32,
        opaque: u32,
    ) -> usize {
        debug_assert!(matches!(
            opcode.to_non_quiet(),
            Opcode::Set | Opcode::Add | Opcode::Replace
        ));
        let mut extras = [0u8; 8];
        extras[..4].copy_from_slice(&flags.to_be_bytes());
        extras[4..].copy_from_slice(&expiration.to_be_bytes());
        put_frame(buf, opcode, opaque, &extras, key, value)
    }

    /// Encode a DELETE or DELETEQ request.
    pub fn encode_delete(buf: &mut BytesMut, opcode: Opcode, key: &[u8], opaque: u32) -> usize {
        debug_assert_eq!(opcode.to_non_quiet(), Opcode::Delete);
        put_frame(buf, opcode, opaque, &[], key, &[])
    }

    /// Encode an INCREMENT or DECREMENT request.
    ///
    /// Pass [`COUNTER_NO_CREATE`] as `expiration` to leave missing keys alone.
    pub fn encode_counter(
        buf: &mut BytesMut,
        opcode: Opcode,
        key: &[u8],
        delta: u64,
        initial: u64,
        expiration: u32,
        opaque: u32,
    ) -> usize {
        debug_assert!(matches!(opcode, Opcode::Increment | Opcode::Decrement));
        // delta (8) + initial (8) + expiration (4)
        let mut extras = [0u8; 20];
        extras[..8].copy_from_slice(&delta.to_be_bytes());
        extras[8..16].copy_from_slice(&initial.to_be_bytes());
        extras[16..].copy_from_slice(&expiration.to_be_bytes());
        put_frame(buf, opcode, opaque, &extras, key, &[])
    }

    /// Encode a FLUSH request that invalidates every item immediately.
    pub fn encode_flush(buf: &mut BytesMut, opaque: u32) -> usize {
        put_frame(buf, Opcode::Flush, opaque, &[], &[], &[])
    }

    /// Encode a NOOP request.
    pub fn encode_noop(buf: &mut BytesMut, opaque: u32) -> usize {
        put_frame(buf, Opcode::Noop, opaque, &[], &[], &[])
    }

    /// Encode a VERSION request.
    pub fn encode_version(buf: &mut BytesMut, opaque: u32) -> usize {
        put_frame(buf, Opcode::Version, opaque, &[], &[], &[])
    }

    /// Encode a QUIT request.
    pub fn encode_quit(buf: &mut BytesMut, opaque: u32) -> usize {
        put_frame(buf, Opcode::Quit, opaque, &[], &[], &[])
    }

    /// Encode a SASL authentication request.
    ///
    /// The mechanism travels in the key field and the mechanism-specific
    /// payload in the value field.
    pub fn encode_sasl_auth(
        buf: &mut BytesMut,
        mechanism: &[u8],
        payload: &[u8],
        opaque: u32,
    ) -> usize {
        put_frame(buf, Opcode::SaslAuth, opaque, &[], mechanism, payload)
    }

    /// Encode a SASL `PLAIN` authentication request:
    /// `\0<username>\0<password>`.
    pub fn encode_sasl_plain(
        buf: &mut BytesMut,
        username: &[u8],
        password: &[u8],
        opaque: u32,
    ) -> usize {
        let mut payload = Vec::with_capacity(2 + username.len() + password.len());
        payload.push(0);
        payload.extend_from_slice(username);
        payload.push(0);
        payload.extend_from_slice(password);
        Self::encode_sasl_auth(buf, b"PLAIN", &payload, opaque)
    }
}

fn put_frame(
    buf: &mut BytesMut,
    opcode: Opcode,
    opaque: u32,
    extras: &[u8],
    key: &[u8],
    value: &[u8],
) -> usize {
    let total_body = extras.len() + key.len() + value.len();

    let mut header = RequestHeader::new(opcode);
    header.key_length = key.len() as u16;
    header.extras_length = extras.len() as u8;
    header.total_body_length = total_body as u32;
    header.opaque = opaque;

    buf.reserve(HEADER_SIZE + total_body);
    buf.put_slice(&header.to_bytes());
    buf.put_slice(extras);
    buf.put_slice(key);
    buf.put_slice(value);

    HEADER_SIZE + total_body
}
