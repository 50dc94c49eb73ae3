//! zlib compression of large values.

use std::io::{Read, Write};

use flate2::Compression;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;

use crate::error::{Error, Result};
use crate::value::flags;

/// Compression policy applied to outgoing values.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Compressor {
    /// Payloads at least this long are compressed. 0 disables compression.
    min_len: usize,
    level: u32,
}

impl Compressor {
    pub(crate) fn new(min_len: usize, level: u32) -> Self {
        Self {
            min_len,
            level: level.min(9),
        }
    }

    /// Compress `data` when it crosses the threshold and the result is smaller.
    ///
    /// Returns the payload to send and the flags with `COMPRESSED` set when
    /// compression was kept.
    pub(crate) fn compress(&self, data: Vec<u8>, item_flags: u32) -> Result<(Vec<u8>, u32)> {
        if self.min_len == 0 || data.len() < self.min_len {
            return Ok((data, item_flags));
        }

        let mut encoder = ZlibEncoder::new(
            Vec::with_capacity(data.len() / 2),
            Compression::new(self.level),
        );
        encoder.write_all(&data).map_err(Error::Compression)?;
        let compressed = encoder.finish().map_err(Error::Compression)?;

        if compressed.len() < data.len() {
            Ok((compressed, item_flags | flags::COMPRESSED))
        } else {
            Ok((data, item_flags))
        }
    }
}

/// Undo [`Compressor::compress`] if the item flags say the payload is compressed.
pub(crate) fn decompress(data: Vec<u8>, item_flags: u32) -> Result<Vec<u8>> {
    if item_flags & flags::COMPRESSED == 0 {
        return Ok(data);
    }
    let mut out = Vec::with_capacity(data.len() * 4);
    ZlibDecoder::new(data.as_slice())
        .read_to_end(&mut out)
        .map_err(Error::Compression)?;
    Ok(out)
}
