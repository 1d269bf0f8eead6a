//! Pluggable compression backend.
//!
//! Root entries may be wrapped in a `Compressed` element whose payload is a
//! zlib stream holding exactly one `Matrix` element. This module defines the
//! [`Compressor`] trait used for whole-buffer (de)compression and the
//! [`Compression`] setting the writer is configured with.

use std::borrow::Cow;
use std::io::{Read, Write};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use serde::Serialize;

use crate::error::{MatError, Result};

/// Compression applied to root entries when writing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum Compression {
    /// Entries are written as plain `Matrix` elements.
    #[default]
    None,
    /// Entries are deflated with the given zlib level (0-9).
    Deflate(u32),
}

impl Compression {
    /// Deflate at zlib's default level.
    pub const fn deflate() -> Self {
        Self::Deflate(6)
    }

    /// True unless compression is disabled.
    pub fn is_enabled(self) -> bool {
        !matches!(self, Self::None)
    }

    /// The compressor implementing this setting.
    pub fn compressor(self) -> Box<dyn Compressor> {
        match self {
            Self::None => Box::new(NoCompression),
            Self::Deflate(level) => Box::new(ZlibCompressor::new(level)),
        }
    }

    pub(crate) fn flate_level(self) -> flate2::Compression {
        match self {
            Self::None => flate2::Compression::none(),
            Self::Deflate(level) => flate2::Compression::new(level.min(9)),
        }
    }
}

/// Interface for compression algorithms.
pub trait Compressor: Send + Sync + std::fmt::Debug {
    /// Decompresses the data.
    ///
    /// Returns a `Cow<[u8]>` which may borrow the input when no transformation
    /// is needed.
    fn decompress<'a>(&self, data: &'a [u8]) -> Result<Cow<'a, [u8]>>;

    /// Compresses the data and appends it to the output vector.
    fn compress_append(&self, data: &[u8], output: &mut Vec<u8>) -> Result<()>;
}

/// Pass-through compressor.
#[derive(Debug, Clone, Copy)]
pub struct NoCompression;

impl Compressor for NoCompression {
    fn decompress<'a>(&self, data: &'a [u8]) -> Result<Cow<'a, [u8]>> {
        Ok(Cow::Borrowed(data))
    }

    fn compress_append(&self, data: &[u8], output: &mut Vec<u8>) -> Result<()> {
        output.extend_from_slice(data);
        Ok(())
    }
}

/// zlib (RFC 1950) compressor backed by `flate2`.
#[derive(Debug, Clone, Copy)]
pub struct ZlibCompressor {
    level: u32,
}

impl ZlibCompressor {
    /// Creates a compressor at `level`, clamped to 0-9.
    pub fn new(level: u32) -> Self {
        Self { level: level.min(9) }
    }
}

impl Compressor for ZlibCompressor {
    fn decompress<'a>(&self, data: &'a [u8]) -> Result<Cow<'a, [u8]>> {
        let mut out = Vec::with_capacity(data.len() * 4);
        ZlibDecoder::new(data)
            .read_to_end(&mut out)
            .map_err(|e| MatError::Compression(e.to_string()))?;
        Ok(Cow::Owned(out))
    }

    fn compress_append(&self, data: &[u8], output: &mut Vec<u8>) -> Result<()> {
        let mut encoder = ZlibEncoder::new(output, flate2::Compression::new(self.level));
        encoder
            .write_all(data)
            .and_then(|()| encoder.try_finish())
            .map_err(|e| MatError::Compression(e.to_string()))
    }
}
