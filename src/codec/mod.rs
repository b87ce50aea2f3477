//! Payload codecs.
//!
//! The format mandates exactly one codec: zstd, selected per entry by bit 0
//! of a v2 record's flags. v1 entries are never compressed. Any other flag
//! bit is a format violation and is rejected while reading the directory,
//! so decoding never has to guess.

use serde::{Deserialize, Serialize};
use std::io::{self, Read};
use thiserror::Error;

/// Record flag: payload is a zstd frame.
pub const FLAG_ZSTD: u8 = 0x01;
/// Every flag bit this build understands.
pub const KNOWN_FLAGS: u8 = FLAG_ZSTD;
/// Largest output buffer reserved before decoding: 4 MiB.
const MAX_PREALLOC: usize = 4 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Compression {
    #[default]
    None,
    Zstd,
}

impl Compression {
    /// Decodes record flags. `None` when unknown bits are set.
    pub fn from_flags(flags: u8) -> Option<Self> {
        if flags & !KNOWN_FLAGS != 0 {
            return None;
        }
        Some(if flags & FLAG_ZSTD != 0 { Compression::Zstd } else { Compression::None })
    }

    pub fn flags(self) -> u8 {
        match self {
            Compression::None => 0,
            Compression::Zstd => FLAG_ZSTD,
        }
    }

    /// Human-readable name (diagnostics only).
    pub fn name(self) -> &'static str {
        match self {
            Compression::None => "none",
            Compression::Zstd => "zstd",
        }
    }

    pub fn is_compressed(self) -> bool {
        self != Compression::None
    }
}

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Decompression error: {0}")]
    Decompression(String),
    #[error("Decoded {actual} bytes, expected {expected}")]
    LengthMismatch { expected: u64, actual: u64 },
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

pub trait Codec: Send + Sync {
    fn compression(&self) -> Compression;

    /// Decodes a whole stored payload into exactly `size` bytes.
    fn decompress(&self, data: Vec<u8>, size: u64) -> Result<Vec<u8>, CodecError>;

    /// Wraps a reader of stored bytes into a reader of plaintext bytes.
    fn stream<'a>(&self, reader: Box<dyn Read + Send + 'a>) -> io::Result<Box<dyn Read + Send + 'a>>;
}

pub struct NoneCodec;
impl Codec for NoneCodec {
    fn compression(&self) -> Compression { Compression::None }

    fn decompress(&self, data: Vec<u8>, size: u64) -> Result<Vec<u8>, CodecError> {
        check_len(size, data.len())?;
        Ok(data)
    }

    fn stream<'a>(&self, reader: Box<dyn Read + Send + 'a>) -> io::Result<Box<dyn Read + Send + 'a>> {
        Ok(reader)
    }
}

pub struct ZstdCodec;
impl Codec for ZstdCodec {
    fn compression(&self) -> Compression { Compression::Zstd }

    fn decompress(&self, data: Vec<u8>, size: u64) -> Result<Vec<u8>, CodecError> {
        // `size` comes from the directory: reserve at most MAX_PREALLOC up
        // front and stop decoding one byte past it.
        let reserve = usize::try_from(size).unwrap_or(usize::MAX).min(MAX_PREALLOC);
        let mut out = Vec::with_capacity(reserve);
        let decoder = zstd::stream::read::Decoder::with_buffer(&data[..])?;
        decoder
            .take(size.saturating_add(1))
            .read_to_end(&mut out)
            .map_err(|e| CodecError::Decompression(e.to_string()))?;
        check_len(size, out.len())?;
        Ok(out)
    }

    fn stream<'a>(&self, reader: Box<dyn Read + Send + 'a>) -> io::Result<Box<dyn Read + Send + 'a>> {
        Ok(Box::new(zstd::stream::read::Decoder::new(reader)?))
    }
}

fn check_len(expected: u64, actual: usize) -> Result<(), CodecError> {
    if expected == actual as u64 {
        Ok(())
    } else {
        Err(CodecError::LengthMismatch { expected, actual: actual as u64 })
    }
}

/// Resolves a [`Compression`] to its codec.
pub fn get_codec(compression: Compression) -> &'static dyn Codec {
    match compression {
        Compression::None => &NoneCodec,
        Compression::Zstd => &ZstdCodec,
    }
}
