//! Error taxonomy shared by every stage of the engine.
//!
//! Structural problems with the container are [`FormatError`]s; everything a
//! caller can see is an [`ArkError`], which wraps format and I/O failures and
//! adds the lifecycle errors of [`crate::archive::ArchiveHandle`].
//!
//! All offset/size arithmetic that guards a read goes through
//! [`check_region`], so overflowing or out-of-range values surface as
//! `InvalidOffset` instead of a panic or a wild read.

use std::io;
use thiserror::Error;

/// A structural violation of the Ark byte layout.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FormatError {
    #[error("Invalid magic: expected {}, found {}", hex::encode(.expected), hex::encode(.found))]
    BadMagic { expected: [u8; 4], found: [u8; 4] },

    #[error("Unsupported archive version: {version}")]
    UnsupportedVersion { version: u32 },

    #[error("Truncated input at offset {offset}: needed {needed} more byte(s), {available} available")]
    Truncated { offset: u64, needed: u64, available: u64 },

    #[error("Duplicate entry path '{path}' (entries #{first} and #{second})")]
    DuplicatePath { path: String, first: usize, second: usize },

    #[error("Entry '{path}' spans {offset}+{stored_size}, outside the {region_len}-byte data region")]
    InvalidOffset { path: String, offset: u64, stored_size: u64, region_len: u64 },

    #[error("Corrupt payload for '{path}': {reason}")]
    CorruptPayload { path: String, reason: String },

    #[error("Invalid path for entry #{index}: {reason}")]
    InvalidPath { index: usize, reason: String },

    #[error("String index {index} out of range (table has {len} entries)")]
    BadStringIndex { index: u32, len: usize },

    #[error("Entry '{path}' is uncompressed but size {size} != stored size {stored_size}")]
    SizeMismatch { path: String, size: u64, stored_size: u64 },

    #[error("Entry '{path}' has unknown flag bits 0x{flags:02x}")]
    UnknownFlags { path: String, flags: u8 },

    #[error("Directory exceeds the {limit}-byte limit")]
    DirectoryTooLarge { limit: u64 },
}

/// Every failure an [`ArchiveHandle`](crate::archive::ArchiveHandle) can report.
#[derive(Error, Debug)]
pub enum ArkError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Format error: {0}")]
    Format(#[from] FormatError),

    #[error("Entry not found: {path}")]
    NotFound { path: String },

    #[error("Archive handle is closed")]
    Closed,

    #[error("Archive lock was poisoned by a panicking reader")]
    LockPoisoned,
}

impl ArkError {
    /// Returns the inner [`FormatError`], if this is one.
    pub fn as_format(&self) -> Option<&FormatError> {
        match self {
            ArkError::Format(e) => Some(e),
            _ => None,
        }
    }

    /// Recovers an `ArkError` that travelled through an `io::Error` (as from
    /// [`EntryReader`](crate::stream::EntryReader)); other I/O errors become
    /// [`ArkError::Io`].
    pub fn from_io(err: io::Error) -> Self {
        let wraps_ark = err.get_ref().is_some_and(|e| e.is::<ArkError>());
        if !wraps_ark {
            return ArkError::Io(err);
        }
        let kind = err.kind();
        match err.into_inner().map(|inner| inner.downcast::<ArkError>()) {
            Some(Ok(ark)) => *ark,
            _ => ArkError::Io(kind.into()),
        }
    }
}

impl From<ArkError> for io::Error {
    fn from(e: ArkError) -> Self {
        let kind = match e {
            ArkError::Io(inner) => return inner,
            ArkError::Format(_) => io::ErrorKind::InvalidData,
            ArkError::NotFound { .. } => io::ErrorKind::NotFound,
            ArkError::Closed | ArkError::LockPoisoned => io::ErrorKind::Other,
        };
        io::Error::new(kind, e)
    }
}

pub type Result<T> = std::result::Result<T, ArkError>;

/// Checks that `offset..offset + len` fits inside a region of `region_len`
/// bytes and returns the exclusive end.
///
/// `None` on overflow or when the range leaves the region.
pub fn check_region(offset: u64, len: u64, region_len: u64) -> Option<u64> {
    offset
        .checked_add(len)
        .filter(|end| *end <= region_len)
}

/// Maps an `UnexpectedEof` from a sequential read at `offset` to
/// [`FormatError::Truncated`]; other I/O errors pass through.
pub(crate) fn eof_to_truncated(err: io::Error, offset: u64, needed: u64, total: u64) -> ArkError {
    if err.kind() == io::ErrorKind::UnexpectedEof {
        ArkError::Format(FormatError::Truncated {
            offset,
            needed,
            available: total.saturating_sub(offset),
        })
    } else {
        ArkError::Io(err)
    }
}
