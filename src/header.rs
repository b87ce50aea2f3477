use byteorder::{BigEndian, ByteOrder, LittleEndian, ReadBytesExt};
use log::debug;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Read;

use crate::error::{eof_to_truncated, FormatError, Result};

pub const MAGIC: &[u8; 4] = b"ARK1";
/// Bytes every version shares: magic + little-endian version.
pub const PREFIX_SIZE: usize = 8;
pub const V1_HEADER_SIZE: usize = 12;
pub const V2_HEADER_SIZE: usize = 16;

/// Known on-disk layouts. Anything else is rejected at open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FormatVersion {
    /// Little-endian, terminator-delimited directory, classic keystream.
    V1,
    /// Big-endian, counted directory with a string table, keyed keystream,
    /// CRC-32 checksums and optional zstd payloads.
    V2,
}

impl FormatVersion {
    pub fn from_u32(v: u32) -> Option<Self> {
        match v {
            1 => Some(FormatVersion::V1),
            2 => Some(FormatVersion::V2),
            _ => None,
        }
    }

    pub fn as_u32(self) -> u32 {
        match self {
            FormatVersion::V1 => 1,
            FormatVersion::V2 => 2,
        }
    }

    /// Fixed header length for this version.
    pub fn header_len(self) -> usize {
        match self {
            FormatVersion::V1 => V1_HEADER_SIZE,
            FormatVersion::V2 => V2_HEADER_SIZE,
        }
    }

    pub fn has_checksums(self) -> bool {
        matches!(self, FormatVersion::V2)
    }
}

impl fmt::Display for FormatVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u32())
    }
}

/// How entry payloads are protected, derived from the header's key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encryption {
    /// Key 0: payloads are stored as plaintext.
    None,
    /// Park–Miller keystream seeded per entry.
    Classic(u32),
    /// BLAKE3 keyed keystream derived per entry.
    Keyed(u32),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveHeader {
    pub magic: [u8; 4],
    pub version: FormatVersion,
    pub encryption_key: u32,
    /// Declared directory length for versions that carry one.
    pub entry_count: Option<u32>,
}

/// Reads one `u32` header field at `offset` and advances it.
fn read_field<R: Read, B: ByteOrder>(reader: &mut R, offset: &mut u64, total_len: u64) -> Result<u32> {
    let value = reader
        .read_u32::<B>()
        .map_err(|e| eof_to_truncated(e, *offset, 4, total_len))?;
    *offset += 4;
    Ok(value)
}

impl ArchiveHeader {
    /// Reads and validates the fixed header from a reader at offset 0.
    ///
    /// `total_len` is the length of the whole source, used only to report how
    /// much was available when the header is cut short.
    pub fn read<R: Read>(mut reader: R, total_len: u64) -> Result<Self> {
        let mut prefix = [0u8; PREFIX_SIZE];
        reader
            .read_exact(&mut prefix)
            .map_err(|e| eof_to_truncated(e, 0, PREFIX_SIZE as u64, total_len))?;

        let mut magic = [0u8; 4];
        magic.copy_from_slice(&prefix[..4]);
        if &magic != MAGIC {
            return Err(FormatError::BadMagic { expected: *MAGIC, found: magic }.into());
        }

        let raw_version = u32::from_le_bytes([prefix[4], prefix[5], prefix[6], prefix[7]]);
        let version = FormatVersion::from_u32(raw_version)
            .ok_or(FormatError::UnsupportedVersion { version: raw_version })?;

        let mut offset = PREFIX_SIZE as u64;
        let (encryption_key, entry_count) = match version {
            FormatVersion::V1 => {
                let key = read_field::<_, LittleEndian>(&mut reader, &mut offset, total_len)?;
                (key, None)
            }
            FormatVersion::V2 => {
                let key = read_field::<_, BigEndian>(&mut reader, &mut offset, total_len)?;
                let count = read_field::<_, BigEndian>(&mut reader, &mut offset, total_len)?;
                (key, Some(count))
            }
        };

        debug!(
            "Ark header: version {}, key 0x{:08x}, entry count {:?}",
            version, encryption_key, entry_count
        );

        Ok(Self { magic, version, encryption_key, entry_count })
    }

    /// Length of the fixed header in bytes.
    pub fn encoded_len(&self) -> usize {
        self.version.header_len()
    }

    pub fn encryption(&self) -> Encryption {
        match (self.encryption_key, self.version) {
            (0, _) => Encryption::None,
            (key, FormatVersion::V1) => Encryption::Classic(key),
            (key, FormatVersion::V2) => Encryption::Keyed(key),
        }
    }
}
