//! Entry directory: the table that follows the fixed header.
//!
//! Layouts differ per [`FormatVersion`]:
//!
//! | | v1 | v2 |
//! |---|---|---|
//! | byte order | little-endian | big-endian |
//! | length | zero-length path terminates | `entry_count` from the header |
//! | paths | inline, u16 length prefix | string blob + index table, `dir/name` |
//! | offsets / sizes | u32 | u64 |
//! | checksum | none | CRC-32 of stored bytes |
//! | flags | none | u8, bit 0 = zstd |
//!
//! The data region starts right after the directory and runs to the end of
//! the source. Entry offsets are relative to it.

pub mod strings;

use byteorder::{BigEndian, ByteOrder, LittleEndian, ReadBytesExt};
use log::{debug, info, trace};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io;

use crate::codec::Compression;
use crate::error::{check_region, eof_to_truncated, FormatError, Result};
use crate::header::{ArchiveHeader, FormatVersion};
use crate::source::{ByteSource, SourceCursor};
use strings::StringTable;

/// Fixed part of a v1 record after the path bytes: offset + size.
pub const V1_RECORD_TAIL: u64 = 8;
/// Fixed size of a v2 record.
pub const V2_RECORD_SIZE: u64 = 8 + 4 + 4 + 8 + 8 + 4 + 1;
/// Upper bound on records reserved up front, whatever the header claims.
const MAX_PREALLOC: usize = 4096;

/// One logical file stored in the archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryRecord {
    /// Position in on-disk directory order.
    pub index: usize,
    pub path: String,
    /// Offset of the stored bytes, relative to the data region.
    pub offset: u64,
    /// Plaintext length.
    pub size: u64,
    /// On-disk length.
    pub stored_size: u64,
    /// CRC-32 of the stored bytes, when the version carries one.
    pub checksum: Option<u32>,
    pub compression: Compression,
}

#[derive(Debug, Clone)]
pub struct Directory {
    entries: Vec<EntryRecord>,
    by_path: HashMap<String, usize>,
    data_start: u64,
    data_len: u64,
}

impl Directory {
    /// Decodes the directory from a cursor positioned right after the header.
    ///
    /// Reads at most `max_size` directory bytes; larger tables fail with
    /// [`FormatError::DirectoryTooLarge`] before anything is allocated for them.
    pub fn read<S: ByteSource + ?Sized>(
        cursor: &mut SourceCursor<'_, S>,
        header: &ArchiveHeader,
        max_size: u64,
    ) -> Result<Self> {
        let mut fields = FieldReader::new(cursor, max_size);

        let entries = match header.version {
            FormatVersion::V1 => read_v1(&mut fields)?,
            FormatVersion::V2 => read_v2(&mut fields, header.entry_count.unwrap_or(0))?,
        };

        let data_start = fields.cursor.position();
        let data_len = fields.cursor.total_len().saturating_sub(data_start);
        let dir = Self::validated(entries, data_start, data_len)?;

        info!(
            "Ark v{} directory: {} entries, data region {} bytes at offset {}",
            header.version,
            dir.entries.len(),
            data_len,
            data_start
        );
        Ok(dir)
    }

    /// Enforces path uniqueness and data-region bounds, in directory order.
    fn validated(entries: Vec<EntryRecord>, data_start: u64, data_len: u64) -> Result<Self> {
        let mut by_path = HashMap::with_capacity(entries.len());

        for entry in &entries {
            if let Some(&first) = by_path.get(&entry.path) {
                return Err(FormatError::DuplicatePath {
                    path: entry.path.clone(),
                    first,
                    second: entry.index,
                }
                .into());
            }

            if check_region(entry.offset, entry.stored_size, data_len).is_none() {
                return Err(FormatError::InvalidOffset {
                    path: entry.path.clone(),
                    offset: entry.offset,
                    stored_size: entry.stored_size,
                    region_len: data_len,
                }
                .into());
            }

            if !entry.compression.is_compressed() && entry.size != entry.stored_size {
                return Err(FormatError::SizeMismatch {
                    path: entry.path.clone(),
                    size: entry.size,
                    stored_size: entry.stored_size,
                }
                .into());
            }

            by_path.insert(entry.path.clone(), entry.index);
        }

        Ok(Self { entries, by_path, data_start, data_len })
    }

    pub fn entries(&self) -> &[EntryRecord] {
        &self.entries
    }

    pub fn get(&self, path: &str) -> Option<&EntryRecord> {
        self.by_path.get(path).map(|&i| &self.entries[i])
    }

    pub fn get_index(&self, index: usize) -> Option<&EntryRecord> {
        self.entries.get(index)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Absolute offset of the data region within the source.
    pub fn data_start(&self) -> u64 {
        self.data_start
    }

    pub fn data_len(&self) -> u64 {
        self.data_len
    }

    /// Absolute source offset of `entry`'s stored byte at `pos`.
    ///
    /// `None` when the position leaves the entry or the data region.
    pub fn absolute_offset(&self, entry: &EntryRecord, pos: u64) -> Option<u64> {
        if pos > entry.stored_size {
            return None;
        }
        let rel = entry.offset.checked_add(pos)?;
        check_region(rel, 0, self.data_len)?;
        self.data_start.checked_add(rel)
    }
}

// ── Version layouts ──────────────────────────────────────────────────────────

fn read_v1<S: ByteSource + ?Sized>(r: &mut FieldReader<'_, '_, S>) -> Result<Vec<EntryRecord>> {
    let mut entries = Vec::new();

    loop {
        let path_len = r.u16::<LittleEndian>()?;
        if path_len == 0 {
            break;
        }

        let index = entries.len();
        let raw = r.bytes(path_len as u64)?;
        let path = validate_path(raw, index)?;
        let offset = r.u32::<LittleEndian>()? as u64;
        let size = r.u32::<LittleEndian>()? as u64;

        trace!("v1 entry #{index}: '{path}' @ {offset} ({size} B)");
        entries.push(EntryRecord {
            index,
            path,
            offset,
            size,
            stored_size: size,
            checksum: None,
            compression: Compression::None,
        });
    }

    Ok(entries)
}

fn read_v2<S: ByteSource + ?Sized>(
    r: &mut FieldReader<'_, '_, S>,
    count: u32,
) -> Result<Vec<EntryRecord>> {
    let blob_len = r.u32::<BigEndian>()? as u64;
    let blob = r.bytes(blob_len)?;

    let index_count = r.u32::<BigEndian>()? as u64;
    r.require(index_count * 4)?;
    let mut indices = Vec::with_capacity(index_count as usize);
    for _ in 0..index_count {
        indices.push(r.u32::<BigEndian>()?);
    }
    let strings = StringTable::new(&blob, indices);
    debug!("v2 string table: {} bytes, {} strings", blob_len, strings.len());

    r.require(count as u64 * V2_RECORD_SIZE)?;
    let mut entries = Vec::with_capacity((count as usize).min(MAX_PREALLOC));

    for index in 0..count as usize {
        let offset = r.u64::<BigEndian>()?;
        let name_idx = r.u32::<BigEndian>()?;
        let dir_idx = r.u32::<BigEndian>()?;
        let size = r.u64::<BigEndian>()?;
        let stored_size = r.u64::<BigEndian>()?;
        let checksum = r.u32::<BigEndian>()?;
        let flags = r.u8()?;

        let path = validate_path(strings.join(name_idx, dir_idx)?, index)?;
        let compression = Compression::from_flags(flags)
            .ok_or_else(|| FormatError::UnknownFlags { path: path.clone(), flags })?;

        trace!(
            "v2 entry #{index}: '{path}' @ {offset} ({stored_size} B stored, {size} B plain, {})",
            compression.name()
        );
        entries.push(EntryRecord {
            index,
            path,
            offset,
            size,
            stored_size,
            checksum: Some(checksum),
            compression,
        });
    }

    Ok(entries)
}

/// Checks an archive-relative path: UTF-8, forward slashes, no empty, `.` or
/// `..` components, not absolute.
pub fn validate_path(raw: Vec<u8>, index: usize) -> Result<String> {
    let invalid = |reason: &str| FormatError::InvalidPath { index, reason: reason.to_owned() };

    let path = String::from_utf8(raw).map_err(|_| invalid("not valid UTF-8"))?;
    if path.is_empty() {
        return Err(invalid("empty path").into());
    }
    if path.contains('\\') {
        return Err(invalid(&format!("'{path}' uses a backslash separator")).into());
    }
    if path.contains('\0') {
        return Err(invalid("contains a NUL byte").into());
    }
    if path.starts_with('/') {
        return Err(invalid(&format!("'{path}' is absolute")).into());
    }
    if path.split('/').any(|c| c.is_empty() || c == "." || c == "..") {
        return Err(invalid(&format!("'{path}' has an empty, '.' or '..' component")).into());
    }
    Ok(path)
}

// ── Field reader ─────────────────────────────────────────────────────────────

/// Sequential field decoder that reports short reads as `Truncated` and
/// enforces the directory size cap.
struct FieldReader<'c, 'a, S: ?Sized> {
    cursor: &'c mut SourceCursor<'a, S>,
    start: u64,
    limit: u64,
}

impl<'c, 'a, S: ByteSource + ?Sized> FieldReader<'c, 'a, S> {
    fn new(cursor: &'c mut SourceCursor<'a, S>, limit: u64) -> Self {
        let start = cursor.position();
        Self { cursor, start, limit }
    }

    /// Fails unless `n` more bytes are both within the size cap and present.
    fn require(&self, n: u64) -> Result<()> {
        let pos = self.cursor.position();
        let used = pos - self.start;
        if used.checked_add(n).map_or(true, |end| end > self.limit) {
            return Err(FormatError::DirectoryTooLarge { limit: self.limit }.into());
        }
        if n > self.cursor.remaining() {
            return Err(FormatError::Truncated {
                offset: pos,
                needed: n,
                available: self.cursor.remaining(),
            }
            .into());
        }
        Ok(())
    }

    fn fixed<T>(
        &mut self,
        n: u64,
        read: impl FnOnce(&mut SourceCursor<'a, S>) -> io::Result<T>,
    ) -> Result<T> {
        self.require(n)?;
        let pos = self.cursor.position();
        let total = self.cursor.total_len();
        read(&mut *self.cursor).map_err(|e| eof_to_truncated(e, pos, n, total))
    }

    fn u8(&mut self) -> Result<u8> {
        self.fixed(1, |c| c.read_u8())
    }

    fn u16<B: ByteOrder>(&mut self) -> Result<u16> {
        self.fixed(2, |c| c.read_u16::<B>())
    }

    fn u32<B: ByteOrder>(&mut self) -> Result<u32> {
        self.fixed(4, |c| c.read_u32::<B>())
    }

    fn u64<B: ByteOrder>(&mut self) -> Result<u64> {
        self.fixed(8, |c| c.read_u64::<B>())
    }

    fn bytes(&mut self, n: u64) -> Result<Vec<u8>> {
        self.fixed(n, |c| {
            let mut buf = vec![0u8; n as usize];
            io::Read::read_exact(c, &mut buf)?;
            Ok(buf)
        })
    }
}
