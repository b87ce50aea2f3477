//! High-level [`ArchiveHandle`] API, the primary embedding surface.
//!
//! ```no_run
//! use arkive::ArchiveHandle;
//!
//! let ark = ArchiveHandle::open("main.ark")?;
//! println!("version {} key {:#x}", ark.version(), ark.encryption_key());
//! for entry in ark.entries()? {
//!     println!("{} ({} B)", entry.path, entry.size);
//! }
//! let data = ark.extract("config/boot.dta")?;
//! ark.close()?;
//! # let _ = data;
//! # Ok::<(), arkive::ArkError>(())
//! ```
//!
//! # Concurrency
//! A handle is `Sync` for any [`ByteSource`]: `entries`, `lookup`, `extract`
//! and `read_at` may run from many threads at once. Reads are positioned, so
//! no cursor is shared. `close` waits for in-flight reads, then drops the
//! source; every later read fails with [`ArkError::Closed`].

use log::{debug, info};
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use crate::crypto::EntryCipher;
use crate::directory::{Directory, EntryRecord};
use crate::error::{eof_to_truncated, ArkError, FormatError, Result};
use crate::header::{ArchiveHeader, Encryption, FormatVersion};
use crate::payload;
use crate::source::{ByteSource, SeekSource, SourceCursor};
use crate::stream::EntryReader;

/// Default cap on directory bytes: 20 MiB.
pub const DEFAULT_MAX_DIRECTORY_SIZE: u64 = 20 * 1024 * 1024;
/// Default streaming read size: 64 KiB.
pub const DEFAULT_READ_CHUNK_SIZE: usize = 64 * 1024;

// ── ArkOptions ────────────────────────────────────────────────────────────────

/// Configuration for [`ArchiveHandle::open_with`] and
/// [`ArchiveHandle::from_source`].
#[derive(Debug, Clone)]
pub struct ArkOptions {
    /// Check each entry's CRC-32 (when the format has one) before
    /// decrypting. Disabling returns tampered plaintext instead of an error.
    pub verify_checksums:   bool,
    /// Directories longer than this are rejected while opening.
    pub max_directory_size: u64,
    /// Stored bytes fetched per positioned read when streaming.
    pub read_chunk_size:    usize,
}

impl Default for ArkOptions {
    fn default() -> Self {
        Self {
            verify_checksums:   true,
            max_directory_size: DEFAULT_MAX_DIRECTORY_SIZE,
            read_chunk_size:    DEFAULT_READ_CHUNK_SIZE,
        }
    }
}

// ── Entry selectors ───────────────────────────────────────────────────────────

/// Anything that names one entry of an open archive: a path, a record
/// previously returned by the same archive, or a directory index.
pub trait EntryRef {
    fn resolve<'d>(&self, dir: &'d Directory) -> Result<&'d EntryRecord>;
}

impl EntryRef for str {
    fn resolve<'d>(&self, dir: &'d Directory) -> Result<&'d EntryRecord> {
        dir.get(self).ok_or_else(|| ArkError::NotFound { path: self.to_owned() })
    }
}

impl EntryRef for String {
    fn resolve<'d>(&self, dir: &'d Directory) -> Result<&'d EntryRecord> {
        self.as_str().resolve(dir)
    }
}

impl EntryRef for EntryRecord {
    fn resolve<'d>(&self, dir: &'d Directory) -> Result<&'d EntryRecord> {
        dir.get(&self.path)
            .filter(|found| *found == self)
            .ok_or_else(|| ArkError::NotFound { path: self.path.clone() })
    }
}

impl EntryRef for usize {
    fn resolve<'d>(&self, dir: &'d Directory) -> Result<&'d EntryRecord> {
        dir.get_index(*self)
            .ok_or_else(|| ArkError::NotFound { path: format!("#{self}") })
    }
}

impl<T: EntryRef + ?Sized> EntryRef for &T {
    fn resolve<'d>(&self, dir: &'d Directory) -> Result<&'d EntryRecord> {
        (**self).resolve(dir)
    }
}

// ── ArchiveHandle ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveState {
    Opened,
    Closed,
}

/// An open Ark archive.
#[derive(Debug)]
pub struct ArchiveHandle<S: ByteSource = File> {
    path:      Option<PathBuf>,
    header:    ArchiveHeader,
    directory: Directory,
    options:   ArkOptions,
    /// `None` once closed.
    source:    RwLock<Option<S>>,
}

impl ArchiveHandle<File> {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with(path, ArkOptions::default())
    }

    pub fn open_with<P: AsRef<Path>>(path: P, options: ArkOptions) -> Result<Self> {
        let path = path.as_ref();
        info!("Opening ark {}", path.display());
        let mut handle = Self::from_source(File::open(path)?, options)?;
        handle.path = Some(path.to_owned());
        Ok(handle)
    }
}

impl<R: Read + Seek + Send> ArchiveHandle<SeekSource<R>> {
    /// Opens an archive from any seekable reader, serializing reads on it.
    pub fn from_reader(reader: R, options: ArkOptions) -> Result<Self> {
        Self::from_source(SeekSource::new(reader), options)
    }
}

impl<S: ByteSource> ArchiveHandle<S> {
    /// Parses the header and directory from `source`.
    ///
    /// Any structural problem aborts here; no partially parsed archive is
    /// ever returned.
    pub fn from_source(source: S, options: ArkOptions) -> Result<Self> {
        let len = source.len()?;
        let mut cursor = SourceCursor::new(&source, 0, len);
        let header = ArchiveHeader::read(&mut cursor, len)?;
        let directory = Directory::read(&mut cursor, &header, options.max_directory_size)?;

        Ok(Self {
            path: None,
            header,
            directory,
            options,
            source: RwLock::new(Some(source)),
        })
    }

    // ── Metadata ─────────────────────────────────────────────────────────────

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn header(&self) -> &ArchiveHeader {
        &self.header
    }

    pub fn version(&self) -> FormatVersion {
        self.header.version
    }

    pub fn encryption_key(&self) -> u32 {
        self.header.encryption_key
    }

    pub fn encryption(&self) -> Encryption {
        self.header.encryption()
    }

    pub fn options(&self) -> &ArkOptions {
        &self.options
    }

    /// The parsed directory. Stays readable after `close`.
    pub fn directory(&self) -> &Directory {
        &self.directory
    }

    // ── Lifecycle ─────────────────────────────────────────────────────────────

    pub fn state(&self) -> ArchiveState {
        let guard = self.source.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        if guard.is_some() {
            ArchiveState::Opened
        } else {
            ArchiveState::Closed
        }
    }

    pub fn is_closed(&self) -> bool {
        self.state() == ArchiveState::Closed
    }

    /// Releases the underlying source. Idempotent.
    ///
    /// Blocks until in-flight reads finish. Byte vectors already returned by
    /// [`extract`](Self::extract) stay valid; open [`EntryReader`]s and all
    /// further reads fail with [`ArkError::Closed`].
    pub fn close(&self) -> Result<()> {
        let mut guard = self.source.write().map_err(|_| ArkError::LockPoisoned)?;
        if guard.take().is_some() {
            info!("Closed ark {}", self.display_name());
        }
        Ok(())
    }

    fn ensure_open(&self) -> Result<()> {
        match self.state() {
            ArchiveState::Opened => Ok(()),
            ArchiveState::Closed => Err(ArkError::Closed),
        }
    }

    fn display_name(&self) -> String {
        self.path
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "<source>".to_owned())
    }

    // ── Directory ─────────────────────────────────────────────────────────────

    /// Entries in on-disk directory order.
    pub fn entries(&self) -> Result<&[EntryRecord]> {
        self.ensure_open()?;
        Ok(self.directory.entries())
    }

    pub fn len(&self) -> usize {
        self.directory.len()
    }

    pub fn is_empty(&self) -> bool {
        self.directory.is_empty()
    }

    /// Exact-match lookup by archive-relative path.
    pub fn lookup(&self, path: &str) -> Result<&EntryRecord> {
        self.resolve(path)
    }

    pub fn contains(&self, path: &str) -> Result<bool> {
        self.ensure_open()?;
        Ok(self.directory.get(path).is_some())
    }

    fn resolve<E: EntryRef>(&self, entry: E) -> Result<&EntryRecord> {
        self.ensure_open()?;
        entry.resolve(&self.directory)
    }

    // ── Reads ─────────────────────────────────────────────────────────────────

    /// Positioned read of stored bytes at an absolute source offset.
    pub(crate) fn read_stored_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let guard = self.source.read().map_err(|_| ArkError::LockPoisoned)?;
        let source = guard.as_ref().ok_or(ArkError::Closed)?;
        source
            .read_exact_at(offset, buf)
            .map_err(|e| eof_to_truncated(e, offset, buf.len() as u64, self.end_of_data()))
    }

    fn end_of_data(&self) -> u64 {
        self.directory.data_start() + self.directory.data_len()
    }

    pub(crate) fn stored_start(&self, entry: &EntryRecord) -> Result<u64> {
        self.directory.absolute_offset(entry, 0).ok_or_else(|| {
            FormatError::InvalidOffset {
                path: entry.path.clone(),
                offset: entry.offset,
                stored_size: entry.stored_size,
                region_len: self.directory.data_len(),
            }
            .into()
        })
    }

    /// Reads, verifies, decrypts and decodes one entry. Returns exactly
    /// `entry.size` bytes.
    pub fn extract<E: EntryRef>(&self, entry: E) -> Result<Vec<u8>> {
        let entry = self.resolve(entry)?;
        self.extract_record(entry, self.options.verify_checksums)
    }

    fn extract_record(&self, entry: &EntryRecord, verify: bool) -> Result<Vec<u8>> {
        let start = self.stored_start(entry)?;
        let len = usize::try_from(entry.stored_size).map_err(|_| {
            ArkError::Io(io::Error::new(io::ErrorKind::OutOfMemory, "entry exceeds address space"))
        })?;

        let mut stored = vec![0u8; len];
        self.read_stored_at(start, &mut stored)?;
        debug!("Extracting '{}' ({} stored bytes at {})", entry.path, len, start);

        payload::decode(&self.header, entry, stored, verify)
    }

    /// Extracts several entries, in parallel with the `parallel` feature.
    /// Results line up with `entries`; one failure does not stop the others.
    pub fn extract_many<E: EntryRef + Sync>(&self, entries: &[E]) -> Vec<Result<Vec<u8>>> {
        #[cfg(feature = "parallel")]
        {
            use rayon::prelude::*;
            entries.par_iter().map(|e| self.extract(e)).collect()
        }
        #[cfg(not(feature = "parallel"))]
        {
            entries.iter().map(|e| self.extract(e)).collect()
        }
    }

    /// Decodes every entry with checksum verification forced on.
    pub fn verify_all(&self) -> Result<()> {
        for entry in self.entries()? {
            self.extract_record(entry, true)?;
        }
        Ok(())
    }

    /// Copies plaintext bytes `offset..` of an entry into `buf`.
    ///
    /// Stops at the end of the entry and returns the number of bytes
    /// copied. Checksums are not verified; they cover the whole payload.
    pub fn read_at<E: EntryRef>(&self, entry: E, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let entry = self.resolve(entry)?;
        if offset >= entry.size || buf.is_empty() {
            return Ok(0);
        }
        let n = (buf.len() as u64).min(entry.size - offset) as usize;
        let buf = &mut buf[..n];

        if entry.compression.is_compressed() {
            let mut reader = EntryReader::new(self, entry.clone(), false)?;
            reader.seek(SeekFrom::Start(offset)).map_err(ArkError::from_io)?;
            reader.read_exact(buf).map_err(ArkError::from_io)?;
            return Ok(n);
        }

        // Uncompressed: stored position == plaintext position.
        let start = self.stored_start(entry)? + offset;
        self.read_stored_at(start, buf)?;
        EntryCipher::for_entry(&self.header, entry).apply_at(offset, buf);
        Ok(n)
    }

    /// Opens a streaming reader over an entry's plaintext.
    pub fn open_entry<E: EntryRef>(&self, entry: E) -> Result<EntryReader<'_, S>> {
        let entry = self.resolve(entry)?.clone();
        EntryReader::new(self, entry, self.options.verify_checksums)
    }
}
