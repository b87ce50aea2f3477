//! Streaming access to one entry's plaintext.
//!
//! An [`EntryReader`] is a pipeline of readers:
//!
//! ```text
//! StoredReader ─▶ ChecksumReader? ─▶ DecryptReader ─▶ codec stream
//! ```
//!
//! Stored bytes are fetched with positioned reads of at most
//! `read_chunk_size` bytes, so a reader never holds the archive lock between
//! calls and a concurrent `close` makes its next read fail with
//! [`ArkError::Closed`].
//!
//! The checksum stage only exists when the pipeline starts at stored byte 0;
//! a reader that seeks into an uncompressed entry is not verified.

use log::trace;
use std::fmt;
use std::io::{self, Read, Seek, SeekFrom};

use crate::archive::ArchiveHandle;
use crate::codec::get_codec;
use crate::crypto::EntryCipher;
use crate::directory::EntryRecord;
use crate::error::{ArkError, FormatError, Result};
use crate::payload::{ChecksumReader, DecryptReader};
use crate::source::ByteSource;

type BoxedRead<'h> = Box<dyn Read + Send + 'h>;

/// Stored bytes of one entry, read through the handle's lock.
struct StoredReader<'h, S: ByteSource> {
    handle: &'h ArchiveHandle<S>,
    start: u64,
    pos: u64,
    end: u64,
    chunk: usize,
}

impl<S: ByteSource> Read for StoredReader<'_, S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let remaining = self.end.saturating_sub(self.pos);
        let n = (buf.len() as u64).min(remaining).min(self.chunk as u64) as usize;
        if n == 0 {
            return Ok(0);
        }
        self.handle
            .read_stored_at(self.start + self.pos, &mut buf[..n])
            .map_err(io::Error::from)?;
        self.pos += n as u64;
        Ok(n)
    }
}

/// Builds the pipeline from stored position `stored_pos`. The second value
/// says whether a checksum stage was installed.
fn pipeline<'h, S: ByteSource>(
    handle: &'h ArchiveHandle<S>,
    entry: &EntryRecord,
    stored_pos: u64,
    verify: bool,
) -> Result<(BoxedRead<'h>, bool)> {
    let stored = StoredReader {
        handle,
        start: handle.stored_start(entry)?,
        pos: stored_pos,
        end: entry.stored_size,
        chunk: handle.options().read_chunk_size.max(1),
    };

    let checking = verify && stored_pos == 0 && entry.checksum.is_some();
    let source: BoxedRead<'h> = match entry.checksum {
        Some(expected) if checking => Box::new(ChecksumReader::new(stored, entry, expected)),
        _ => Box::new(stored),
    };

    let mut cipher = EntryCipher::for_entry(handle.header(), entry);
    cipher.seek(stored_pos);
    let decrypted: BoxedRead<'h> = Box::new(DecryptReader::new(source, cipher));

    let plain = get_codec(entry.compression)
        .stream(decrypted)
        .map_err(ArkError::from_io)?;
    Ok((plain, checking))
}

/// `Read + Seek` over an entry's plaintext, borrowed from its handle.
///
/// Yields exactly `entry().size` bytes. Errors from the archive travel as
/// `io::Error`s wrapping an [`ArkError`]; recover them with
/// [`ArkError::from_io`].
pub struct EntryReader<'h, S: ByteSource> {
    handle: &'h ArchiveHandle<S>,
    entry: EntryRecord,
    inner: BoxedRead<'h>,
    pos: u64,
    verify: bool,
    /// A checksum stage is live and the entry has not been drained yet.
    checking: bool,
}

impl<'h, S: ByteSource> EntryReader<'h, S> {
    pub(crate) fn new(handle: &'h ArchiveHandle<S>, entry: EntryRecord, verify: bool) -> Result<Self> {
        let (inner, checking) = pipeline(handle, &entry, 0, verify)?;
        trace!("Opened reader on '{}' (verify: {checking})", entry.path);
        Ok(Self { handle, entry, inner, pos: 0, verify, checking })
    }

    pub fn entry(&self) -> &EntryRecord {
        &self.entry
    }

    /// Current plaintext position.
    pub fn position(&self) -> u64 {
        self.pos
    }

    fn corrupt(&self, reason: String) -> io::Error {
        ArkError::from(FormatError::CorruptPayload { path: self.entry.path.clone(), reason }).into()
    }

    fn restart(&mut self, stored_pos: u64) -> io::Result<()> {
        let (inner, checking) =
            pipeline(self.handle, &self.entry, stored_pos, self.verify).map_err(io::Error::from)?;
        self.inner = inner;
        self.checking = checking;
        Ok(())
    }

    /// Pulls the rest of the stored bytes through the pipeline so the
    /// checksum stage sees all of them.
    fn finish(&mut self) -> io::Result<()> {
        self.checking = false;
        let trailing = io::copy(&mut self.inner, &mut io::sink())?;
        if trailing > 0 {
            return Err(self.corrupt(format!("{trailing} byte(s) past the declared size")));
        }
        Ok(())
    }
}

impl<S: ByteSource> Read for EntryReader<'_, S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let remaining = self.entry.size.saturating_sub(self.pos);
        if remaining == 0 || buf.is_empty() {
            if remaining == 0 && self.checking {
                self.finish()?;
            }
            return Ok(0);
        }

        let want = (buf.len() as u64).min(remaining) as usize;
        let n = self.inner.read(&mut buf[..want])?;
        if n == 0 {
            return Err(self.corrupt(format!(
                "payload ended after {} of {} bytes",
                self.pos, self.entry.size
            )));
        }
        self.pos += n as u64;

        if self.pos == self.entry.size && self.checking {
            self.finish()?;
        }
        Ok(n)
    }
}

impl<S: ByteSource> Seek for EntryReader<'_, S> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(n) => Some(n),
            SeekFrom::Current(d) => self.pos.checked_add_signed(d),
            SeekFrom::End(d) => self.entry.size.checked_add_signed(d),
        }
        .ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "seek to a negative or overflowing position")
        })?;

        if target == self.pos {
            return Ok(target);
        }

        if target >= self.entry.size {
            self.inner = Box::new(io::empty());
            self.checking = false;
            self.pos = target;
            return Ok(target);
        }

        if !self.entry.compression.is_compressed() {
            // Stored position equals plaintext position.
            self.restart(target)?;
            self.pos = target;
            return Ok(target);
        }

        if target < self.pos {
            self.restart(0)?;
            self.pos = 0;
        }
        let skip = target - self.pos;
        let skipped = io::copy(&mut self.inner.by_ref().take(skip), &mut io::sink())?;
        self.pos += skipped;
        if skipped < skip {
            return Err(self.corrupt(format!(
                "payload ended after {} of {} bytes",
                self.pos, self.entry.size
            )));
        }
        Ok(target)
    }
}

impl<S: ByteSource> fmt::Debug for EntryReader<'_, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntryReader")
            .field("path", &self.entry.path)
            .field("position", &self.pos)
            .field("size", &self.entry.size)
            .field("checking", &self.checking)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::ArkOptions;

    /// Unencrypted v1 archive holding one entry `a` with `payload`.
    fn single_entry(payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(b"ARK1");
        out.extend_from_slice(&1u32.to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes());
        out.extend_from_slice(&1u16.to_le_bytes());
        out.push(b'a');
        out.extend_from_slice(&0u32.to_le_bytes());
        out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(payload);
        out
    }

    fn small_chunks() -> ArkOptions {
        ArkOptions { read_chunk_size: 7, ..ArkOptions::default() }
    }

    #[test]
    fn streams_whole_entry_in_small_chunks() {
        let payload: Vec<u8> = (0..200u8).collect();
        let ark = ArchiveHandle::from_source(single_entry(&payload), small_chunks()).unwrap();
        let mut reader = ark.open_entry("a").unwrap();
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, payload);
        assert_eq!(reader.position(), 200);
    }

    #[test]
    fn seek_variants() {
        let payload: Vec<u8> = (0..100u8).collect();
        let ark = ArchiveHandle::from_source(single_entry(&payload), small_chunks()).unwrap();
        let mut reader = ark.open_entry("a").unwrap();
        let mut buf = [0u8; 4];

        reader.seek(SeekFrom::Start(10)).unwrap();
        reader.read_exact(&mut buf).unwrap();
        assert_eq!(buf, [10, 11, 12, 13]);

        reader.seek(SeekFrom::Current(-8)).unwrap();
        reader.read_exact(&mut buf).unwrap();
        assert_eq!(buf, [6, 7, 8, 9]);

        reader.seek(SeekFrom::End(-2)).unwrap();
        let mut rest = Vec::new();
        reader.read_to_end(&mut rest).unwrap();
        assert_eq!(rest, [98, 99]);

        assert_eq!(reader.seek(SeekFrom::End(5)).unwrap(), 105);
        assert_eq!(reader.read(&mut buf).unwrap(), 0);

        let err = reader.seek(SeekFrom::Current(-1000)).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[test]
    fn read_after_close_fails() {
        let ark = ArchiveHandle::from_source(single_entry(b"hello"), ArkOptions::default()).unwrap();
        let mut reader = ark.open_entry("a").unwrap();
        ark.close().unwrap();
        let err = reader.read(&mut [0u8; 5]).unwrap_err();
        assert!(matches!(ArkError::from_io(err), ArkError::Closed));
    }
}
