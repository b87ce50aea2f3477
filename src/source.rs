//! Positioned byte sources.
//!
//! The engine never shares a read cursor between callers: every read names
//! its absolute offset. Files use the OS positioned-read calls, memory
//! buffers slice directly, and any other `Read + Seek` is serialized behind a
//! mutex by [`SeekSource`].
//!
//! [`SourceCursor`] turns a source into a sequential [`Read`] for the header
//! and directory parsers, tracking its own offset.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::sync::Mutex;

#[cfg(unix)]
use std::os::unix::fs::FileExt;
#[cfg(windows)]
use std::os::windows::fs::FileExt;

/// A random-access, read-only byte resource.
pub trait ByteSource: Send + Sync {
    /// Fills `buf` with the bytes starting at `offset`.
    ///
    /// Fails with `UnexpectedEof` if the source ends first.
    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()>;

    /// Total length of the source in bytes.
    fn len(&self) -> io::Result<u64>;
}

impl ByteSource for File {
    #[cfg(unix)]
    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        FileExt::read_exact_at(self, buf, offset)
    }

    #[cfg(windows)]
    fn read_exact_at(&self, mut offset: u64, mut buf: &mut [u8]) -> io::Result<()> {
        while !buf.is_empty() {
            match self.seek_read(buf, offset) {
                Ok(0) => break,
                Ok(n) => {
                    let tmp = buf;
                    buf = &mut tmp[n..];
                    offset += n as u64;
                }
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        if buf.is_empty() {
            Ok(())
        } else {
            Err(io::Error::new(io::ErrorKind::UnexpectedEof, "failed to fill whole buffer"))
        }
    }

    fn len(&self) -> io::Result<u64> {
        Ok(self.metadata()?.len())
    }
}

impl ByteSource for Vec<u8> {
    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        let start = usize::try_from(offset).map_err(|_| eof())?;
        let end = start.checked_add(buf.len()).ok_or_else(eof)?;
        let src = self.get(start..end).ok_or_else(eof)?;
        buf.copy_from_slice(src);
        Ok(())
    }

    fn len(&self) -> io::Result<u64> {
        Ok(Vec::len(self) as u64)
    }
}

/// Adapts any `Read + Seek` into a [`ByteSource`] by locking it for each read.
#[derive(Debug)]
pub struct SeekSource<R> {
    inner: Mutex<R>,
}

impl<R: Read + Seek + Send> SeekSource<R> {
    pub fn new(inner: R) -> Self {
        Self { inner: Mutex::new(inner) }
    }

    pub fn into_inner(self) -> R {
        self.inner.into_inner().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<R: Read + Seek + Send> ByteSource for SeekSource<R> {
    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        let mut inner = self.inner.lock().map_err(|_| poisoned())?;
        inner.seek(SeekFrom::Start(offset))?;
        inner.read_exact(buf)
    }

    fn len(&self) -> io::Result<u64> {
        let mut inner = self.inner.lock().map_err(|_| poisoned())?;
        inner.seek(SeekFrom::End(0))
    }
}

/// Sequential reader over a [`ByteSource`], starting at a given offset.
pub struct SourceCursor<'a, S: ?Sized> {
    source: &'a S,
    pos: u64,
    len: u64,
}

impl<'a, S: ByteSource + ?Sized> SourceCursor<'a, S> {
    pub fn new(source: &'a S, pos: u64, len: u64) -> Self {
        Self { source, pos, len }
    }

    pub fn position(&self) -> u64 {
        self.pos
    }

    pub fn total_len(&self) -> u64 {
        self.len
    }

    pub fn remaining(&self) -> u64 {
        self.len.saturating_sub(self.pos)
    }
}

impl<S: ByteSource + ?Sized> Read for SourceCursor<'_, S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = (buf.len() as u64).min(self.remaining()) as usize;
        if n == 0 {
            return Ok(0);
        }
        self.source.read_exact_at(self.pos, &mut buf[..n])?;
        self.pos += n as u64;
        Ok(n)
    }
}

fn eof() -> io::Error {
    io::Error::new(io::ErrorKind::UnexpectedEof, "read past end of buffer")
}

fn poisoned() -> io::Error {
    io::Error::new(io::ErrorKind::Other, "byte source lock poisoned")
}
