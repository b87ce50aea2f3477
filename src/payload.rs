use crc32fast::Hasher;
use log::{trace, warn};
use std::io::{self, Read};

use crate::codec::get_codec;
use crate::crypto::EntryCipher;
use crate::directory::EntryRecord;
use crate::error::{ArkError, FormatError, Result};
use crate::header::ArchiveHeader;

fn corrupt(entry: &EntryRecord, reason: String) -> FormatError {
    FormatError::CorruptPayload { path: entry.path.clone(), reason }
}

fn checksum_mismatch(entry: &EntryRecord, expected: u32, actual: u32) -> FormatError {
    warn!("Checksum mismatch in '{}': expected {expected:#010x}, found {actual:#010x}", entry.path);
    corrupt(entry, format!("checksum mismatch: expected {expected:#010x}, found {actual:#010x}"))
}

/// Checks the stored bytes against the record's CRC-32, if it has one.
pub fn verify_checksum(entry: &EntryRecord, stored: &[u8]) -> Result<()> {
    let Some(expected) = entry.checksum else {
        return Ok(());
    };
    let mut hasher = Hasher::new();
    hasher.update(stored);
    let actual = hasher.finalize();
    if actual != expected {
        return Err(checksum_mismatch(entry, expected, actual).into());
    }
    Ok(())
}

/// Turns an entry's stored bytes into its plaintext payload:
/// checksum (when `verify`), decrypt, decode, and length check.
pub fn decode(
    header: &ArchiveHeader,
    entry: &EntryRecord,
    mut stored: Vec<u8>,
    verify: bool,
) -> Result<Vec<u8>> {
    if stored.len() as u64 != entry.stored_size {
        return Err(corrupt(
            entry,
            format!("read {} stored bytes, expected {}", stored.len(), entry.stored_size),
        )
        .into());
    }
    if verify {
        verify_checksum(entry, &stored)?;
    }

    EntryCipher::for_entry(header, entry).apply(&mut stored);
    trace!("Decrypted {} bytes of '{}'", stored.len(), entry.path);

    get_codec(entry.compression)
        .decompress(stored, entry.size)
        .map_err(|e| corrupt(entry, e.to_string()).into())
}

/// Hashes stored bytes as they stream past and fails the read that
/// completes the entry if the CRC-32 does not match.
pub struct ChecksumReader<R> {
    inner: R,
    hasher: Hasher,
    entry: EntryRecord,
    expected: u32,
    seen: u64,
    verified: bool,
}

impl<R: Read> ChecksumReader<R> {
    pub fn new(inner: R, entry: &EntryRecord, expected: u32) -> Self {
        Self {
            inner,
            hasher: Hasher::new(),
            entry: entry.clone(),
            expected,
            seen: 0,
            verified: false,
        }
    }
}

impl<R: Read> Read for ChecksumReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.hasher.update(&buf[..n]);
        self.seen += n as u64;

        // Also fires on the first read of an empty entry.
        if !self.verified && self.seen == self.entry.stored_size {
            self.verified = true;
            let actual = self.hasher.clone().finalize();
            if actual != self.expected {
                let err = ArkError::from(checksum_mismatch(&self.entry, self.expected, actual));
                return Err(io::Error::new(io::ErrorKind::InvalidData, err));
            }
        }
        Ok(n)
    }
}

/// Applies an entry's keystream to bytes read from `inner`.
pub struct DecryptReader<R> {
    inner: R,
    cipher: EntryCipher,
}

impl<R: Read> DecryptReader<R> {
    pub fn new(inner: R, cipher: EntryCipher) -> Self {
        Self { inner, cipher }
    }
}

impl<R: Read> Read for DecryptReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.cipher.apply(&mut buf[..n]);
        Ok(n)
    }
}
