//! Per-entry payload encryption for Ark archives.
//!
//! Each archive carries one 32-bit global key; every entry gets its own
//! transform derived from that key and the entry path, so two entries never
//! share a keystream even though they share the global key.
//!
//! | Header key | Version | Transform |
//! |---|---|---|
//! | 0 | any | none, stored bytes are plaintext |
//! | k | v1 | Park–Miller keystream, seed = f(k, crc32(path)) ([`classic`]) |
//! | k | v2 | BLAKE3 XOF under `derive_key(k ‖ path)` |
//!
//! Both keystreams are XORed in and are seekable, so decrypting a sub-range
//! costs the same as decrypting its length, and applying the cipher twice
//! returns the original bytes.

pub mod classic;

use std::fmt;

use crate::directory::EntryRecord;
use crate::header::{ArchiveHeader, Encryption};
use classic::ClassicStream;

/// BLAKE3 `derive_key` context for v2 entry keys. Frozen.
pub const KEYED_CONTEXT: &str = "arkive 2024-05-01 v2 entry keystream";

/// Derive the 256-bit v2 entry key from the global key and the entry path.
pub fn derive_entry_key(global_key: u32, path: &str) -> [u8; 32] {
    let mut material = Vec::with_capacity(4 + path.len());
    material.extend_from_slice(&global_key.to_be_bytes());
    material.extend_from_slice(path.as_bytes());
    blake3::derive_key(KEYED_CONTEXT, &material)
}

/// Seekable BLAKE3 keystream.
#[derive(Clone)]
pub struct KeyedStream {
    reader: blake3::OutputReader,
}

impl KeyedStream {
    pub fn new(key: &[u8; 32]) -> Self {
        Self { reader: blake3::Hasher::new_keyed(key).finalize_xof() }
    }

    pub fn position(&self) -> u64 {
        self.reader.position()
    }

    pub fn seek(&mut self, pos: u64) {
        self.reader.set_position(pos);
    }

    pub fn apply(&mut self, buf: &mut [u8]) {
        let mut block = [0u8; 64];
        for chunk in buf.chunks_mut(block.len()) {
            let ks = &mut block[..chunk.len()];
            self.reader.fill(ks);
            for (b, k) in chunk.iter_mut().zip(ks.iter()) {
                *b ^= k;
            }
        }
    }
}

impl fmt::Debug for KeyedStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyedStream").field("position", &self.position()).finish()
    }
}

/// The transform for one entry, positioned within its stored bytes.
#[derive(Debug, Clone)]
pub enum EntryCipher {
    Plain { pos: u64 },
    Classic(ClassicStream),
    Keyed(KeyedStream),
}

impl EntryCipher {
    pub fn for_entry(header: &ArchiveHeader, entry: &EntryRecord) -> Self {
        match header.encryption() {
            Encryption::None => EntryCipher::Plain { pos: 0 },
            Encryption::Classic(key) => {
                EntryCipher::Classic(ClassicStream::new(classic::seed_for(key, &entry.path)))
            }
            Encryption::Keyed(key) => {
                EntryCipher::Keyed(KeyedStream::new(&derive_entry_key(key, &entry.path)))
            }
        }
    }

    pub fn is_plain(&self) -> bool {
        matches!(self, EntryCipher::Plain { .. })
    }

    pub fn position(&self) -> u64 {
        match self {
            EntryCipher::Plain { pos } => *pos,
            EntryCipher::Classic(s) => s.position(),
            EntryCipher::Keyed(s) => s.position(),
        }
    }

    pub fn seek(&mut self, to: u64) {
        match self {
            EntryCipher::Plain { pos } => *pos = to,
            EntryCipher::Classic(s) => s.seek(to),
            EntryCipher::Keyed(s) => s.seek(to),
        }
    }

    /// Transforms `buf` in place at the current position and advances.
    ///
    /// Decrypts stored bytes, or encrypts plaintext; the operation is its
    /// own inverse.
    pub fn apply(&mut self, buf: &mut [u8]) {
        match self {
            EntryCipher::Plain { pos } => *pos += buf.len() as u64,
            EntryCipher::Classic(s) => s.apply(buf),
            EntryCipher::Keyed(s) => s.apply(buf),
        }
    }

    pub fn apply_at(&mut self, pos: u64, buf: &mut [u8]) {
        self.seek(pos);
        self.apply(buf);
    }
}
