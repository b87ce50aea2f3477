//! In-memory Ark writer used by the integration tests and benchmarks.

#![allow(dead_code)]

use std::collections::HashMap;

use arkive::directory::strings::NO_DIR;
use arkive::header::MAGIC;
use arkive::{ArchiveHeader, Compression, EntryCipher, EntryRecord, FormatVersion};

struct Pending {
    path: String,
    data: Vec<u8>,
    compression: Compression,
}

/// One entry as it was laid out by [`ArkBuilder::build`].
#[derive(Debug, Clone)]
pub struct Placed {
    pub record: EntryRecord,
    /// Encrypted (and possibly compressed) bytes as written.
    pub stored: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct Built {
    pub bytes: Vec<u8>,
    pub data_start: usize,
    pub entries: Vec<Placed>,
}

impl Built {
    /// Absolute position of stored byte `pos` of entry `path`.
    pub fn stored_pos(&self, path: &str, pos: usize) -> usize {
        let placed = self
            .entries
            .iter()
            .find(|p| p.record.path == path)
            .expect("entry was built");
        self.data_start + placed.record.offset as usize + pos
    }
}

pub struct ArkBuilder {
    version: FormatVersion,
    key: u32,
    padding: usize,
    entries: Vec<Pending>,
}

impl ArkBuilder {
    pub fn v1(key: u32) -> Self {
        Self { version: FormatVersion::V1, key, padding: 0, entries: Vec::new() }
    }

    pub fn v2(key: u32) -> Self {
        Self { version: FormatVersion::V2, key, padding: 0, entries: Vec::new() }
    }

    /// Filler bytes at the start of the data region, before the first entry.
    pub fn padding(mut self, n: usize) -> Self {
        self.padding = n;
        self
    }

    pub fn file(mut self, path: &str, data: &[u8]) -> Self {
        self.entries.push(Pending { path: path.to_owned(), data: data.to_vec(), compression: Compression::None });
        self
    }

    /// A zstd-compressed entry. v2 only.
    pub fn compressed(mut self, path: &str, data: &[u8]) -> Self {
        assert_eq!(self.version, FormatVersion::V2, "v1 has no compression flag");
        self.entries.push(Pending { path: path.to_owned(), data: data.to_vec(), compression: Compression::Zstd });
        self
    }

    pub fn header(&self) -> ArchiveHeader {
        ArchiveHeader {
            magic: *MAGIC,
            version: self.version,
            encryption_key: self.key,
            entry_count: match self.version {
                FormatVersion::V1 => None,
                FormatVersion::V2 => Some(self.entries.len() as u32),
            },
        }
    }

    pub fn build(&self) -> Built {
        let header = self.header();
        let mut data = vec![0x5Au8; self.padding];
        let mut placed = Vec::with_capacity(self.entries.len());

        for (index, pending) in self.entries.iter().enumerate() {
            let mut stored = match pending.compression {
                Compression::None => pending.data.clone(),
                Compression::Zstd => zstd::encode_all(&pending.data[..], 3).unwrap(),
            };
            let mut record = EntryRecord {
                index,
                path: pending.path.clone(),
                offset: data.len() as u64,
                size: pending.data.len() as u64,
                stored_size: stored.len() as u64,
                checksum: None,
                compression: pending.compression,
            };
            EntryCipher::for_entry(&header, &record).apply(&mut stored);
            if self.version == FormatVersion::V2 {
                record.checksum = Some(crc32fast::hash(&stored));
            }
            data.extend_from_slice(&stored);
            placed.push(Placed { record, stored });
        }

        let mut bytes = MAGIC.to_vec();
        bytes.extend_from_slice(&self.version.as_u32().to_le_bytes());
        match self.version {
            FormatVersion::V1 => {
                bytes.extend_from_slice(&self.key.to_le_bytes());
                write_v1_directory(&mut bytes, &placed);
            }
            FormatVersion::V2 => {
                bytes.extend_from_slice(&self.key.to_be_bytes());
                bytes.extend_from_slice(&(placed.len() as u32).to_be_bytes());
                write_v2_directory(&mut bytes, &placed);
            }
        }

        let data_start = bytes.len();
        bytes.extend_from_slice(&data);
        Built { bytes, data_start, entries: placed }
    }
}

fn write_v1_directory(out: &mut Vec<u8>, placed: &[Placed]) {
    for p in placed {
        let r = &p.record;
        out.extend_from_slice(&(r.path.len() as u16).to_le_bytes());
        out.extend_from_slice(r.path.as_bytes());
        out.extend_from_slice(&(r.offset as u32).to_le_bytes());
        out.extend_from_slice(&(r.size as u32).to_le_bytes());
    }
    out.extend_from_slice(&0u16.to_le_bytes());
}

/// Interned strings for a v2 directory.
#[derive(Default)]
struct Strings {
    blob: Vec<u8>,
    offsets: Vec<u32>,
    ids: HashMap<String, u32>,
}

impl Strings {
    fn intern(&mut self, s: &str) -> u32 {
        if let Some(&id) = self.ids.get(s) {
            return id;
        }
        let id = self.offsets.len() as u32;
        self.offsets.push(self.blob.len() as u32);
        self.blob.extend_from_slice(s.as_bytes());
        self.blob.push(0);
        self.ids.insert(s.to_owned(), id);
        id
    }
}

fn write_v2_directory(out: &mut Vec<u8>, placed: &[Placed]) {
    let mut strings = Strings::default();
    let ids: Vec<(u32, u32)> = placed
        .iter()
        .map(|p| match p.record.path.rsplit_once('/') {
            Some((dir, name)) => (strings.intern(name), strings.intern(dir)),
            None => (strings.intern(&p.record.path), NO_DIR),
        })
        .collect();

    out.extend_from_slice(&(strings.blob.len() as u32).to_be_bytes());
    out.extend_from_slice(&strings.blob);
    out.extend_from_slice(&(strings.offsets.len() as u32).to_be_bytes());
    for offset in &strings.offsets {
        out.extend_from_slice(&offset.to_be_bytes());
    }

    for (p, (name_idx, dir_idx)) in placed.iter().zip(ids) {
        let r = &p.record;
        out.extend_from_slice(&r.offset.to_be_bytes());
        out.extend_from_slice(&name_idx.to_be_bytes());
        out.extend_from_slice(&dir_idx.to_be_bytes());
        out.extend_from_slice(&r.size.to_be_bytes());
        out.extend_from_slice(&r.stored_size.to_be_bytes());
        out.extend_from_slice(&r.checksum.unwrap_or(0).to_be_bytes());
        out.push(r.compression.flags());
    }
}

/// The archive described in the format's reference scenario: v1, key
/// `0xDEADBEEF`, `a.txt` at data offset 64 (5 bytes) and `b.bin` at 69
/// (1024 bytes).
pub fn reference_archive() -> Built {
    let b_bin: Vec<u8> = (0..1024u32).map(|i| (i * 7 % 251) as u8).collect();
    ArkBuilder::v1(0xDEADBEEF)
        .padding(64)
        .file("a.txt", b"hello")
        .file("b.bin", &b_bin)
        .build()
}
