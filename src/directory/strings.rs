//! String blob + index table used by v2 directories.
//!
//! The blob is a run of NUL-terminated strings; the index table maps a string
//! id to the byte offset where that string starts. Entry records refer to
//! strings by id, so a directory name shared by many entries is stored once.

use std::collections::HashMap;

use crate::error::{FormatError, Result};

/// Directory id meaning "no directory component".
pub const NO_DIR: u32 = u32::MAX;

#[derive(Debug, Default)]
pub struct StringTable<'b> {
    by_offset: HashMap<u32, &'b [u8]>,
    indices: Vec<u32>,
}

impl<'b> StringTable<'b> {
    /// Splits `blob` into strings keyed by their starting offset.
    pub fn new(blob: &'b [u8], indices: Vec<u32>) -> Self {
        let mut by_offset = HashMap::new();
        let mut start = 0usize;

        while start < blob.len() {
            let end = blob[start..]
                .iter()
                .position(|b| *b == 0)
                .map(|n| start + n)
                .unwrap_or(blob.len());
            by_offset.insert(start as u32, &blob[start..end]);
            start = end + 1;
        }

        Self { by_offset, indices }
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Raw bytes for string id `idx`.
    pub fn get(&self, idx: u32) -> Result<&'b [u8]> {
        let bad = || FormatError::BadStringIndex { index: idx, len: self.indices.len() };
        let offset = *self.indices.get(idx as usize).ok_or_else(bad)?;
        let s = *self.by_offset.get(&offset).ok_or_else(bad)?;
        Ok(s)
    }

    /// Resolves an entry's `(name, dir)` ids into one slash-joined path.
    pub fn join(&self, name_idx: u32, dir_idx: u32) -> Result<Vec<u8>> {
        let name = self.get(name_idx)?;
        if dir_idx == NO_DIR {
            return Ok(name.to_vec());
        }

        let dir = self.get(dir_idx)?;
        if dir.is_empty() {
            return Ok(name.to_vec());
        }

        let mut path = Vec::with_capacity(dir.len() + 1 + name.len());
        path.extend_from_slice(dir);
        path.push(b'/');
        path.extend_from_slice(name);
        Ok(path)
    }
}
