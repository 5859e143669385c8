//! Append-only arena of term bytes.

use std::io::Write;

use crate::error::{Result, RevdexError};
use crate::storage::{Storage, read_all};

/// Handle to a term stored in a [`TermStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TermRef {
    pub offset: u32,
    pub length: u32,
}

impl TermRef {
    /// Offset one past the last byte of the term.
    pub fn end(&self) -> u64 {
        self.offset as u64 + self.length as u64
    }
}

/// A growable byte arena holding concatenated term text.
///
/// Terms are never removed. Once building is finished the store is only read,
/// so shared references can be handed to any number of threads.
#[derive(Debug, Clone, Default)]
pub struct TermStore {
    bytes: Vec<u8>,
}

impl TermStore {
    pub fn new() -> Self {
        TermStore { bytes: Vec::new() }
    }

    /// Wrap an existing arena, such as a loaded terms file.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        if u32::try_from(bytes.len()).is_err() {
            return Err(RevdexError::resource_exhausted(format!(
                "term store of {} bytes exceeds 32-bit offsets",
                bytes.len()
            )));
        }
        Ok(TermStore { bytes })
    }

    /// Append a term and return its handle.
    pub fn append(&mut self, term: &[u8]) -> Result<TermRef> {
        let end = self.bytes.len() + term.len();
        if u32::try_from(end).is_err() {
            return Err(RevdexError::resource_exhausted(format!(
                "appending {} bytes would overflow the 32-bit term store",
                term.len()
            )));
        }

        let handle = TermRef {
            offset: self.bytes.len() as u32,
            length: term.len() as u32,
        };
        self.bytes.extend_from_slice(term);
        Ok(handle)
    }

    /// Resolve `length` bytes starting at `offset`.
    pub fn deref(&self, offset: u32, length: u32) -> Result<&[u8]> {
        let start = offset as usize;
        let end = start + length as usize;
        self.bytes.get(start..end).ok_or_else(|| {
            RevdexError::corrupt_index(format!(
                "term range {start}..{end} is outside the {} byte term store",
                self.bytes.len()
            ))
        })
    }

    pub fn deref_ref(&self, term: TermRef) -> Result<&[u8]> {
        self.deref(term.offset, term.length)
    }

    /// Size of the arena in bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Persist the arena as a raw file.
    pub fn write_to(&self, storage: &dyn Storage, name: &str) -> Result<()> {
        let mut output = storage.create_output(name)?;
        output.write_all(&self.bytes)?;
        output.close()
    }

    /// Load an arena previously written with [`TermStore::write_to`].
    pub fn load(storage: &dyn Storage, name: &str) -> Result<Self> {
        Self::from_bytes(read_all(storage, name)?)
    }
}
