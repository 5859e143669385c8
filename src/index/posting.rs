//! Posting list storage.
//!
//! Each term's postings are stored as group varint encoded pairs of
//! `(doc id gap, frequency)`. A term's data always starts on a fresh group,
//! so a reader can seek straight to the posting pointer recorded in the
//! dictionary and decode from there.

use std::io::{Read, Write};

use serde::{Deserialize, Serialize};

use crate::codec::{GroupVarintDecoder, GroupVarintEncoder};
use crate::error::{BuildStage, Result, RevdexError};

/// One document occurrence of a term.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Posting {
    pub doc_id: u32,
    pub freq: u32,
}

impl Posting {
    pub fn new(doc_id: u32, freq: u32) -> Self {
        Posting { doc_id, freq }
    }
}

impl From<(u32, u32)> for Posting {
    fn from((doc_id, freq): (u32, u32)) -> Self {
        Posting { doc_id, freq }
    }
}

/// Writes gap-encoded posting lists, one term after another.
#[derive(Debug)]
pub struct PostingWriter<W: Write> {
    encoder: GroupVarintEncoder<W>,
    in_term: bool,
    last_doc_id: u32,
    document_frequency: u32,
}

impl<W: Write> PostingWriter<W> {
    pub fn new(writer: W) -> Self {
        PostingWriter {
            encoder: GroupVarintEncoder::new(writer),
            in_term: false,
            last_doc_id: 0,
            document_frequency: 0,
        }
    }

    /// Begin a new posting list and return its byte offset.
    ///
    /// The previous list, if any, is padded to a group boundary first.
    pub fn start_term(&mut self) -> Result<u32> {
        self.finish_term()?;

        let pointer = u32::try_from(self.encoder.bytes_written()).map_err(|_| {
            RevdexError::resource_exhausted(format!(
                "posting store of {} bytes exceeds 32-bit posting pointers",
                self.encoder.bytes_written()
            ))
        })?;

        self.in_term = true;
        self.last_doc_id = 0;
        self.document_frequency = 0;
        Ok(pointer)
    }

    /// Append a posting to the current list.
    pub fn add(&mut self, doc_id: u32, freq: u32) -> Result<()> {
        if !self.in_term {
            return Err(RevdexError::invalid_operation(
                "add called before start_term",
            ));
        }
        if doc_id == 0 {
            return Err(RevdexError::invalid_argument("doc id must be at least 1"));
        }
        if freq == 0 {
            return Err(RevdexError::invalid_argument(format!(
                "frequency of doc {doc_id} must be at least 1"
            )));
        }
        if doc_id <= self.last_doc_id {
            return Err(RevdexError::ordering(
                BuildStage::Write,
                format!("doc {doc_id} after doc {}", self.last_doc_id),
            ));
        }
        if self.document_frequency == u32::MAX {
            return Err(RevdexError::resource_exhausted(
                "document frequency overflows 32 bits",
            ));
        }

        self.encoder.write(doc_id - self.last_doc_id)?;
        self.encoder.write(freq)?;
        self.last_doc_id = doc_id;
        self.document_frequency += 1;
        Ok(())
    }

    /// Number of postings in the current list.
    pub fn current_document_frequency(&self) -> u32 {
        self.document_frequency
    }

    /// Pad the current list to a group boundary.
    pub fn finish_term(&mut self) -> Result<()> {
        self.encoder.finish_group()?;
        self.in_term = false;
        Ok(())
    }

    pub fn bytes_written(&self) -> u64 {
        self.encoder.bytes_written()
    }

    /// Finish the last list and return the underlying writer.
    pub fn finish(mut self) -> Result<W> {
        self.finish_term()?;
        self.encoder.flush()?;
        Ok(self.encoder.into_inner())
    }
}

/// Decode one `(gap, freq)` pair following `last_doc_id`.
pub(crate) fn decode_posting<R: Read>(
    decoder: &mut GroupVarintDecoder<R>,
    last_doc_id: u32,
) -> Result<Posting> {
    let gap = decoder.read()?.ok_or_else(|| {
        RevdexError::corrupt_index(format!("posting list ends after doc {last_doc_id}"))
    })?;
    let freq = decoder.read()?.ok_or_else(|| {
        RevdexError::corrupt_index(format!("missing frequency after doc {last_doc_id}"))
    })?;
    let doc_id = last_doc_id.checked_add(gap).ok_or_else(|| {
        RevdexError::corrupt_index(format!("doc gap {gap} overflows after doc {last_doc_id}"))
    })?;
    Ok(Posting { doc_id, freq })
}

/// Iterates the postings of one term.
///
/// The document frequency bounds how many pairs are read, since the following
/// term's data begins right after this list's padding.
#[derive(Debug)]
pub struct PostingIterator<R: Read> {
    decoder: Option<GroupVarintDecoder<R>>,
    remaining: u32,
    last_doc_id: u32,
}

impl<R: Read> PostingIterator<R> {
    /// Iterate `document_frequency` postings from `reader`, which must be
    /// positioned at the list's posting pointer.
    pub fn new(reader: R, document_frequency: u32) -> Self {
        PostingIterator {
            decoder: Some(GroupVarintDecoder::new(reader)),
            remaining: document_frequency,
            last_doc_id: 0,
        }
    }

    /// An iterator with no postings, returned for unknown terms.
    pub fn empty() -> Self {
        PostingIterator {
            decoder: None,
            remaining: 0,
            last_doc_id: 0,
        }
    }

    /// Postings not yet yielded.
    pub fn remaining(&self) -> u32 {
        self.remaining
    }
}

impl<R: Read> Iterator for PostingIterator<R> {
    type Item = Result<Posting>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let decoder = self.decoder.as_mut()?;

        match decode_posting(decoder, self.last_doc_id) {
            Ok(posting) => {
                self.remaining -= 1;
                self.last_doc_id = posting.doc_id;
                Some(Ok(posting))
            }
            Err(e) => {
                self.remaining = 0;
                Some(Err(e))
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.remaining as usize))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(bytes: &[u8], pointer: u32, df: u32) -> Vec<Posting> {
        PostingIterator::new(&bytes[pointer as usize..], df)
            .collect::<Result<Vec<_>>>()
            .unwrap()
    }

    #[test]
    fn test_write_and_read_lists() {
        let mut writer = PostingWriter::new(Vec::new());

        let first = writer.start_term().unwrap();
        writer.add(1, 3).unwrap();
        writer.add(2, 5).unwrap();
        writer.add(7, 9).unwrap();
        assert_eq!(writer.current_document_frequency(), 3);

        let second = writer.start_term().unwrap();
        writer.add(300, 1).unwrap();

        let bytes = writer.finish().unwrap();
        assert_eq!(first, 0);
        // 6 values: one full group plus one padded group
        assert_eq!(second, (1 + 4) + (1 + 4));

        assert_eq!(
            collect(&bytes, first, 3),
            vec![Posting::new(1, 3), Posting::new(2, 5), Posting::new(7, 9)]
        );
        assert_eq!(collect(&bytes, second, 1), vec![Posting::new(300, 1)]);
    }

    #[test]
    fn test_rejects_invalid_input() {
        let mut writer = PostingWriter::new(Vec::new());
        assert!(matches!(
            writer.add(1, 1).unwrap_err(),
            RevdexError::InvalidOperation(_)
        ));

        writer.start_term().unwrap();
        assert!(matches!(
            writer.add(0, 1).unwrap_err(),
            RevdexError::InvalidArgument(_)
        ));
        assert!(matches!(
            writer.add(1, 0).unwrap_err(),
            RevdexError::InvalidArgument(_)
        ));

        writer.add(5, 1).unwrap();
        assert!(matches!(
            writer.add(5, 1).unwrap_err(),
            RevdexError::OrderingViolation { .. }
        ));
        assert!(matches!(
            writer.add(4, 1).unwrap_err(),
            RevdexError::OrderingViolation { .. }
        ));

        writer.finish_term().unwrap();
        assert!(matches!(
            writer.add(6, 1).unwrap_err(),
            RevdexError::InvalidOperation(_)
        ));
    }

    #[test]
    fn test_doc_ids_restart_per_term() {
        let mut writer = PostingWriter::new(Vec::new());
        writer.start_term().unwrap();
        writer.add(10, 1).unwrap();
        let pointer = writer.start_term().unwrap();
        writer.add(2, 1).unwrap();
        let bytes = writer.finish().unwrap();

        assert_eq!(collect(&bytes, pointer, 1), vec![Posting::new(2, 1)]);
    }

    #[test]
    fn test_truncated_list_is_corruption() {
        let mut writer = PostingWriter::new(Vec::new());
        writer.start_term().unwrap();
        writer.add(1, 1).unwrap();
        let bytes = writer.finish().unwrap();

        let results: Vec<_> = PostingIterator::new(&bytes[..], 2).collect();
        assert_eq!(results.len(), 2);
        assert!(results[0].is_ok());
        assert!(results[1].as_ref().unwrap_err().is_corruption());
    }

    #[test]
    fn test_empty_iterator() {
        let mut iter = PostingIterator::<&[u8]>::empty();
        assert!(iter.next().is_none());
        assert_eq!(iter.remaining(), 0);
    }
}
