//! Temporary segment files produced by one inversion pass.
//!
//! A segment is a sequence of posting lists in ascending term order:
//!
//! ```text
//! term_length:u32 term:[u8] document_frequency:u32 postings...
//! ```
//!
//! where `postings` are group varint `(gap, freq)` pairs padded to a group
//! boundary. The file simply ends after the last list.

use std::io::{Read, Write};

use crate::codec::{GroupVarintDecoder, GroupVarintEncoder};
use crate::error::{BuildStage, Result, RevdexError};
use crate::index::Posting;
use crate::index::posting::decode_posting;
use crate::spimi::PostingSource;
use crate::storage::{StructReader, StructWriter};

/// Counts of what was written to one segment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SegmentStats {
    pub terms: usize,
    pub postings: usize,
    pub bytes: u64,
}

/// Write term-sorted posting lists as a segment.
pub fn write_segment<'a, W, I>(writer: W, lists: I) -> Result<(W, SegmentStats)>
where
    W: Write,
    I: IntoIterator<Item = (&'a [u8], &'a [Posting])>,
{
    let mut writer = StructWriter::new(writer);
    let mut stats = SegmentStats::default();

    for (term, postings) in lists {
        let document_frequency = u32::try_from(postings.len()).map_err(|_| {
            RevdexError::resource_exhausted(format!(
                "{} postings exceed a 32-bit document frequency",
                postings.len()
            ))
        })?;
        writer.write_bytes(term)?;
        writer.write_u32(document_frequency)?;

        let mut encoder = GroupVarintEncoder::new(writer.get_mut());
        let mut last_doc_id = 0;
        for posting in postings {
            if posting.doc_id <= last_doc_id {
                return Err(RevdexError::ordering(
                    BuildStage::Inversion,
                    format!(
                        "doc {} after doc {last_doc_id} for term {:?}",
                        posting.doc_id,
                        String::from_utf8_lossy(term)
                    ),
                ));
            }
            encoder.write(posting.doc_id - last_doc_id)?;
            encoder.write(posting.freq)?;
            last_doc_id = posting.doc_id;
        }
        encoder.finish_group()?;

        stats.bytes += encoder.bytes_written();
        stats.terms += 1;
        stats.postings += postings.len();
    }

    stats.bytes += writer.position();
    writer.flush()?;
    Ok((writer.into_inner(), stats))
}

/// Reads a segment list by list.
#[derive(Debug)]
pub struct SegmentReader<R: Read> {
    decoder: GroupVarintDecoder<R>,
    term: Vec<u8>,
    document_frequency: u32,
    remaining: u32,
    last_doc_id: u32,
    exhausted: bool,
}

impl<R: Read> SegmentReader<R> {
    pub fn new(reader: R) -> Self {
        SegmentReader {
            decoder: GroupVarintDecoder::new(reader),
            term: Vec::new(),
            document_frequency: 0,
            remaining: 0,
            last_doc_id: 0,
            exhausted: false,
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    fn read_header(&mut self) -> Result<bool> {
        let mut header = StructReader::new(self.decoder.get_mut());
        let Some(term_length) = header.try_read_u32()? else {
            return Ok(false);
        };
        let term = header.read_raw(term_length as usize)?;
        let document_frequency = header.read_u32()?;

        if document_frequency == 0 {
            return Err(RevdexError::corrupt_index(format!(
                "segment term {:?} has an empty posting list",
                String::from_utf8_lossy(&term)
            )));
        }
        if !self.term.is_empty() && term <= self.term {
            return Err(RevdexError::corrupt_index(format!(
                "segment term {:?} follows {:?}",
                String::from_utf8_lossy(&term),
                String::from_utf8_lossy(&self.term)
            )));
        }

        self.term = term;
        self.document_frequency = document_frequency;
        self.remaining = document_frequency;
        self.last_doc_id = 0;
        Ok(true)
    }
}

impl<R: Read> PostingSource for SegmentReader<R> {
    fn current_term(&self) -> &[u8] {
        &self.term
    }

    fn current_document_frequency(&self) -> u32 {
        self.document_frequency
    }

    fn has_next(&self) -> bool {
        self.remaining > 0
    }

    fn next_posting(&mut self) -> Result<Option<Posting>> {
        if self.remaining == 0 {
            return Ok(None);
        }
        let posting = decode_posting(&mut self.decoder, self.last_doc_id)?;
        self.remaining -= 1;
        self.last_doc_id = posting.doc_id;
        Ok(Some(posting))
    }

    fn advance_to_next_posting_list(&mut self) -> Result<bool> {
        if self.exhausted {
            return Ok(false);
        }
        while self.next_posting()?.is_some() {}

        // The header starts right after the previous list's padding
        self.decoder.reset();
        if !self.read_header()? {
            self.exhausted = true;
            self.remaining = 0;
            return Ok(false);
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<u8> {
        let abc = [Posting::new(1, 3), Posting::new(2, 5), Posting::new(7, 9)];
        let bb = [Posting::new(2, 4), Posting::new(10, 15)];
        let lists = vec![(&b"abc"[..], &abc[..]), (&b"bb"[..], &bb[..])];
        let (bytes, stats) = write_segment(Vec::new(), lists).unwrap();
        assert_eq!(stats.terms, 2);
        assert_eq!(stats.postings, 5);
        assert_eq!(stats.bytes, bytes.len() as u64);
        bytes
    }

    fn drain<S: PostingSource>(source: &mut S) -> Vec<(u32, u32)> {
        let mut postings = Vec::new();
        while let Some(p) = source.next_posting().unwrap() {
            postings.push((p.doc_id, p.freq));
        }
        postings
    }

    #[test]
    fn test_read_segment() {
        let bytes = sample();
        let mut reader = SegmentReader::new(&bytes[..]);

        assert!(reader.advance_to_next_posting_list().unwrap());
        assert_eq!(reader.current_term(), b"abc");
        assert_eq!(reader.current_document_frequency(), 3);
        assert!(reader.has_next());
        assert_eq!(drain(&mut reader), vec![(1, 3), (2, 5), (7, 9)]);
        assert!(!reader.has_next());

        assert!(reader.advance_to_next_posting_list().unwrap());
        assert_eq!(reader.current_term(), b"bb");
        assert_eq!(drain(&mut reader), vec![(2, 4), (10, 15)]);

        assert!(!reader.advance_to_next_posting_list().unwrap());
        assert!(reader.is_exhausted());
        assert!(!reader.advance_to_next_posting_list().unwrap());
    }

    #[test]
    fn test_advance_skips_undrained_postings() {
        let bytes = sample();
        let mut reader = SegmentReader::new(&bytes[..]);

        assert!(reader.advance_to_next_posting_list().unwrap());
        assert_eq!(reader.next_posting().unwrap(), Some(Posting::new(1, 3)));
        assert!(reader.advance_to_next_posting_list().unwrap());
        assert_eq!(reader.current_term(), b"bb");
        assert_eq!(drain(&mut reader), vec![(2, 4), (10, 15)]);
    }

    #[test]
    fn test_empty_segment() {
        let mut reader = SegmentReader::new(&[][..]);
        assert!(!reader.advance_to_next_posting_list().unwrap());
    }

    #[test]
    fn test_truncated_segment_is_corruption() {
        let bytes = sample();

        let mut reader = SegmentReader::new(&bytes[..bytes.len() - 2]);
        reader.advance_to_next_posting_list().unwrap();
        let err = loop {
            match reader.advance_to_next_posting_list() {
                Ok(true) => continue,
                Ok(false) => panic!("truncation was not detected"),
                Err(e) => break e,
            }
        };
        assert!(err.is_corruption());

        // Cut inside the first header
        let mut reader = SegmentReader::new(&bytes[..5]);
        assert!(reader.advance_to_next_posting_list().unwrap_err().is_corruption());
    }
}
