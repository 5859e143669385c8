//! Read access to a finished index.

use std::io::{Seek, SeekFrom};
use std::sync::Arc;

use crate::codec::GroupVarintDecoder;
use crate::error::{Result, RevdexError};
use crate::index::dictionary::{Dictionary, DictionaryIter, TermInfo};
use crate::index::posting::{Posting, PostingIterator, decode_posting};
use crate::index::{IndexStats, POSTINGS_FILE};
use crate::storage::{Storage, StorageInput};

/// Posting iterator over a storage input.
pub type StoragePostings = PostingIterator<Box<dyn StorageInput>>;

/// A read-only view of an index directory.
///
/// The dictionary is held in memory and every posting iterator opens its own
/// input, so one reader can be shared between threads.
#[derive(Debug)]
pub struct IndexReader {
    storage: Arc<dyn Storage>,
    stats: IndexStats,
    dictionary: Dictionary,
    postings_size: u64,
}

impl IndexReader {
    /// Open the index stored in `storage`.
    pub fn open(storage: Arc<dyn Storage>) -> Result<Self> {
        let stats = IndexStats::load(storage.as_ref())?;
        let dictionary = Dictionary::load(storage.as_ref(), stats.unique_term_count)?;
        let postings_size = storage.file_size(POSTINGS_FILE)?;

        if let Some((index, entry)) = (0..dictionary.len())
            .filter_map(|i| dictionary.entry(i).map(|e| (i, e)))
            .find(|(_, e)| e.posting_pointer as u64 >= postings_size)
        {
            return Err(RevdexError::corrupt_index(format!(
                "term {index} points at byte {} of a {postings_size} byte postings file",
                entry.posting_pointer
            )));
        }

        log::debug!(
            "Opened index with {} terms and {} tokens",
            stats.unique_term_count,
            stats.total_token_count
        );

        Ok(IndexReader {
            storage,
            stats,
            dictionary,
            postings_size,
        })
    }

    pub fn stats(&self) -> IndexStats {
        self.stats
    }

    pub fn dictionary(&self) -> &Dictionary {
        &self.dictionary
    }

    /// Sum of all term frequencies in the collection.
    pub fn total_token_count(&self) -> u32 {
        self.stats.total_token_count
    }

    /// Number of distinct terms.
    pub fn unique_term_count(&self) -> u32 {
        self.stats.unique_term_count
    }

    /// Dictionary information for `term`, or `None` if it is not indexed.
    pub fn lookup_term(&self, term: &[u8]) -> Result<Option<TermInfo>> {
        self.dictionary.lookup(term)
    }

    /// Iterate the posting list stored at `posting_pointer`.
    pub fn open_posting_list(
        &self,
        posting_pointer: u32,
        document_frequency: u32,
    ) -> Result<StoragePostings> {
        if document_frequency == 0 {
            return Ok(PostingIterator::empty());
        }
        if posting_pointer as u64 >= self.postings_size {
            return Err(RevdexError::corrupt_index(format!(
                "posting pointer {posting_pointer} is past the end of the postings file"
            )));
        }

        let mut input = self.storage.open_input(POSTINGS_FILE)?;
        input.seek(SeekFrom::Start(posting_pointer as u64))?;
        Ok(PostingIterator::new(input, document_frequency))
    }

    /// Postings of `term`; empty when the term is unknown.
    pub fn postings(&self, term: &[u8]) -> Result<StoragePostings> {
        match self.lookup_term(term)? {
            Some(info) => self.open_posting_list(info.posting_pointer, info.document_frequency),
            None => Ok(PostingIterator::empty()),
        }
    }

    /// Number of documents containing `term`, zero when it is unknown.
    pub fn document_frequency(&self, term: &[u8]) -> Result<u32> {
        Ok(self
            .lookup_term(term)?
            .map_or(0, |info| info.document_frequency))
    }

    /// Number of occurrences of `term` across the collection.
    pub fn collection_frequency(&self, term: &[u8]) -> Result<u64> {
        let mut total = 0u64;
        for posting in self.postings(term)? {
            total += posting?.freq as u64;
        }
        Ok(total)
    }

    /// All terms with their dictionary information, in term order.
    pub fn terms(&self) -> DictionaryIter<'_> {
        self.dictionary.iter()
    }

    /// Every `(term, posting)` pair in term then doc id order.
    ///
    /// Reads the postings file front to back in a single pass.
    pub fn occurrences(&self) -> Result<Occurrences<'_>> {
        let input = self.storage.open_input(POSTINGS_FILE)?;
        Ok(Occurrences {
            terms: self.dictionary.iter(),
            decoder: GroupVarintDecoder::new(input),
            term: &[],
            remaining: 0,
            last_doc_id: 0,
        })
    }
}

/// Sequential iterator returned by [`IndexReader::occurrences`].
#[derive(Debug)]
pub struct Occurrences<'a> {
    terms: DictionaryIter<'a>,
    decoder: GroupVarintDecoder<Box<dyn StorageInput>>,
    term: &'a [u8],
    remaining: u32,
    last_doc_id: u32,
}

impl<'a> Iterator for Occurrences<'a> {
    type Item = Result<(&'a [u8], Posting)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            let (term, info) = match self.terms.next()? {
                Ok(next) => next,
                Err(e) => return Some(Err(e)),
            };
            // Each list starts on a fresh group
            self.decoder.reset();
            self.term = term;
            self.remaining = info.document_frequency;
            self.last_doc_id = 0;
        }

        match decode_posting(&mut self.decoder, self.last_doc_id) {
            Ok(posting) => {
                self.remaining -= 1;
                self.last_doc_id = posting.doc_id;
                Some(Ok((self.term, posting)))
            }
            Err(e) => {
                // Stop after the first corrupt list
                self.remaining = 0;
                while self.terms.next().is_some() {}
                Some(Err(e))
            }
        }
    }
}
