//! Bounded-memory inversion of a token stream.

use std::io::Write;
use std::mem::size_of;

use ahash::AHashMap;

use crate::error::{BuildStage, Result, RevdexError};
use crate::index::Posting;
use crate::policy::{BufferUsage, MemoryPolicy};
use crate::spimi::segment::{SegmentStats, write_segment};

/// Rough heap cost of one hash map entry besides the term bytes.
const TERM_OVERHEAD: usize = size_of::<Vec<u8>>() + size_of::<Vec<Posting>>() + 16;

/// One term of one document, with its frequency in that document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TermOccurrence {
    pub term: Vec<u8>,
    pub doc_id: u32,
    pub freq: u32,
}

impl TermOccurrence {
    pub fn new(term: impl Into<Vec<u8>>, doc_id: u32, freq: u32) -> Self {
        TermOccurrence {
            term: term.into(),
            doc_id,
            freq,
        }
    }
}

/// The term-sorted posting lists accumulated by one inversion pass.
#[derive(Debug, Default)]
pub struct InvertedBlock {
    lists: Vec<(Vec<u8>, Vec<Posting>)>,
    postings: usize,
    tokens: u64,
}

impl InvertedBlock {
    /// Number of distinct terms.
    pub fn len(&self) -> usize {
        self.lists.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lists.is_empty()
    }

    pub fn posting_count(&self) -> usize {
        self.postings
    }

    /// Sum of the frequencies of all postings.
    pub fn token_count(&self) -> u64 {
        self.tokens
    }

    pub fn lists(&self) -> impl Iterator<Item = (&[u8], &[Posting])> {
        self.lists
            .iter()
            .map(|(term, postings)| (term.as_slice(), postings.as_slice()))
    }

    /// Serialize the block in segment format.
    pub fn write_segment<W: Write>(&self, writer: W) -> Result<(W, SegmentStats)> {
        write_segment(writer, self.lists())
    }
}

/// Single-pass in-memory inverter.
///
/// Each call to [`invert_block`](SpimiInverter::invert_block) consumes
/// occurrences until the memory policy reports the buffer full, then returns
/// the buffered postings sorted by term. Document ids must never decrease
/// across the whole stream, including across blocks.
#[derive(Debug)]
pub struct SpimiInverter {
    policy: Box<dyn MemoryPolicy>,
    last_doc_id: u32,
    blocks: usize,
}

impl SpimiInverter {
    pub fn new(policy: Box<dyn MemoryPolicy>) -> Self {
        SpimiInverter {
            policy,
            last_doc_id: 0,
            blocks: 0,
        }
    }

    /// Number of blocks produced so far.
    pub fn blocks(&self) -> usize {
        self.blocks
    }

    /// Invert the next block of `tokens`, or `None` once they are exhausted.
    ///
    /// At least one occurrence is accepted per block, so a policy that never
    /// has capacity still makes progress.
    pub fn invert_block<I>(&mut self, tokens: &mut I) -> Result<Option<InvertedBlock>>
    where
        I: Iterator<Item = Result<TermOccurrence>>,
    {
        let mut dictionary: AHashMap<Vec<u8>, Vec<Posting>> = AHashMap::new();
        let mut usage = BufferUsage::default();
        let mut tokens_seen = 0u64;

        while usage.elements == 0 || self.policy.has_capacity(&usage) {
            let Some(occurrence) = tokens.next() else {
                break;
            };
            let occurrence = occurrence?;
            self.check(&occurrence)?;
            self.last_doc_id = occurrence.doc_id;
            tokens_seen += occurrence.freq as u64;

            match dictionary.get_mut(occurrence.term.as_slice()) {
                Some(postings) => match postings.last_mut() {
                    // Same term repeated within one document
                    Some(last) if last.doc_id == occurrence.doc_id => {
                        last.freq = last.freq.checked_add(occurrence.freq).ok_or_else(|| {
                            RevdexError::resource_exhausted(format!(
                                "frequency of doc {} overflows 32 bits",
                                occurrence.doc_id
                            ))
                        })?;
                    }
                    _ => {
                        postings.push(Posting::new(occurrence.doc_id, occurrence.freq));
                        usage.elements += 1;
                        usage.approx_bytes += size_of::<Posting>();
                    }
                },
                None => {
                    usage.elements += 1;
                    usage.approx_bytes +=
                        occurrence.term.len() + TERM_OVERHEAD + size_of::<Posting>();
                    dictionary.insert(
                        occurrence.term,
                        vec![Posting::new(occurrence.doc_id, occurrence.freq)],
                    );
                }
            }
        }

        self.policy.reset();
        if dictionary.is_empty() {
            return Ok(None);
        }

        let mut lists: Vec<(Vec<u8>, Vec<Posting>)> = dictionary.into_iter().collect();
        lists.sort_unstable_by(|a, b| a.0.cmp(&b.0));
        self.blocks += 1;

        log::debug!(
            "Inverted block {} with {} terms and {} postings ({})",
            self.blocks,
            lists.len(),
            usage.elements,
            self.policy.describe()
        );

        Ok(Some(InvertedBlock {
            lists,
            postings: usage.elements,
            tokens: tokens_seen,
        }))
    }

    fn check(&self, occurrence: &TermOccurrence) -> Result<()> {
        if occurrence.term.is_empty() {
            return Err(RevdexError::invalid_argument(format!(
                "empty term in doc {}",
                occurrence.doc_id
            )));
        }
        if occurrence.doc_id == 0 {
            return Err(RevdexError::invalid_argument(format!(
                "doc id 0 for term {:?}",
                String::from_utf8_lossy(&occurrence.term)
            )));
        }
        if occurrence.freq == 0 {
            return Err(RevdexError::invalid_argument(format!(
                "frequency 0 for term {:?} in doc {}",
                String::from_utf8_lossy(&occurrence.term),
                occurrence.doc_id
            )));
        }
        if occurrence.doc_id < self.last_doc_id {
            return Err(RevdexError::ordering(
                BuildStage::Inversion,
                format!(
                    "doc {} after doc {} (term {:?})",
                    occurrence.doc_id,
                    self.last_doc_id,
                    String::from_utf8_lossy(&occurrence.term)
                ),
            ));
        }
        Ok(())
    }
}
