//! The persisted inverted index.
//!
//! An index directory holds four files:
//!
//! - [`TERMS_FILE`]: raw concatenated term bytes
//! - [`POSTINGS_FILE`]: group varint `(gap, freq)` streams, one per term
//! - [`DICTIONARY_FILE`]: blocked dictionary elements
//! - [`STATS_FILE`]: total token count and unique term count as int32
//!
//! [`writer::IndexWriter`] builds them from a token stream and
//! [`reader::IndexReader`] serves lookups once they are written.

use serde::Serialize;

use crate::error::Result;

pub mod dictionary;
pub mod posting;
pub mod reader;
pub mod terms;
pub mod writer;

pub use dictionary::{Dictionary, DictionaryWriter, TermInfo};
pub use posting::{Posting, PostingIterator};
pub use reader::IndexReader;
pub use writer::{BuildSummary, IndexWriter, IndexWriterConfig};

/// Concatenated term text.
pub const TERMS_FILE: &str = "terms.bin";

/// Compressed posting lists.
pub const POSTINGS_FILE: &str = "postings.bin";

/// Blocked dictionary elements.
pub const DICTIONARY_FILE: &str = "dictionary.bin";

/// Collection statistics.
pub const STATS_FILE: &str = "stats.bin";

/// All files making up a finished index.
pub const INDEX_FILES: [&str; 4] = [TERMS_FILE, POSTINGS_FILE, DICTIONARY_FILE, STATS_FILE];

/// Collection-wide statistics stored alongside the dictionary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct IndexStats {
    /// Sum of every posting's frequency.
    pub total_token_count: u32,
    /// Number of dictionary entries.
    pub unique_term_count: u32,
}

/// Receives posting lists in ascending term order.
///
/// Each term is announced with `begin_term`, followed by its postings in
/// ascending doc id order.
pub trait PostingSink {
    fn begin_term(&mut self, term: &[u8]) -> Result<()>;

    fn add_posting(&mut self, doc_id: u32, freq: u32) -> Result<()>;
}

impl<S: PostingSink + ?Sized> PostingSink for &mut S {
    fn begin_term(&mut self, term: &[u8]) -> Result<()> {
        (**self).begin_term(term)
    }

    fn add_posting(&mut self, doc_id: u32, freq: u32) -> Result<()> {
        (**self).add_posting(doc_id, freq)
    }
}
