//! Single-pass in-memory inversion and segment merging.
//!
//! The [`inverter::SpimiInverter`] drains a doc-ordered token stream into
//! term-sorted [`inverter::InvertedBlock`]s, each bounded by a memory policy
//! and written out as one segment file. The [`merger::SegmentMerger`] then
//! folds all segments into the final dictionary in a single pass.

use crate::error::Result;
use crate::index::Posting;

pub mod inverter;
pub mod merger;
pub mod segment;

pub use inverter::{InvertedBlock, SpimiInverter, TermOccurrence};
pub use merger::{MergeStats, SegmentMerger};
pub use segment::{SegmentReader, SegmentStats, write_segment};

/// A term-ordered sequence of posting lists that can be read once.
///
/// A source starts positioned before its first list; call
/// [`advance_to_next_posting_list`](PostingSource::advance_to_next_posting_list)
/// to load it.
pub trait PostingSource {
    /// Term of the current posting list.
    fn current_term(&self) -> &[u8];

    /// Length of the current posting list.
    fn current_document_frequency(&self) -> u32;

    /// Whether the current list has postings left.
    fn has_next(&self) -> bool;

    /// Next posting of the current list, `None` once it is drained.
    fn next_posting(&mut self) -> Result<Option<Posting>>;

    /// Move to the next list, skipping whatever is left of the current one.
    ///
    /// Returns `false` when the source is exhausted.
    fn advance_to_next_posting_list(&mut self) -> Result<bool>;
}
