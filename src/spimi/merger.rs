//! K-way merge of segments into one dictionary.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::error::{BuildStage, Result, RevdexError};
use crate::index::PostingSink;
use crate::spimi::PostingSource;

/// Counts describing one merge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeStats {
    /// Number of input sources.
    pub segments: usize,
    /// Distinct terms written to the sink.
    pub terms: usize,
    /// Postings written to the sink.
    pub postings: usize,
    /// Postings that were folded into another segment's posting for the
    /// same term and document.
    pub coalesced: usize,
}

/// A source positioned at `term`.
#[derive(Debug, PartialEq, Eq)]
struct TermHead {
    term: Vec<u8>,
    source: usize,
}

impl PartialOrd for TermHead {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TermHead {
    fn cmp(&self, other: &Self) -> Ordering {
        // Min-heap: smallest term first, lower source id on ties
        other
            .term
            .cmp(&self.term)
            .then_with(|| other.source.cmp(&self.source))
    }
}

/// The next posting of one source within the current term.
#[derive(Debug, PartialEq, Eq)]
struct DocHead {
    doc_id: u32,
    freq: u32,
    source: usize,
}

impl PartialOrd for DocHead {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DocHead {
    fn cmp(&self, other: &Self) -> Ordering {
        // Min-heap: lower doc IDs come first
        other
            .doc_id
            .cmp(&self.doc_id)
            .then_with(|| other.source.cmp(&self.source))
    }
}

/// Merges term-ordered posting sources into a [`PostingSink`].
///
/// Terms present in several sources get one combined posting list. Postings
/// of the same document coming from different sources are coalesced by
/// summing their frequencies, since one document's occurrences may straddle
/// an inverter flush.
#[derive(Debug, Default)]
pub struct SegmentMerger {
    stats: MergeStats,
}

impl SegmentMerger {
    pub fn new() -> Self {
        SegmentMerger::default()
    }

    /// Merge `sources` into `sink`.
    ///
    /// Any failure, from a source or from the sink, is tagged with
    /// [`BuildStage::Merge`].
    pub fn merge<S, K>(sources: Vec<S>, sink: &mut K) -> Result<MergeStats>
    where
        S: PostingSource,
        K: PostingSink + ?Sized,
    {
        let mut merger = SegmentMerger::new();
        merger
            .run(sources, sink)
            .map_err(|e| e.with_stage(BuildStage::Merge))?;
        Ok(merger.stats)
    }

    fn run<S, K>(&mut self, mut sources: Vec<S>, sink: &mut K) -> Result<()>
    where
        S: PostingSource,
        K: PostingSink + ?Sized,
    {
        self.stats.segments = sources.len();
        log::info!("Merging {} segments", sources.len());

        let mut terms = BinaryHeap::with_capacity(sources.len());
        for (id, source) in sources.iter_mut().enumerate() {
            push_term(&mut terms, source, id)?;
        }

        let mut group = Vec::with_capacity(sources.len());
        let mut docs = BinaryHeap::with_capacity(sources.len());

        while let Some(head) = terms.pop() {
            group.clear();
            group.push(head.source);
            while terms.peek().is_some_and(|next: &TermHead| next.term == head.term) {
                if let Some(next) = terms.pop() {
                    group.push(next.source);
                }
            }

            sink.begin_term(&head.term)?;
            self.stats.terms += 1;

            for &id in &group {
                push_doc(&mut docs, &mut sources[id], id)?;
            }
            while let Some(min) = docs.pop() {
                let mut freq = min.freq;
                push_doc(&mut docs, &mut sources[min.source], min.source)?;

                while docs.peek().is_some_and(|next: &DocHead| next.doc_id == min.doc_id) {
                    let Some(same) = docs.pop() else { break };
                    freq = freq.checked_add(same.freq).ok_or_else(|| {
                        RevdexError::resource_exhausted(format!(
                            "frequency of doc {} for term {:?} overflows 32 bits",
                            min.doc_id,
                            String::from_utf8_lossy(&head.term)
                        ))
                    })?;
                    self.stats.coalesced += 1;
                    push_doc(&mut docs, &mut sources[same.source], same.source)?;
                }

                sink.add_posting(min.doc_id, freq)?;
                self.stats.postings += 1;
            }

            for &id in &group {
                push_term(&mut terms, &mut sources[id], id)?;
            }
        }

        log::info!(
            "Merged {} segments into {} terms and {} postings ({} coalesced)",
            self.stats.segments,
            self.stats.terms,
            self.stats.postings,
            self.stats.coalesced
        );
        Ok(())
    }
}

fn push_term<S: PostingSource>(
    heap: &mut BinaryHeap<TermHead>,
    source: &mut S,
    id: usize,
) -> Result<()> {
    if source.advance_to_next_posting_list()? {
        heap.push(TermHead {
            term: source.current_term().to_vec(),
            source: id,
        });
    }
    Ok(())
}

fn push_doc<S: PostingSource>(
    heap: &mut BinaryHeap<DocHead>,
    source: &mut S,
    id: usize,
) -> Result<()> {
    if let Some(posting) = source.next_posting()? {
        heap.push(DocHead {
            doc_id: posting.doc_id,
            freq: posting.freq,
            source: id,
        });
    }
    Ok(())
}
